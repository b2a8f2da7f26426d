//! Record codec: worksheet rows <-> semantic records

use super::header::{
    COMPOSITE_SEPARATOR, HeaderPair, is_general_field,
    order_general_information, position_of,
};
use super::record::Record;
use super::workbook::Sheet;

/// Header layout of a worksheet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMode {
    /// Row 1 holds field names, data from row 2
    SingleRow,
    /// Row 1 holds sections, row 2 holds fields, data from row 3
    TwoRow,
}

impl HeaderMode {
    /// Zero-based index of the first data row
    pub fn data_start(self) -> usize {
        match self {
            HeaderMode::SingleRow => 1,
            HeaderMode::TwoRow => 2,
        }
    }

    /// Zero-based index of the row holding field names
    pub fn field_row(self) -> usize {
        match self {
            HeaderMode::SingleRow => 0,
            HeaderMode::TwoRow => 1,
        }
    }
}

/// A decoded worksheet
#[derive(Debug, Clone)]
pub struct DecodedSheet {
    pub mode: HeaderMode,
    pub header_pairs: Vec<HeaderPair>,
    /// Physical column of each header pair
    pub columns: Vec<usize>,
    pub records: Vec<Record>,
    /// Physical row of each record
    pub rows: Vec<usize>,
}

impl DecodedSheet {
    /// Physical column of a header, ignoring case
    pub fn column_of(&self, pair: &HeaderPair) -> Option<usize> {
        position_of(&self.header_pairs, pair).map(|i| self.columns[i])
    }
}

/// Detect the header layout: two-row iff physical row 2 has any populated cell
pub fn detect_mode(sheet: &Sheet) -> HeaderMode {
    if sheet.row_is_empty(1) {
        HeaderMode::SingleRow
    } else {
        HeaderMode::TwoRow
    }
}

/// Decode a worksheet, auto-detecting the header layout
pub fn decode(sheet: &Sheet) -> DecodedSheet {
    decode_with_mode(sheet, detect_mode(sheet))
}

pub fn decode_with_mode(sheet: &Sheet, mode: HeaderMode) -> DecodedSheet {
    let width = sheet.width();
    let mut header_pairs = Vec::new();
    let mut columns = Vec::new();

    for col in 0..width {
        let pair = match mode {
            HeaderMode::SingleRow => HeaderPair::plain(sheet.cell(0, col)),
            HeaderMode::TwoRow => {
                let section = sheet.cell(0, col);
                let field = sheet.cell(1, col);
                if field.trim().is_empty() {
                    HeaderPair::plain(section)
                } else {
                    HeaderPair::new(section, field)
                }
            }
        };
        if pair.field.is_empty() || position_of(&header_pairs, &pair).is_some() {
            continue;
        }
        header_pairs.push(pair);
        columns.push(col);
    }

    let mut records = Vec::new();
    let mut rows = Vec::new();
    for row in mode.data_start()..sheet.rows.len() {
        if sheet.row_is_empty(row) {
            continue;
        }
        let mut record = Record::new();
        for (pair, &col) in header_pairs.iter().zip(&columns) {
            let value = sheet.cell(row, col);
            let plain_taken = record
                .get(&pair.field)
                .is_some_and(|v| !v.trim().is_empty());
            if !plain_taken {
                record.insert(pair.field.clone(), value);
            }
            record.insert(pair.composite_key(), value);
        }
        records.push(record);
        rows.push(row);
    }

    DecodedSheet {
        mode,
        header_pairs,
        columns,
        records,
        rows,
    }
}

/// Resolve a record key to the header it writes to
pub fn pair_for_key(key: &str, pairs: &[HeaderPair]) -> HeaderPair {
    let candidate = HeaderPair::from_key(key).normalized();
    if let Some(i) = position_of(pairs, &candidate) {
        return pairs[i].clone();
    }
    if candidate.section.is_empty() {
        if let Some(existing) = pairs
            .iter()
            .find(|p| p.field.eq_ignore_ascii_case(&candidate.field))
        {
            return existing.clone();
        }
        if is_general_field(&candidate.field) {
            return HeaderPair::general(candidate.field);
        }
    }
    candidate
}

/// Keys with a section separator first, then plain keys whose field no
/// composite key of the record already names
fn keys_composite_first(record: &Record) -> impl Iterator<Item = (&str, &str)> {
    let composite = record
        .iter()
        .filter(|(k, _)| k.contains(COMPOSITE_SEPARATOR));
    let plain = record
        .iter()
        .filter(|(k, _)| !k.contains(COMPOSITE_SEPARATOR))
        .filter(move |(k, _)| !has_composite_for(record, k));
    composite.chain(plain)
}

fn has_composite_for(record: &Record, field: &str) -> bool {
    record.keys().any(|k| {
        k.contains(COMPOSITE_SEPARATOR)
            && HeaderPair::from_key(k)
                .field
                .eq_ignore_ascii_case(field.trim())
    })
}

/// Lay a record out along `pairs`; first non-empty value per column wins
pub fn project(record: &Record, pairs: &[HeaderPair]) -> Vec<String> {
    let mut cells = vec![String::new(); pairs.len()];
    for (key, value) in keys_composite_first(record) {
        let pair = pair_for_key(key, pairs);
        if let Some(i) = position_of(pairs, &pair) {
            if cells[i].trim().is_empty() {
                cells[i] = value.to_string();
            }
        }
    }
    cells
}

/// Rewrite both header rows of a sheet
pub fn write_header_rows(sheet: &mut Sheet, pairs: &[HeaderPair]) {
    if sheet.rows.len() < 2 {
        sheet.rows.resize_with(2, Vec::new);
    }
    sheet.rows[0] = pairs.iter().map(|p| p.section.clone()).collect();
    sheet.rows[1] = pairs.iter().map(|p| p.field.clone()).collect();
}

/// Append records to a sheet under the two-row header.
///
/// Existing headers keep their order and unseen ones are appended, after
/// which the General Information columns are reordered. Existing data rows
/// are re-laid along the merged header. Returns the final header.
pub fn write_records(sheet: &mut Sheet, records: &[Record]) -> Vec<HeaderPair> {
    let (mut pairs, existing) = if sheet.used_rows() == 0 {
        (Vec::new(), Vec::new())
    } else {
        let decoded = decode(sheet);
        (decoded.header_pairs, decoded.records)
    };

    for record in records {
        for (key, _) in keys_composite_first(record) {
            let pair = pair_for_key(key, &pairs);
            if position_of(&pairs, &pair).is_none() {
                pairs.push(pair);
            }
        }
    }
    order_general_information(&mut pairs);

    sheet.rows.clear();
    write_header_rows(sheet, &pairs);
    for record in existing.iter().chain(records) {
        if record.is_blank() {
            continue;
        }
        sheet.rows.push(project(record, &pairs));
    }

    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(entries: &[(&str, &str)]) -> Record {
        entries.iter().copied().collect()
    }

    #[test]
    fn test_single_row_header_when_row_two_is_blank() {
        let mut sheet = Sheet::with_header("Upload", &["Station ID", "Name"]);
        sheet.rows.push(vec![String::new(); 2]);
        sheet.rows.push(vec!["A1".into(), "Alpha".into()]);
        assert_eq!(detect_mode(&sheet), HeaderMode::SingleRow);

        let decoded = decode(&sheet);
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0].get("Name"), Some("Alpha"));
        assert_eq!(decoded.rows, vec![2]);
    }

    #[test]
    fn test_populated_row_two_means_two_row_header() {
        let mut sheet = Sheet::with_header("Gauge ON", &["Cable", "Pipe"]);
        sheet.push_row(vec!["Length".into(), "Diameter".into()]);
        sheet.push_row(vec!["1".into(), "2".into()]);
        assert_eq!(detect_mode(&sheet), HeaderMode::TwoRow);

        let decoded = decode(&sheet);
        assert_eq!(decoded.records.len(), 1);
        assert_eq!(decoded.records[0].get("Cable – Length"), Some("1"));
        assert_eq!(decoded.records[0].get("Pipe – Diameter"), Some("2"));

        let header_only = Sheet::with_header("Upload", &["Station ID", "Name"]);
        assert_eq!(detect_mode(&header_only), HeaderMode::SingleRow);
        assert!(decode(&header_only).records.is_empty());
    }

    #[test]
    fn test_decode_two_row_stores_plain_and_composite() {
        let mut sheet = Sheet::new("Cableway BC");
        write_header_rows(
            &mut sheet,
            &[
                HeaderPair::general("Station ID"),
                HeaderPair::new("Cable", "Length"),
                HeaderPair::plain("Notes"),
            ],
        );
        sheet.rows.push(vec!["BC001".into(), "120".into(), "ok".into()]);
        sheet.rows.push(vec![String::new(); 3]);
        sheet.rows.push(vec!["BC002".into()]);

        let decoded = decode(&sheet);
        assert_eq!(decoded.mode, HeaderMode::TwoRow);
        assert_eq!(decoded.records.len(), 2);
        assert_eq!(decoded.rows, vec![2, 4]);

        let first = &decoded.records[0];
        assert_eq!(first.get("Length"), Some("120"));
        assert_eq!(first.get("Cable – Length"), Some("120"));
        assert_eq!(first.get("General Information – Station ID"), Some("BC001"));
        assert_eq!(first.get("Notes"), Some("ok"));
        assert_eq!(decoded.records[1].get("Length"), Some(""));
    }

    #[test]
    fn test_round_trip_sectioned_and_unsectioned() {
        let records = vec![
            record(&[
                ("General Information – Station ID", "BC001"),
                ("Cable – Length", "120"),
                ("Pipe – Length", "7"),
                ("Notes", "first"),
            ]),
            record(&[("Station ID", "BC002"), ("Notes", "second")]),
        ];
        let mut sheet = Sheet::new("Cableway BC");
        write_records(&mut sheet, &records);

        let decoded = decode(&sheet);
        assert_eq!(decoded.records.len(), 2);
        for (input, output) in records.iter().zip(&decoded.records) {
            for (key, value) in input.iter() {
                let pair = pair_for_key(key, &decoded.header_pairs);
                assert_eq!(output.get(&pair.composite_key()), Some(value), "{key}");
            }
        }
        assert_eq!(decoded.records[0].get("Pipe – Length"), Some("7"));
        assert_eq!(decoded.records[0].get("Cable – Length"), Some("120"));
    }

    #[test]
    fn test_write_records_coerces_asset_type_and_orders_general() {
        let mut sheet = Sheet::new("Cableway BC");
        let pairs = write_records(
            &mut sheet,
            &[record(&[
                ("Province", "BC"),
                ("Site Name", "Hope"),
                ("Structure Type", "Steel"),
                ("Asset Type", "Cableway"),
                ("Station ID", "BC001"),
            ])],
        );

        let keys: Vec<String> = pairs.iter().map(HeaderPair::composite_key).collect();
        assert_eq!(
            keys,
            vec![
                "General Information – Station ID",
                "General Information – Category",
                "Structure Type",
                "General Information – Site Name",
                "General Information – Province",
            ]
        );
        assert_eq!(sheet.cell(2, 1), "Cableway");
        assert_eq!(sheet.cell(2, 2), "Steel");
        assert_eq!(sheet.cell(2, 3), "Hope");
    }

    #[test]
    fn test_write_records_merges_with_existing_rows() {
        let mut sheet = Sheet::new("Cableway BC");
        write_records(
            &mut sheet,
            &[record(&[("Station ID", "BC001"), ("Cable – Length", "120")])],
        );
        write_records(
            &mut sheet,
            &[record(&[("Station ID", "BC002"), ("Cable – Gauge", "9")])],
        );

        let decoded = decode(&sheet);
        assert_eq!(decoded.header_pairs.len(), 3);
        assert_eq!(decoded.records[0].get("Station ID"), Some("BC001"));
        assert_eq!(decoded.records[0].get("Cable – Length"), Some("120"));
        assert_eq!(decoded.records[0].get("Cable – Gauge"), Some(""));
        assert_eq!(decoded.records[1].get("Cable – Gauge"), Some("9"));
    }

    #[test]
    fn test_relaid_rows_keep_same_named_fields_in_their_sections() {
        let mut sheet = Sheet::new("Cableway BC");
        write_header_rows(
            &mut sheet,
            &[
                HeaderPair::general("Station ID"),
                HeaderPair::new("Cable", "Length"),
                HeaderPair::new("Pipe", "Length"),
            ],
        );
        sheet.rows.push(vec!["BC001".into(), String::new(), "7".into()]);

        write_records(&mut sheet, &[record(&[("Station ID", "BC002")])]);

        let decoded = decode(&sheet);
        assert_eq!(decoded.records.len(), 2);
        let first = &decoded.records[0];
        assert_eq!(first.get("Station ID"), Some("BC001"));
        assert_eq!(first.get("Cable – Length"), Some(""));
        assert_eq!(first.get("Pipe – Length"), Some("7"));
        assert_eq!(decoded.records[1].get("Station ID"), Some("BC002"));
        assert_eq!(decoded.records[1].get("Pipe – Length"), Some(""));
    }

    #[test]
    fn test_general_information_order_is_stable_for_other_columns() {
        let mut sheet = Sheet::new("Gauge ON");
        write_header_rows(
            &mut sheet,
            &[
                HeaderPair::new("Cable", "Length"),
                HeaderPair::general("Site Name"),
                HeaderPair::plain("Notes"),
                HeaderPair::general("Category"),
                HeaderPair::general("Latitude"),
                HeaderPair::general("Station ID"),
            ],
        );
        sheet.rows.push(vec![
            "5".into(),
            "Hope".into(),
            "n".into(),
            "Gauge".into(),
            "49".into(),
            "G1".into(),
        ]);
        let pairs = write_records(&mut sheet, &[]);

        let fields: Vec<&str> = pairs.iter().map(|p| p.field.as_str()).collect();
        assert_eq!(
            fields,
            vec!["Length", "Station ID", "Notes", "Category", "Site Name", "Latitude"]
        );
        assert_eq!(sheet.cell(2, 1), "G1");
        assert_eq!(sheet.cell(2, 5), "49");
    }
}
