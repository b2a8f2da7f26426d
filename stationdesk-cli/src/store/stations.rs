//! Station workbooks: one per (company, location), one sheet per asset type

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{
    LocationKey, OperationResult, company_of, list_workbooks, location_of, same_text,
    sanitize_sheet_name,
};
use crate::excel::codec::{DecodedSheet, decode, write_records};
use crate::excel::header::{HeaderPair, is_category_alias, is_general_field, is_station_id_header};
use crate::excel::{Record, Sheet, Workbook};

const STATION_ID_KEYS: &[&str] = &["Station ID", "station_id", "StationID", "ID"];
const ASSET_TYPE_KEYS: &[&str] = &["Category", "Asset Type", "asset_type", "Type"];
const NAME_KEYS: &[&str] = &["Site Name", "Station Name", "Name"];
const PROVINCE_KEYS: &[&str] = &["Province", "State", "Region"];
const LAT_KEYS: &[&str] = &["Latitude", "Lat"];
const LON_KEYS: &[&str] = &["Longitude", "Long", "Lon"];
const STATUS_KEYS: &[&str] = &["Status"];

/// Update keys that name a standard column differently
const FIELD_ALIASES: &[(&str, &str)] = &[
    ("asset_type", "Category"),
    ("station_id", "Station ID"),
    ("stationid", "Station ID"),
    ("site_name", "Site Name"),
    ("station_name", "Station Name"),
    ("name", "Site Name"),
    ("lat", "Latitude"),
    ("lon", "Longitude"),
    ("long", "Longitude"),
    ("lng", "Longitude"),
];

/// A station row with its normalized projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationRecord {
    pub station_id: String,
    pub asset_type: String,
    pub name: String,
    pub province: String,
    pub lat: String,
    pub lon: String,
    pub status: String,
    pub location_file: String,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    pub fields: Record,
}

impl StationRecord {
    /// Project a decoded row; the asset type falls back to the sheet name
    pub fn from_record(fields: Record, sheet_name: &str, file: &Path, root: &Path) -> Self {
        let location = location_of(file);
        let pick = |keys: &[&str]| fields.first_non_empty(keys).unwrap_or("").trim().to_string();
        let asset_type = match fields.first_non_empty(ASSET_TYPE_KEYS) {
            Some(value) => value.trim().to_string(),
            None => asset_type_from_sheet(sheet_name, &location),
        };

        StationRecord {
            station_id: pick(STATION_ID_KEYS),
            asset_type,
            name: pick(NAME_KEYS),
            province: pick(PROVINCE_KEYS),
            lat: pick(LAT_KEYS),
            lon: pick(LON_KEYS),
            status: pick(STATUS_KEYS),
            location_file: file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            company: company_of(root, file),
            location: (!location.is_empty()).then_some(location),
            fields,
        }
    }

    /// Replace the fields and recompute the projection; attributes the new
    /// fields do not carry keep their current value
    pub fn set_fields(&mut self, fields: Record) {
        let pick = |keys: &[&str], current: &str| {
            fields
                .first_non_empty(keys)
                .unwrap_or(current)
                .trim()
                .to_string()
        };
        self.station_id = pick(STATION_ID_KEYS, &self.station_id);
        self.asset_type = pick(ASSET_TYPE_KEYS, &self.asset_type);
        self.name = pick(NAME_KEYS, &self.name);
        self.province = pick(PROVINCE_KEYS, &self.province);
        self.lat = pick(LAT_KEYS, &self.lat);
        self.lon = pick(LON_KEYS, &self.lon);
        self.status = pick(STATUS_KEYS, &self.status);
        self.fields = fields;
    }

    /// Latitude and longitude when both parse as finite numbers
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        let lat: f64 = self.lat.trim().parse().ok()?;
        let lon: f64 = self.lon.trim().parse().ok()?;
        (lat.is_finite() && lon.is_finite()).then_some((lat, lon))
    }
}

/// Asset type encoded in a `"<AssetType> <Location>"` sheet name
pub fn asset_type_from_sheet(sheet_name: &str, location: &str) -> String {
    let name = sheet_name.trim();
    let location = location.trim();
    if !location.is_empty() && name.len() > location.len() {
        let split = name.len() - location.len();
        if let (Some(head), Some(tail)) = (name.get(..split), name.get(split..)) {
            if tail.eq_ignore_ascii_case(location) && head.ends_with(' ') {
                return head.trim().to_string();
            }
        }
    }
    match name.rsplit_once(' ') {
        Some((head, _)) => head.trim().to_string(),
        None => name.to_string(),
    }
}

/// A station found in a workbook, with the sheet schema it lives under
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationView {
    pub station: StationRecord,
    pub sheet: String,
    #[serde(skip)]
    pub file: PathBuf,
    /// Physical row, zero-based
    pub row: usize,
    pub header_pairs: Vec<HeaderPair>,
}

/// Index into the decoded header of the Station ID column
fn station_id_index(decoded: &DecodedSheet) -> Option<usize> {
    decoded
        .header_pairs
        .iter()
        .position(|p| is_station_id_header(&p.field))
}

/// Decoded row whose Station ID matches
fn find_in_sheet(decoded: &DecodedSheet, station_id: &str) -> Option<usize> {
    let id_key = decoded.header_pairs[station_id_index(decoded)?].composite_key();
    decoded
        .records
        .iter()
        .position(|r| r.get(&id_key).is_some_and(|v| same_text(v, station_id)))
}

fn canonical_key(key: &str) -> String {
    let trimmed = key.trim();
    FIELD_ALIASES
        .iter()
        .find(|(alias, _)| trimmed.eq_ignore_ascii_case(alias))
        .map(|(_, field)| field.to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

/// Header a new column is created under
fn new_column_pair(key: &str, schema_hint: Option<&str>) -> HeaderPair {
    let pair = HeaderPair::from_key(key);
    if is_general_field(&pair.field) || is_category_alias(&pair.field) {
        return HeaderPair::general(pair.field).normalized();
    }
    if !pair.section.is_empty() {
        return pair;
    }
    match schema_hint.map(str::trim).filter(|h| !h.is_empty()) {
        Some(section) => HeaderPair::new(section, pair.field),
        None => pair,
    }
}

/// Apply an update to a field map the way `update_station` applies it to a
/// sheet row: existing keys are overwritten, unknown ones added
pub fn merge_fields(fields: &mut Record, updated: &Record, schema_hint: Option<&str>) {
    for (key, value) in updated.iter() {
        if key.trim().is_empty() {
            continue;
        }
        let canonical = canonical_key(key);
        let wanted = HeaderPair::from_key(&canonical).normalized();
        let targets: Vec<String> = fields
            .keys()
            .filter(|k| {
                let existing = HeaderPair::from_key(k);
                existing.same_as(&wanted)
                    || (existing.field.eq_ignore_ascii_case(&wanted.field)
                        && (wanted.section.is_empty() || existing.section.is_empty()))
            })
            .map(str::to_string)
            .collect();

        if targets.is_empty() {
            let pair = new_column_pair(&canonical, schema_hint);
            fields.insert(pair.composite_key(), value);
            if fields.get(&pair.field).is_none_or(|v| v.trim().is_empty()) {
                fields.insert(pair.field.clone(), value);
            }
        } else {
            for target in targets {
                fields.insert(target, value);
            }
        }
    }
}

/// Column for an update key: composite key, then plain field, then a new column
fn resolve_column(
    sheet: &mut Sheet,
    decoded: &mut DecodedSheet,
    key: &str,
    schema_hint: Option<&str>,
) -> (usize, bool) {
    let canonical = canonical_key(key);
    let wanted = HeaderPair::from_key(&canonical).normalized();
    if let Some(col) = decoded.column_of(&wanted) {
        return (col, false);
    }
    if wanted.section.is_empty() {
        if let Some(i) = decoded
            .header_pairs
            .iter()
            .position(|p| p.field.eq_ignore_ascii_case(&wanted.field))
        {
            return (decoded.columns[i], false);
        }
    }

    let pair = new_column_pair(&canonical, schema_hint);
    let col = sheet.width();
    let field_row = decoded.mode.field_row();
    if field_row > 0 {
        sheet.set_cell(0, col, pair.section.clone());
    }
    sheet.set_cell(field_row, col, pair.field.clone());
    decoded.header_pairs.push(pair);
    decoded.columns.push(col);
    (col, true)
}

#[derive(Debug, Clone)]
pub struct StationStore {
    root: PathBuf,
}

impl StationStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        StationStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn workbook_path(&self, key: &LocationKey) -> PathBuf {
        key.workbook_path(&self.root)
    }

    /// Locate a station by id, in one location workbook or across the store.
    ///
    /// A store-wide scan skips unreadable workbooks; a named workbook that
    /// fails to open is an error.
    pub fn find_station(
        &self,
        station_id: &str,
        key: Option<&LocationKey>,
    ) -> Result<Option<StationView>> {
        let files = match key {
            Some(key) => {
                let path = self.workbook_path(key);
                if !path.exists() {
                    return Ok(None);
                }
                vec![path]
            }
            None => list_workbooks(&self.root),
        };

        for file in files {
            let workbook = match Workbook::open(&file) {
                Ok(workbook) => workbook,
                Err(e) if key.is_none() => {
                    log::warn!("Skipping {}: {:#}", file.display(), e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            for sheet in &workbook.sheets {
                let decoded = decode(sheet);
                if let Some(i) = find_in_sheet(&decoded, station_id) {
                    let record = decoded.records[i].clone();
                    return Ok(Some(StationView {
                        station: StationRecord::from_record(record, &sheet.name, &file, &self.root),
                        sheet: sheet.name.clone(),
                        file: file.clone(),
                        row: decoded.rows[i],
                        header_pairs: decoded.header_pairs,
                    }));
                }
            }
        }
        Ok(None)
    }

    pub fn read_station(
        &self,
        company: &str,
        location: &str,
        station_id: &str,
    ) -> Result<Option<StationView>> {
        self.find_station(station_id, Some(&LocationKey::new(company, location)))
    }

    /// Update a station's cells in place. Keys without a matching column get a
    /// new column at the end of the sheet.
    pub fn update_station(
        &self,
        station_id: &str,
        updated: &Record,
        schema_hint: Option<&str>,
        key: Option<&LocationKey>,
    ) -> Result<OperationResult> {
        let Some(view) = self.find_station(station_id, key)? else {
            return Ok(OperationResult::failed(format!(
                "Station {} not found",
                station_id
            )));
        };

        let mut workbook = Workbook::open(&view.file)?;
        let sheet = workbook.require_sheet_mut(&view.sheet)?;
        let mut decoded = decode(sheet);

        let mut written: Vec<usize> = Vec::new();
        let mut added = 0;
        let composite_first = updated
            .iter()
            .filter(|(k, _)| k.contains(crate::excel::COMPOSITE_SEPARATOR))
            .chain(
                updated
                    .iter()
                    .filter(|(k, _)| !k.contains(crate::excel::COMPOSITE_SEPARATOR)),
            );
        for (field, value) in composite_first {
            if field.trim().is_empty() {
                continue;
            }
            let (col, created) = resolve_column(sheet, &mut decoded, field, schema_hint);
            if written.contains(&col) {
                continue;
            }
            if created {
                added += 1;
            }
            sheet.set_cell(view.row, col, value);
            written.push(col);
        }

        workbook.save(&view.file)?;
        log::info!(
            "Updated station {} in {} ({} fields, {} new columns)",
            station_id,
            view.file.display(),
            written.len(),
            added
        );
        Ok(OperationResult::ok(format!(
            "Updated station {} ({} fields, {} new columns)",
            station_id,
            written.len(),
            added
        )))
    }

    /// Add a station to the `"<AssetType> <Location>"` sheet of its workbook
    pub fn create_station(
        &self,
        key: &LocationKey,
        asset_type: &str,
        record: &Record,
    ) -> Result<OperationResult> {
        let Some(station_id) = record.first_non_empty(STATION_ID_KEYS).map(str::to_string) else {
            return Ok(OperationResult::failed("Station ID is required"));
        };
        if asset_type.trim().is_empty() {
            return Ok(OperationResult::failed("Asset type is required"));
        }
        if self.find_station(&station_id, Some(key))?.is_some() {
            return Ok(OperationResult::failed(format!(
                "Station {} already exists",
                station_id
            )));
        }

        let mut record = record.clone();
        if record.first_non_empty(ASSET_TYPE_KEYS).is_none()
            && record
                .get("General Information – Category")
                .is_none_or(|v| v.trim().is_empty())
        {
            record.insert("General Information – Category", asset_type.trim());
        }

        let sheet_name = sanitize_sheet_name(&format!("{} {}", asset_type.trim(), key.location));
        let path = self.workbook_path(key);
        let mut workbook = Workbook::open_or_new(&path)?;
        write_records(workbook.sheet_or_insert(&sheet_name), &[record]);
        workbook.save(&path)?;

        log::info!("Created station {} in {}", station_id, path.display());
        Ok(OperationResult::ok(format!("Created station {}", station_id)))
    }

    /// Bulk import rows into one sheet of a location workbook, merging with
    /// the header already there
    pub fn write_location_rows(
        &self,
        key: &LocationKey,
        sheet_name: &str,
        rows: &[Record],
    ) -> Result<OperationResult> {
        let rows: Vec<Record> = rows.iter().filter(|r| !r.is_blank()).cloned().collect();
        let sheet_name = sanitize_sheet_name(sheet_name);
        let path = self.workbook_path(key);
        let mut workbook = Workbook::open_or_new(&path)?;
        let pairs = write_records(workbook.sheet_or_insert(&sheet_name), &rows);
        workbook.save(&path)?;

        log::info!(
            "Wrote {} rows to '{}' in {} ({} columns)",
            rows.len(),
            sheet_name,
            path.display(),
            pairs.len()
        );
        Ok(OperationResult::ok(format!(
            "Wrote {} rows to {}",
            rows.len(),
            sheet_name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::excel::codec::write_header_rows;
    use tempfile::TempDir;

    fn record(entries: &[(&str, &str)]) -> Record {
        entries.iter().copied().collect()
    }

    fn seed(dir: &TempDir) -> StationStore {
        let store = StationStore::new(dir.path().join("stations"));
        let key = LocationKey::new("NHS", "BC");
        store
            .write_location_rows(
                &key,
                "Cableway BC",
                &[
                    record(&[
                        ("Station ID", "BC001"),
                        ("Category", "Cableway"),
                        ("Site Name", "Hope"),
                        ("Latitude", "49.38"),
                        ("Longitude", "-121.44"),
                        ("Cable – Length", "120"),
                    ]),
                    record(&[("Station ID", "BC002"), ("Site Name", "Yale")]),
                ],
            )
            .unwrap();
        store
    }

    #[test]
    fn test_asset_type_from_sheet_name() {
        assert_eq!(asset_type_from_sheet("Cableway BC", "BC"), "Cableway");
        assert_eq!(asset_type_from_sheet("Snow Course bc", "BC"), "Snow Course");
        assert_eq!(asset_type_from_sheet("Snow Course BC", ""), "Snow Course");
        assert_eq!(asset_type_from_sheet("Gauges", "BC"), "Gauges");
    }

    #[test]
    fn test_read_station_returns_row_and_schema() {
        let dir = TempDir::new().unwrap();
        let store = seed(&dir);

        let view = store.read_station("NHS", "BC", "bc001").unwrap().unwrap();
        assert_eq!(view.sheet, "Cableway BC");
        assert_eq!(view.row, 2);
        assert_eq!(view.station.name, "Hope");
        assert_eq!(view.station.asset_type, "Cableway");
        assert_eq!(view.station.company.as_deref(), Some("NHS"));
        assert_eq!(view.station.location_file, "BC.xlsx");
        assert!(view.header_pairs.contains(&HeaderPair::new("Cable", "Length")));

        assert!(store.read_station("NHS", "ON", "BC001").unwrap().is_none());
        assert!(store.read_station("NHS", "BC", "nope").unwrap().is_none());
    }

    #[test]
    fn test_update_station_in_place_and_new_columns() {
        let dir = TempDir::new().unwrap();
        let store = seed(&dir);

        let result = store
            .update_station(
                "BC002",
                &record(&[
                    ("Cable – Length", "80"),
                    ("asset_type", "Cableway"),
                    ("Province", "BC"),
                    ("Inspection – Date", "2024-05-01"),
                    ("Notes", "windy"),
                ]),
                None,
                None,
            )
            .unwrap();
        assert!(result.success, "{}", result.message);

        let view = store.find_station("BC002", None).unwrap().unwrap();
        let fields = &view.station.fields;
        assert_eq!(fields.get("Cable – Length"), Some("80"));
        assert_eq!(fields.get("General Information – Category"), Some("Cableway"));
        assert_eq!(fields.get("General Information – Province"), Some("BC"));
        assert_eq!(fields.get("Inspection – Date"), Some("2024-05-01"));
        assert_eq!(fields.get("Notes"), Some("windy"));

        // New columns land at the end; the neighbour keeps its values
        let last = view.header_pairs.last().unwrap();
        assert_eq!(last, &HeaderPair::plain("Notes"));
        let other = store.find_station("BC001", None).unwrap().unwrap();
        assert_eq!(other.station.fields.get("Cable – Length"), Some("120"));
        assert_eq!(other.station.fields.get("Notes"), Some(""));
    }

    #[test]
    fn test_update_unknown_station_fails_without_writing() {
        let dir = TempDir::new().unwrap();
        let store = seed(&dir);
        let result = store
            .update_station("ZZ9", &record(&[("Notes", "x")]), None, None)
            .unwrap();
        assert!(!result.success);
    }

    #[test]
    fn test_schema_hint_sections_plain_keys() {
        let dir = TempDir::new().unwrap();
        let store = seed(&dir);
        store
            .update_station("BC001", &record(&[("Depth", "3")]), Some("Well"), None)
            .unwrap();
        let view = store.find_station("BC001", None).unwrap().unwrap();
        assert_eq!(view.station.fields.get("Well – Depth"), Some("3"));
    }

    #[test]
    fn test_create_station_fills_category() {
        let dir = TempDir::new().unwrap();
        let store = seed(&dir);
        let key = LocationKey::new("NHS", "BC");

        let created = store
            .create_station(&key, "Gauge", &record(&[("Station ID", "G1"), ("Latitude", "50")]))
            .unwrap();
        assert!(created.success);
        let dup = store
            .create_station(&key, "Gauge", &record(&[("Station ID", "g1")]))
            .unwrap();
        assert!(!dup.success);
        let missing = store.create_station(&key, "Gauge", &record(&[("Site Name", "x")])).unwrap();
        assert!(!missing.success);

        let view = store.find_station("G1", Some(&key)).unwrap().unwrap();
        assert_eq!(view.sheet, "Gauge BC");
        assert_eq!(view.station.asset_type, "Gauge");
    }

    #[test]
    fn test_single_row_sheet_gets_plain_columns() {
        let dir = TempDir::new().unwrap();
        let store = StationStore::new(dir.path());
        let key = LocationKey::new("", "AB");
        let mut sheet = Sheet::with_header("Gauge AB", &["Station ID", "Name"]);
        sheet.rows.push(vec![String::new(); 2]);
        sheet.rows.push(vec!["A1".into(), "Alpha".into()]);
        Workbook {
            sheets: vec![sheet],
        }
        .save(&store.workbook_path(&key))
        .unwrap();

        store
            .update_station("A1", &record(&[("Owner", "Parks")]), None, Some(&key))
            .unwrap();
        let view = store.find_station("A1", Some(&key)).unwrap().unwrap();
        assert_eq!(view.station.fields.get("Owner"), Some("Parks"));
        assert_eq!(view.station.company, None);
    }

    #[test]
    fn test_write_location_rows_merges_header() {
        let dir = TempDir::new().unwrap();
        let store = StationStore::new(dir.path());
        let key = LocationKey::new("NHS", "BC");
        let path = store.workbook_path(&key);

        let mut sheet = Sheet::new("Cableway BC");
        write_header_rows(
            &mut sheet,
            &[HeaderPair::general("Station ID"), HeaderPair::new("Cable", "Length")],
        );
        sheet.rows.push(vec!["BC001".into(), "120".into()]);
        Workbook {
            sheets: vec![sheet],
        }
        .save(&path)
        .unwrap();

        store
            .write_location_rows(
                &key,
                "Cableway BC",
                &[record(&[("Station ID", "BC003"), ("Cable – Gauge", "9")])],
            )
            .unwrap();

        let workbook = Workbook::open(&path).unwrap();
        let decoded = decode(workbook.sheet("Cableway BC").unwrap());
        assert_eq!(decoded.records.len(), 2);
        assert_eq!(decoded.records[0].get("Cable – Length"), Some("120"));
        assert_eq!(decoded.records[1].get("Cable – Gauge"), Some("9"));
    }

    #[test]
    fn test_merge_fields_updates_both_spellings() {
        let mut fields = record(&[
            ("Category", "Gauge"),
            ("General Information – Category", "Gauge"),
            ("Cable – Length", "5"),
        ]);
        merge_fields(
            &mut fields,
            &record(&[("asset_type", "Cableway"), ("Depth", "2")]),
            Some("Well"),
        );
        assert_eq!(fields.get("Category"), Some("Cableway"));
        assert_eq!(fields.get("General Information – Category"), Some("Cableway"));
        assert_eq!(fields.get("Well – Depth"), Some("2"));
        assert_eq!(fields.get("Depth"), Some("2"));

        let mut station = StationRecord::from_record(
            record(&[("Station ID", "G1"), ("Latitude", "1")]),
            "Gauge BC",
            Path::new("NHS/BC.xlsx"),
            Path::new(""),
        );
        assert_eq!(station.company.as_deref(), Some("NHS"));
        station.set_fields(fields);
        assert_eq!(station.asset_type, "Cableway");
        assert_eq!(station.station_id, "G1");
    }

    #[test]
    fn test_coordinates_need_both_numbers() {
        let fields = record(&[("Latitude", "49.1"), ("Longitude", "x")]);
        let station = StationRecord::from_record(fields, "Gauge BC", Path::new("/r/BC.xlsx"), Path::new("/r"));
        assert_eq!(station.coordinates(), None);
        assert_eq!(station.asset_type, "Gauge");
    }
}
