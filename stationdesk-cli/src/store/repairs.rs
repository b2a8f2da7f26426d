//! Repair log: one `Repairs` sheet per (company, location) workbook

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

use super::{LocationKey, OperationResult, company_of, list_workbooks, location_of, same_text};
use crate::excel::codec::{HeaderMode, decode_with_mode};
use crate::excel::{Record, Sheet, Workbook};

pub const REPAIRS_SHEET: &str = "Repairs";
pub const DEFAULT_REPAIR_TYPE: &str = "Repair";

const DATE_COLUMN: &str = "Date";
const STATION_ID_COLUMN: &str = "Station ID";
const TYPE_COLUMN: &str = "Type";

/// One logged repair with its position in the sheet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairRow {
    pub company: String,
    pub location: String,
    /// Zero-based position among the sheet's data rows
    pub index: usize,
    pub fields: Record,
}

impl RepairRow {
    pub fn station_id(&self) -> Option<&str> {
        station_id_of(&self.fields)
    }
}

/// `Station ID`, `station_id`, `StationID` ... all name the same column
fn is_station_id_key(key: &str) -> bool {
    let squashed: String = key
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .collect::<String>()
        .to_ascii_lowercase();
    squashed == "stationid"
}

/// Station ID of a repair payload, whichever spelling carries it
pub fn station_id_of(record: &Record) -> Option<&str> {
    record
        .iter()
        .filter(|(k, _)| is_station_id_key(k))
        .map(|(_, v)| v.trim())
        .find(|v| !v.is_empty())
}

/// Fill `Date` (today) and `Type` (`Repair`) when missing or blank
pub fn with_defaults(repair: &Record, today: NaiveDate) -> Record {
    let mut record = repair.clone();
    if record.get_ci(DATE_COLUMN).is_none_or(|v| v.trim().is_empty()) {
        let key = key_like(&record, DATE_COLUMN);
        record.insert(key, today.format("%Y-%m-%d").to_string());
    }
    if record.get_ci(TYPE_COLUMN).is_none_or(|v| v.trim().is_empty()) {
        let key = key_like(&record, TYPE_COLUMN);
        record.insert(key, DEFAULT_REPAIR_TYPE);
    }
    record
}

/// The record's own spelling of `name`, or `name` itself
fn key_like(record: &Record, name: &str) -> String {
    record
        .keys()
        .find(|k| same_text(k, name))
        .unwrap_or(name)
        .to_string()
}

/// `Date, Station ID, <others in first-seen order>, Type`
fn canonical_header<'a>(keys: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut header = vec![DATE_COLUMN.to_string(), STATION_ID_COLUMN.to_string()];
    for key in keys {
        let key = key.trim();
        if key.is_empty()
            || same_text(key, DATE_COLUMN)
            || same_text(key, TYPE_COLUMN)
            || is_station_id_key(key)
            || header.iter().any(|h| same_text(h, key))
        {
            continue;
        }
        header.push(key.to_string());
    }
    header.push(TYPE_COLUMN.to_string());
    header
}

fn layout(record: &Record, header: &[String]) -> Vec<String> {
    header
        .iter()
        .map(|column| {
            let value = if column == STATION_ID_COLUMN {
                station_id_of(record)
            } else {
                record.get_ci(column)
            };
            value.unwrap_or("").to_string()
        })
        .collect()
}

fn read_rows(sheet: &Sheet) -> Vec<Record> {
    decode_with_mode(sheet, HeaderMode::SingleRow).records
}

#[derive(Debug, Clone)]
pub struct RepairStore {
    root: PathBuf,
}

impl RepairStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        RepairStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn workbook_path(&self, key: &LocationKey) -> PathBuf {
        key.workbook_path(&self.root)
    }

    /// Log a repair. The header is rewritten to its canonical order and the
    /// row goes right after the station's last existing entry, or at the end.
    pub fn append(&self, key: &LocationKey, repair: &Record) -> Result<OperationResult> {
        self.append_on(key, repair, Local::now().date_naive())
    }

    pub(crate) fn append_on(
        &self,
        key: &LocationKey,
        repair: &Record,
        today: NaiveDate,
    ) -> Result<OperationResult> {
        let Some(station_id) = station_id_of(repair).map(str::to_string) else {
            return Ok(OperationResult::failed("Station ID is required"));
        };
        let record = with_defaults(repair, today);

        let path = self.workbook_path(key);
        let mut workbook = Workbook::open_or_new(&path)?;
        let sheet = workbook.sheet_or_insert(REPAIRS_SHEET);

        let existing = read_rows(sheet);
        let old_header: Vec<String> = sheet
            .rows
            .first()
            .map(|cells| cells.iter().filter(|c| !c.trim().is_empty()).cloned().collect())
            .unwrap_or_default();
        let header = canonical_header(
            old_header
                .iter()
                .map(String::as_str)
                .chain(record.keys()),
        );

        let mut rows: Vec<Vec<String>> = existing.iter().map(|r| layout(r, &header)).collect();
        let position = existing
            .iter()
            .rposition(|r| station_id_of(r).is_some_and(|id| same_text(id, &station_id)))
            .map_or(rows.len(), |last| last + 1);
        rows.insert(position, layout(&record, &header));

        sheet.rows.clear();
        sheet.rows.push(header);
        sheet.rows.extend(rows);
        workbook.save(&path)?;

        log::info!(
            "Repair for {} logged in {} at row {}",
            station_id,
            path.display(),
            position + 2
        );
        Ok(OperationResult::ok(format!("Repair added for {}", station_id)))
    }

    /// Repairs of one location, in sheet order
    pub fn list(&self, key: &LocationKey) -> Result<Vec<RepairRow>> {
        let path = self.workbook_path(key);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let workbook = Workbook::open(&path)?;
        Ok(Self::rows_of(&workbook, &key.company, &key.location))
    }

    /// Repairs of every location; unreadable workbooks are logged and skipped
    pub fn list_all(&self) -> Vec<RepairRow> {
        let mut all = Vec::new();
        for file in list_workbooks(&self.root) {
            match Workbook::open(&file) {
                Ok(workbook) => {
                    let company = company_of(&self.root, &file).unwrap_or_default();
                    all.extend(Self::rows_of(&workbook, &company, &location_of(&file)));
                }
                Err(e) => log::warn!("Skipping repair workbook {}: {:#}", file.display(), e),
            }
        }
        all
    }

    fn rows_of(workbook: &Workbook, company: &str, location: &str) -> Vec<RepairRow> {
        workbook
            .sheet(REPAIRS_SHEET)
            .map(read_rows)
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(index, fields)| RepairRow {
                company: company.to_string(),
                location: location.to_string(),
                index,
                fields,
            })
            .collect()
    }

    /// Remove the repair at `index` among the location's data rows
    pub fn delete(&self, key: &LocationKey, index: usize) -> Result<OperationResult> {
        let path = self.workbook_path(key);
        if !path.exists() {
            return Ok(OperationResult::failed(format!(
                "No repairs recorded for {}/{}",
                key.company, key.location
            )));
        }
        let mut workbook = Workbook::open(&path)?;
        let sheet = workbook.require_sheet_mut(REPAIRS_SHEET)?;
        let decoded = decode_with_mode(sheet, HeaderMode::SingleRow);
        let Some(&row) = decoded.rows.get(index) else {
            return Ok(OperationResult::failed(format!(
                "Repair {} not found",
                index
            )));
        };
        sheet.remove_row(row);
        workbook.save(&path)?;
        Ok(OperationResult::ok(format!("Deleted repair {}", index)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(entries: &[(&str, &str)]) -> Record {
        entries.iter().copied().collect()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn ids(store: &RepairStore, key: &LocationKey) -> Vec<String> {
        store
            .list(key)
            .unwrap()
            .iter()
            .map(|r| r.station_id().unwrap_or("").to_string())
            .collect()
    }

    #[test]
    fn test_requires_station_id() {
        let dir = TempDir::new().unwrap();
        let store = RepairStore::new(dir.path());
        let key = LocationKey::new("NHS", "BC");
        let result = store
            .append(&key, &record(&[("Repair Name", "x"), ("station id", " ")]))
            .unwrap();
        assert!(!result.success);
        assert!(!store.workbook_path(&key).exists());
    }

    #[test]
    fn test_grouped_insertion() {
        let dir = TempDir::new().unwrap();
        let store = RepairStore::new(dir.path());
        let key = LocationKey::new("NHS", "BC");
        for id in ["A", "A", "B"] {
            store.append_on(&key, &record(&[("Station ID", id)]), day()).unwrap();
        }

        store.append_on(&key, &record(&[("station_id", "a"), ("Note", "new")]), day()).unwrap();
        assert_eq!(ids(&store, &key), vec!["A", "A", "a", "B"]);

        store.append_on(&key, &record(&[("Station ID", "C")]), day()).unwrap();
        assert_eq!(ids(&store, &key), vec!["A", "A", "a", "B", "C"]);
    }

    #[test]
    fn test_header_is_canonicalized_on_every_write() {
        let dir = TempDir::new().unwrap();
        let store = RepairStore::new(dir.path());
        let key = LocationKey::new("NHS", "BC");
        let path = store.workbook_path(&key);

        let mut sheet = Sheet::with_header(REPAIRS_SHEET, &["Type", "Cost", "StationID", "Date"]);
        sheet.push_row(vec!["Inspection".into(), "40".into(), "BC001".into(), "2023-01-01".into()]);
        Workbook {
            sheets: vec![sheet],
        }
        .save(&path)
        .unwrap();

        store
            .append_on(&key, &record(&[("Station ID", "BC002"), ("Crew", "North")]), day())
            .unwrap();

        let workbook = Workbook::open(&path).unwrap();
        let sheet = workbook.sheet(REPAIRS_SHEET).unwrap();
        assert_eq!(sheet.rows[0], vec!["Date", "Station ID", "Cost", "Crew", "Type"]);
        assert_eq!(sheet.rows[1], vec!["2023-01-01", "BC001", "40", "", "Inspection"]);
        assert_eq!(sheet.rows[2], vec!["2024-03-01", "BC002", "", "North", "Repair"]);
    }

    #[test]
    fn test_defaults_keep_supplied_values() {
        let filled = with_defaults(&record(&[("date", "2020-02-02"), ("Type", "Upgrade")]), day());
        assert_eq!(filled.get("date"), Some("2020-02-02"));
        assert_eq!(filled.get("Type"), Some("Upgrade"));
        assert!(!filled.contains_key("Date"));

        let blank = with_defaults(&record(&[("Type", "")]), day());
        assert_eq!(blank.get("Type"), Some("Repair"));
        assert_eq!(blank.get("Date"), Some("2024-03-01"));
    }

    #[test]
    fn test_list_all_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = RepairStore::new(dir.path());
        let bc = LocationKey::new("NHS", "BC");
        let on = LocationKey::new("NHS", "ON");
        store.append_on(&bc, &record(&[("Station ID", "A")]), day()).unwrap();
        store.append_on(&bc, &record(&[("Station ID", "B")]), day()).unwrap();
        store.append_on(&on, &record(&[("Station ID", "C")]), day()).unwrap();

        let all = store.list_all();
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|r| r.company == "NHS"));

        assert!(store.delete(&bc, 0).unwrap().success);
        assert!(!store.delete(&bc, 5).unwrap().success);
        assert_eq!(ids(&store, &bc), vec!["B"]);
    }
}
