//! Flatten every station sheet under the store root into one list

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::list_workbooks;
use super::stations::StationRecord;
use crate::excel::Workbook;
use crate::excel::codec::decode;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateReport {
    pub rows: Vec<StationRecord>,
    pub total_count: usize,
    /// Rows whose latitude and longitude are both finite numbers
    pub valid_count: usize,
    pub files_scanned: usize,
    pub skipped_files: Vec<String>,
}

/// Decode every sheet of every workbook below `root`.
///
/// `progress` receives a percentage and a stage label per file. Files that
/// fail to open are logged and listed in `skipped_files`.
pub fn aggregate_stations(root: &Path, mut progress: impl FnMut(u8, &str)) -> AggregateReport {
    let files = list_workbooks(root);
    let mut report = AggregateReport::default();

    progress(0, "Scanning station files");
    for (i, file) in files.iter().enumerate() {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let percent = ((i * 100) / files.len().max(1)).min(99) as u8;
        progress(percent, &format!("Reading {}", name));

        let workbook = match Workbook::open(file) {
            Ok(workbook) => workbook,
            Err(e) => {
                log::warn!("Aggregation skipped {}: {:#}", file.display(), e);
                report.skipped_files.push(file.display().to_string());
                continue;
            }
        };
        report.files_scanned += 1;

        for sheet in &workbook.sheets {
            for record in decode(sheet).records {
                let station = StationRecord::from_record(record, &sheet.name, file, root);
                if station.coordinates().is_some() {
                    report.valid_count += 1;
                }
                report.rows.push(station);
            }
        }
    }
    report.total_count = report.rows.len();
    progress(100, "Done");

    log::info!(
        "Aggregated {} stations ({} with coordinates) from {} files, {} skipped",
        report.total_count,
        report.valid_count,
        report.files_scanned,
        report.skipped_files.len()
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::excel::codec::write_records;
    use crate::excel::{Record, Sheet};
    use tempfile::TempDir;

    #[test]
    fn test_aggregates_across_files_and_skips_lock_and_corrupt_files() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();

        let mut two_row = Sheet::new("Cableway BC");
        let rows: Vec<Record> = vec![
            [("Station ID", "BC001"), ("Latitude", "49.1"), ("Longitude", "-121.4")]
                .into_iter()
                .collect(),
            [("Station ID", "BC002"), ("Latitude", ""), ("Longitude", "-120")]
                .into_iter()
                .collect(),
        ];
        write_records(&mut two_row, &rows);
        Workbook {
            sheets: vec![two_row],
        }
        .save(&root.join("NHS").join("BC.xlsx"))
        .unwrap();

        let mut single = Sheet::with_header("Gauge ON", &["ID", "Name", "Lat", "Long"]);
        single.rows.push(vec![String::new(); 4]);
        single.rows.push(vec!["G1".into(), "Gauge one".into(), "45".into(), "-75".into()]);
        Workbook {
            sheets: vec![single],
        }
        .save(&root.join("ON.xlsx"))
        .unwrap();

        std::fs::write(root.join("NHS").join("~$BC.xlsx"), b"lock").unwrap();
        std::fs::write(root.join("broken.xlsx"), b"not a workbook").unwrap();

        let mut stages = Vec::new();
        let report = aggregate_stations(root, |percent, stage| {
            stages.push((percent, stage.to_string()));
        });

        assert_eq!(report.total_count, 3);
        assert_eq!(report.valid_count, 2);
        assert_eq!(report.files_scanned, 2);
        assert_eq!(report.skipped_files.len(), 1);
        assert_eq!(stages.last().map(|s| s.0), Some(100));

        let gauge = report.rows.iter().find(|r| r.station_id == "G1").unwrap();
        assert_eq!(gauge.name, "Gauge one");
        assert_eq!(gauge.asset_type, "Gauge");
        assert_eq!(gauge.location_file, "ON.xlsx");
        assert_eq!(gauge.company, None);

        let cable = report.rows.iter().find(|r| r.station_id == "BC001").unwrap();
        assert_eq!(cable.company.as_deref(), Some("NHS"));
        assert_eq!(cable.fields.get("General Information – Latitude"), Some("49.1"));
    }
}
