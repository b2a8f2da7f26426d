//! Propagate one asset type's custom columns to every sibling station sheet
//!
//! The station directory acts as one table partitioned by workbook. A
//! [`SchemaDescriptor`] is reconciled against each matching sheet
//! independently, so one partition can be tested (or fail) in isolation.

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::stations::asset_type_from_sheet;
use super::{list_workbooks, location_of, same_text};
use crate::excel::codec::{DecodedSheet, HeaderMode, decode};
use crate::excel::header::{HeaderPair, is_standard_field, is_station_id_header, position_of};
use crate::excel::{Record, Sheet, Workbook};

/// Target custom columns for one asset type, in order.
/// General Information pairs are never part of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDescriptor {
    pub asset_type: String,
    pub pairs: Vec<HeaderPair>,
}

impl SchemaDescriptor {
    pub fn new(asset_type: impl Into<String>, pairs: impl IntoIterator<Item = HeaderPair>) -> Self {
        let mut kept: Vec<HeaderPair> = Vec::new();
        for pair in pairs {
            if is_preserved(&pair) || pair.field.is_empty() || position_of(&kept, &pair).is_some() {
                continue;
            }
            kept.push(pair);
        }
        SchemaDescriptor {
            asset_type: asset_type.into().trim().to_string(),
            pairs: kept,
        }
    }
}

/// Outcome of a synchronization pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub updated_locations: usize,
    pub updated_rows: usize,
    pub skipped_files: Vec<String>,
}

/// Columns copied through untouched
fn is_preserved(pair: &HeaderPair) -> bool {
    pair.is_general() || is_standard_field(&pair.field)
}

fn category_of(record: &Record) -> Option<&str> {
    record.first_non_empty(&[
        "General Information – Category",
        "Category",
        "Asset Type",
        "Type",
    ])
}

/// A sheet belongs to the asset type when its name or any row's category says so
pub fn sheet_matches_asset_type(
    sheet_name: &str,
    decoded: &DecodedSheet,
    location: &str,
    asset_type: &str,
) -> bool {
    same_text(&asset_type_from_sheet(sheet_name, location), asset_type)
        || decoded
            .records
            .iter()
            .any(|r| category_of(r).is_some_and(|c| same_text(c, asset_type)))
}

/// Put a section row above a single-row header
fn upgrade_to_two_row(sheet: &mut Sheet) {
    let sections: Vec<String> = sheet
        .rows
        .first()
        .map(|fields| {
            fields
                .iter()
                .map(|f| {
                    if HeaderPair::plain(f.as_str()).normalized().is_general()
                        || is_standard_field(f)
                    {
                        crate::excel::GENERAL_INFORMATION.to_string()
                    } else {
                        String::new()
                    }
                })
                .collect()
        })
        .unwrap_or_default();
    sheet.rows.insert(0, sections);
}

/// Reconcile one sheet against the schema. Returns whether the grid changed
/// and how many data rows were rewritten.
pub fn reconcile_sheet(
    sheet: &mut Sheet,
    schema: &SchemaDescriptor,
    exclude_station_id: Option<&str>,
) -> (bool, usize) {
    let mut changed = false;
    if sheet.used_rows() == 0 {
        return (false, 0);
    }
    if decode(sheet).mode == HeaderMode::SingleRow {
        upgrade_to_two_row(sheet);
        changed = true;
    }
    let mut decoded = decode(sheet);

    let mut targets: Vec<(HeaderPair, usize)> = Vec::with_capacity(schema.pairs.len());
    for pair in &schema.pairs {
        let col = match decoded.column_of(pair) {
            Some(col) => col,
            None => {
                let col = sheet.width();
                sheet.set_cell(0, col, pair.section.clone());
                sheet.set_cell(1, col, pair.field.clone());
                decoded.header_pairs.push(pair.clone());
                decoded.columns.push(col);
                changed = true;
                col
            }
        };
        targets.push((pair.clone(), col));
    }

    let id_column = decoded
        .header_pairs
        .iter()
        .position(|p| is_station_id_header(&p.field))
        .map(|i| decoded.columns[i]);

    let mut updated_rows = 0;
    for &row in &decoded.rows {
        if let (Some(excluded), Some(col)) = (exclude_station_id, id_column) {
            if same_text(sheet.cell(row, col), excluded) {
                continue;
            }
        }

        let before: Vec<String> = decoded
            .columns
            .iter()
            .map(|&c| sheet.cell(row, c).to_string())
            .collect();

        let recovered: Vec<String> = targets
            .iter()
            .map(|(pair, col)| {
                let own = sheet.cell(row, *col);
                if !own.trim().is_empty() {
                    return own.to_string();
                }
                decoded
                    .header_pairs
                    .iter()
                    .zip(&decoded.columns)
                    .filter(|(p, _)| !is_preserved(p) && p.field.eq_ignore_ascii_case(&pair.field))
                    .map(|(_, &c)| sheet.cell(row, c))
                    .find(|v| !v.trim().is_empty())
                    .unwrap_or("")
                    .to_string()
            })
            .collect();

        for (pair, &col) in decoded.header_pairs.iter().zip(&decoded.columns) {
            if !is_preserved(pair) && !sheet.cell(row, col).is_empty() {
                sheet.set_cell(row, col, "");
            }
        }
        for ((_, col), value) in targets.iter().zip(recovered) {
            if !value.is_empty() {
                sheet.set_cell(row, *col, value);
            }
        }

        let after: Vec<String> = decoded
            .columns
            .iter()
            .map(|&c| sheet.cell(row, c).to_string())
            .collect();
        if before != after {
            updated_rows += 1;
            changed = true;
        }
    }

    (changed, updated_rows)
}

/// Apply the schema to a single record, as the document mirror stores them
pub fn reconcile_record(record: &Record, schema: &SchemaDescriptor) -> Record {
    let mut out = Record::new();
    for (key, value) in record.iter() {
        if is_preserved(&HeaderPair::from_key(key)) {
            out.insert(key, value);
        }
    }
    for pair in &schema.pairs {
        let own = record.get(&pair.composite_key()).filter(|v| !v.trim().is_empty());
        let value = own
            .or_else(|| {
                record
                    .iter()
                    .filter(|(k, _)| {
                        let p = HeaderPair::from_key(k);
                        !is_preserved(&p) && p.field.eq_ignore_ascii_case(&pair.field)
                    })
                    .map(|(_, v)| v)
                    .find(|v| !v.trim().is_empty())
            })
            .unwrap_or("");
        out.insert(pair.composite_key(), value);
    }
    out
}

/// Reconcile every matching sheet under `root`. Unreadable workbooks are
/// logged and listed in the report; a failed save is an error.
pub fn synchronize_asset_type_schema(
    root: &Path,
    schema: &SchemaDescriptor,
    exclude_station_id: Option<&str>,
) -> Result<SyncReport> {
    let mut report = SyncReport::default();

    for file in list_workbooks(root) {
        let mut workbook = match Workbook::open(&file) {
            Ok(workbook) => workbook,
            Err(e) => {
                log::warn!("Schema sync skipped {}: {:#}", file.display(), e);
                report.skipped_files.push(file.display().to_string());
                continue;
            }
        };

        let location = location_of(&file);
        let mut file_changed = false;
        for sheet in &mut workbook.sheets {
            let decoded = decode(sheet);
            if !sheet_matches_asset_type(&sheet.name, &decoded, &location, &schema.asset_type) {
                continue;
            }
            let (changed, rows) = reconcile_sheet(sheet, schema, exclude_station_id);
            if changed {
                log::debug!(
                    "Reconciled '{}' in {} ({} rows)",
                    sheet.name,
                    file.display(),
                    rows
                );
            }
            file_changed |= changed;
            report.updated_rows += rows;
        }

        if file_changed {
            workbook.save(&file)?;
            report.updated_locations += 1;
        }
    }

    log::info!(
        "Schema sync for '{}': {} locations, {} rows, {} skipped",
        schema.asset_type,
        report.updated_locations,
        report.updated_rows,
        report.skipped_files.len()
    );
    Ok(report)
}
