//! Lookup workbook: companies, locations, asset types, colours and settings
//!
//! Every table is a sheet with a single header row. Rows are matched by
//! case-insensitive key equality and updated in place; when nothing matches a
//! new row is appended. Colours and links resolve most specific first:
//! (company, location, asset type) -> (location, asset type) -> asset type.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{OperationResult, format_bool, parse_bool, same_text};
use crate::excel::{Sheet, Workbook};

pub const COMPANIES: &str = "Companies";
pub const LOCATIONS: &str = "Locations";
pub const ASSET_TYPES: &str = "AssetTypes";
pub const STATUS_COLORS: &str = "Status Colors";
pub const SETTINGS: &str = "Settings";

pub const APPLY_STATUS_COLORS: &str = "applyStatusColorsOnMap";
pub const APPLY_REPAIR_COLORS: &str = "applyRepairColorsOnMap";

/// A sheet the lookup workbook must contain
struct SheetSpec {
    name: &'static str,
    header: &'static [&'static str],
    seed: &'static [(&'static str, &'static str)],
}

pub const DEFAULT_STATUS_COLORS: &[(&str, &str)] = &[
    ("Inactive", "#8e8e8e"),
    ("Mothballed", "#a87ecb"),
    ("Unknown", "#999999"),
];

pub const DEFAULT_SETTINGS: &[(&str, &str)] =
    &[(APPLY_STATUS_COLORS, "FALSE"), (APPLY_REPAIR_COLORS, "FALSE")];

const REQUIRED_SHEETS: &[SheetSpec] = &[
    SheetSpec {
        name: COMPANIES,
        header: &["company", "active"],
        seed: &[],
    },
    SheetSpec {
        name: LOCATIONS,
        header: &["location", "company", "link"],
        seed: &[],
    },
    SheetSpec {
        name: ASSET_TYPES,
        header: &["asset_type", "location", "company", "color", "link"],
        seed: &[],
    },
    SheetSpec {
        name: "Custom Weights",
        header: &["weight", "active"],
        seed: &[],
    },
    SheetSpec {
        name: "Workplan Constants",
        header: &["Field", "Value"],
        seed: &[],
    },
    SheetSpec {
        name: "Algorithm Parameters",
        header: &[
            "Applies To",
            "Parameter",
            "Condition",
            "Max Weight",
            "Option",
            "Weight",
            "Selected",
        ],
        seed: &[],
    },
    SheetSpec {
        name: "Workplan Details",
        header: &["Parameter", "Value"],
        seed: &[],
    },
    SheetSpec {
        name: STATUS_COLORS,
        header: &["Status", "Color"],
        seed: DEFAULT_STATUS_COLORS,
    },
    SheetSpec {
        name: SETTINGS,
        header: &["Key", "Value"],
        seed: DEFAULT_SETTINGS,
    },
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyEntry {
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationEntry {
    pub name: String,
    pub company: String,
    #[serde(default)]
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetTypeEntry {
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub link: String,
}

/// The raw lookup tables, independent of where they were stored
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LookupTables {
    pub companies: Vec<CompanyEntry>,
    pub locations: Vec<LocationEntry>,
    pub asset_types: Vec<AssetTypeEntry>,
    pub status_colors: Vec<(String, String)>,
    pub settings: Vec<(String, String)>,
}

/// In-memory lookup maps, tagged with the source modification time.
///
/// Blank company or location levels are stored under the empty-string key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupSnapshot {
    pub mtime_ms: i64,
    pub colors_global: BTreeMap<String, String>,
    pub colors_by_location: BTreeMap<String, BTreeMap<String, String>>,
    pub colors_by_company_location: BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>,
    pub companies: Vec<CompanyEntry>,
    pub locations_by_company: BTreeMap<String, Vec<String>>,
    pub assets_by_location: BTreeMap<String, Vec<String>>,
    pub location_links: BTreeMap<String, BTreeMap<String, String>>,
    pub asset_type_links: BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>,
    pub status_colors: BTreeMap<String, String>,
    pub apply_status_colors_on_map: bool,
    pub apply_repair_colors_on_map: bool,
}

fn get_ci<'a, V>(map: &'a BTreeMap<String, V>, key: &str) -> Option<&'a V> {
    map.get(key)
        .or_else(|| map.iter().find(|(k, _)| same_text(k, key)).map(|(_, v)| v))
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| same_text(v, value)) {
        list.push(value.to_string());
    }
}

impl LookupSnapshot {
    pub fn build(tables: &LookupTables, mtime_ms: i64) -> Self {
        let mut snapshot = LookupSnapshot {
            mtime_ms,
            ..Default::default()
        };

        snapshot.companies = tables
            .companies
            .iter()
            .filter(|c| !c.name.trim().is_empty())
            .cloned()
            .collect();

        for location in &tables.locations {
            let name = location.name.trim();
            if name.is_empty() {
                continue;
            }
            let company = location.company.trim();
            if !company.is_empty() {
                push_unique(
                    snapshot
                        .locations_by_company
                        .entry(company.to_string())
                        .or_default(),
                    name,
                );
            }
            if !location.link.trim().is_empty() {
                snapshot
                    .location_links
                    .entry(company.to_string())
                    .or_default()
                    .insert(name.to_string(), location.link.trim().to_string());
            }
        }

        for asset in &tables.asset_types {
            let name = asset.name.trim();
            if name.is_empty() {
                continue;
            }
            let location = asset.location.trim();
            let company = asset.company.trim();
            let color = asset.color.trim();

            if !location.is_empty() {
                push_unique(
                    snapshot
                        .assets_by_location
                        .entry(location.to_string())
                        .or_default(),
                    name,
                );
            }

            if !color.is_empty() {
                match (company.is_empty(), location.is_empty()) {
                    (true, true) => {
                        snapshot
                            .colors_global
                            .insert(name.to_string(), color.to_string());
                    }
                    (true, false) => {
                        snapshot
                            .colors_by_location
                            .entry(location.to_string())
                            .or_default()
                            .insert(name.to_string(), color.to_string());
                    }
                    (false, false) => {
                        snapshot
                            .colors_by_company_location
                            .entry(company.to_string())
                            .or_default()
                            .entry(location.to_string())
                            .or_default()
                            .insert(name.to_string(), color.to_string());
                    }
                    // A company without a location is not a valid override level
                    (false, true) => {}
                }
            }

            if !asset.link.trim().is_empty() {
                snapshot
                    .asset_type_links
                    .entry(company.to_string())
                    .or_default()
                    .entry(location.to_string())
                    .or_default()
                    .insert(name.to_string(), asset.link.trim().to_string());
            }
        }

        for (status, color) in &tables.status_colors {
            if !status.trim().is_empty() {
                snapshot
                    .status_colors
                    .insert(status.trim().to_string(), color.trim().to_string());
            }
        }

        for (key, value) in &tables.settings {
            if same_text(key, APPLY_STATUS_COLORS) {
                snapshot.apply_status_colors_on_map = parse_bool(value);
            } else if same_text(key, APPLY_REPAIR_COLORS) {
                snapshot.apply_repair_colors_on_map = parse_bool(value);
            }
        }

        snapshot
    }

    /// Colour for an asset type, most specific level first
    pub fn resolve_color(&self, company: &str, location: &str, asset_type: &str) -> Option<&str> {
        get_ci(&self.colors_by_company_location, company)
            .and_then(|locations| get_ci(locations, location))
            .and_then(|assets| get_ci(assets, asset_type))
            .or_else(|| {
                get_ci(&self.colors_by_location, location)
                    .and_then(|assets| get_ci(assets, asset_type))
            })
            .or_else(|| get_ci(&self.colors_global, asset_type))
            .map(String::as_str)
    }

    /// Link for an asset type, most specific level first
    pub fn resolve_asset_type_link(
        &self,
        company: &str,
        location: &str,
        asset_type: &str,
    ) -> Option<&str> {
        let at = |company: &str, location: &str| {
            get_ci(&self.asset_type_links, company)
                .and_then(|locations| get_ci(locations, location))
                .and_then(|assets| get_ci(assets, asset_type))
        };
        at(company, location)
            .or_else(|| at("", location))
            .or_else(|| at("", ""))
            .map(String::as_str)
    }

    pub fn resolve_location_link(&self, company: &str, location: &str) -> Option<&str> {
        get_ci(&self.location_links, company)
            .and_then(|links| get_ci(links, location))
            .or_else(|| get_ci(&self.location_links, "").and_then(|links| get_ci(links, location)))
            .map(String::as_str)
    }

    pub fn status_color(&self, status: &str) -> Option<&str> {
        get_ci(&self.status_colors, status).map(String::as_str)
    }
}

/// What `ensure_ready` had to do
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsureReport {
    pub copied_template: bool,
    pub created_sheets: Vec<String>,
}

/// A random `#rrggbb` colour for new asset types
pub fn random_color() -> String {
    let value: u32 = rand::rng().random_range(0..=0xFF_FFFF);
    format!("#{:06x}", value)
}

/// Row of a single-header table whose columns all match the criteria
fn find_row(sheet: &Sheet, criteria: &[(&str, &str)]) -> Option<usize> {
    let columns: Vec<Option<usize>> = criteria
        .iter()
        .map(|(name, _)| sheet.column_index(0, name))
        .collect();
    (1..sheet.rows.len()).find(|&row| {
        !sheet.row_is_empty(row)
            && criteria.iter().zip(&columns).all(|((_, wanted), col)| {
                let cell = col.map(|c| sheet.cell(row, c)).unwrap_or("");
                same_text(cell, wanted)
            })
    })
}

fn set_value(sheet: &mut Sheet, row: usize, column: &str, value: &str) {
    let col = sheet.ensure_column(0, column);
    sheet.set_cell(row, col, value);
}

fn value_at<'a>(sheet: &'a Sheet, row: usize, column: &str) -> &'a str {
    sheet
        .column_index(0, column)
        .map(|c| sheet.cell(row, c).trim())
        .unwrap_or("")
}

fn append_row(sheet: &mut Sheet, values: &[(&str, &str)]) -> usize {
    let row = sheet.used_rows().max(1);
    for (column, value) in values {
        set_value(sheet, row, column, value);
    }
    row
}

fn data_rows(sheet: &Sheet) -> impl Iterator<Item = usize> + '_ {
    (1..sheet.rows.len()).filter(|&row| !sheet.row_is_empty(row))
}

/// Reads and writes the lookup workbook
#[derive(Debug, Clone)]
pub struct LookupStore {
    path: PathBuf,
    template: Option<PathBuf>,
}

impl LookupStore {
    pub fn new(path: impl Into<PathBuf>, template: Option<PathBuf>) -> Self {
        LookupStore {
            path: path.into(),
            template,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the workbook and any missing sheets. Existing sheets are never
    /// touched; a missing workbook is copied from the seed template when one
    /// is available.
    pub fn ensure_ready(&self) -> Result<EnsureReport> {
        let mut report = EnsureReport::default();

        if !self.path.exists() {
            if let Some(template) = self.template.as_ref().filter(|t| t.exists()) {
                if let Some(parent) = self.path.parent() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create directory: {}", parent.display())
                    })?;
                }
                std::fs::copy(template, &self.path).with_context(|| {
                    format!("Failed to copy lookup template: {}", template.display())
                })?;
                log::info!("Seeded lookup workbook from {}", template.display());
                report.copied_template = true;
            }
        }

        let mut workbook = Workbook::open_or_new(&self.path)?;
        for spec in REQUIRED_SHEETS {
            if workbook.sheet_index(spec.name).is_some() {
                continue;
            }
            let mut sheet = Sheet::with_header(spec.name, spec.header);
            for (key, value) in spec.seed {
                sheet.rows.push(vec![key.to_string(), value.to_string()]);
            }
            workbook.sheets.push(sheet);
            report.created_sheets.push(spec.name.to_string());
        }

        if !report.created_sheets.is_empty() {
            workbook.save(&self.path)?;
            log::info!(
                "Lookup workbook {}: created sheets {:?}",
                self.path.display(),
                report.created_sheets
            );
        }

        Ok(report)
    }

    fn open(&self) -> Result<Workbook> {
        Workbook::open(&self.path)
    }

    /// Open, edit and save the workbook. The edit reports whether it changed anything.
    fn modify(
        &self,
        edit: impl FnOnce(&mut Workbook) -> Result<(OperationResult, bool)>,
    ) -> Result<OperationResult> {
        let mut workbook = self.open()?;
        let (result, changed) = edit(&mut workbook)?;
        if changed {
            workbook.save(&self.path)?;
        }
        Ok(result)
    }

    fn modified_ms(&self) -> i64 {
        std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map(|t| DateTime::<Utc>::from(t).timestamp_millis())
            .unwrap_or(0)
    }

    /// Read every lookup table
    pub fn tables(&self) -> Result<LookupTables> {
        let workbook = self.open()?;
        read_tables(&workbook)
    }

    /// A full read of the lookup tables as resolution maps
    pub fn snapshot(&self) -> Result<LookupSnapshot> {
        let tables = self.tables()?;
        Ok(LookupSnapshot::build(&tables, self.modified_ms()))
    }

    pub fn upsert_company(&self, name: &str, active: bool) -> Result<OperationResult> {
        if name.trim().is_empty() {
            return Ok(OperationResult::failed("Company name is required"));
        }
        self.modify(|workbook| {
            let sheet = workbook.require_sheet_mut(COMPANIES)?;
            match find_row(sheet, &[("company", name)]) {
                Some(row) => {
                    set_value(sheet, row, "active", format_bool(active));
                    Ok((OperationResult::ok(format!("Updated company {}", name)), true))
                }
                None => {
                    append_row(sheet, &[("company", name.trim()), ("active", format_bool(active))]);
                    Ok((OperationResult::ok(format!("Added company {}", name)), true))
                }
            }
        })
    }

    pub fn upsert_location(&self, location: &str, company: &str) -> Result<OperationResult> {
        if location.trim().is_empty() {
            return Ok(OperationResult::failed("Location name is required"));
        }
        self.modify(|workbook| {
            let sheet = workbook.require_sheet_mut(LOCATIONS)?;
            if find_row(sheet, &[("location", location), ("company", company)]).is_some() {
                return Ok((OperationResult::ok(format!("Location {} already exists", location)), false));
            }
            if let Some(row) = find_row(sheet, &[("location", location), ("company", "")]) {
                set_value(sheet, row, "company", company.trim());
                return Ok((OperationResult::ok(format!("Assigned location {} to {}", location, company)), true));
            }
            append_row(
                sheet,
                &[("location", location.trim()), ("company", company.trim()), ("link", "")],
            );
            Ok((OperationResult::ok(format!("Added location {}", location)), true))
        })
    }

    /// Register an asset type at a location. The company comes from the
    /// Locations table; a blank-location placeholder row is reused before a
    /// new row is appended.
    pub fn upsert_asset_type(&self, asset_type: &str, location: &str) -> Result<OperationResult> {
        if asset_type.trim().is_empty() {
            return Ok(OperationResult::failed("Asset type name is required"));
        }
        self.modify(|workbook| {
            let company = {
                let locations = workbook.require_sheet(LOCATIONS)?;
                find_row(locations, &[("location", location)])
                    .map(|row| value_at(locations, row, "company").to_string())
                    .unwrap_or_default()
            };

            let sheet = workbook.require_sheet_mut(ASSET_TYPES)?;
            let global_color = find_row(sheet, &[("asset_type", asset_type), ("location", ""), ("company", "")])
                .map(|row| value_at(sheet, row, "color").to_string())
                .filter(|c| !c.is_empty());

            if let Some(row) = find_row(
                sheet,
                &[("asset_type", asset_type), ("location", location), ("company", company.as_str())],
            ) {
                if value_at(sheet, row, "color").is_empty() {
                    let color = global_color.unwrap_or_else(random_color);
                    set_value(sheet, row, "color", &color);
                    return Ok((OperationResult::ok(format!("Asset type {} already exists", asset_type)), true));
                }
                return Ok((OperationResult::ok(format!("Asset type {} already exists", asset_type)), false));
            }

            if !location.trim().is_empty() {
                if let Some(row) = find_row(sheet, &[("asset_type", asset_type), ("location", "")]) {
                    set_value(sheet, row, "location", location.trim());
                    set_value(sheet, row, "company", &company);
                    if value_at(sheet, row, "color").is_empty() {
                        set_value(sheet, row, "color", &random_color());
                    }
                    return Ok((OperationResult::ok(format!("Assigned asset type {} to {}", asset_type, location)), true));
                }
            }

            let color = global_color.unwrap_or_else(random_color);
            append_row(
                sheet,
                &[
                    ("asset_type", asset_type.trim()),
                    ("location", location.trim()),
                    ("company", company.as_str()),
                    ("color", color.as_str()),
                    ("link", ""),
                ],
            );
            Ok((OperationResult::ok(format!("Added asset type {}", asset_type)), true))
        })
    }

    /// Legacy global colour setter. Colours are only written per
    /// company and location now.
    pub fn set_asset_type_color(&self, asset_type: &str, _color: &str) -> OperationResult {
        log::warn!(
            "Rejected global colour write for {}: use the company/location setter",
            asset_type
        );
        OperationResult::failed(
            "Global asset type colours are disabled; set the colour for a company and location",
        )
    }

    pub fn set_asset_type_color_for_company_location(
        &self,
        asset_type: &str,
        company: &str,
        location: &str,
        color: &str,
    ) -> Result<OperationResult> {
        if asset_type.trim().is_empty() || company.trim().is_empty() || location.trim().is_empty() {
            return Ok(OperationResult::failed(
                "Asset type, company and location are required",
            ));
        }
        self.modify(|workbook| {
            let sheet = workbook.require_sheet_mut(ASSET_TYPES)?;
            match find_row(
                sheet,
                &[("asset_type", asset_type), ("location", location), ("company", company)],
            ) {
                Some(row) => set_value(sheet, row, "color", color.trim()),
                None => {
                    append_row(
                        sheet,
                        &[
                            ("asset_type", asset_type.trim()),
                            ("location", location.trim()),
                            ("company", company.trim()),
                            ("color", color.trim()),
                            ("link", ""),
                        ],
                    );
                }
            }
            Ok((OperationResult::ok(format!("Colour set for {} at {}/{}", asset_type, company, location)), true))
        })
    }

    pub fn set_location_link(&self, company: &str, location: &str, link: &str) -> Result<OperationResult> {
        if location.trim().is_empty() {
            return Ok(OperationResult::failed("Location name is required"));
        }
        self.modify(|workbook| {
            let sheet = workbook.require_sheet_mut(LOCATIONS)?;
            match find_row(sheet, &[("location", location), ("company", company)]) {
                Some(row) => set_value(sheet, row, "link", link.trim()),
                None => {
                    append_row(
                        sheet,
                        &[("location", location.trim()), ("company", company.trim()), ("link", link.trim())],
                    );
                }
            }
            Ok((OperationResult::ok(format!("Link set for {}", location)), true))
        })
    }

    pub fn set_asset_type_link(
        &self,
        company: &str,
        location: &str,
        asset_type: &str,
        link: &str,
    ) -> Result<OperationResult> {
        if asset_type.trim().is_empty() {
            return Ok(OperationResult::failed("Asset type name is required"));
        }
        self.modify(|workbook| {
            let sheet = workbook.require_sheet_mut(ASSET_TYPES)?;
            match find_row(
                sheet,
                &[("asset_type", asset_type), ("location", location), ("company", company)],
            ) {
                Some(row) => set_value(sheet, row, "link", link.trim()),
                None => {
                    append_row(
                        sheet,
                        &[
                            ("asset_type", asset_type.trim()),
                            ("location", location.trim()),
                            ("company", company.trim()),
                            ("color", ""),
                            ("link", link.trim()),
                        ],
                    );
                }
            }
            Ok((OperationResult::ok(format!("Link set for {}", asset_type)), true))
        })
    }

    pub fn set_status_color(&self, status: &str, color: &str) -> Result<OperationResult> {
        if status.trim().is_empty() {
            return Ok(OperationResult::failed("Status is required"));
        }
        self.modify(|workbook| {
            let sheet = workbook.require_sheet_mut(STATUS_COLORS)?;
            match find_row(sheet, &[("Status", status)]) {
                Some(row) => set_value(sheet, row, "Color", color.trim()),
                None => {
                    append_row(sheet, &[("Status", status.trim()), ("Color", color.trim())]);
                }
            }
            Ok((OperationResult::ok(format!("Colour set for status {}", status)), true))
        })
    }

    /// Remove a status colour row entirely
    pub fn delete_status_row(&self, status: &str) -> Result<OperationResult> {
        self.modify(|workbook| {
            let sheet = workbook.require_sheet_mut(STATUS_COLORS)?;
            match find_row(sheet, &[("Status", status)]) {
                Some(row) => {
                    sheet.remove_row(row);
                    Ok((OperationResult::ok(format!("Deleted status {}", status)), true))
                }
                None => Ok((OperationResult::failed(format!("Status '{}' not found", status)), false)),
            }
        })
    }

    pub fn set_setting_boolean(&self, key: &str, value: bool) -> Result<OperationResult> {
        if key.trim().is_empty() {
            return Ok(OperationResult::failed("Setting key is required"));
        }
        self.modify(|workbook| {
            let sheet = workbook.require_sheet_mut(SETTINGS)?;
            match find_row(sheet, &[("Key", key)]) {
                Some(row) => set_value(sheet, row, "Value", format_bool(value)),
                None => {
                    append_row(sheet, &[("Key", key.trim()), ("Value", format_bool(value))]);
                }
            }
            Ok((OperationResult::ok(format!("Setting {} = {}", key, value)), true))
        })
    }

    /// Overwrite the core lookup tables with `tables`, leaving every other
    /// sheet alone
    pub fn replace_tables(&self, tables: &LookupTables) -> Result<()> {
        self.ensure_ready()?;
        let mut workbook = self.open()?;

        replace_sheet(
            &mut workbook,
            COMPANIES,
            tables
                .companies
                .iter()
                .map(|c| vec![c.name.clone(), format_bool(c.active).to_string()]),
        )?;
        replace_sheet(
            &mut workbook,
            LOCATIONS,
            tables
                .locations
                .iter()
                .map(|l| vec![l.name.clone(), l.company.clone(), l.link.clone()]),
        )?;
        replace_sheet(
            &mut workbook,
            ASSET_TYPES,
            tables.asset_types.iter().map(|a| {
                vec![
                    a.name.clone(),
                    a.location.clone(),
                    a.company.clone(),
                    a.color.clone(),
                    a.link.clone(),
                ]
            }),
        )?;
        replace_sheet(
            &mut workbook,
            STATUS_COLORS,
            tables
                .status_colors
                .iter()
                .map(|(status, color)| vec![status.clone(), color.clone()]),
        )?;
        replace_sheet(
            &mut workbook,
            SETTINGS,
            tables
                .settings
                .iter()
                .map(|(key, value)| vec![key.clone(), value.clone()]),
        )?;

        workbook.save(&self.path)
    }
}

fn replace_sheet(
    workbook: &mut Workbook,
    name: &str,
    rows: impl IntoIterator<Item = Vec<String>>,
) -> Result<()> {
    let header: Vec<String> = REQUIRED_SHEETS
        .iter()
        .find(|spec| spec.name == name)
        .map(|spec| spec.header.iter().map(|h| h.to_string()).collect())
        .unwrap_or_default();
    let sheet = workbook.require_sheet_mut(name)?;
    sheet.rows = vec![header];
    sheet.rows.extend(rows);
    Ok(())
}

fn read_tables(workbook: &Workbook) -> Result<LookupTables> {
    let companies = workbook.require_sheet(COMPANIES)?;
    let locations = workbook.require_sheet(LOCATIONS)?;
    let asset_types = workbook.require_sheet(ASSET_TYPES)?;
    let status_colors = workbook.require_sheet(STATUS_COLORS)?;
    let settings = workbook.require_sheet(SETTINGS)?;

    Ok(LookupTables {
        companies: data_rows(companies)
            .map(|row| CompanyEntry {
                name: value_at(companies, row, "company").to_string(),
                active: parse_bool(value_at(companies, row, "active")),
            })
            .collect(),
        locations: data_rows(locations)
            .map(|row| LocationEntry {
                name: value_at(locations, row, "location").to_string(),
                company: value_at(locations, row, "company").to_string(),
                link: value_at(locations, row, "link").to_string(),
            })
            .collect(),
        asset_types: data_rows(asset_types)
            .map(|row| AssetTypeEntry {
                name: value_at(asset_types, row, "asset_type").to_string(),
                location: value_at(asset_types, row, "location").to_string(),
                company: value_at(asset_types, row, "company").to_string(),
                color: value_at(asset_types, row, "color").to_string(),
                link: value_at(asset_types, row, "link").to_string(),
            })
            .collect(),
        status_colors: data_rows(status_colors)
            .map(|row| {
                (
                    value_at(status_colors, row, "Status").to_string(),
                    value_at(status_colors, row, "Color").to_string(),
                )
            })
            .collect(),
        settings: data_rows(settings)
            .map(|row| {
                (
                    value_at(settings, row, "Key").to_string(),
                    value_at(settings, row, "Value").to_string(),
                )
            })
            .collect(),
    })
}
