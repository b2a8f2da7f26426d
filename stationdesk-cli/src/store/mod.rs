//! File-based stores: one workbook (or directory of workbooks) per concern

pub mod aggregate;
pub mod lookups;
pub mod repairs;
pub mod schema_sync;
pub mod stations;
pub mod users;

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub use aggregate::{AggregateReport, aggregate_stations};
pub use lookups::{AssetTypeEntry, CompanyEntry, LocationEntry, LookupSnapshot, LookupStore};
pub use repairs::{RepairRow, RepairStore};
pub use schema_sync::{SchemaDescriptor, SyncReport};
pub use stations::{StationRecord, StationStore, StationView};
pub use users::{User, UserStore};

/// Outcome of an operation whose failure is an expected caller-input problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
}

impl OperationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        OperationResult {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        OperationResult {
            success: false,
            message: message.into(),
        }
    }
}

/// The (company, location) pair that partitions station and repair workbooks
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocationKey {
    pub company: String,
    pub location: String,
}

impl LocationKey {
    pub fn new(company: impl Into<String>, location: impl Into<String>) -> Self {
        LocationKey {
            company: company.into().trim().to_string(),
            location: location.into().trim().to_string(),
        }
    }

    /// `<root>/<company>/<location>.xlsx`
    pub fn workbook_path(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        if !self.company.is_empty() {
            path.push(sanitize_file_name(&self.company));
        }
        path.push(format!("{}.xlsx", sanitize_file_name(&self.location)));
        path
    }
}

static UNSAFE_FILE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).expect("valid regex"));

static UNSAFE_SHEET_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\[\]:*?/\\]").expect("valid regex"));

/// Replace characters that are not allowed in file names
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned = UNSAFE_FILE_CHARS.replace_all(name.trim(), "_");
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned.into_owned()
    }
}

/// Make a string usable as a worksheet name (no reserved characters, max 31 chars)
pub fn sanitize_sheet_name(name: &str) -> String {
    let cleaned = UNSAFE_SHEET_CHARS.replace_all(name.trim(), "_");
    let truncated: String = cleaned.chars().take(31).collect();
    if truncated.is_empty() {
        "Sheet1".to_string()
    } else {
        truncated
    }
}

/// Case-insensitive, whitespace-trimmed equality
pub(crate) fn same_text(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Spreadsheet booleans: TRUE/yes/y/1/x
pub(crate) fn parse_bool(text: &str) -> bool {
    matches!(
        text.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "y" | "1" | "x"
    )
}

pub(crate) fn format_bool(value: bool) -> &'static str {
    if value { "TRUE" } else { "FALSE" }
}

/// Lock files left by spreadsheet applications (`~$Book.xlsx`)
pub(crate) fn is_lock_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("~$"))
}

pub(crate) fn is_workbook_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("xlsx") || e.eq_ignore_ascii_case("xlsm"))
        && !is_lock_file(path)
}

/// Every workbook under `root`, sorted for stable scans
pub(crate) fn list_workbooks(root: &Path) -> Vec<PathBuf> {
    if !root.exists() {
        return Vec::new();
    }
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && is_workbook_file(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    files
}

/// Company directory of a workbook relative to the store root, if any
pub(crate) fn company_of(root: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(root).ok()?;
    let parent = relative.parent()?;
    let company = parent.components().next()?;
    Some(company.as_os_str().to_string_lossy().into_owned())
}

/// Location name encoded in a workbook's file stem
pub(crate) fn location_of(file: &Path) -> String {
    file.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
