//! Two-tier (section, field) header model

use serde::{Deserialize, Serialize};

/// Separator between section and field in a composite key
pub const COMPOSITE_SEPARATOR: &str = " – ";

/// The fixed section every station sheet starts with
pub const GENERAL_INFORMATION: &str = "General Information";

/// Field names that belong to the General Information section
const GENERAL_FIELDS: &[&str] = &[
    "station id",
    "category",
    "site name",
    "station name",
    "province",
    "latitude",
    "longitude",
    "status",
];

/// Field names coerced to `General Information – Category`
const CATEGORY_ALIASES: &[&str] = &["asset type", "type", "category"];

/// Header texts that identify the Station ID column
const STATION_ID_HEADERS: &[&str] = &["station id", "stationid", "id"];

/// One column header: an optional section and a field name
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeaderPair {
    #[serde(default)]
    pub section: String,
    pub field: String,
}

impl HeaderPair {
    pub fn new(section: impl Into<String>, field: impl Into<String>) -> Self {
        HeaderPair {
            section: section.into().trim().to_string(),
            field: field.into().trim().to_string(),
        }
    }

    /// A header with no section
    pub fn plain(field: impl Into<String>) -> Self {
        HeaderPair::new("", field)
    }

    pub fn general(field: impl Into<String>) -> Self {
        HeaderPair::new(GENERAL_INFORMATION, field)
    }

    /// Split a `"section – field"` key, or treat the whole key as a field
    pub fn from_key(key: &str) -> Self {
        match key.split_once(COMPOSITE_SEPARATOR) {
            Some((section, field)) if !field.trim().is_empty() => HeaderPair::new(section, field),
            _ => HeaderPair::plain(key),
        }
    }

    pub fn composite_key(&self) -> String {
        if self.section.is_empty() {
            self.field.clone()
        } else {
            format!("{}{}{}", self.section, COMPOSITE_SEPARATOR, self.field)
        }
    }

    pub fn is_general(&self) -> bool {
        self.section.eq_ignore_ascii_case(GENERAL_INFORMATION)
    }

    /// Same column identity, ignoring case
    pub fn same_as(&self, other: &HeaderPair) -> bool {
        self.section.eq_ignore_ascii_case(&other.section)
            && self.field.eq_ignore_ascii_case(&other.field)
    }

    /// Coerce asset-type style field names to `General Information – Category`.
    /// "Structure Type" keeps its own identity.
    pub fn normalized(self) -> Self {
        if is_category_alias(&self.field) {
            HeaderPair::general("Category")
        } else {
            self
        }
    }
}

fn lower(text: &str) -> String {
    text.trim().to_ascii_lowercase()
}

pub fn is_category_alias(field: &str) -> bool {
    let field = lower(field);
    field != "structure type" && CATEGORY_ALIASES.contains(&field.as_str())
}

/// Whether a field belongs to the General Information section by name
pub fn is_general_field(field: &str) -> bool {
    GENERAL_FIELDS.contains(&lower(field).as_str())
}

/// Standard fields preserved verbatim by schema synchronization
pub fn is_standard_field(field: &str) -> bool {
    is_general_field(field) || is_category_alias(field)
}

pub fn is_station_id_header(text: &str) -> bool {
    STATION_ID_HEADERS.contains(&lower(text).as_str())
}

pub fn is_name_field(field: &str) -> bool {
    matches!(lower(field).as_str(), "site name" | "station name")
}

/// Position of a header in a list, ignoring case
pub fn position_of(pairs: &[HeaderPair], pair: &HeaderPair) -> Option<usize> {
    pairs.iter().position(|p| p.same_as(pair))
}

/// Append every pair of `incoming` not already present, keeping existing order
pub fn union_pairs(existing: &[HeaderPair], incoming: &[HeaderPair]) -> Vec<HeaderPair> {
    let mut merged = existing.to_vec();
    for pair in incoming {
        if position_of(&merged, pair).is_none() {
            merged.push(pair.clone());
        }
    }
    merged
}

/// Put Station ID, Category and the site name first among the General
/// Information columns. Only General Information slots are permuted; every
/// other column keeps its position.
pub fn order_general_information(pairs: &mut [HeaderPair]) {
    let slots: Vec<usize> = pairs
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_general())
        .map(|(i, _)| i)
        .collect();
    if slots.is_empty() {
        return;
    }

    let general: Vec<HeaderPair> = slots.iter().map(|&i| pairs[i].clone()).collect();
    let mut lead = Vec::with_capacity(3);
    let id = general.iter().position(|p| is_station_id_header(&p.field));
    let category = general
        .iter()
        .position(|p| p.field.eq_ignore_ascii_case("category"));
    let name = general.iter().position(|p| is_name_field(&p.field));
    for index in [id, category, name].into_iter().flatten() {
        lead.push(index);
    }

    let mut reordered: Vec<HeaderPair> = lead.iter().map(|&i| general[i].clone()).collect();
    reordered.extend(
        general
            .iter()
            .enumerate()
            .filter(|(i, _)| !lead.contains(i))
            .map(|(_, p)| p.clone()),
    );

    for (slot, pair) in slots.into_iter().zip(reordered) {
        pairs[slot] = pair;
    }
}
