//! Backend-agnostic repositories
//!
//! Both the workbook store and the document mirror implement the same four
//! traits. [`RepositoryFacade`] picks the backend for reads and fans writes
//! out through [`MirroredWrite`].

pub mod excel;
pub mod facade;
pub mod mirror;
pub mod mirrored;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::excel::Record;
use crate::store::lookups::{EnsureReport, LookupTables};
use crate::store::{
    AggregateReport, AssetTypeEntry, LocationKey, LookupSnapshot, OperationResult, RepairRow,
    SchemaDescriptor, StationRecord, SyncReport, User,
};

pub use excel::ExcelBackend;
pub use facade::RepositoryFacade;
pub use mirror::{DocumentStore, MirrorBackend, MirrorConnector, SqliteConnector};
pub use mirrored::{Mirrorable, MirroredWrite};

/// Progress sink for long reads: percentage and stage label
pub type Progress<'a> = &'a (dyn Fn(u8, &str) + Send + Sync);

/// Case-insensitive equality predicates over an entity's serialized fields.
///
/// Keys are looked up on the entity itself first, then inside its `fields`
/// map, so `station_id` and `Cable – Length` both work for stations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldFilter(pub Vec<(String, String)>);

impl FieldFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push((key.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches<T: Serialize>(&self, item: &T) -> bool {
        if self.0.is_empty() {
            return true;
        }
        let Ok(value) = serde_json::to_value(item) else {
            return false;
        };
        self.0.iter().all(|(key, wanted)| {
            lookup_text(&value, key).is_some_and(|found| found.trim().eq_ignore_ascii_case(wanted.trim()))
        })
    }

    pub fn apply<T: Serialize>(&self, items: Vec<T>) -> Vec<T> {
        items.into_iter().filter(|item| self.matches(item)).collect()
    }
}

fn scalar_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Null => Some(String::new()),
        serde_json::Value::Bool(_) | serde_json::Value::Number(_) => Some(value.to_string()),
        _ => None,
    }
}

fn lookup_text(value: &serde_json::Value, key: &str) -> Option<String> {
    let object = value.as_object()?;
    let find = |map: &serde_json::Map<String, serde_json::Value>| {
        map.get(key)
            .or_else(|| {
                map.iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(key))
                    .map(|(_, v)| v)
            })
            .and_then(scalar_text)
    };
    find(object).or_else(|| object.get("fields")?.as_object().and_then(find))
}

#[async_trait]
pub trait StationRepository: Send + Sync {
    /// Every station with counts, reporting progress
    async fn aggregate(&self, progress: Progress<'_>) -> Result<AggregateReport>;

    async fn get_all(&self) -> Result<Vec<StationRecord>> {
        Ok(self.aggregate(&|_, _| {}).await?.rows)
    }

    async fn get_by_id(&self, station_id: &str) -> Result<Option<StationRecord>>;

    async fn find_one(&self, filter: &FieldFilter) -> Result<Option<StationRecord>> {
        Ok(self.get_all().await?.into_iter().find(|s| filter.matches(s)))
    }

    async fn find_many(&self, filter: &FieldFilter) -> Result<Vec<StationRecord>> {
        Ok(filter.apply(self.get_all().await?))
    }

    async fn create(
        &self,
        key: &LocationKey,
        asset_type: &str,
        record: &Record,
    ) -> Result<OperationResult>;

    async fn update(
        &self,
        station_id: &str,
        fields: &Record,
        schema_hint: Option<&str>,
        key: Option<&LocationKey>,
    ) -> Result<OperationResult>;

    async fn delete(&self, station_id: &str) -> Result<OperationResult>;

    async fn update_asset_type_schema(
        &self,
        schema: &SchemaDescriptor,
        exclude_station_id: Option<&str>,
    ) -> Result<SyncReport>;

    async fn write_location_rows(
        &self,
        key: &LocationKey,
        sheet_name: &str,
        rows: &[Record],
    ) -> Result<OperationResult>;
}

/// Read side of the lookup tables plus wholesale replacement.
///
/// Row-level lookup edits are workbook operations; the mirror receives their
/// result through `replace_tables`.
#[async_trait]
pub trait LookupRepository: Send + Sync {
    async fn ensure_ready(&self) -> Result<EnsureReport>;

    async fn tables(&self) -> Result<LookupTables>;

    async fn snapshot(&self) -> Result<LookupSnapshot>;

    async fn replace_tables(&self, tables: &LookupTables) -> Result<()>;

    async fn find_asset_types(&self, filter: &FieldFilter) -> Result<Vec<AssetTypeEntry>> {
        Ok(filter.apply(self.tables().await?.asset_types))
    }
}

#[async_trait]
pub trait RepairRepository: Send + Sync {
    async fn get_all(&self) -> Result<Vec<RepairRow>>;

    async fn list(&self, key: &LocationKey) -> Result<Vec<RepairRow>>;

    async fn find_one(&self, filter: &FieldFilter) -> Result<Option<RepairRow>> {
        Ok(self.get_all().await?.into_iter().find(|r| filter.matches(r)))
    }

    async fn find_many(&self, filter: &FieldFilter) -> Result<Vec<RepairRow>> {
        Ok(filter.apply(self.get_all().await?))
    }

    async fn append(&self, key: &LocationKey, repair: &Record) -> Result<OperationResult>;

    async fn delete(&self, key: &LocationKey, index: usize) -> Result<OperationResult>;
}

#[async_trait]
pub trait AuthRepository: Send + Sync {
    async fn get_all(&self) -> Result<Vec<User>>;

    async fn get_by_id(&self, email: &str) -> Result<Option<User>>;

    async fn find_one(&self, filter: &FieldFilter) -> Result<Option<User>> {
        Ok(self.get_all().await?.into_iter().find(|u| filter.matches(u)))
    }

    async fn find_many(&self, filter: &FieldFilter) -> Result<Vec<User>> {
        Ok(filter.apply(self.get_all().await?))
    }

    async fn create(&self, user: &User) -> Result<OperationResult>;

    async fn update(&self, email: &str, user: &User) -> Result<OperationResult>;

    async fn delete(&self, email: &str) -> Result<OperationResult>;
}

/// One complete storage backend
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;
    fn stations(&self) -> &dyn StationRepository;
    fn lookups(&self) -> &dyn LookupRepository;
    fn repairs(&self) -> &dyn RepairRepository;
    fn auth(&self) -> &dyn AuthRepository;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CompanyEntry;

    #[test]
    fn test_filter_matches_top_level_and_fields() {
        let station = StationRecord {
            station_id: "BC001".into(),
            asset_type: "Cableway".into(),
            name: "Hope".into(),
            province: "BC".into(),
            lat: String::new(),
            lon: String::new(),
            status: "Active".into(),
            location_file: "BC.xlsx".into(),
            company: Some("NHS".into()),
            location: Some("BC".into()),
            fields: [("Cable – Length", "120")].into_iter().collect(),
        };

        assert!(FieldFilter::new().with("station_id", "bc001").matches(&station));
        assert!(FieldFilter::new().with("Cable – Length", "120").matches(&station));
        assert!(
            !FieldFilter::new()
                .with("asset_type", "Cableway")
                .with("status", "Retired")
                .matches(&station)
        );
        assert!(!FieldFilter::new().with("missing", "").matches(&station));
    }

    #[test]
    fn test_filter_handles_booleans() {
        let companies = vec![
            CompanyEntry {
                name: "NHS".into(),
                active: true,
            },
            CompanyEntry {
                name: "Old".into(),
                active: false,
            },
        ];
        let active = FieldFilter::new().with("active", "TRUE").apply(companies);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "NHS");
    }
}
