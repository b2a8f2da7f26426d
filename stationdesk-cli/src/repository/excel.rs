//! Workbook-backed repositories, the source of truth
//!
//! Calls run the blocking store code inline: the worker owns a dedicated
//! thread, so there is no shared executor to stall.

use anyhow::Result;
use async_trait::async_trait;

use super::{
    AuthRepository, Backend, LookupRepository, Progress, RepairRepository, StationRepository,
};
use crate::config::Paths;
use crate::excel::Record;
use crate::store::lookups::{EnsureReport, LookupTables};
use crate::store::{
    AggregateReport, LocationKey, LookupSnapshot, LookupStore, OperationResult, RepairRow,
    RepairStore, SchemaDescriptor, StationRecord, StationStore, SyncReport, User, UserStore,
    aggregate_stations, schema_sync,
};

#[derive(Debug, Clone)]
pub struct ExcelBackend {
    lookups: LookupStore,
    stations: StationStore,
    repairs: RepairStore,
    users: UserStore,
}

impl ExcelBackend {
    pub fn new(paths: &Paths) -> Self {
        ExcelBackend {
            lookups: LookupStore::new(paths.lookups_file(), Some(paths.lookup_template.clone())),
            stations: StationStore::new(paths.stations_dir()),
            repairs: RepairStore::new(paths.repairs_dir()),
            users: UserStore::new(paths.users_file()),
        }
    }

    pub fn lookup_store(&self) -> &LookupStore {
        &self.lookups
    }

    pub fn station_store(&self) -> &StationStore {
        &self.stations
    }

    pub fn repair_store(&self) -> &RepairStore {
        &self.repairs
    }

    pub fn user_store(&self) -> &UserStore {
        &self.users
    }
}

impl Backend for ExcelBackend {
    fn name(&self) -> &'static str {
        "excel"
    }

    fn stations(&self) -> &dyn StationRepository {
        self
    }

    fn lookups(&self) -> &dyn LookupRepository {
        self
    }

    fn repairs(&self) -> &dyn RepairRepository {
        self
    }

    fn auth(&self) -> &dyn AuthRepository {
        self
    }
}

#[async_trait]
impl StationRepository for ExcelBackend {
    async fn aggregate(&self, progress: Progress<'_>) -> Result<AggregateReport> {
        Ok(aggregate_stations(self.stations.root(), progress))
    }

    async fn get_by_id(&self, station_id: &str) -> Result<Option<StationRecord>> {
        Ok(self
            .stations
            .find_station(station_id, None)?
            .map(|view| view.station))
    }

    async fn create(
        &self,
        key: &LocationKey,
        asset_type: &str,
        record: &Record,
    ) -> Result<OperationResult> {
        self.stations.create_station(key, asset_type, record)
    }

    async fn update(
        &self,
        station_id: &str,
        fields: &Record,
        schema_hint: Option<&str>,
        key: Option<&LocationKey>,
    ) -> Result<OperationResult> {
        self.stations
            .update_station(station_id, fields, schema_hint, key)
    }

    async fn delete(&self, station_id: &str) -> Result<OperationResult> {
        log::warn!("Refused to delete station {} from workbooks", station_id);
        Ok(OperationResult::failed(
            "Deleting stations from workbooks is not supported",
        ))
    }

    async fn update_asset_type_schema(
        &self,
        schema: &SchemaDescriptor,
        exclude_station_id: Option<&str>,
    ) -> Result<SyncReport> {
        schema_sync::synchronize_asset_type_schema(
            self.stations.root(),
            schema,
            exclude_station_id,
        )
    }

    async fn write_location_rows(
        &self,
        key: &LocationKey,
        sheet_name: &str,
        rows: &[Record],
    ) -> Result<OperationResult> {
        self.stations.write_location_rows(key, sheet_name, rows)
    }
}

#[async_trait]
impl LookupRepository for ExcelBackend {
    async fn ensure_ready(&self) -> Result<EnsureReport> {
        self.lookups.ensure_ready()
    }

    async fn tables(&self) -> Result<LookupTables> {
        self.lookups.tables()
    }

    async fn snapshot(&self) -> Result<LookupSnapshot> {
        self.lookups.snapshot()
    }

    async fn replace_tables(&self, tables: &LookupTables) -> Result<()> {
        self.lookups.replace_tables(tables)
    }
}

#[async_trait]
impl RepairRepository for ExcelBackend {
    async fn get_all(&self) -> Result<Vec<RepairRow>> {
        Ok(self.repairs.list_all())
    }

    async fn list(&self, key: &LocationKey) -> Result<Vec<RepairRow>> {
        self.repairs.list(key)
    }

    async fn append(&self, key: &LocationKey, repair: &Record) -> Result<OperationResult> {
        self.repairs.append(key, repair)
    }

    async fn delete(&self, key: &LocationKey, index: usize) -> Result<OperationResult> {
        self.repairs.delete(key, index)
    }
}

#[async_trait]
impl AuthRepository for ExcelBackend {
    async fn get_all(&self) -> Result<Vec<User>> {
        self.users.list()
    }

    async fn get_by_id(&self, email: &str) -> Result<Option<User>> {
        self.users.find_by_email(email)
    }

    async fn create(&self, user: &User) -> Result<OperationResult> {
        self.users.create(user)
    }

    async fn update(&self, email: &str, user: &User) -> Result<OperationResult> {
        self.users.update(email, user)
    }

    async fn delete(&self, email: &str) -> Result<OperationResult> {
        self.users.delete(email)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::FieldFilter;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_station_delete_is_refused() {
        let dir = TempDir::new().unwrap();
        let backend = ExcelBackend::new(&Paths::at(dir.path()));
        let result = backend.stations().delete("BC001").await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_station_round_trip_through_trait() {
        let dir = TempDir::new().unwrap();
        let backend = ExcelBackend::new(&Paths::at(dir.path()));
        let key = LocationKey::new("NHS", "BC");
        let record: Record = [("Station ID", "BC001"), ("Site Name", "Hope")]
            .into_iter()
            .collect();

        let stations = backend.stations();
        assert!(stations.create(&key, "Cableway", &record).await.unwrap().success);

        let found = stations.get_by_id("BC001").await.unwrap().unwrap();
        assert_eq!(found.asset_type, "Cableway");
        let by_name = stations
            .find_many(&FieldFilter::new().with("name", "hope"))
            .await
            .unwrap();
        assert_eq!(by_name.len(), 1);
        assert_eq!(stations.get_all().await.unwrap().len(), 1);
    }
}
