//! Read routing and mirrored writes over the two backends

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Local, Utc};
use tokio::sync::OnceCell;

use super::{
    AuthRepository, Backend, ExcelBackend, LookupRepository, MirrorConnector, MirroredWrite,
    Progress, RepairRepository, SqliteConnector, StationRepository,
};
use crate::config::{AppConfig, ConfigHandle, Paths, ReadFrom, WriteTo};
use crate::excel::Record;
use crate::store::lookups::{EnsureReport, LookupTables};
use crate::store::repairs::with_defaults;
use crate::store::{
    AggregateReport, LocationKey, LookupSnapshot, LookupStore, OperationResult, RepairRow,
    SchemaDescriptor, StationRecord, SyncReport, User,
};

/// Entry point for every entity operation.
///
/// The workbook backend is the source of truth. The mirror is connected on
/// first use when the config asks for it; a failed connection is remembered
/// and the facade stays file-only for the rest of the process.
pub struct RepositoryFacade {
    paths: Paths,
    config: ConfigHandle,
    excel: Arc<ExcelBackend>,
    connector: Arc<dyn MirrorConnector>,
    mirror: OnceCell<Option<Arc<dyn Backend>>>,
}

impl RepositoryFacade {
    pub fn new(paths: Paths, config: ConfigHandle, connector: Arc<dyn MirrorConnector>) -> Self {
        RepositoryFacade {
            excel: Arc::new(ExcelBackend::new(&paths)),
            paths,
            config,
            connector,
            mirror: OnceCell::new(),
        }
    }

    /// Facade over `paths` with the config file in the data root
    pub fn open(paths: Paths) -> Result<Self> {
        let config = ConfigHandle::load(paths.config_file())?;
        Ok(Self::new(paths, config, Arc::new(SqliteConnector)))
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn config(&self) -> Arc<AppConfig> {
        self.config.get()
    }

    pub fn reload_config(&self) -> Result<Arc<AppConfig>> {
        self.config.reload()
    }

    pub fn excel(&self) -> &ExcelBackend {
        &self.excel
    }

    /// Whether the mirror connected; `None` until something needed it
    pub fn mirror_available(&self) -> Option<bool> {
        self.mirror.get().map(Option::is_some)
    }

    async fn mirror(&self) -> Option<Arc<dyn Backend>> {
        let config = self.config.get();
        if !config.needs_mirror() {
            return None;
        }
        self.mirror
            .get_or_init(|| async {
                match self.connector.connect(&config, &self.paths).await {
                    Ok(backend) => {
                        log::info!("Mirror backend '{}' ready", backend.name());
                        Some(backend)
                    }
                    Err(e) => {
                        log::error!("Mirror unavailable, continuing with workbooks only: {:#}", e);
                        None
                    }
                }
            })
            .await
            .clone()
    }

    async fn reader(&self) -> Arc<dyn Backend> {
        if self.config.get().read_from == ReadFrom::Database {
            if let Some(mirror) = self.mirror().await {
                return mirror;
            }
        }
        self.excel.clone()
    }

    async fn secondary(&self) -> Option<Arc<dyn Backend>> {
        if self.config.get().write_to == WriteTo::Both {
            self.mirror().await
        } else {
            None
        }
    }

    pub fn stations(&self) -> StationsView<'_> {
        StationsView { facade: self }
    }

    pub fn lookups(&self) -> LookupsView<'_> {
        LookupsView { facade: self }
    }

    pub fn repairs(&self) -> RepairsView<'_> {
        RepairsView { facade: self }
    }

    pub fn auth(&self) -> AuthView<'_> {
        AuthView { facade: self }
    }
}

pub struct StationsView<'a> {
    facade: &'a RepositoryFacade,
}

#[async_trait]
impl StationRepository for StationsView<'_> {
    async fn aggregate(&self, progress: Progress<'_>) -> Result<AggregateReport> {
        self.facade.reader().await.stations().aggregate(progress).await
    }

    async fn get_by_id(&self, station_id: &str) -> Result<Option<StationRecord>> {
        self.facade.reader().await.stations().get_by_id(station_id).await
    }

    async fn create(
        &self,
        key: &LocationKey,
        asset_type: &str,
        record: &Record,
    ) -> Result<OperationResult> {
        let secondary = self.facade.secondary().await;
        MirroredWrite::new("createStation")
            .run(
                self.facade.excel.stations().create(key, asset_type, record),
                secondary
                    .as_deref()
                    .map(|m| m.stations().create(key, asset_type, record)),
            )
            .await
    }

    async fn update(
        &self,
        station_id: &str,
        fields: &Record,
        schema_hint: Option<&str>,
        key: Option<&LocationKey>,
    ) -> Result<OperationResult> {
        let secondary = self.facade.secondary().await;
        MirroredWrite::new("updateStation")
            .run(
                self.facade
                    .excel
                    .stations()
                    .update(station_id, fields, schema_hint, key),
                secondary
                    .as_deref()
                    .map(|m| m.stations().update(station_id, fields, schema_hint, key)),
            )
            .await
    }

    async fn delete(&self, station_id: &str) -> Result<OperationResult> {
        let secondary = self.facade.secondary().await;
        MirroredWrite::new("deleteStation")
            .run(
                self.facade.excel.stations().delete(station_id),
                secondary.as_deref().map(|m| m.stations().delete(station_id)),
            )
            .await
    }

    async fn update_asset_type_schema(
        &self,
        schema: &SchemaDescriptor,
        exclude_station_id: Option<&str>,
    ) -> Result<SyncReport> {
        let secondary = self.facade.secondary().await;
        let report = MirroredWrite::new("updateAssetTypeSchema")
            .run(
                self.facade
                    .excel
                    .stations()
                    .update_asset_type_schema(schema, exclude_station_id),
                secondary
                    .as_deref()
                    .map(|m| m.stations().update_asset_type_schema(schema, exclude_station_id)),
            )
            .await?;
        log::info!(
            "Schema sync for {}: {} rows in {} locations",
            schema.asset_type,
            report.updated_rows,
            report.updated_locations
        );
        Ok(report)
    }

    async fn write_location_rows(
        &self,
        key: &LocationKey,
        sheet_name: &str,
        rows: &[Record],
    ) -> Result<OperationResult> {
        let secondary = self.facade.secondary().await;
        MirroredWrite::new("writeLocationRows")
            .run(
                self.facade
                    .excel
                    .stations()
                    .write_location_rows(key, sheet_name, rows),
                secondary
                    .as_deref()
                    .map(|m| m.stations().write_location_rows(key, sheet_name, rows)),
            )
            .await
    }
}

/// Lookup reads plus the row-level setters. A successful setter sends the
/// whole lookup tables to the mirror.
pub struct LookupsView<'a> {
    facade: &'a RepositoryFacade,
}

impl LookupsView<'_> {
    fn store(&self) -> &LookupStore {
        self.facade.excel.lookup_store()
    }

    async fn replicate(&self, operation: &str, outcome: Result<OperationResult>) -> Result<OperationResult> {
        let secondary = self.facade.secondary().await;
        let store = self.store();
        MirroredWrite::new(operation)
            .run(
                async { outcome },
                secondary.as_deref().map(|m| async move {
                    let tables = store.tables()?;
                    m.lookups().replace_tables(&tables).await
                }),
            )
            .await
    }

    pub async fn upsert_company(&self, name: &str, active: bool) -> Result<OperationResult> {
        let outcome = self.store().upsert_company(name, active);
        self.replicate("upsertCompany", outcome).await
    }

    pub async fn upsert_location(&self, location: &str, company: &str) -> Result<OperationResult> {
        let outcome = self.store().upsert_location(location, company);
        self.replicate("upsertLocation", outcome).await
    }

    pub async fn upsert_asset_type(&self, asset_type: &str, location: &str) -> Result<OperationResult> {
        let outcome = self.store().upsert_asset_type(asset_type, location);
        self.replicate("upsertAssetType", outcome).await
    }

    /// Legacy global colour setter, always declined
    pub fn set_asset_type_color(&self, asset_type: &str, color: &str) -> OperationResult {
        self.store().set_asset_type_color(asset_type, color)
    }

    pub async fn set_asset_type_color_for_company_location(
        &self,
        asset_type: &str,
        company: &str,
        location: &str,
        color: &str,
    ) -> Result<OperationResult> {
        let outcome = self
            .store()
            .set_asset_type_color_for_company_location(asset_type, company, location, color);
        self.replicate("setAssetTypeColorForCompanyLocation", outcome)
            .await
    }

    pub async fn set_location_link(
        &self,
        company: &str,
        location: &str,
        link: &str,
    ) -> Result<OperationResult> {
        let outcome = self.store().set_location_link(company, location, link);
        self.replicate("setLocationLink", outcome).await
    }

    pub async fn set_asset_type_link(
        &self,
        company: &str,
        location: &str,
        asset_type: &str,
        link: &str,
    ) -> Result<OperationResult> {
        let outcome = self
            .store()
            .set_asset_type_link(company, location, asset_type, link);
        self.replicate("setAssetTypeLink", outcome).await
    }

    pub async fn set_status_color(&self, status: &str, color: &str) -> Result<OperationResult> {
        let outcome = self.store().set_status_color(status, color);
        self.replicate("setStatusColor", outcome).await
    }

    pub async fn delete_status_row(&self, status: &str) -> Result<OperationResult> {
        let outcome = self.store().delete_status_row(status);
        self.replicate("deleteStatusRow", outcome).await
    }

    pub async fn set_setting_boolean(&self, key: &str, value: bool) -> Result<OperationResult> {
        let outcome = self.store().set_setting_boolean(key, value);
        self.replicate("setSettingBoolean", outcome).await
    }
}

#[async_trait]
impl LookupRepository for LookupsView<'_> {
    async fn ensure_ready(&self) -> Result<EnsureReport> {
        let secondary = self.facade.secondary().await;
        MirroredWrite::new("ensureLookupsReady")
            .run(
                self.facade.excel.lookups().ensure_ready(),
                secondary.as_deref().map(|m| m.lookups().ensure_ready()),
            )
            .await
    }

    async fn tables(&self) -> Result<LookupTables> {
        self.facade.reader().await.lookups().tables().await
    }

    async fn snapshot(&self) -> Result<LookupSnapshot> {
        self.facade.reader().await.lookups().snapshot().await
    }

    async fn replace_tables(&self, tables: &LookupTables) -> Result<()> {
        let secondary = self.facade.secondary().await;
        MirroredWrite::new("replaceLookupTables")
            .run(
                self.facade.excel.lookups().replace_tables(tables),
                secondary.as_deref().map(|m| m.lookups().replace_tables(tables)),
            )
            .await
    }
}

pub struct RepairsView<'a> {
    facade: &'a RepositoryFacade,
}

#[async_trait]
impl RepairRepository for RepairsView<'_> {
    async fn get_all(&self) -> Result<Vec<RepairRow>> {
        self.facade.reader().await.repairs().get_all().await
    }

    async fn list(&self, key: &LocationKey) -> Result<Vec<RepairRow>> {
        self.facade.reader().await.repairs().list(key).await
    }

    async fn append(&self, key: &LocationKey, repair: &Record) -> Result<OperationResult> {
        // Both backends must record the same date
        let repair = with_defaults(repair, Local::now().date_naive());
        let secondary = self.facade.secondary().await;
        MirroredWrite::new("appendRepair")
            .run(
                self.facade.excel.repairs().append(key, &repair),
                secondary.as_deref().map(|m| m.repairs().append(key, &repair)),
            )
            .await
    }

    async fn delete(&self, key: &LocationKey, index: usize) -> Result<OperationResult> {
        let secondary = self.facade.secondary().await;
        MirroredWrite::new("deleteRepair")
            .run(
                self.facade.excel.repairs().delete(key, index),
                secondary.as_deref().map(|m| m.repairs().delete(key, index)),
            )
            .await
    }
}

pub struct AuthView<'a> {
    facade: &'a RepositoryFacade,
}

#[async_trait]
impl AuthRepository for AuthView<'_> {
    async fn get_all(&self) -> Result<Vec<User>> {
        self.facade.reader().await.auth().get_all().await
    }

    async fn get_by_id(&self, email: &str) -> Result<Option<User>> {
        self.facade.reader().await.auth().get_by_id(email).await
    }

    async fn create(&self, user: &User) -> Result<OperationResult> {
        let mut user = user.clone();
        if user.created_at.trim().is_empty() {
            user.created_at = Utc::now().to_rfc3339();
        }
        let secondary = self.facade.secondary().await;
        MirroredWrite::new("createUser")
            .run(
                self.facade.excel.auth().create(&user),
                secondary.as_deref().map(|m| m.auth().create(&user)),
            )
            .await
    }

    async fn update(&self, email: &str, user: &User) -> Result<OperationResult> {
        let secondary = self.facade.secondary().await;
        MirroredWrite::new("updateUser")
            .run(
                self.facade.excel.auth().update(email, user),
                secondary.as_deref().map(|m| m.auth().update(email, user)),
            )
            .await
    }

    async fn delete(&self, email: &str) -> Result<OperationResult> {
        let secondary = self.facade.secondary().await;
        MirroredWrite::new("deleteUser")
            .run(
                self.facade.excel.auth().delete(email),
                secondary.as_deref().map(|m| m.auth().delete(email)),
            )
            .await
    }
}
