//! Document mirror on SQLite
//!
//! Every entity is a JSON document in one `documents` table, keyed by
//! (collection, doc_key). Insertion order is kept in `seq`; an upsert keeps
//! the original position.

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{Local, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{
    AuthRepository, Backend, LookupRepository, Progress, RepairRepository, StationRepository,
};
use crate::config::{AppConfig, DatabaseConfig, Paths};
use crate::excel::Record;
use crate::store::lookups::{
    CompanyEntry, DEFAULT_SETTINGS, DEFAULT_STATUS_COLORS, EnsureReport, LocationEntry,
    LookupTables,
};
use crate::store::repairs::{station_id_of, with_defaults};
use crate::store::schema_sync::reconcile_record;
use crate::store::stations::merge_fields;
use crate::store::{
    AggregateReport, AssetTypeEntry, LocationKey, LookupSnapshot, OperationResult, RepairRow,
    SchemaDescriptor, StationRecord, SyncReport, User, sanitize_sheet_name,
};

pub const COMPANIES: &str = "companies";
pub const LOCATIONS: &str = "locations";
pub const ASSET_TYPES: &str = "asset_types";
pub const STATUS_COLORS: &str = "status_colors";
pub const SETTINGS: &str = "settings";
pub const STATIONS: &str = "stations";
pub const REPAIRS: &str = "repairs";
pub const USERS: &str = "users";

const LOOKUP_COLLECTIONS: &[&str] = &[COMPANIES, LOCATIONS, ASSET_TYPES, STATUS_COLORS, SETTINGS];

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    doc_key TEXT NOT NULL,
    body TEXT NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (collection, doc_key)
);
CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents (collection, seq);
"#;

/// JSON documents grouped into collections
#[derive(Debug, Clone)]
pub struct DocumentStore {
    pool: SqlitePool,
}

impl DocumentStore {
    pub async fn connect(url: &str, settings: &DatabaseConfig) -> Result<Self> {
        if !url.starts_with("sqlite:") {
            bail!("Unsupported mirror database URL: {}", url);
        }
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid mirror database URL: {}", url))?
            .create_if_missing(true);
        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.with_context(|| {
                    format!("Failed to create directory: {}", parent.display())
                })?;
            }
        }

        let max = settings.max_pool_size.max(1);
        let pool = SqlitePoolOptions::new()
            .min_connections(settings.min_pool_size.min(max))
            .max_connections(max)
            .acquire_timeout(Duration::from_millis(settings.server_selection_timeout_ms))
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to connect to mirror database: {}", url))?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .context("Mirror database did not answer")?;
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .context("Failed to create mirror schema")?;

        Ok(DocumentStore { pool })
    }

    /// Close the pool; later calls fail
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Open a SQLite file directly
    pub async fn open_file(path: &Path) -> Result<Self> {
        Self::connect(
            &format!("sqlite://{}", path.display()),
            &DatabaseConfig::default(),
        )
        .await
    }

    pub async fn put<T: Serialize>(&self, collection: &str, key: &str, value: &T) -> Result<()> {
        let body = serde_json::to_string(value)?;
        sqlx::query(
            r#"
            INSERT INTO documents (collection, doc_key, body, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (collection, doc_key)
            DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at
            "#,
        )
        .bind(collection)
        .bind(key)
        .bind(body)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to write {}/{}", collection, key))?;
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, collection: &str, key: &str) -> Result<Option<T>> {
        let row = sqlx::query("SELECT body FROM documents WHERE collection = ? AND doc_key = ?")
            .bind(collection)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to read {}/{}", collection, key))?;

        match row {
            Some(row) => {
                let body: String = row.try_get("body")?;
                Ok(Some(serde_json::from_str(&body).with_context(|| {
                    format!("Corrupt document {}/{}", collection, key)
                })?))
            }
            None => Ok(None),
        }
    }

    /// Every document of a collection with its key, in insertion order
    pub async fn all_keyed<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<(String, T)>> {
        let rows = sqlx::query(
            "SELECT doc_key, body FROM documents WHERE collection = ? ORDER BY seq",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("Failed to list {}", collection))?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.try_get("doc_key")?;
            let body: String = row.try_get("body")?;
            let value = serde_json::from_str(&body)
                .with_context(|| format!("Corrupt document {}/{}", collection, key))?;
            documents.push((key, value));
        }
        Ok(documents)
    }

    pub async fn all<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        Ok(self
            .all_keyed(collection)
            .await?
            .into_iter()
            .map(|(_, value)| value)
            .collect())
    }

    pub async fn remove(&self, collection: &str, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = ? AND doc_key = ?")
            .bind(collection)
            .bind(key)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to delete {}/{}", collection, key))?;
        Ok(result.rows_affected() > 0)
    }

    /// Swap a collection's contents in one transaction
    pub async fn replace_collection<T: Serialize>(
        &self,
        collection: &str,
        documents: &[(String, T)],
    ) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;
        sqlx::query("DELETE FROM documents WHERE collection = ?")
            .bind(collection)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to clear {}", collection))?;
        for (key, value) in documents {
            sqlx::query(
                r#"
                INSERT INTO documents (collection, doc_key, body, updated_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (collection, doc_key)
                DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at
                "#,
            )
            .bind(collection)
            .bind(key)
            .bind(serde_json::to_string(value)?)
            .bind(now)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to write {}/{}", collection, key))?;
        }
        tx.commit()
            .await
            .with_context(|| format!("Failed to commit {}", collection))?;
        Ok(())
    }

    /// Most recent write across the given collections, in epoch milliseconds
    pub async fn last_updated_ms(&self, collections: &[&str]) -> Result<i64> {
        let mut latest = 0;
        for collection in collections {
            let row = sqlx::query(
                "SELECT COALESCE(MAX(updated_at), 0) AS latest FROM documents WHERE collection = ?",
            )
            .bind(*collection)
            .fetch_one(&self.pool)
            .await?;
            latest = latest.max(row.try_get::<i64, _>("latest")?);
        }
        Ok(latest)
    }
}

fn doc_key(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim().to_lowercase())
        .collect::<Vec<_>>()
        .join("|")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyValue {
    key: String,
    value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RepairDoc {
    company: String,
    location: String,
    fields: Record,
}

/// The mirror as a complete backend
#[derive(Debug, Clone)]
pub struct MirrorBackend {
    docs: DocumentStore,
}

impl MirrorBackend {
    pub fn new(docs: DocumentStore) -> Self {
        MirrorBackend { docs }
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.docs
    }

    /// A station in one location, or the first one with this id anywhere
    async fn station_doc(
        &self,
        station_id: &str,
        key: Option<&LocationKey>,
    ) -> Result<Option<(String, StationRecord)>> {
        if let Some(key) = key {
            let found = scoped_key(key, station_id);
            let station = self.docs.get(STATIONS, &found).await?;
            return Ok(station.map(|s| (found, s)));
        }
        Ok(self
            .docs
            .all_keyed::<StationRecord>(STATIONS)
            .await?
            .into_iter()
            .find(|(_, s)| s.station_id.eq_ignore_ascii_case(station_id.trim())))
    }

    async fn put_station(&self, station: &StationRecord) -> Result<()> {
        self.docs.put(STATIONS, &station_key(station), station).await
    }

    /// Repairs of one location in grouped order, with their document keys
    async fn location_repairs(&self, key: &LocationKey) -> Result<Vec<(String, RepairDoc)>> {
        let docs: Vec<(String, RepairDoc)> = self
            .docs
            .all_keyed(REPAIRS)
            .await?
            .into_iter()
            .filter(|(_, doc): &(String, RepairDoc)| {
                doc.company.eq_ignore_ascii_case(&key.company)
                    && doc.location.eq_ignore_ascii_case(&key.location)
            })
            .collect();
        Ok(group_by_station(docs))
    }
}

/// Stable grouping by station id, groups in order of first appearance
fn group_by_station(docs: Vec<(String, RepairDoc)>) -> Vec<(String, RepairDoc)> {
    let mut groups: Vec<(String, Vec<(String, RepairDoc)>)> = Vec::new();
    for doc in docs {
        let id = station_id_of(&doc.1.fields).unwrap_or("").to_lowercase();
        match groups.iter_mut().find(|(g, _)| *g == id) {
            Some((_, members)) => members.push(doc),
            None => groups.push((id, vec![doc])),
        }
    }
    groups.into_iter().flat_map(|(_, members)| members).collect()
}

fn repair_rows(docs: Vec<(String, RepairDoc)>) -> Vec<RepairRow> {
    docs.into_iter()
        .enumerate()
        .map(|(index, (_, doc))| RepairRow {
            company: doc.company,
            location: doc.location,
            index,
            fields: doc.fields,
        })
        .collect()
}

/// Stations are unique per (company, location, id)
fn station_key(station: &StationRecord) -> String {
    doc_key(&[
        station.company.as_deref().unwrap_or(""),
        station.location.as_deref().unwrap_or(""),
        &station.station_id,
    ])
}

fn scoped_key(key: &LocationKey, station_id: &str) -> String {
    let mut fields = Record::new();
    fields.insert("Station ID", station_id);
    station_key(&station_for(key, "", fields))
}

/// Station record for a mirror-only create
fn station_for(key: &LocationKey, sheet_name: &str, fields: Record) -> StationRecord {
    let file = key.workbook_path(Path::new(""));
    StationRecord::from_record(fields, sheet_name, &file, Path::new(""))
}

impl Backend for MirrorBackend {
    fn name(&self) -> &'static str {
        "database"
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
impl StationRepository for MirrorBackend {
    async fn aggregate(&self, progress: Progress<'_>) -> Result<AggregateReport> {
        progress(0, "Reading stations from database");
        let rows: Vec<StationRecord> = self.docs.all(STATIONS).await?;
        progress(100, "Done");
        Ok(AggregateReport {
            total_count: rows.len(),
            valid_count: rows.iter().filter(|s| s.coordinates().is_some()).count(),
            rows,
            ..Default::default()
        })
    }

    async fn get_by_id(&self, station_id: &str) -> Result<Option<StationRecord>> {
        Ok(self.station_doc(station_id, None).await?.map(|(_, s)| s))
    }

    async fn create(
        &self,
        key: &LocationKey,
        asset_type: &str,
        record: &Record,
    ) -> Result<OperationResult> {
        let sheet_name = sanitize_sheet_name(&format!("{} {}", asset_type.trim(), key.location));
        let mut station = station_for(key, &sheet_name, record.clone());
        if station.station_id.is_empty() {
            return Ok(OperationResult::failed("Station ID is required"));
        }
        if self
            .station_doc(&station.station_id, Some(key))
            .await?
            .is_some()
        {
            return Ok(OperationResult::failed(format!(
                "Station {} already exists",
                station.station_id
            )));
        }
        if station.asset_type.is_empty() {
            station.asset_type = asset_type.trim().to_string();
        }
        self.put_station(&station).await?;
        Ok(OperationResult::ok(format!("Created station {}", station.station_id)))
    }

    async fn update(
        &self,
        station_id: &str,
        fields: &Record,
        schema_hint: Option<&str>,
        key: Option<&LocationKey>,
    ) -> Result<OperationResult> {
        let (old_key, mut station) = match (self.station_doc(station_id, key).await?, key) {
            (Some(found), _) => found,
            (None, Some(key)) => {
                let mut seed = Record::new();
                seed.insert("Station ID", station_id);
                (scoped_key(key, station_id), station_for(key, "", seed))
            }
            (None, None) => {
                return Ok(OperationResult::failed(format!(
                    "Station {} not found",
                    station_id
                )));
            }
        };

        let mut merged = station.fields.clone();
        merge_fields(&mut merged, fields, schema_hint);
        station.set_fields(merged);
        // A changed id would orphan the old document
        if station_key(&station) != old_key {
            self.docs.remove(STATIONS, &old_key).await?;
        }
        self.put_station(&station).await?;
        Ok(OperationResult::ok(format!("Updated station {}", station_id)))
    }

    async fn delete(&self, station_id: &str) -> Result<OperationResult> {
        let mut removed = 0;
        for (found, station) in self.docs.all_keyed::<StationRecord>(STATIONS).await? {
            if station.station_id.eq_ignore_ascii_case(station_id.trim())
                && self.docs.remove(STATIONS, &found).await?
            {
                removed += 1;
            }
        }
        if removed > 0 {
            Ok(OperationResult::ok(format!("Deleted station {}", station_id)))
        } else {
            Ok(OperationResult::failed(format!(
                "Station {} not found",
                station_id
            )))
        }
    }

    async fn update_asset_type_schema(
        &self,
        schema: &SchemaDescriptor,
        exclude_station_id: Option<&str>,
    ) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        let mut locations: Vec<(Option<String>, Option<String>)> = Vec::new();

        for mut station in self.docs.all::<StationRecord>(STATIONS).await? {
            if !station.asset_type.eq_ignore_ascii_case(&schema.asset_type)
                || exclude_station_id.is_some_and(|id| id.eq_ignore_ascii_case(&station.station_id))
            {
                continue;
            }
            let reconciled = reconcile_record(&station.fields, schema);
            if reconciled == station.fields {
                continue;
            }
            station.set_fields(reconciled);
            self.put_station(&station).await?;

            report.updated_rows += 1;
            let location = (station.company.clone(), station.location.clone());
            if !locations.contains(&location) {
                locations.push(location);
            }
        }
        report.updated_locations = locations.len();
        Ok(report)
    }

    async fn write_location_rows(
        &self,
        key: &LocationKey,
        sheet_name: &str,
        rows: &[Record],
    ) -> Result<OperationResult> {
        let mut written = 0;
        for row in rows.iter().filter(|r| !r.is_blank()) {
            let incoming = station_for(key, sheet_name, row.clone());
            if incoming.station_id.is_empty() {
                continue;
            }
            let station = match self.station_doc(&incoming.station_id, Some(key)).await? {
                Some((_, mut existing)) => {
                    let mut merged = existing.fields.clone();
                    merge_fields(&mut merged, row, None);
                    existing.set_fields(merged);
                    existing
                }
                None => incoming,
            };
            self.put_station(&station).await?;
            written += 1;
        }
        Ok(OperationResult::ok(format!(
            "Wrote {} rows to {}",
            written, sheet_name
        )))
    }
}

#[async_trait]
impl LookupRepository for MirrorBackend {
    async fn ensure_ready(&self) -> Result<EnsureReport> {
        let mut report = EnsureReport::default();
        let seeds: [(&str, &[(&str, &str)]); 2] =
            [(STATUS_COLORS, DEFAULT_STATUS_COLORS), (SETTINGS, DEFAULT_SETTINGS)];
        for (collection, rows) in seeds {
            if !self.docs.all_keyed::<KeyValue>(collection).await?.is_empty() {
                continue;
            }
            let documents: Vec<(String, KeyValue)> = rows
                .iter()
                .map(|(key, value)| {
                    (
                        doc_key(&[key]),
                        KeyValue {
                            key: key.to_string(),
                            value: value.to_string(),
                        },
                    )
                })
                .collect();
            self.docs.replace_collection(collection, &documents).await?;
            report.created_sheets.push(collection.to_string());
        }
        Ok(report)
    }

    async fn tables(&self) -> Result<LookupTables> {
        let pairs = |docs: Vec<KeyValue>| -> Vec<(String, String)> {
            docs.into_iter().map(|d| (d.key, d.value)).collect()
        };
        Ok(LookupTables {
            companies: self.docs.all(COMPANIES).await?,
            locations: self.docs.all(LOCATIONS).await?,
            asset_types: self.docs.all(ASSET_TYPES).await?,
            status_colors: pairs(self.docs.all(STATUS_COLORS).await?),
            settings: pairs(self.docs.all(SETTINGS).await?),
        })
    }

    async fn snapshot(&self) -> Result<LookupSnapshot> {
        let tables = self.tables().await?;
        let mtime = self.docs.last_updated_ms(LOOKUP_COLLECTIONS).await?;
        Ok(LookupSnapshot::build(&tables, mtime))
    }

    async fn replace_tables(&self, tables: &LookupTables) -> Result<()> {
        let companies: Vec<(String, CompanyEntry)> = tables
            .companies
            .iter()
            .map(|c| (doc_key(&[&c.name]), c.clone()))
            .collect();
        let locations: Vec<(String, LocationEntry)> = tables
            .locations
            .iter()
            .map(|l| (doc_key(&[&l.company, &l.name]), l.clone()))
            .collect();
        let asset_types: Vec<(String, AssetTypeEntry)> = tables
            .asset_types
            .iter()
            .map(|a| (doc_key(&[&a.company, &a.location, &a.name]), a.clone()))
            .collect();
        let key_values = |rows: &[(String, String)]| -> Vec<(String, KeyValue)> {
            rows.iter()
                .map(|(key, value)| {
                    (
                        doc_key(&[key]),
                        KeyValue {
                            key: key.clone(),
                            value: value.clone(),
                        },
                    )
                })
                .collect()
        };

        self.docs.replace_collection(COMPANIES, &companies).await?;
        self.docs.replace_collection(LOCATIONS, &locations).await?;
        self.docs.replace_collection(ASSET_TYPES, &asset_types).await?;
        self.docs
            .replace_collection(STATUS_COLORS, &key_values(&tables.status_colors))
            .await?;
        self.docs
            .replace_collection(SETTINGS, &key_values(&tables.settings))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RepairRepository for MirrorBackend {
    async fn get_all(&self) -> Result<Vec<RepairRow>> {
        let docs: Vec<(String, RepairDoc)> = self.docs.all_keyed(REPAIRS).await?;
        let mut by_location: Vec<((String, String), Vec<(String, RepairDoc)>)> = Vec::new();
        for doc in docs {
            let location = (doc.1.company.to_lowercase(), doc.1.location.to_lowercase());
            match by_location.iter_mut().find(|(l, _)| *l == location) {
                Some((_, members)) => members.push(doc),
                None => by_location.push((location, vec![doc])),
            }
        }
        Ok(by_location
            .into_iter()
            .flat_map(|(_, members)| repair_rows(group_by_station(members)))
            .collect())
    }

    async fn list(&self, key: &LocationKey) -> Result<Vec<RepairRow>> {
        Ok(repair_rows(self.location_repairs(key).await?))
    }

    async fn append(&self, key: &LocationKey, repair: &Record) -> Result<OperationResult> {
        let Some(station_id) = station_id_of(repair).map(str::to_string) else {
            return Ok(OperationResult::failed("Station ID is required"));
        };
        let doc = RepairDoc {
            company: key.company.clone(),
            location: key.location.clone(),
            fields: with_defaults(repair, Local::now().date_naive()),
        };
        self.docs
            .put(REPAIRS, &Uuid::new_v4().to_string(), &doc)
            .await?;
        Ok(OperationResult::ok(format!("Repair added for {}", station_id)))
    }

    async fn delete(&self, key: &LocationKey, index: usize) -> Result<OperationResult> {
        let docs = self.location_repairs(key).await?;
        let Some((found, _)) = docs.get(index) else {
            return Ok(OperationResult::failed(format!("Repair {} not found", index)));
        };
        self.docs.remove(REPAIRS, found).await?;
        Ok(OperationResult::ok(format!("Deleted repair {}", index)))
    }
}

#[async_trait]
impl AuthRepository for MirrorBackend {
    async fn get_all(&self) -> Result<Vec<User>> {
        self.docs.all(USERS).await
    }

    async fn get_by_id(&self, email: &str) -> Result<Option<User>> {
        self.docs.get(USERS, &doc_key(&[email])).await
    }

    async fn create(&self, user: &User) -> Result<OperationResult> {
        if user.email.trim().is_empty() {
            return Ok(OperationResult::failed("Email is required"));
        }
        let key = doc_key(&[&user.email]);
        if self.docs.get::<User>(USERS, &key).await?.is_some() {
            return Ok(OperationResult::failed(format!(
                "User {} already exists",
                user.email
            )));
        }
        let mut user = user.clone();
        if user.created_at.trim().is_empty() {
            user.created_at = Utc::now().to_rfc3339();
        }
        self.docs.put(USERS, &key, &user).await?;
        Ok(OperationResult::ok(format!("Created user {}", user.email)))
    }

    async fn update(&self, email: &str, user: &User) -> Result<OperationResult> {
        let key = doc_key(&[email]);
        let Some(existing) = self.docs.get::<User>(USERS, &key).await? else {
            return Ok(OperationResult::failed(format!("User {} not found", email)));
        };
        let mut user = user.clone();
        if user.created_at.trim().is_empty() {
            user.created_at = existing.created_at;
        }
        let new_key = doc_key(&[&user.email]);
        if new_key != key {
            self.docs.remove(USERS, &key).await?;
        }
        self.docs.put(USERS, &new_key, &user).await?;
        Ok(OperationResult::ok(format!("Updated user {}", email)))
    }

    async fn delete(&self, email: &str) -> Result<OperationResult> {
        if self.docs.remove(USERS, &doc_key(&[email])).await? {
            Ok(OperationResult::ok(format!("Deleted user {}", email)))
        } else {
            Ok(OperationResult::failed(format!("User {} not found", email)))
        }
    }
}

/// Opens the mirror backend for a configuration
#[async_trait]
pub trait MirrorConnector: Send + Sync {
    async fn connect(&self, config: &AppConfig, paths: &Paths) -> Result<Arc<dyn Backend>>;
}

/// Connects to the SQLite document store named by the config
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnector;

#[async_trait]
impl MirrorConnector for SqliteConnector {
    async fn connect(&self, config: &AppConfig, paths: &Paths) -> Result<Arc<dyn Backend>> {
        let url = config.mirror_url(paths);
        let docs = DocumentStore::connect(&url, &config.database).await?;
        log::info!("Connected to mirror database {}", url);
        Ok(Arc::new(MirrorBackend::new(docs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::excel::HeaderPair;
    use crate::repository::FieldFilter;
    use tempfile::TempDir;

    async fn backend(dir: &TempDir) -> MirrorBackend {
        let docs = DocumentStore::open_file(&dir.path().join("mirror.db"))
            .await
            .unwrap();
        MirrorBackend::new(docs)
    }

    fn record(entries: &[(&str, &str)]) -> Record {
        entries.iter().copied().collect()
    }

    #[tokio::test]
    async fn test_upsert_keeps_insertion_order() {
        let dir = TempDir::new().unwrap();
        let mirror = backend(&dir).await;
        let docs = mirror.documents();
        docs.put("things", "b", &1).await.unwrap();
        docs.put("things", "a", &2).await.unwrap();
        docs.put("things", "b", &3).await.unwrap();

        let all: Vec<(String, i32)> = docs.all_keyed("things").await.unwrap();
        assert_eq!(all, vec![("b".to_string(), 3), ("a".to_string(), 2)]);
        assert!(docs.remove("things", "a").await.unwrap());
        assert!(!docs.remove("things", "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_station_create_update_delete() {
        let dir = TempDir::new().unwrap();
        let mirror = backend(&dir).await;
        let key = LocationKey::new("NHS", "BC");
        let stations = mirror.stations();

        let created = stations
            .create(&key, "Cableway", &record(&[("Station ID", "BC001"), ("Latitude", "49")]))
            .await
            .unwrap();
        assert!(created.success);
        assert!(!stations
            .create(&key, "Cableway", &record(&[("Station ID", "bc001")]))
            .await
            .unwrap()
            .success);

        stations
            .update("BC001", &record(&[("Longitude", "-121"), ("Notes", "x")]), None, None)
            .await
            .unwrap();
        let station = stations.get_by_id("bc001").await.unwrap().unwrap();
        assert_eq!(station.asset_type, "Cableway");
        assert_eq!(station.company.as_deref(), Some("NHS"));
        assert_eq!(station.location.as_deref(), Some("BC"));
        assert!(station.coordinates().is_some());
        assert_eq!(station.fields.get("Notes"), Some("x"));

        let report = stations.aggregate(&|_, _| {}).await.unwrap();
        assert_eq!(report.valid_count, 1);

        assert!(stations.delete("BC001").await.unwrap().success);
        assert!(stations.get_by_id("BC001").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_same_station_id_in_two_locations() {
        let dir = TempDir::new().unwrap();
        let mirror = backend(&dir).await;
        let bc = LocationKey::new("NHS", "BC");
        let on = LocationKey::new("OPG", "ON");
        let stations = mirror.stations();

        for key in [&bc, &on] {
            let created = stations
                .create(key, "Cableway", &record(&[("Station ID", "S1"), ("Notes", "new")]))
                .await
                .unwrap();
            assert!(created.success, "{}", created.message);
        }
        let docs: Vec<(String, StationRecord)> =
            mirror.documents().all_keyed(STATIONS).await.unwrap();
        assert_eq!(docs.len(), 2);

        stations
            .update("S1", &record(&[("Notes", "ontario")]), None, Some(&on))
            .await
            .unwrap();
        let docs: Vec<StationRecord> = mirror.documents().all(STATIONS).await.unwrap();
        let notes_at = |location: &str| {
            docs.iter()
                .find(|s| s.location.as_deref() == Some(location))
                .and_then(|s| s.fields.get("Notes").map(str::to_string))
        };
        assert_eq!(notes_at("BC").as_deref(), Some("new"));
        assert_eq!(notes_at("ON").as_deref(), Some("ontario"));

        assert!(stations.delete("S1").await.unwrap().success);
        assert!(stations.get_by_id("S1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_schema_sync_on_documents() {
        let dir = TempDir::new().unwrap();
        let mirror = backend(&dir).await;
        let key = LocationKey::new("NHS", "BC");
        let stations = mirror.stations();
        for (id, colour) in [("A", "red"), ("B", "blue")] {
            stations
                .create(
                    &key,
                    "Cableway",
                    &record(&[("Station ID", id), ("Old – Colour", colour)]),
                )
                .await
                .unwrap();
        }

        let schema = SchemaDescriptor::new("cableway", vec![HeaderPair::new("Paint", "Colour")]);
        let report = stations
            .update_asset_type_schema(&schema, Some("B"))
            .await
            .unwrap();
        assert_eq!(report.updated_rows, 1);
        assert_eq!(report.updated_locations, 1);

        let a = stations.get_by_id("A").await.unwrap().unwrap();
        assert_eq!(a.fields.get("Paint – Colour"), Some("red"));
        let b = stations.get_by_id("B").await.unwrap().unwrap();
        assert_eq!(b.fields.get("Old – Colour"), Some("blue"));

        let again = stations
            .update_asset_type_schema(&schema, Some("B"))
            .await
            .unwrap();
        assert_eq!(again.updated_rows, 0);
    }

    #[tokio::test]
    async fn test_lookup_replication_and_seeding() {
        let dir = TempDir::new().unwrap();
        let mirror = backend(&dir).await;
        let lookups = mirror.lookups();

        let seeded = lookups.ensure_ready().await.unwrap();
        assert_eq!(seeded.created_sheets.len(), 2);
        assert!(lookups.ensure_ready().await.unwrap().created_sheets.is_empty());

        let tables = LookupTables {
            companies: vec![CompanyEntry {
                name: "NHS".into(),
                active: true,
            }],
            asset_types: vec![AssetTypeEntry {
                name: "X".into(),
                location: "loc1".into(),
                company: "coA".into(),
                color: "#000003".into(),
                link: String::new(),
            }],
            status_colors: vec![("Active".into(), "#00ff00".into())],
            settings: vec![("applyRepairColorsOnMap".into(), "TRUE".into())],
            ..Default::default()
        };
        lookups.replace_tables(&tables).await.unwrap();

        assert_eq!(lookups.tables().await.unwrap(), tables);
        let snapshot = lookups.snapshot().await.unwrap();
        assert_eq!(snapshot.resolve_color("coa", "LOC1", "x"), Some("#000003"));
        assert!(snapshot.apply_repair_colors_on_map);
        assert!(snapshot.mtime_ms > 0);

        let found = lookups
            .find_asset_types(&FieldFilter::new().with("company", "COA"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_repairs_are_listed_grouped() {
        let dir = TempDir::new().unwrap();
        let mirror = backend(&dir).await;
        let key = LocationKey::new("NHS", "BC");
        let repairs = mirror.repairs();
        for id in ["A", "B", "A", "C"] {
            repairs
                .append(&key, &record(&[("Station ID", id)]))
                .await
                .unwrap();
        }
        assert!(!repairs.append(&key, &record(&[("Note", "x")])).await.unwrap().success);

        let ids: Vec<String> = repairs
            .list(&key)
            .await
            .unwrap()
            .iter()
            .map(|r| r.station_id().unwrap_or("").to_string())
            .collect();
        assert_eq!(ids, vec!["A", "A", "B", "C"]);

        assert!(repairs.delete(&key, 2).await.unwrap().success);
        let remaining = repairs.get_all().await.unwrap();
        assert_eq!(remaining.len(), 3);
        assert!(remaining.iter().all(|r| r.station_id() != Some("B")));
    }

    #[tokio::test]
    async fn test_users() {
        let dir = TempDir::new().unwrap();
        let mirror = backend(&dir).await;
        let auth = mirror.auth();
        let user = User {
            name: "Ada".into(),
            email: "ada@example.org".into(),
            password_hash: "h".into(),
            admin: false,
            created_at: String::new(),
        };
        assert!(auth.create(&user).await.unwrap().success);
        assert!(!auth.create(&user).await.unwrap().success);
        let stored = auth.get_by_id("ADA@example.org").await.unwrap().unwrap();
        assert!(!stored.created_at.is_empty());
        assert!(auth.delete("ada@example.org").await.unwrap().success);
        assert!(auth.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_url_fails_to_connect() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig {
            database: DatabaseConfig {
                url: "postgres://nowhere".into(),
                ..DatabaseConfig::default()
            },
            ..AppConfig::default()
        };
        let result = SqliteConnector.connect(&config, &Paths::at(dir.path())).await;
        assert!(result.is_err());
    }
}
