//! The command surface served by the worker
//!
//! Commands travel as `{"command": "<name>", "args": {..}}` with camelCase
//! names and argument keys. Every command yields a JSON value; anticipated
//! input problems come back as an `OperationResult` with `success: false`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::excel::{self, HeaderMode, HeaderPair, Record, Sheet, Workbook};
use crate::repository::{
    AuthRepository, FieldFilter, LookupRepository, Progress, RepairRepository, RepositoryFacade,
    StationRepository,
};
use crate::store::{LocationKey, SchemaDescriptor, User};

fn active_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "command",
    content = "args",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Command {
    EnsureLookupsReady,
    ReadLookupsSnapshot,
    /// Legacy global colour setter; always declined
    SetAssetTypeColor {
        asset_type: String,
        color: String,
    },
    SetAssetTypeColorForCompanyLocation {
        asset_type: String,
        company: String,
        location: String,
        color: String,
    },
    SetLocationLink {
        company: String,
        location: String,
        link: String,
    },
    SetAssetTypeLink {
        company: String,
        location: String,
        asset_type: String,
        link: String,
    },
    SetStatusColor {
        status: String,
        color: String,
    },
    DeleteStatusRow {
        status: String,
    },
    SetSettingBoolean {
        key: String,
        value: bool,
    },
    UpsertCompany {
        name: String,
        #[serde(default = "active_default")]
        active: bool,
    },
    UpsertLocation {
        location: String,
        company: String,
    },
    UpsertAssetType {
        asset_type: String,
        location: String,
    },
    AppendRepair {
        company: String,
        location: String,
        repair: Record,
    },
    ListRepairs {
        #[serde(default)]
        company: Option<String>,
        #[serde(default)]
        location: Option<String>,
    },
    FindRepairs {
        filter: FieldFilter,
    },
    DeleteRepair {
        company: String,
        location: String,
        index: usize,
    },
    ReadStationsAggregate,
    GetStation {
        station_id: String,
    },
    FindStations {
        filter: FieldFilter,
    },
    CreateStation {
        company: String,
        location: String,
        asset_type: String,
        fields: Record,
    },
    UpdateStationInLocationFile {
        station_id: String,
        fields: Record,
        #[serde(default)]
        schema_hint: Option<String>,
        #[serde(default)]
        company: Option<String>,
        #[serde(default)]
        location: Option<String>,
    },
    DeleteStation {
        station_id: String,
    },
    UpdateAssetTypeSchema {
        asset_type: String,
        pairs: Vec<HeaderPair>,
        #[serde(default)]
        exclude_station_id: Option<String>,
    },
    WriteLocationRows {
        company: String,
        location: String,
        sheet_name: String,
        rows: Vec<Record>,
    },
    ReadSheetData {
        path: PathBuf,
        sheet: String,
    },
    ListSheets {
        path: PathBuf,
    },
    /// Decode the first sheet of a base64-encoded workbook
    ParseRows {
        data: String,
    },
    ParseRowsFromSheet {
        data: String,
        sheet: String,
    },
    ListUsers,
    GetUser {
        email: String,
    },
    CreateUser {
        user: User,
    },
    UpdateUser {
        email: String,
        user: User,
    },
    DeleteUser {
        email: String,
    },
    ReloadConfig,
}

/// One decoded worksheet
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetData {
    pub sheet: String,
    pub two_row_header: bool,
    pub header_pairs: Vec<HeaderPair>,
    pub rows: Vec<Record>,
}

impl SheetData {
    pub fn decode(sheet: &Sheet) -> Self {
        let decoded = excel::decode(sheet);
        SheetData {
            sheet: sheet.name.clone(),
            two_row_header: decoded.mode == HeaderMode::TwoRow,
            header_pairs: decoded.header_pairs,
            rows: decoded.records,
        }
    }
}

fn location_key(company: Option<String>, location: Option<String>) -> Option<LocationKey> {
    location.map(|loc| LocationKey::new(company.unwrap_or_default(), loc))
}

fn decode_base64_workbook(data: &str) -> Result<Workbook> {
    let bytes = STANDARD
        .decode(data.trim())
        .context("Workbook data is not valid base64")?;
    Workbook::from_bytes(&bytes)
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::EnsureLookupsReady => "ensureLookupsReady",
            Command::ReadLookupsSnapshot => "readLookupsSnapshot",
            Command::SetAssetTypeColor { .. } => "setAssetTypeColor",
            Command::SetAssetTypeColorForCompanyLocation { .. } => {
                "setAssetTypeColorForCompanyLocation"
            }
            Command::SetLocationLink { .. } => "setLocationLink",
            Command::SetAssetTypeLink { .. } => "setAssetTypeLink",
            Command::SetStatusColor { .. } => "setStatusColor",
            Command::DeleteStatusRow { .. } => "deleteStatusRow",
            Command::SetSettingBoolean { .. } => "setSettingBoolean",
            Command::UpsertCompany { .. } => "upsertCompany",
            Command::UpsertLocation { .. } => "upsertLocation",
            Command::UpsertAssetType { .. } => "upsertAssetType",
            Command::AppendRepair { .. } => "appendRepair",
            Command::ListRepairs { .. } => "listRepairs",
            Command::FindRepairs { .. } => "findRepairs",
            Command::DeleteRepair { .. } => "deleteRepair",
            Command::ReadStationsAggregate => "readStationsAggregate",
            Command::GetStation { .. } => "getStation",
            Command::FindStations { .. } => "findStations",
            Command::CreateStation { .. } => "createStation",
            Command::UpdateStationInLocationFile { .. } => "updateStationInLocationFile",
            Command::DeleteStation { .. } => "deleteStation",
            Command::UpdateAssetTypeSchema { .. } => "updateAssetTypeSchema",
            Command::WriteLocationRows { .. } => "writeLocationRows",
            Command::ReadSheetData { .. } => "readSheetData",
            Command::ListSheets { .. } => "listSheets",
            Command::ParseRows { .. } => "parseRows",
            Command::ParseRowsFromSheet { .. } => "parseRowsFromSheet",
            Command::ListUsers => "listUsers",
            Command::GetUser { .. } => "getUser",
            Command::CreateUser { .. } => "createUser",
            Command::UpdateUser { .. } => "updateUser",
            Command::DeleteUser { .. } => "deleteUser",
            Command::ReloadConfig => "reloadConfig",
        }
    }

    /// Run the command against the facade
    pub async fn execute(self, facade: &RepositoryFacade, progress: Progress<'_>) -> Result<Value> {
        let lookups = facade.lookups();
        let stations = facade.stations();
        let repairs = facade.repairs();
        let auth = facade.auth();

        let value = match self {
            Command::EnsureLookupsReady => serde_json::to_value(lookups.ensure_ready().await?)?,
            Command::ReadLookupsSnapshot => serde_json::to_value(lookups.snapshot().await?)?,
            Command::SetAssetTypeColor { asset_type, color } => {
                serde_json::to_value(lookups.set_asset_type_color(&asset_type, &color))?
            }
            Command::SetAssetTypeColorForCompanyLocation {
                asset_type,
                company,
                location,
                color,
            } => serde_json::to_value(
                lookups
                    .set_asset_type_color_for_company_location(
                        &asset_type,
                        &company,
                        &location,
                        &color,
                    )
                    .await?,
            )?,
            Command::SetLocationLink {
                company,
                location,
                link,
            } => serde_json::to_value(lookups.set_location_link(&company, &location, &link).await?)?,
            Command::SetAssetTypeLink {
                company,
                location,
                asset_type,
                link,
            } => serde_json::to_value(
                lookups
                    .set_asset_type_link(&company, &location, &asset_type, &link)
                    .await?,
            )?,
            Command::SetStatusColor { status, color } => {
                serde_json::to_value(lookups.set_status_color(&status, &color).await?)?
            }
            Command::DeleteStatusRow { status } => {
                serde_json::to_value(lookups.delete_status_row(&status).await?)?
            }
            Command::SetSettingBoolean { key, value } => {
                serde_json::to_value(lookups.set_setting_boolean(&key, value).await?)?
            }
            Command::UpsertCompany { name, active } => {
                serde_json::to_value(lookups.upsert_company(&name, active).await?)?
            }
            Command::UpsertLocation { location, company } => {
                serde_json::to_value(lookups.upsert_location(&location, &company).await?)?
            }
            Command::UpsertAssetType {
                asset_type,
                location,
            } => serde_json::to_value(lookups.upsert_asset_type(&asset_type, &location).await?)?,
            Command::AppendRepair {
                company,
                location,
                repair,
            } => {
                let key = LocationKey::new(company, location);
                serde_json::to_value(repairs.append(&key, &repair).await?)?
            }
            Command::ListRepairs { company, location } => {
                let rows = match location_key(company, location) {
                    Some(key) => repairs.list(&key).await?,
                    None => repairs.get_all().await?,
                };
                serde_json::to_value(rows)?
            }
            Command::FindRepairs { filter } => serde_json::to_value(repairs.find_many(&filter).await?)?,
            Command::DeleteRepair {
                company,
                location,
                index,
            } => {
                let key = LocationKey::new(company, location);
                serde_json::to_value(repairs.delete(&key, index).await?)?
            }
            Command::ReadStationsAggregate => {
                let report = stations.aggregate(progress).await?;
                log::debug!(
                    "Aggregated {} stations ({} with coordinates)",
                    report.total_count,
                    report.valid_count
                );
                serde_json::to_value(report)?
            }
            Command::GetStation { station_id } => {
                serde_json::to_value(stations.get_by_id(&station_id).await?)?
            }
            Command::FindStations { filter } => {
                serde_json::to_value(stations.find_many(&filter).await?)?
            }
            Command::CreateStation {
                company,
                location,
                asset_type,
                fields,
            } => {
                let key = LocationKey::new(company, location);
                serde_json::to_value(stations.create(&key, &asset_type, &fields).await?)?
            }
            Command::UpdateStationInLocationFile {
                station_id,
                fields,
                schema_hint,
                company,
                location,
            } => {
                let key = location_key(company, location);
                serde_json::to_value(
                    stations
                        .update(&station_id, &fields, schema_hint.as_deref(), key.as_ref())
                        .await?,
                )?
            }
            Command::DeleteStation { station_id } => {
                serde_json::to_value(stations.delete(&station_id).await?)?
            }
            Command::UpdateAssetTypeSchema {
                asset_type,
                pairs,
                exclude_station_id,
            } => {
                let schema = SchemaDescriptor::new(asset_type, pairs);
                serde_json::to_value(
                    stations
                        .update_asset_type_schema(&schema, exclude_station_id.as_deref())
                        .await?,
                )?
            }
            Command::WriteLocationRows {
                company,
                location,
                sheet_name,
                rows,
            } => {
                let key = LocationKey::new(company, location);
                serde_json::to_value(stations.write_location_rows(&key, &sheet_name, &rows).await?)?
            }
            Command::ReadSheetData { path, sheet } => {
                progress(10, "Opening workbook");
                let workbook = Workbook::open(&path)?;
                let sheet = workbook.require_sheet(&sheet)?;
                serde_json::to_value(SheetData::decode(sheet))?
            }
            Command::ListSheets { path } => {
                let workbook = Workbook::open(&path)?;
                json!({ "sheets": workbook.sheet_names() })
            }
            Command::ParseRows { data } => {
                let workbook = decode_base64_workbook(&data)?;
                let data = workbook
                    .sheets
                    .first()
                    .map(SheetData::decode)
                    .context("Workbook has no sheets")?;
                serde_json::to_value(data)?
            }
            Command::ParseRowsFromSheet { data, sheet } => {
                let workbook = decode_base64_workbook(&data)?;
                let sheet = workbook.require_sheet(&sheet)?;
                serde_json::to_value(SheetData::decode(sheet))?
            }
            Command::ListUsers => serde_json::to_value(auth.get_all().await?)?,
            Command::GetUser { email } => serde_json::to_value(auth.get_by_id(&email).await?)?,
            Command::CreateUser { user } => serde_json::to_value(auth.create(&user).await?)?,
            Command::UpdateUser { email, user } => {
                serde_json::to_value(auth.update(&email, &user).await?)?
            }
            Command::DeleteUser { email } => serde_json::to_value(auth.delete(&email).await?)?,
            Command::ReloadConfig => serde_json::to_value(&*facade.reload_config()?)?,
        };
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, ConfigHandle, Paths};
    use crate::repository::SqliteConnector;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn facade(dir: &TempDir) -> RepositoryFacade {
        RepositoryFacade::new(
            Paths::at(dir.path()),
            ConfigHandle::fixed(AppConfig::default()),
            Arc::new(SqliteConnector),
        )
    }

    #[test]
    fn test_wire_format() {
        let command: Command = serde_json::from_value(json!({
            "command": "setAssetTypeColorForCompanyLocation",
            "args": { "assetType": "Cableway", "company": "NHS", "location": "BC", "color": "#112233" }
        }))
        .unwrap();
        assert_eq!(command.name(), "setAssetTypeColorForCompanyLocation");

        let unit: Command = serde_json::from_value(json!({ "command": "ensureLookupsReady" })).unwrap();
        assert_eq!(unit, Command::EnsureLookupsReady);

        let upsert: Command = serde_json::from_value(json!({
            "command": "upsertCompany",
            "args": { "name": "NHS" }
        }))
        .unwrap();
        assert_eq!(
            upsert,
            Command::UpsertCompany {
                name: "NHS".into(),
                active: true
            }
        );
    }

    #[tokio::test]
    async fn test_parse_rows_from_base64() {
        let dir = TempDir::new().unwrap();
        let facade = facade(&dir);

        let mut workbook = Workbook::default();
        let sheet = workbook.sheet_or_insert("Upload");
        sheet.push_row(vec!["General Information".into(), "Cable".into()]);
        sheet.push_row(vec!["Station ID".into(), "Length".into()]);
        sheet.push_row(vec!["BC001".into(), "120".into()]);
        let path = dir.path().join("upload.xlsx");
        workbook.save(&path).unwrap();
        let data = STANDARD.encode(std::fs::read(&path).unwrap());

        let value = Command::ParseRows { data: data.clone() }
            .execute(&facade, &|_, _| {})
            .await
            .unwrap();
        let parsed: SheetData = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.sheet, "Upload");
        assert!(parsed.two_row_header);
        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].get("Station ID"), Some("BC001"));
        assert_eq!(parsed.rows[0].get("Cable – Length"), Some("120"));

        let missing = Command::ParseRowsFromSheet {
            data,
            sheet: "Nope".into(),
        }
        .execute(&facade, &|_, _| {})
        .await;
        assert!(missing.is_err());

        let sheets = Command::ListSheets { path }
            .execute(&facade, &|_, _| {})
            .await
            .unwrap();
        assert_eq!(sheets, json!({ "sheets": ["Upload"] }));
    }

    #[tokio::test]
    async fn test_legacy_colour_setter_is_declined() {
        let dir = TempDir::new().unwrap();
        let facade = facade(&dir);
        let value = Command::SetAssetTypeColor {
            asset_type: "Cableway".into(),
            color: "#000000".into(),
        }
        .execute(&facade, &|_, _| {})
        .await
        .unwrap();
        assert_eq!(value["success"], json!(false));
    }
}
