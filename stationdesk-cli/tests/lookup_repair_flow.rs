use std::sync::Arc;

use chrono::Local;
use serde_json::json;
use stationdesk::config::{AppConfig, ConfigHandle, Paths};
use stationdesk::excel::Workbook;
use stationdesk::repository::{LookupRepository, RepairRepository, RepositoryFacade, SqliteConnector};
use stationdesk::store::LocationKey;
use stationdesk::worker::{Command, Worker};
use stationdesk::Record;
use tempfile::TempDir;

fn facade(dir: &TempDir) -> RepositoryFacade {
    RepositoryFacade::new(
        Paths::at(dir.path()),
        ConfigHandle::fixed(AppConfig::default()),
        Arc::new(SqliteConnector),
    )
}

fn is_hex_color(value: &str) -> bool {
    value.len() == 7 && value.starts_with('#') && value[1..].chars().all(|c| c.is_ascii_hexdigit())
}

#[tokio::test]
async fn test_seed_lookups_then_log_a_repair() {
    let dir = TempDir::new().unwrap();
    let facade = facade(&dir);
    let lookups = facade.lookups();

    lookups.ensure_ready().await.unwrap();
    assert!(lookups.upsert_company("NHS", true).await.unwrap().success);
    assert!(lookups.upsert_location("BC", "NHS").await.unwrap().success);
    assert!(lookups.upsert_asset_type("Cableway", "BC").await.unwrap().success);

    let tables = lookups.tables().await.unwrap();
    let row = tables
        .asset_types
        .iter()
        .find(|a| a.name == "Cableway")
        .unwrap();
    assert_eq!(row.location, "BC");
    assert_eq!(row.company, "NHS");
    assert!(is_hex_color(&row.color), "bad colour {}", row.color);

    let key = LocationKey::new("NHS", "BC");
    let repair: Record = [("Station ID", "BC001"), ("Repair Name", "Cable replace")]
        .into_iter()
        .collect();
    assert!(facade.repairs().append(&key, &repair).await.unwrap().success);

    let workbook = Workbook::open(&dir.path().join("repairs").join("NHS").join("BC.xlsx")).unwrap();
    let sheet = workbook.require_sheet("Repairs").unwrap();
    assert_eq!(sheet.rows[0], vec!["Date", "Station ID", "Repair Name", "Type"]);
    let today = Local::now().date_naive().format("%Y-%m-%d").to_string();
    assert_eq!(sheet.rows[1], vec![today.as_str(), "BC001", "Cable replace", "Repair"]);
}

#[tokio::test]
async fn test_snapshot_resolves_colours_most_specific_first() {
    let dir = TempDir::new().unwrap();
    let facade = facade(&dir);
    let lookups = facade.lookups();
    lookups.ensure_ready().await.unwrap();

    let mut tables = lookups.tables().await.unwrap();
    for (company, location, color) in [("", "", "#000001"), ("", "loc1", "#000002"), ("coA", "loc1", "#000003")] {
        tables.asset_types.push(stationdesk::store::AssetTypeEntry {
            name: "X".into(),
            location: location.into(),
            company: company.into(),
            color: color.into(),
            link: String::new(),
        });
    }
    lookups.replace_tables(&tables).await.unwrap();

    let snapshot = lookups.snapshot().await.unwrap();
    assert_eq!(snapshot.resolve_color("coA", "loc1", "X"), Some("#000003"));
    assert_eq!(snapshot.resolve_color("coB", "loc1", "X"), Some("#000002"));
    assert_eq!(snapshot.resolve_color("coA", "loc2", "X"), Some("#000001"));
}

#[tokio::test]
async fn test_commands_through_the_worker() {
    let dir = TempDir::new().unwrap();
    let mut worker = Worker::spawn(facade(&dir)).unwrap();

    let call = |name: &str, args: serde_json::Value| -> Command {
        serde_json::from_value(json!({ "command": name, "args": args })).unwrap()
    };

    worker.call(Command::EnsureLookupsReady, |_, _| {}).await.unwrap();
    let result = worker
        .call(call("upsertCompany", json!({ "name": "NHS", "active": true })), |_, _| {})
        .await
        .unwrap();
    assert_eq!(result["success"], json!(true));

    let result = worker
        .call(
            call(
                "appendRepair",
                json!({ "company": "NHS", "location": "BC", "repair": { "Repair Name": "No id" } }),
            ),
            |_, _| {},
        )
        .await
        .unwrap();
    assert_eq!(result["success"], json!(false));

    let result = worker
        .call(
            call("setSettingBoolean", json!({ "key": "applyStatusColorsOnMap", "value": true })),
            |_, _| {},
        )
        .await
        .unwrap();
    assert_eq!(result["success"], json!(true));

    let snapshot = worker.call(Command::ReadLookupsSnapshot, |_, _| {}).await.unwrap();
    assert_eq!(snapshot["applyStatusColorsOnMap"], json!(true));
    assert_eq!(snapshot["companies"][0]["name"], json!("NHS"));

    worker.shutdown().unwrap();
}
