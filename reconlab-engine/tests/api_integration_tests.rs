//! Integration tests for reconlab-engine API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use httpmock::prelude::*;
use reconlab_common::config::TomlConfig;
use reconlab_common::db::init_in_memory_database;
use reconlab_common::FlatRecord;
use reconlab_engine::services::{CsvDirectory, MemoryTables, TabularSource};
use reconlab_engine::{build_router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

/// Test helper: create test app over the given tables
async fn create_test_app(tables: Arc<dyn TabularSource>, config: TomlConfig) -> Router {
    let pool = init_in_memory_database()
        .await
        .expect("Failed to create in-memory database");

    build_router(AppState::new(pool, tables, config))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn record(value: Value) -> FlatRecord {
    value.as_object().cloned().unwrap()
}

fn csv_tables(dir: &std::path::Path) -> Arc<dyn TabularSource> {
    std::fs::write(
        dir.join("people.csv"),
        "id,name,city\n1,Alice,Lyon\n2,Bob,Nantes\n",
    )
    .unwrap();
    std::fs::write(dir.join("directory.csv"), "ref,fullname\n1,Alicia\n").unwrap();
    Arc::new(CsvDirectory::new(dir))
}

fn suppliers_tables() -> Arc<dyn TabularSource> {
    Arc::new(MemoryTables::new().with_table(
        "suppliers",
        ["siret", "name"],
        vec![
            record(json!({"siret": "11111111111111", "name": "ACME"})),
            record(json!({"siret": "22222222222222", "name": "Globex"})),
            record(json!({"siret": null, "name": "Unknown"})),
        ],
    ))
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_app(Arc::new(MemoryTables::new()), TomlConfig::default()).await;

    let (status, body) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "reconlab-engine");
}

#[tokio::test]
async fn test_csv_project_review_flow() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_app(csv_tables(dir.path()), TomlConfig::default()).await;

    let (status, project) = send(
        &app,
        "POST",
        "/projects",
        Some(json!({
            "name": "People",
            "mode": "CSV",
            "target_table": "people",
            "source_table": "directory",
            "mapping": {
                "join_key": {"target": "id", "source": "ref"},
                "field_map": {"name": "fullname"}
            }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(project["status"], "Mapping");
    let project_id = project["id"].as_i64().unwrap();

    let (status, fields) = send(&app, "GET", &format!("/projects/{}/fields", project_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fields["target_columns"], json!(["id", "name", "city"]));
    assert_eq!(fields["source_fields"], json!(["ref", "fullname"]));

    let (status, summary) =
        send(&app, "POST", &format!("/projects/{}/initialize", project_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["tasks_created"], 2);
    assert_eq!(summary["matched"], 1);
    assert_eq!(summary["unmatched"], 1);

    // Initialization runs once; mapping is fixed afterwards
    let (status, _) = send(&app, "POST", &format!("/projects/{}/initialize", project_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/projects/{}/mapping", project_id),
        Some(json!({"join_key": {"target": "name", "source": "fullname"}})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, project) = send(&app, "GET", &format!("/projects/{}", project_id), None).await;
    assert_eq!(project["status"], "Processing");

    let (status, next) = send(&app, "GET", &format!("/projects/{}/tasks/next", project_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(next["target_data"]["name"], "Alice");
    assert_eq!(next["candidate"]["state"], "found");
    assert_eq!(next["diff"][0]["target_column"], "name");
    assert_eq!(next["diff"][0]["differs"], true);
    let first_id = next["id"].as_i64().unwrap();

    let (status, resolved) = send(
        &app,
        "POST",
        &format!("/tasks/{}/resolve", first_id),
        Some(json!({"decision": "accept_source"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resolved["status"], "Resolved");
    assert_eq!(resolved["decision"], "Accept Source");
    assert_eq!(
        resolved["final_data"],
        json!({"id": "1", "name": "Alicia", "city": "Lyon"})
    );

    let (_, next) = send(&app, "GET", &format!("/projects/{}/tasks/next", project_id), None).await;
    assert_eq!(next["target_data"]["name"], "Bob");
    assert_eq!(next["candidate"]["state"], "not_found");
    assert_eq!(next["diff"], json!([]));
    let second_id = next["id"].as_i64().unwrap();

    let (status, skipped) = send(&app, "POST", &format!("/tasks/{}/skip", second_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(skipped["status"], "Skipped");
    assert_eq!(skipped["final_data"], Value::Null);

    let (_, progress) = send(&app, "GET", &format!("/projects/{}/progress", project_id), None).await;
    assert_eq!(progress["total"], 2);
    assert_eq!(progress["resolved"], 1);
    assert_eq!(progress["skipped"], 1);
    assert_eq!(progress["pending"], 0);

    let (status, next) = send(&app, "GET", &format!("/projects/{}/tasks/next", project_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(next, Value::Null);

    let (_, all) = send(&app, "GET", &format!("/projects/{}/tasks", project_id), None).await;
    assert_eq!(all.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_resolution_overwrites_previous_decision() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_app(csv_tables(dir.path()), TomlConfig::default()).await;

    let (_, project) = send(
        &app,
        "POST",
        "/projects",
        Some(json!({
            "name": "People",
            "mode": "CSV",
            "target_table": "people",
            "source_table": "directory",
            "mapping": {"join_key": {"target": "id", "source": "ref"}}
        })),
    )
    .await;
    let project_id = project["id"].as_i64().unwrap();
    send(&app, "POST", &format!("/projects/{}/initialize", project_id), None).await;

    let (_, next) = send(&app, "GET", &format!("/projects/{}/tasks/next", project_id), None).await;
    let task_id = next["id"].as_i64().unwrap();

    send(
        &app,
        "POST",
        &format!("/tasks/{}/resolve", task_id),
        Some(json!({"decision": "keep_target"})),
    )
    .await;
    let (status, task) = send(
        &app,
        "POST",
        &format!("/tasks/{}/resolve", task_id),
        Some(json!({"decision": "manual_edit", "payload": {"id": "1", "name": "Alice Martin"}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, stored) = send(&app, "GET", &format!("/tasks/{}", task_id), None).await;
    assert_eq!(stored["decision"], "Manual Edit");
    assert_eq!(stored["final_data"], json!({"id": "1", "name": "Alice Martin"}));
    assert_eq!(stored["final_data"], task["final_data"]);

    let (status, _) = send(
        &app,
        "POST",
        &format!("/tasks/{}/resolve", task_id),
        Some(json!({"decision": "manual_edit", "payload": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        &format!("/tasks/{}/resolve", task_id),
        Some(json!({"decision": "merge_everything"})),
    )
    .await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_project_validation_errors() {
    let app = create_test_app(suppliers_tables(), TomlConfig::default()).await;

    let (status, body) = send(
        &app,
        "POST",
        "/projects",
        Some(json!({"name": "Join", "mode": "CSV", "target_table": "suppliers"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let (status, _) = send(&app, "GET", "/projects/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", "/tasks/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // No join key: initialization aborts and writes nothing
    let (_, project) = send(
        &app,
        "POST",
        "/projects",
        Some(json!({"name": "Lookup", "mode": "API", "target_table": "suppliers"})),
    )
    .await;
    let project_id = project["id"].as_i64().unwrap();

    let (status, body) =
        send(&app, "POST", &format!("/projects/{}/initialize", project_id), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "CONFIG_ERROR");

    let (_, progress) = send(&app, "GET", &format!("/projects/{}/progress", project_id), None).await;
    assert_eq!(progress["total"], 0);

    let (status, _) = send(&app, "POST", &format!("/projects/{}/enrichment", project_id), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_api_project_enrichment() {
    let server = MockServer::start_async().await;
    let found_mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/siret/11111111111111")
                .header("X-INSEE-Api-Key-Integration", "project-token");
            then.status(200).json_body(json!({
                "etablissement": {
                    "siret": "11111111111111",
                    "uniteLegale": {"denominationUniteLegale": "ACME SAS"}
                }
            }));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/siret/22222222222222");
            then.status(404);
        })
        .await;

    let mut config = TomlConfig::default();
    config.registry.base_url = server.base_url();
    config.worker.request_interval_ms = 0;
    let app = create_test_app(suppliers_tables(), config).await;

    let (_, project) = send(
        &app,
        "POST",
        "/projects",
        Some(json!({
            "name": "Suppliers",
            "mode": "API",
            "target_table": "suppliers",
            "mapping": {
                "join_key": {"target": "siret"},
                "field_map": {"name": "uniteLegale.denominationUniteLegale"},
                "api_token": "project-token"
            }
        })),
    )
    .await;
    let project_id = project["id"].as_i64().unwrap();
    assert!(project["mapping"].get("api_token").is_none());

    let (_, fields) = send(&app, "GET", &format!("/projects/{}/fields", project_id), None).await;
    assert!(fields["source_fields"]
        .as_array()
        .unwrap()
        .contains(&json!("uniteLegale.denominationUniteLegale")));

    let (_, summary) = send(&app, "POST", &format!("/projects/{}/initialize", project_id), None).await;
    assert_eq!(summary["awaiting_enrichment"], 3);

    let (status, started) =
        send(&app, "POST", &format!("/projects/{}/enrichment", project_id), None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(started["pending_lookups"], 3);

    let mut progress = Value::Null;
    for _ in 0..200 {
        let (_, current) = send(&app, "GET", &format!("/projects/{}/progress", project_id), None).await;
        progress = current;
        if progress["enrichment_running"] == false {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(progress["enrichment_running"], false);
    // The row without an identifier stays unattempted
    assert_eq!(progress["awaiting_enrichment"], 1);

    found_mock.assert_async().await;

    let (_, tasks) = send(&app, "GET", &format!("/projects/{}/tasks", project_id), None).await;
    let tasks = tasks.as_array().unwrap();
    assert_eq!(tasks[0]["candidate"]["state"], "found");
    assert_eq!(tasks[0]["candidate"]["record"]["uniteLegale.denominationUniteLegale"], "ACME SAS");
    assert_eq!(tasks[1]["candidate"]["state"], "not_found");
    assert_eq!(tasks[2]["candidate"]["state"], "unattempted");

    let first_id = tasks[0]["id"].as_i64().unwrap();
    let (_, resolved) = send(
        &app,
        "POST",
        &format!("/tasks/{}/resolve", first_id),
        Some(json!({"decision": "accept_source"})),
    )
    .await;
    assert_eq!(
        resolved["final_data"],
        json!({"siret": "11111111111111", "name": "ACME SAS"})
    );
}

#[tokio::test]
async fn test_enrichment_rejected_for_csv_project() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_test_app(csv_tables(dir.path()), TomlConfig::default()).await;

    let (_, project) = send(
        &app,
        "POST",
        "/projects",
        Some(json!({
            "name": "People",
            "mode": "CSV",
            "target_table": "people",
            "source_table": "directory",
            "mapping": {"join_key": {"target": "id", "source": "ref"}}
        })),
    )
    .await;
    let project_id = project["id"].as_i64().unwrap();

    let (status, _) = send(&app, "POST", &format!("/projects/{}/enrichment", project_id), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_project() {
    let app = create_test_app(suppliers_tables(), TomlConfig::default()).await;

    let (_, project) = send(
        &app,
        "POST",
        "/projects",
        Some(json!({
            "name": "Suppliers",
            "mode": "API",
            "target_table": "suppliers",
            "mapping": {"join_key": {"target": "siret"}}
        })),
    )
    .await;
    let project_id = project["id"].as_i64().unwrap();
    send(&app, "POST", &format!("/projects/{}/initialize", project_id), None).await;

    let (status, _) = send(&app, "DELETE", &format!("/projects/{}", project_id), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&app, "GET", &format!("/projects/{}", project_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "DELETE", &format!("/projects/{}", project_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_project_status_update() {
    let app = create_test_app(suppliers_tables(), TomlConfig::default()).await;

    let (_, project) = send(
        &app,
        "POST",
        "/projects",
        Some(json!({"name": "Suppliers", "mode": "API", "target_table": "suppliers"})),
    )
    .await;
    let project_id = project["id"].as_i64().unwrap();

    let (status, updated) = send(
        &app,
        "PUT",
        &format!("/projects/{}/status", project_id),
        Some(json!({"status": "Validation"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"], "Validation");

    let (_, fetched) = send(&app, "GET", &format!("/projects/{}", project_id), None).await;
    assert_eq!(fetched["status"], "Validation");

    let (status, body) = send(
        &app,
        "PUT",
        "/projects/999/status",
        Some(json!({"status": "Completed"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_registry_token_setting() {
    let app = create_test_app(Arc::new(MemoryTables::new()), TomlConfig::default()).await;

    let (status, _) = send(
        &app,
        "PUT",
        "/settings/registry_token",
        Some(json!({"token": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "PUT",
        "/settings/registry_token",
        Some(json!({"token": "abc"})),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_registry_status() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/informations");
            then.status(200).json_body(json!({"etatService": "UP"}));
        })
        .await;

    let mut config = TomlConfig::default();
    config.registry.base_url = server.base_url();
    let app = create_test_app(Arc::new(MemoryTables::new()), config).await;

    let (status, body) = send(&app, "GET", "/registry/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reachable"], true);
}
