//! End-to-end tests for workflow-sync-server.
//!
//! Drives the server over real files in a temp directory: opening, saving
//! with backups, graphical sessions and the JSON-lines serve loop.

use std::path::Path;
use std::time::Duration;

use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::io::BufReader;
use url::Url;
use workflow_sync::{ClientAction, SyncConfig, SyncStatus};
use workflow_sync_server::server::ActionReceiver;
use workflow_sync_server::{FileEvent, FileEventKind, NativeFs, WorkflowServer, serve};

const ORDER: &str = "workflow:\n  name: order\n  nodes:\n    - id: start\n      type: begin\n    - id: done\n      type: end\n";

fn config() -> SyncConfig {
    SyncConfig {
        auto_sync_enabled: false,
        debounce_delay: Duration::from_millis(20),
        ..SyncConfig::default()
    }
}

fn uri_of(path: &Path) -> String {
    Url::from_file_path(path).unwrap().to_string()
}

/// Temp dir holding `order.wf`, plus a server rooted there.
fn setup() -> (TempDir, String, WorkflowServer<NativeFs>, ActionReceiver) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().canonicalize().unwrap().join("order.wf");
    std::fs::write(&path, ORDER).unwrap();
    let (server, actions) = WorkflowServer::new(NativeFs::new(dir.path().to_path_buf()), config());
    (dir, uri_of(&path), server, actions)
}

async fn request(server: &mut WorkflowServer<NativeFs>, request: Value) -> Value {
    let response = server.handle_line(&request.to_string()).await;
    serde_json::to_value(response).unwrap()
}

fn path_of(uri: &str) -> std::path::PathBuf {
    Url::parse(uri).unwrap().to_file_path().unwrap()
}

#[tokio::test]
async fn test_open_builds_and_reports_status() {
    let (_dir, uri, mut server, _actions) = setup();

    let response = request(&mut server, json!({"type": "open", "uri": uri, "clientId": "text-1"})).await;
    assert_eq!(response["type"], "status");
    assert_eq!(response["clientId"], "text-1");
    assert_eq!(response["state"]["connectedClients"], json!(["text-1"]));

    let doc = server.store().get(&uri).unwrap();
    assert_eq!(doc.text(), ORDER);

    // No edges is worth a warning but nothing blocks editing
    let built = server.store().build_result(&uri).unwrap();
    assert!(built.root.is_some());
    assert!(!built.has_errors());
    assert_eq!(built.diagnostics.len(), 1);
}

#[tokio::test]
async fn test_save_keeps_a_backup() {
    let (_dir, uri, mut server, _actions) = setup();
    request(&mut server, json!({"type": "open", "uri": uri, "clientId": "text-1"})).await;

    let edited = ORDER.replace("name: order", "name: orders");
    let response = request(
        &mut server,
        json!({"type": "save", "uri": uri, "clientId": "text-1", "text": edited}),
    )
    .await;
    assert_eq!(response, json!({"type": "saved", "uri": uri, "clientId": "text-1"}));

    let path = path_of(&uri);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), edited);
    let backup = path.with_file_name("order.wf.backup");
    assert_eq!(std::fs::read_to_string(backup).unwrap(), ORDER);
    assert_eq!(server.store().get(&uri).unwrap().text(), edited);
}

#[tokio::test]
async fn test_empty_save_is_refused() {
    let (_dir, uri, mut server, _actions) = setup();
    request(&mut server, json!({"type": "open", "uri": uri, "clientId": "text-1"})).await;

    let response = request(
        &mut server,
        json!({"type": "save", "uri": uri, "clientId": "text-1", "text": "  \n"}),
    )
    .await;
    assert_eq!(response["type"], "error");
    assert_eq!(std::fs::read_to_string(path_of(&uri)).unwrap(), ORDER);
}

#[tokio::test]
async fn test_bad_requests_become_errors() {
    let (_dir, uri, mut server, _actions) = setup();

    let response = request(
        &mut server,
        json!({"type": "update", "uri": uri, "clientId": "text-1", "version": 1, "text": ORDER}),
    )
    .await;
    assert_eq!(response["type"], "error");

    let response = serde_json::to_value(server.handle_line("{not json").await).unwrap();
    assert_eq!(response["type"], "error");

    let response = request(&mut server, json!({"type": "close", "uri": uri, "clientId": "text-1"})).await;
    assert_eq!(response["type"], "error");
}

#[tokio::test]
async fn test_graphical_patch_is_saved() {
    let (_dir, uri, mut server, mut actions) = setup();
    request(&mut server, json!({"type": "open", "uri": uri, "clientId": "text-1"})).await;

    let response = request(&mut server, json!({"type": "attach", "uri": uri, "clientId": "graph-1"})).await;
    assert_eq!(response["state"]["status"], "synced");

    let (client_id, batch) = actions.try_recv().unwrap();
    assert_eq!(client_id, "graph-1");
    assert!(matches!(batch[0], ClientAction::UpdateModel { .. }));

    let response = request(
        &mut server,
        json!({
            "type": "patch",
            "uri": uri,
            "clientId": "graph-1",
            "patch": {"op": "renameElement", "id": "start", "label": "Order received"}
        }),
    )
    .await;
    assert_eq!(response["type"], "status");

    let response = request(&mut server, json!({"type": "save", "uri": uri, "clientId": "graph-1"})).await;
    assert_eq!(response["type"], "saved");
    let saved = std::fs::read_to_string(path_of(&uri)).unwrap();
    assert!(saved.contains("Order received"));

    let response = request(&mut server, json!({"type": "detach", "uri": uri, "clientId": "graph-1"})).await;
    assert_eq!(response["state"]["connectedClients"], json!(["text-1"]));
}

#[tokio::test]
async fn test_attach_generates_client_id() {
    let (_dir, uri, mut server, mut actions) = setup();
    let response = request(&mut server, json!({"type": "attach", "uri": uri})).await;

    let client_id = response["clientId"].as_str().unwrap().to_string();
    assert!(client_id.starts_with("graph-"));
    assert_eq!(actions.try_recv().unwrap().0, client_id);
}

#[tokio::test]
async fn test_external_edit_is_reloaded() {
    let (_dir, uri, mut server, _actions) = setup();
    request(&mut server, json!({"type": "open", "uri": uri, "clientId": "text-1"})).await;
    let before = server.store().get(&uri).unwrap().version();

    let path = path_of(&uri);
    let edited = ORDER.replace("name: order", "name: edited");
    std::fs::write(&path, &edited).unwrap();
    server
        .on_file_event(FileEvent {
            path: path.clone(),
            kind: FileEventKind::Modified,
        })
        .await;

    let doc = server.store().get(&uri).unwrap();
    assert_eq!(doc.text(), edited);
    assert!(doc.version() > before);

    // Our own save echoing back through the watcher changes nothing
    request(&mut server, json!({"type": "save", "uri": uri, "clientId": "text-1"})).await;
    let version = server.store().get(&uri).unwrap().version();
    server
        .on_file_event(FileEvent {
            path,
            kind: FileEventKind::Modified,
        })
        .await;
    assert_eq!(server.store().get(&uri).unwrap().version(), version);
}

#[tokio::test]
async fn test_serve_loop() {
    let (_dir, uri, server, actions) = setup();
    assert_eq!(server.manager().status(&uri).status, SyncStatus::Idle);

    let input = [
        json!({"type": "open", "uri": uri, "clientId": "text-1"}).to_string(),
        String::new(),
        json!({"type": "attach", "uri": uri, "clientId": "graph-1"}).to_string(),
        "garbage".to_string(),
        json!({"type": "status", "uri": uri}).to_string(),
    ]
    .join("\n");

    let mut output = Vec::new();
    serve(server, actions, None, BufReader::new(input.as_bytes()), &mut output)
        .await
        .unwrap();

    let responses: Vec<Value> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let kinds: Vec<&str> = responses.iter().map(|r| r["type"].as_str().unwrap()).collect();

    // Four requests answered, blank line skipped, plus the graphical client's actions
    assert_eq!(kinds.iter().filter(|k| **k == "status").count(), 3);
    assert_eq!(kinds.iter().filter(|k| **k == "error").count(), 1);
    let batch = responses.iter().find(|r| r["type"] == "actions").unwrap();
    assert_eq!(batch["clientId"], "graph-1");
    assert_eq!(batch["actions"][0]["kind"], "updateModel");

    let last = responses.iter().rev().find(|r| r["type"] == "status").unwrap();
    let clients = last["state"]["connectedClients"].as_array().unwrap();
    assert_eq!(clients.len(), 2);
}
