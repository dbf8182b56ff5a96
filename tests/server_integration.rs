//! HTTP API end to end: start the server on a free port and drive it with
//! reqwest.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;

use game_vault::config::Config;
use game_vault::server::run_server;
use game_vault::vault::Vault;

// ─── Helpers ────────────────────────────────────────────────────────

fn test_config_with_port(tmp: &TempDir, port: u16) -> Config {
    let root = tmp.path();
    let config_content = format!(
        r#"
[db]
path = "{root}/gv.sqlite"

[downloads]
dir = "{root}/downloads"

[jobs]
heartbeat_interval_secs = 1
orphan_timeout_secs = 60

[server]
bind = "127.0.0.1:{port}"
"#,
        root = root.display(),
        port = port
    );
    toml::from_str(&config_content).unwrap()
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn make_library(tmp: &TempDir) -> PathBuf {
    let library = tmp.path().join("library");
    for folder in ["Crysis.3-RELOADED", "randomfolder123"] {
        fs::create_dir_all(library.join(folder)).unwrap();
        fs::write(library.join(folder).join("game.bin"), vec![9u8; 1024]).unwrap();
    }
    fs::canonicalize(library).unwrap()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

async fn poll_until(client: &reqwest::Client, url: &str, field: &str, pending: &str) -> Value {
    for _ in 0..100 {
        let body: Value = client.get(url).send().await.unwrap().json().await.unwrap();
        if body[field] != pending && body[field] != "queued" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("{} never left {}", url, pending);
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_scan_resolve_and_download_over_http() {
    let port = find_free_port();
    let tmp = TempDir::new().unwrap();
    let library = make_library(&tmp);
    let vault = Arc::new(Vault::open(test_config_with_port(&tmp, port)).await.unwrap());

    let server_vault = vault.clone();
    let server_handle = tokio::spawn(async move {
        run_server(server_vault).await.ok();
    });
    wait_for_server(port).await;

    let client = reqwest::Client::new();
    let base = format!("http://127.0.0.1:{}", port);

    // Preview writes nothing.
    let resp = client
        .post(format!("{base}/scans/preview"))
        .json(&json!({ "root": library.display().to_string() }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let preview: Value = resp.json().await.unwrap();
    assert_eq!(preview["matches"].as_array().unwrap().len(), 1);
    assert_eq!(preview["unmatched"].as_array().unwrap().len(), 1);

    // Queue a scan and poll it.
    let resp = client
        .post(format!("{base}/scans"))
        .json(&json!({ "root": library.display().to_string() }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let job: Value = resp.json().await.unwrap();
    let job_id = job["id"].as_str().unwrap().to_string();

    let job = poll_until(&client, &format!("{base}/scans/{job_id}"), "status", "running").await;
    assert_eq!(job["status"], "completed");
    assert_eq!(job["summary"]["matched_count"], 1);
    assert_eq!(job["summary"]["unmatched_count"], 1);

    let scans: Value = client
        .get(format!("{base}/scans"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(scans.as_array().unwrap().len(), 1);

    // Resolve the unmatched folder by hand.
    let unmatched: Value = client
        .get(format!("{base}/unmatched?status=pending"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let folder = unmatched[0]["path"].as_str().unwrap().to_string();
    assert!(folder.ends_with("randomfolder123"));

    let resp = client
        .post(format!("{base}/unmatched/resolve"))
        .json(&json!({
            "path": folder,
            "record": { "id": "ext-9", "title": "Random Game", "release_year": 2001 },
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let resp = client
        .post(format!("{base}/unmatched/resolve"))
        .json(&json!({ "path": "/not/there", "record": { "id": "x", "title": "X" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    // Games listing with query filters.
    let games: Value = client
        .get(format!("{base}/games?title_contains=crysis"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(games.as_array().unwrap().len(), 1);
    let game_id = games[0]["id"].as_str().unwrap().to_string();

    let game: Value = client
        .get(format!("{base}/games/{game_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(game["canonical_title"], "Crysis 3");

    let crysis_path = game["full_disk_path"].as_str().unwrap().to_string();
    let availability: Value = client
        .get(format!("{base}/paths/availability"))
        .query(&[("path", crysis_path.as_str())])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(availability["exists_on_disk"], true);
    assert_eq!(availability["registered_game_id"], game_id.as_str());

    let all: Value = client
        .get(format!("{base}/games?sort=newest&limit=10"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all.as_array().unwrap().len(), 2);

    // Download and stream the artifact.
    let resp = client
        .post(format!("{base}/downloads"))
        .json(&json!({ "requester_id": "alice", "game_id": game_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let request: Value = resp.json().await.unwrap();
    let request_id = request["id"].as_str().unwrap().to_string();

    let request = poll_until(
        &client,
        &format!("{base}/downloads/{request_id}"),
        "status",
        "processing",
    )
    .await;
    assert_eq!(request["status"], "available");

    let resp = client
        .get(format!("{base}/downloads/{request_id}/artifact"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "application/zip");
    let bytes = resp.bytes().await.unwrap();
    assert_eq!(Some(bytes.len() as u64), request["artifact_size"].as_u64());
    assert_eq!(&bytes[..2], b"PK");

    let listed: Value = client
        .get(format!("{base}/downloads?requester_id=alice"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let resp = client
        .get(format!("{base}/downloads/nope"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    server_handle.abort();
}

#[tokio::test]
async fn test_conflicts_return_409_with_existing_id() {
    let port = find_free_port();
    let tmp = TempDir::new().unwrap();
    let library = make_library(&tmp);
    let vault = Arc::new(Vault::open(test_config_with_port(&tmp, port)).await.unwrap());

    // An active scan row for the root, as left by another process.
    let now = chrono::Utc::now().timestamp();
    let existing = match vault
        .store()
        .create_scan_job(&library.display().to_string(), now)
        .await
        .unwrap()
    {
        game_vault_core::models::Created::Created(job) => job,
        _ => panic!("conflict"),
    };

    let server_vault = vault.clone();
    let server_handle = tokio::spawn(async move {
        run_server(server_vault).await.ok();
    });
    wait_for_server(port).await;

    let client = reqwest::Client::new();
    let resp = client
        .post(format!("http://127.0.0.1:{}/scans", port))
        .json(&json!({ "root": library.display().to_string() }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "scan_in_flight");
    assert_eq!(body["error"]["existing_id"], existing.id.as_str());

    let resp = client
        .post(format!("http://127.0.0.1:{}/scans", port))
        .json(&json!({ "root": "  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("http://127.0.0.1:{}/downloads", port))
        .json(&json!({ "requester_id": "alice", "game_id": "missing" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    server_handle.abort();
}
