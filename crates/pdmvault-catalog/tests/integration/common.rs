//! Shared helpers: a mock server plus canned record rows

use std::time::Duration;

use serde_json::{json, Value};
use wiremock::MockServer;

use pdmvault_catalog::RestCatalog;
use pdmvault_core::domain::{ContentHash, RecordId, VaultId};

pub const API_KEY: &str = "test-api-key";

/// Starts a mock server and returns a client pointing at it
pub async fn setup() -> (MockServer, RestCatalog) {
    let server = MockServer::start().await;
    let client = RestCatalog::new(server.uri(), API_KEY, Duration::from_secs(2)).unwrap();
    (server, client)
}

/// A `file_records` row as the API returns it
pub fn record_row(id: RecordId, vault_id: VaultId, path: &str, version: u64) -> Value {
    json!({
        "id": id.to_string(),
        "vault_id": vault_id.to_string(),
        "relative_path": path,
        "content_hash": ContentHash::compute(path.as_bytes()).as_str(),
        "size": 42,
        "version": version,
        "checked_out_by": null,
        "checked_out_by_machine": null,
        "checked_out_at": null,
        "state": "wip",
        "deleted_at": null,
        "updated_at": "2026-03-01T10:00:00Z"
    })
}

/// The same row, checked out by `actor`
pub fn locked_row(id: RecordId, vault_id: VaultId, path: &str, version: u64, actor: &str) -> Value {
    let mut row = record_row(id, vault_id, path, version);
    row["checked_out_by"] = json!(actor);
    row["checked_out_by_machine"] = json!("ws-07");
    row["checked_out_at"] = json!("2026-03-01T11:00:00Z");
    row
}
