//! Record API: listing, conditional updates, inserts and soft deletes

use chrono::Utc;
use wiremock::{
    matchers::{body_partial_json, header, method, path, query_param},
    Mock, ResponseTemplate,
};

use pdmvault_core::domain::{
    ActorId, ContentHash, MachineId, NewRecord, RecordId, RecordMutation, RelativePath, VaultId,
};
use pdmvault_core::ports::{CatalogChange, CatalogError, IRemoteCatalog};

use crate::common::{self, API_KEY};

fn checkout(actor: &str) -> RecordMutation {
    RecordMutation::Checkout {
        actor: ActorId::new(actor).unwrap(),
        machine: MachineId::new("ws-01").unwrap(),
        at: Utc::now(),
    }
}

// ============================================================================
// Listing
// ============================================================================

#[tokio::test]
async fn test_list_records_filters_active_rows() {
    let (server, client) = common::setup().await;
    let vault = VaultId::new();
    let rows = serde_json::json!([
        common::record_row(RecordId::new(), vault, "A/part.sldprt", 1),
        common::locked_row(RecordId::new(), vault, "asm.sldasm", 4, "bob"),
    ]);

    Mock::given(method("GET"))
        .and(path("/rest/v1/file_records"))
        .and(query_param("vault_id", format!("eq.{vault}")))
        .and(query_param("deleted_at", "is.null"))
        .and(header("apikey", API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(rows))
        .expect(1)
        .mount(&server)
        .await;

    let records = client.list_records(vault).await.unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].relative_path.as_str(), "A/part.sldprt");
    assert_eq!(
        records[1].checked_out_by().map(|a| a.as_str()),
        Some("bob")
    );
}

#[tokio::test]
async fn test_server_error_is_unreachable() {
    let (server, client) = common::setup().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/file_records"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = client.list_records(VaultId::new()).await.unwrap_err();
    assert!(err.is_transient(), "unexpected error: {err}");
}

#[tokio::test]
async fn test_unauthorized_is_forbidden() {
    let (server, client) = common::setup().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/file_records"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let err = client.list_records(VaultId::new()).await.unwrap_err();
    assert_eq!(err, CatalogError::Forbidden("bad key".to_string()));
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let (server, client) = common::setup().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/file_records"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([]))
                .set_delay(std::time::Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let err = client.list_records(VaultId::new()).await.unwrap_err();
    assert_eq!(err, CatalogError::Timeout);
}

// ============================================================================
// Conditional updates
// ============================================================================

#[tokio::test]
async fn test_checkout_sends_version_and_lock_filters() {
    let (server, client) = common::setup().await;
    let vault = VaultId::new();
    let id = RecordId::new();

    Mock::given(method("GET"))
        .and(path("/rest/v1/file_records"))
        .and(query_param("id", format!("eq.{id}")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([common::record_row(id, vault, "x.txt", 3)])),
        )
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/file_records"))
        .and(query_param("id", format!("eq.{id}")))
        .and(query_param("version", "eq.3"))
        .and(query_param("checked_out_by", "is.null"))
        .and(header("Prefer", "return=representation"))
        .and(body_partial_json(serde_json::json!({"checked_out_by": "alice"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!([common::locked_row(
                id, vault, "x.txt", 3, "alice"
            )])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let mut changes = client.changes();
    let outcome = client
        .conditional_update(id, 3, &checkout("alice"))
        .await
        .unwrap();

    assert!(outcome.applied);
    assert_eq!(
        outcome.record.checked_out_by().map(|a| a.as_str()),
        Some("alice")
    );
    assert!(matches!(
        changes.try_recv().unwrap(),
        CatalogChange::Upserted(_)
    ));
}

#[tokio::test]
async fn test_checkin_of_unchanged_content_still_bumps_version() {
    let (server, client) = common::setup().await;
    let vault = VaultId::new();
    let id = RecordId::new();
    let mut released = common::record_row(id, vault, "x.txt", 4);
    released["updated_at"] = serde_json::json!("2026-03-01T12:00:00Z");

    Mock::given(method("GET"))
        .and(path("/rest/v1/file_records"))
        .and(query_param("id", format!("eq.{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            common::locked_row(id, vault, "x.txt", 3, "alice")
        ])))
        .mount(&server)
        .await;

    Mock::given(method("PATCH"))
        .and(path("/rest/v1/file_records"))
        .and(query_param("version", "eq.3"))
        .and(body_partial_json(serde_json::json!({
            "version": 4,
            "checked_out_by": null
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([released])))
        .expect(1)
        .mount(&server)
        .await;

    let checkin = RecordMutation::Checkin {
        actor: ActorId::new("alice").unwrap(),
        content_hash: ContentHash::compute(b"x.txt"),
        size: 42,
    };
    let outcome = client.conditional_update(id, 3, &checkin).await.unwrap();

    assert!(outcome.applied);
    assert_eq!(outcome.record.version, 4);
    assert!(outcome.record.checkout.is_none());
}

#[tokio::test]
async fn test_empty_patch_result_is_a_lost_race() {
    let (server, client) = common::setup().await;
    let vault = VaultId::new();
    let id = RecordId::new();

    // first read: unlocked; re-read after the failed PATCH: bob won
    Mock::given(method("GET"))
        .and(path("/rest/v1/file_records"))
        .and(query_param("id", format!("eq.{id}")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([common::record_row(id, vault, "x.txt", 1)])),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/file_records"))
        .and(query_param("id", format!("eq.{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            common::locked_row(id, vault, "x.txt", 1, "bob")
        ])))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/file_records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;

    let outcome = client
        .conditional_update(id, 1, &checkout("alice"))
        .await
        .unwrap();

    assert!(!outcome.applied);
    assert_eq!(
        outcome.record.checked_out_by().map(|a| a.as_str()),
        Some("bob")
    );
}

#[tokio::test]
async fn test_precondition_failure_skips_patch() {
    let (server, client) = common::setup().await;
    let vault = VaultId::new();
    let id = RecordId::new();

    Mock::given(method("GET"))
        .and(path("/rest/v1/file_records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            common::locked_row(id, vault, "x.txt", 2, "bob")
        ])))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let outcome = client
        .conditional_update(id, 2, &checkout("alice"))
        .await
        .unwrap();

    assert!(!outcome.applied);
}

#[tokio::test]
async fn test_unknown_record_is_not_found() {
    let (server, client) = common::setup().await;
    let id = RecordId::new();

    Mock::given(method("GET"))
        .and(path("/rest/v1/file_records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;

    let err = client
        .conditional_update(id, 1, &checkout("alice"))
        .await
        .unwrap_err();
    assert_eq!(err, CatalogError::NotFound(id));
}

// ============================================================================
// Insert and soft delete
// ============================================================================

#[tokio::test]
async fn test_insert_conflict_is_path_taken() {
    let (server, client) = common::setup().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/file_records"))
        .respond_with(ResponseTemplate::new(409).set_body_string("duplicate key"))
        .mount(&server)
        .await;

    let err = client
        .insert(NewRecord {
            vault_id: VaultId::new(),
            relative_path: RelativePath::new("dup.txt").unwrap(),
            content_hash: ContentHash::compute(b"dup"),
            size: 3,
            state: "wip".to_string(),
        })
        .await
        .unwrap_err();

    assert_eq!(
        err,
        CatalogError::PathTaken(RelativePath::new("dup.txt").unwrap())
    );
}

#[tokio::test]
async fn test_insert_returns_stored_row() {
    let (server, client) = common::setup().await;
    let vault = VaultId::new();
    let id = RecordId::new();

    Mock::given(method("POST"))
        .and(path("/rest/v1/file_records"))
        .and(body_partial_json(serde_json::json!({"relative_path": "new.txt", "version": 1})))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(serde_json::json!([common::record_row(id, vault, "new.txt", 1)])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let stored = client
        .insert(NewRecord {
            vault_id: vault,
            relative_path: RelativePath::new("new.txt").unwrap(),
            content_hash: ContentHash::compute(b"new.txt"),
            size: 42,
            state: "wip".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(stored.id, id);
    assert_eq!(stored.version, 1);
}

#[tokio::test]
async fn test_soft_delete_publishes_deletion() {
    let (server, client) = common::setup().await;
    let vault = VaultId::new();
    let id = RecordId::new();
    let mut deleted = common::record_row(id, vault, "old.txt", 2);
    deleted["deleted_at"] = serde_json::json!("2026-03-02T09:00:00Z");

    Mock::given(method("GET"))
        .and(path("/rest/v1/file_records"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([common::record_row(id, vault, "old.txt", 2)])),
        )
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/file_records"))
        .and(query_param("version", "eq.2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([deleted])))
        .expect(1)
        .mount(&server)
        .await;

    let mut changes = client.changes();
    let outcome = client
        .soft_delete(id, 2, &ActorId::new("alice").unwrap())
        .await
        .unwrap();

    assert!(outcome.applied);
    assert!(!outcome.record.is_active());
    assert_eq!(
        changes.try_recv().unwrap(),
        CatalogChange::Deleted {
            id,
            path: RelativePath::new("old.txt").unwrap()
        }
    );
}
