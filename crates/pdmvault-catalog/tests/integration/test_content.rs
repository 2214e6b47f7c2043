//! Object storage and presence endpoints

use chrono::{TimeZone, Utc};
use wiremock::{
    matchers::{header, method, path, query_param},
    Mock, ResponseTemplate,
};

use pdmvault_core::domain::{ActorId, ContentHash, MachineId};
use pdmvault_core::ports::{IContentStore, IPresenceSource};

use crate::common;

fn object_path(hash: &ContentHash) -> String {
    format!("/storage/v1/object/vault-content/{}", hash)
}

#[tokio::test]
async fn test_put_uploads_bytes_with_upsert() {
    let (server, client) = common::setup().await;
    let data = b"solid part bytes".to_vec();
    let hash = ContentHash::compute(&data);

    Mock::given(method("PUT"))
        .and(path(object_path(&hash)))
        .and(header("x-upsert", "true"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client.put(&hash, data).await.unwrap();
}

#[tokio::test]
async fn test_get_returns_bytes() {
    let (server, client) = common::setup().await;
    let data: Vec<u8> = (0..65_536).map(|i| (i % 251) as u8).collect();
    let hash = ContentHash::compute(&data);

    Mock::given(method("GET"))
        .and(path(object_path(&hash)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
        .mount(&server)
        .await;

    assert_eq!(client.get(&hash).await.unwrap(), data);
}

#[tokio::test]
async fn test_missing_blob_is_rejected() {
    let (server, client) = common::setup().await;
    let hash = ContentHash::compute(b"missing");

    Mock::given(method("GET"))
        .and(path(object_path(&hash)))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path(object_path(&hash)))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    assert!(client.get(&hash).await.is_err());
    assert!(!client.exists(&hash).await.unwrap());
}

#[tokio::test]
async fn test_last_seen_reads_presence_row() {
    let (server, client) = common::setup().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/presence"))
        .and(query_param("actor_id", "eq.bob"))
        .and(query_param("machine_id", "eq.ws-07"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"last_seen": "2026-03-01T12:00:00Z"}
        ])))
        .mount(&server)
        .await;

    let seen = client
        .last_seen(
            &ActorId::new("bob").unwrap(),
            &MachineId::new("ws-07").unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(seen, Some(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()));
}
