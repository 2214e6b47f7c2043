//! REST catalog client
//!
//! Talks to a PostgREST-style record API and an object-storage endpoint:
//!
//! | operation | request |
//! |---|---|
//! | list records | `GET /rest/v1/file_records?vault_id=eq.{id}&deleted_at=is.null` |
//! | conditional update | `PATCH /rest/v1/file_records?id=eq.{id}&version=eq.{v}&<lock filter>` |
//! | insert | `POST /rest/v1/file_records` |
//! | blobs | `PUT`/`GET`/`HEAD /storage/v1/object/{bucket}/{hash}` |
//! | presence | `GET /rest/v1/presence?actor_id=eq.{a}&machine_id=eq.{m}` |
//!
//! Conditional writes are expressed as filtered `PATCH` requests with
//! `Prefer: return=representation`: an empty result array means the filter
//! did not match, i.e. the race was lost. The lock precondition travels in
//! the filter too, so two clients checking out the same record at the same
//! version cannot both succeed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pdmvault_core::domain::{
    ActorId, CheckoutLock, ContentHash, FileRecord, MachineId, NewRecord, RecordId,
    RecordMutation, RelativePath, VaultId,
};
use pdmvault_core::ports::{
    CatalogChange, CatalogError, IContentStore, IPresenceSource, IRemoteCatalog, UpdateOutcome,
};

const RECORDS_PATH: &str = "/rest/v1/file_records";
const PRESENCE_PATH: &str = "/rest/v1/presence";
const OBJECT_PATH: &str = "/storage/v1/object";

/// Bucket holding vault content unless overridden
pub const DEFAULT_BUCKET: &str = "vault-content";

const CHANGE_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Wire types
// ============================================================================

/// One row of the `file_records` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RecordRow {
    id: RecordId,
    vault_id: VaultId,
    relative_path: RelativePath,
    content_hash: ContentHash,
    size: u64,
    version: u64,
    checked_out_by: Option<ActorId>,
    checked_out_by_machine: Option<MachineId>,
    checked_out_at: Option<DateTime<Utc>>,
    state: String,
    deleted_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl RecordRow {
    fn into_record(self) -> Result<FileRecord, CatalogError> {
        let checkout = match (
            self.checked_out_by,
            self.checked_out_by_machine,
            self.checked_out_at,
        ) {
            (None, _, _) => None,
            (Some(actor), Some(machine), Some(at)) => Some(CheckoutLock { actor, machine, at }),
            (Some(actor), _, _) => {
                return Err(CatalogError::Rejected(format!(
                    "record {} has a partial lock held by {}",
                    self.id, actor
                )))
            }
        };
        Ok(FileRecord {
            id: self.id,
            vault_id: self.vault_id,
            relative_path: self.relative_path,
            content_hash: self.content_hash,
            size: self.size,
            version: self.version,
            checkout,
            state: self.state,
            deleted_at: self.deleted_at,
            updated_at: self.updated_at,
        })
    }
}

impl From<&FileRecord> for RecordRow {
    fn from(record: &FileRecord) -> Self {
        let lock = record.checkout.as_ref();
        Self {
            id: record.id,
            vault_id: record.vault_id,
            relative_path: record.relative_path.clone(),
            content_hash: record.content_hash.clone(),
            size: record.size,
            version: record.version,
            checked_out_by: lock.map(|l| l.actor.clone()),
            checked_out_by_machine: lock.map(|l| l.machine.clone()),
            checked_out_at: lock.map(|l| l.at),
            state: record.state.clone(),
            deleted_at: record.deleted_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PresenceRow {
    last_seen: DateTime<Utc>,
}

// ============================================================================
// Error mapping
// ============================================================================

fn transport_error(err: reqwest::Error) -> CatalogError {
    if err.is_timeout() {
        CatalogError::Timeout
    } else {
        CatalogError::Unreachable(err.to_string())
    }
}

fn status_error(status: StatusCode, body: String, path: Option<&RelativePath>) -> CatalogError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CatalogError::Forbidden(body),
        StatusCode::CONFLICT => match path {
            Some(path) => CatalogError::PathTaken(path.clone()),
            None => CatalogError::Rejected(format!("{status}: {body}")),
        },
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => CatalogError::Timeout,
        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
            CatalogError::Unreachable(format!("{status}: {body}"))
        }
        _ => CatalogError::Rejected(format!("{status}: {body}")),
    }
}

/// PostgREST value quoting for use inside `or=(...)` filters
fn quoted(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Filter expressing a mutation's lock precondition
fn lock_filter(mutation: &RecordMutation) -> (&'static str, String) {
    match mutation {
        RecordMutation::Checkout { .. } => ("checked_out_by", "is.null".to_string()),
        RecordMutation::Checkin { actor, .. } | RecordMutation::Release { actor } => {
            ("checked_out_by", format!("eq.{}", actor))
        }
        RecordMutation::ForceRelease { expected_owner } => {
            ("checked_out_by", format!("eq.{}", expected_owner))
        }
        RecordMutation::Move { actor, .. } => not_locked_by_other(actor),
    }
}

fn not_locked_by_other(actor: &ActorId) -> (&'static str, String) {
    (
        "or",
        format!(
            "(checked_out_by.is.null,checked_out_by.eq.{})",
            quoted(actor.as_str())
        ),
    )
}

// ============================================================================
// RestCatalog
// ============================================================================

/// HTTP adapter implementing the catalog, content store and presence ports
pub struct RestCatalog {
    client: Client,
    base_url: String,
    api_key: String,
    bucket: String,
    changes: broadcast::Sender<CatalogChange>,
}

impl RestCatalog {
    /// Creates a client for `base_url` with a per-request timeout
    ///
    /// # Errors
    /// `Rejected` if the HTTP client cannot be built
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CatalogError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CatalogError::Rejected(format!("failed to build HTTP client: {e}")))?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            bucket: DEFAULT_BUCKET.to_string(),
            changes,
        })
    }

    /// Uses a different object-storage bucket
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Creates an authenticated request builder for a path relative to the base URL
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client
            .request(method, &url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn send(
        &self,
        request: RequestBuilder,
        path: Option<&RelativePath>,
    ) -> Result<Response, CatalogError> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, body, path))
    }

    async fn rows(response: Response) -> Result<Vec<RecordRow>, CatalogError> {
        response
            .json::<Vec<RecordRow>>()
            .await
            .map_err(|e| CatalogError::Rejected(format!("malformed record response: {e}")))
    }

    fn object_path(&self, hash: &ContentHash) -> String {
        format!("{}/{}/{}", OBJECT_PATH, self.bucket, hash)
    }

    fn publish(&self, change: CatalogChange) {
        let _ = self.changes.send(change);
    }

    async fn patch(
        &self,
        query: &[(&str, String)],
        body: serde_json::Value,
        path: Option<&RelativePath>,
    ) -> Result<Option<FileRecord>, CatalogError> {
        let request = self
            .request(Method::PATCH, RECORDS_PATH)
            .query(query)
            .header("Prefer", "return=representation")
            .json(&body);
        let rows = Self::rows(self.send(request, path).await?).await?;
        rows.into_iter().next().map(RecordRow::into_record).transpose()
    }

    async fn current(&self, id: RecordId) -> Result<FileRecord, CatalogError> {
        self.get_record(id).await?.ok_or(CatalogError::NotFound(id))
    }

    /// Polls `list_records` every `interval` and publishes the differences
    /// on the change channel until `cancel` fires
    ///
    /// The first poll only primes the baseline.
    pub fn spawn_poller(
        self: Arc<Self>,
        vault_id: VaultId,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut known: Option<HashMap<RecordId, FileRecord>> = None;
            let mut ticker = tokio::time::interval(interval);
            info!(vault_id = %vault_id, interval_secs = interval.as_secs(), "Catalog poller started");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match self.list_records(vault_id).await {
                    Ok(records) => {
                        if let Some(previous) = &known {
                            for change in diff_snapshots(previous, &records) {
                                self.publish(change);
                            }
                        }
                        known = Some(records.into_iter().map(|r| (r.id, r)).collect());
                    }
                    Err(e) => warn!(error = %e, "Catalog poll failed"),
                }
            }
            debug!("Catalog poller stopped");
        })
    }
}

/// Changes between two listings of the same vault
fn diff_snapshots(
    previous: &HashMap<RecordId, FileRecord>,
    current: &[FileRecord],
) -> Vec<CatalogChange> {
    let mut changes = Vec::new();
    for record in current {
        if previous.get(&record.id) != Some(record) {
            changes.push(CatalogChange::Upserted(record.clone()));
        }
    }
    let mut gone: Vec<&FileRecord> = previous
        .values()
        .filter(|old| !current.iter().any(|r| r.id == old.id))
        .collect();
    gone.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    for old in gone {
        changes.push(CatalogChange::Deleted {
            id: old.id,
            path: old.relative_path.clone(),
        });
    }
    changes
}

#[async_trait::async_trait]
impl IRemoteCatalog for RestCatalog {
    async fn list_records(&self, vault_id: VaultId) -> Result<Vec<FileRecord>, CatalogError> {
        let request = self.request(Method::GET, RECORDS_PATH).query(&[
            ("vault_id", format!("eq.{vault_id}")),
            ("deleted_at", "is.null".to_string()),
            ("order", "relative_path.asc".to_string()),
        ]);
        let rows = Self::rows(self.send(request, None).await?).await?;
        debug!(vault_id = %vault_id, count = rows.len(), "Listed records");
        rows.into_iter().map(RecordRow::into_record).collect()
    }

    async fn get_record(&self, id: RecordId) -> Result<Option<FileRecord>, CatalogError> {
        let request = self
            .request(Method::GET, RECORDS_PATH)
            .query(&[("id", format!("eq.{id}"))]);
        let rows = Self::rows(self.send(request, None).await?).await?;
        rows.into_iter().next().map(RecordRow::into_record).transpose()
    }

    async fn conditional_update(
        &self,
        id: RecordId,
        expected_version: u64,
        mutation: &RecordMutation,
    ) -> Result<UpdateOutcome, CatalogError> {
        let current = self.current(id).await?;
        if current.version != expected_version || mutation.check(&current).is_err() {
            return Ok(UpdateOutcome::rejected(current));
        }

        let mut next = current;
        mutation
            .apply(&mut next, Utc::now())
            .map_err(|e| CatalogError::Rejected(e.to_string()))?;

        let query = [
            ("id", format!("eq.{id}")),
            ("version", format!("eq.{expected_version}")),
            ("deleted_at", "is.null".to_string()),
            lock_filter(mutation),
        ];
        let moved_to = match mutation {
            RecordMutation::Move { new_path, .. } => Some(new_path),
            _ => None,
        };
        let body = serde_json::to_value(RecordRow::from(&next))
            .map_err(|e| CatalogError::Rejected(format!("failed to encode record: {e}")))?;

        match self.patch(&query, body, moved_to).await? {
            Some(updated) => {
                debug!(record_id = %id, mutation = mutation.name(), version = updated.version, "Conditional update applied");
                self.publish(CatalogChange::Upserted(updated.clone()));
                Ok(UpdateOutcome::applied(updated))
            }
            None => {
                debug!(record_id = %id, mutation = mutation.name(), "Conditional update lost the race");
                Ok(UpdateOutcome::rejected(self.current(id).await?))
            }
        }
    }

    async fn insert(&self, record: NewRecord) -> Result<FileRecord, CatalogError> {
        let path = record.relative_path.clone();
        let row = RecordRow::from(&record.into_record(RecordId::new(), Utc::now()));
        let request = self
            .request(Method::POST, RECORDS_PATH)
            .header("Prefer", "return=representation")
            .json(&row);
        let rows = Self::rows(self.send(request, Some(&path)).await?).await?;
        let stored = rows
            .into_iter()
            .next()
            .ok_or_else(|| CatalogError::Rejected("empty insert response".to_string()))?
            .into_record()?;
        self.publish(CatalogChange::Upserted(stored.clone()));
        Ok(stored)
    }

    async fn soft_delete(
        &self,
        id: RecordId,
        expected_version: u64,
        actor: &ActorId,
    ) -> Result<UpdateOutcome, CatalogError> {
        let current = self.current(id).await?;
        if !current.is_active()
            || current.version != expected_version
            || current.is_locked_by_other(actor)
        {
            return Ok(UpdateOutcome::rejected(current));
        }

        let now = Utc::now();
        let query = [
            ("id", format!("eq.{id}")),
            ("version", format!("eq.{expected_version}")),
            ("deleted_at", "is.null".to_string()),
            not_locked_by_other(actor),
        ];
        let body = json!({ "deleted_at": now, "updated_at": now });

        match self.patch(&query, body, None).await? {
            Some(deleted) => {
                self.publish(CatalogChange::Deleted {
                    id,
                    path: deleted.relative_path.clone(),
                });
                Ok(UpdateOutcome::applied(deleted))
            }
            None => Ok(UpdateOutcome::rejected(self.current(id).await?)),
        }
    }

    fn changes(&self) -> broadcast::Receiver<CatalogChange> {
        self.changes.subscribe()
    }
}

#[async_trait::async_trait]
impl IContentStore for RestCatalog {
    async fn put(&self, hash: &ContentHash, data: Vec<u8>) -> Result<(), CatalogError> {
        let size = data.len();
        let request = self
            .request(Method::PUT, &self.object_path(hash))
            .header("x-upsert", "true")
            .header("Content-Type", "application/octet-stream")
            .body(data);
        self.send(request, None).await?;
        debug!(hash = %hash.short(), size, "Uploaded blob");
        Ok(())
    }

    async fn get(&self, hash: &ContentHash) -> Result<Vec<u8>, CatalogError> {
        let request = self.request(Method::GET, &self.object_path(hash));
        let bytes = self
            .send(request, None)
            .await?
            .bytes()
            .await
            .map_err(transport_error)?;
        debug!(hash = %hash.short(), size = bytes.len(), "Downloaded blob");
        Ok(bytes.to_vec())
    }

    async fn exists(&self, hash: &ContentHash) -> Result<bool, CatalogError> {
        let response = self
            .request(Method::HEAD, &self.object_path(hash))
            .send()
            .await
            .map_err(transport_error)?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(status_error(s, String::new(), None)),
        }
    }
}

#[async_trait::async_trait]
impl IPresenceSource for RestCatalog {
    async fn last_seen(
        &self,
        actor: &ActorId,
        machine: &MachineId,
    ) -> Result<Option<DateTime<Utc>>, CatalogError> {
        let request = self.request(Method::GET, PRESENCE_PATH).query(&[
            ("actor_id", format!("eq.{actor}")),
            ("machine_id", format!("eq.{machine}")),
            ("select", "last_seen".to_string()),
        ]);
        let rows: Vec<PresenceRow> = self
            .send(request, None)
            .await?
            .json()
            .await
            .map_err(|e| CatalogError::Rejected(format!("malformed presence response: {e}")))?;
        Ok(rows.into_iter().map(|r| r.last_seen).max())
    }
}
