//! Configuration module for pdmvault.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{
    ActorId, DomainError, Identity, IgnoreRuleSet, MachineId, RelativePath, Role, Vault, VaultId,
};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for pdmvault.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub vault: VaultConfig,
    pub identity: IdentityConfig,
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

/// The tracked vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Local root directory of the vault.
    pub root: PathBuf,
    /// Remote vault identifier. `None` until the vault is connected.
    pub vault_id: Option<VaultId>,
    /// Ordered ignore rules (glob, gitignore-like).
    pub ignore: Vec<String>,
    /// Vault-relative directory receiving user-visible deletes.
    pub trash_dir: Option<String>,
}

/// Who this client acts as.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub actor_id: String,
    pub machine_id: String,
    pub role: Role,
}

/// Remote catalog and content store endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the record API. Empty selects the in-memory catalog.
    pub base_url: String,
    /// API key sent with every request.
    pub api_key: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Seconds between change polls; 0 disables polling.
    pub poll_interval_secs: u64,
}

/// Batch execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum files processed concurrently within one batch.
    pub concurrency: usize,
    /// Hashing threads; 0 uses the number of CPU cores.
    pub hash_workers: usize,
    /// Minutes between a lock being taken and its owner's last heartbeat
    /// after which the lock is reported stale.
    pub stale_lock_threshold_mins: u64,
    /// Attempts for retryable reads and uploads.
    pub max_retries: u32,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Optional log file; stderr when unset.
    pub file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/pdmvault/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("pdmvault")
            .join("config.yaml")
    }

    /// Default location of the local state database.
    pub fn default_db_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("pdmvault")
            .join("state.db")
    }

    /// Build the domain [`Vault`] described by the `vault` section.
    pub fn to_vault(&self) -> Result<Vault, DomainError> {
        let vault_id = self
            .vault
            .vault_id
            .ok_or_else(|| DomainError::InvalidId("vault.vault_id is not set".to_string()))?;
        let ignore = IgnoreRuleSet::new(&self.vault.ignore)?;
        let mut vault = Vault::new(vault_id, &self.vault.root, ignore)?;
        if let Some(trash) = &self.vault.trash_dir {
            vault = vault.with_trash_dir(RelativePath::new(trash)?);
        }
        Ok(vault)
    }

    /// Build the acting [`Identity`] from the `identity` section.
    pub fn to_identity(&self) -> Result<Identity, DomainError> {
        Ok(Identity::new(
            ActorId::new(&self.identity.actor_id)?,
            MachineId::new(&self.identity.machine_id)?,
            self.identity.role,
        ))
    }
}

impl RemoteConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SyncConfig {
    /// Stale-lock threshold as a chrono duration.
    pub fn stale_lock_threshold(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stale_lock_threshold_mins as i64)
    }

    /// Effective hashing pool size.
    pub fn effective_hash_workers(&self) -> usize {
        if self.hash_workers > 0 {
            self.hash_workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

// ---------------------------------------------------------------------------
// Config::default()
// ---------------------------------------------------------------------------

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join("Vault"),
            vault_id: None,
            ignore: vec![
                "~$*".to_string(),
                "*.tmp".to_string(),
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
            ],
            trash_dir: Some(".pdmvault-trash".to_string()),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            actor_id: std::env::var("USER").unwrap_or_default(),
            machine_id: default_machine_id(),
            role: Role::Engineer,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: None,
            timeout_secs: 30,
            poll_interval_secs: 0,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            hash_workers: 0,
            stale_lock_threshold_mins: 8 * 60,
            max_retries: 3,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

fn default_machine_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"sync.concurrency"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- vault ---
        if !self.vault.root.is_absolute() {
            errors.push(ValidationError {
                field: "vault.root".into(),
                message: format!("must be an absolute path: {}", self.vault.root.display()),
            });
        }
        if self.vault.vault_id.is_none() {
            errors.push(ValidationError {
                field: "vault.vault_id".into(),
                message: "is required".into(),
            });
        }
        if let Err(e) = IgnoreRuleSet::new(&self.vault.ignore) {
            errors.push(ValidationError {
                field: "vault.ignore".into(),
                message: e.to_string(),
            });
        }
        if let Some(trash) = &self.vault.trash_dir {
            if let Err(e) = RelativePath::new(trash) {
                errors.push(ValidationError {
                    field: "vault.trash_dir".into(),
                    message: e.to_string(),
                });
            }
        }

        // --- identity ---
        if let Err(e) = ActorId::new(&self.identity.actor_id) {
            errors.push(ValidationError {
                field: "identity.actor_id".into(),
                message: e.to_string(),
            });
        }
        if let Err(e) = MachineId::new(&self.identity.machine_id) {
            errors.push(ValidationError {
                field: "identity.machine_id".into(),
                message: e.to_string(),
            });
        }

        // --- remote ---
        if !self.remote.base_url.is_empty()
            && !(self.remote.base_url.starts_with("http://")
                || self.remote.base_url.starts_with("https://"))
        {
            errors.push(ValidationError {
                field: "remote.base_url".into(),
                message: "must start with http:// or https://".into(),
            });
        }
        if self.remote.timeout_secs == 0 {
            errors.push(ValidationError {
                field: "remote.timeout_secs".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- sync ---
        if self.sync.concurrency == 0 || self.sync.concurrency > 64 {
            errors.push(ValidationError {
                field: "sync.concurrency".into(),
                message: "must be in range 1..=64".into(),
            });
        }
        if self.sync.stale_lock_threshold_mins == 0 {
            errors.push(ValidationError {
                field: "sync.stale_lock_threshold_mins".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.sync.max_retries == 0 {
            errors.push(ValidationError {
                field: "sync.max_retries".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use pdmvault_core::config::ConfigBuilder;
/// use std::path::PathBuf;
///
/// let config = ConfigBuilder::new()
///     .vault_root(PathBuf::from("/srv/vault"))
///     .actor_id("alice")
///     .sync_concurrency(8)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- vault ---

    pub fn vault_root(mut self, root: PathBuf) -> Self {
        self.config.vault.root = root;
        self
    }

    pub fn vault_id(mut self, id: VaultId) -> Self {
        self.config.vault.vault_id = Some(id);
        self
    }

    pub fn ignore(mut self, patterns: Vec<String>) -> Self {
        self.config.vault.ignore = patterns;
        self
    }

    pub fn trash_dir(mut self, dir: Option<String>) -> Self {
        self.config.vault.trash_dir = dir;
        self
    }

    // --- identity ---

    pub fn actor_id(mut self, actor: impl Into<String>) -> Self {
        self.config.identity.actor_id = actor.into();
        self
    }

    pub fn machine_id(mut self, machine: impl Into<String>) -> Self {
        self.config.identity.machine_id = machine.into();
        self
    }

    pub fn role(mut self, role: Role) -> Self {
        self.config.identity.role = role;
        self
    }

    // --- remote ---

    pub fn remote_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote.base_url = url.into();
        self
    }

    pub fn remote_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.remote.api_key = Some(key.into());
        self
    }

    pub fn remote_timeout_secs(mut self, secs: u64) -> Self {
        self.config.remote.timeout_secs = secs;
        self
    }

    // --- sync ---

    pub fn sync_concurrency(mut self, n: usize) -> Self {
        self.config.sync.concurrency = n;
        self
    }

    pub fn sync_hash_workers(mut self, n: usize) -> Self {
        self.config.sync.hash_workers = n;
        self
    }

    pub fn sync_stale_lock_threshold_mins(mut self, mins: u64) -> Self {
        self.config.sync.stale_lock_threshold_mins = mins;
        self
    }

    pub fn sync_max_retries(mut self, n: u32) -> Self {
        self.config.sync.max_retries = n;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_file(mut self, file: PathBuf) -> Self {
        self.config.logging.file = Some(file);
        self
    }

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn valid() -> Config {
        ConfigBuilder::new()
            .vault_root(std::env::temp_dir())
            .vault_id(VaultId::new())
            .actor_id("alice")
            .machine_id("ws-01")
            .build()
    }

    #[test]
    fn test_default_config_values() {
        let config = Config::default();
        assert_eq!(config.sync.concurrency, 4);
        assert_eq!(config.sync.max_retries, 3);
        assert_eq!(config.remote.timeout_secs, 30);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.identity.role, Role::Engineer);
        assert!(config.vault.vault_id.is_none());
    }

    #[test]
    fn test_valid_config_has_no_errors() {
        assert!(valid().validate().is_empty());
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = valid();
        config.vault.root = PathBuf::from("relative");
        config.vault.ignore = vec!["[".to_string()];
        config.identity.actor_id = String::new();
        config.sync.concurrency = 0;
        config.logging.level = "loud".to_string();
        config.remote.base_url = "ftp://x".to_string();

        let fields: Vec<String> = config.validate().into_iter().map(|e| e.field).collect();
        assert!(fields.contains(&"vault.root".to_string()));
        assert!(fields.contains(&"vault.ignore".to_string()));
        assert!(fields.contains(&"identity.actor_id".to_string()));
        assert!(fields.contains(&"sync.concurrency".to_string()));
        assert!(fields.contains(&"logging.level".to_string()));
        assert!(fields.contains(&"remote.base_url".to_string()));
    }

    #[test]
    fn test_load_partial_yaml_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "vault:\n  root: /srv/vault\n  ignore: ['*.bak']\nidentity:\n  actor_id: bob\n  role: admin\nsync:\n  concurrency: 2\n"
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.vault.root, PathBuf::from("/srv/vault"));
        assert_eq!(config.vault.ignore, vec!["*.bak".to_string()]);
        assert_eq!(config.identity.actor_id, "bob");
        assert_eq!(config.identity.role, Role::Admin);
        assert_eq!(config.sync.concurrency, 2);
        assert_eq!(config.sync.max_retries, 3);
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/pdmvault.yaml"));
        assert_eq!(config.sync.concurrency, 4);
    }

    #[test]
    fn test_to_vault_and_identity() {
        let config = valid();
        let vault = config.to_vault().unwrap();
        assert_eq!(vault.root(), std::env::temp_dir().as_path());
        assert!(vault.trash_dir().is_some());

        let identity = config.to_identity().unwrap();
        assert_eq!(identity.actor.as_str(), "alice");
    }

    #[test]
    fn test_to_vault_requires_vault_id() {
        let mut config = valid();
        config.vault.vault_id = None;
        assert!(config.to_vault().is_err());
    }

    #[test]
    fn test_default_path_ends_with_config_yaml() {
        let path = Config::default_path();
        assert!(path.ends_with("pdmvault/config.yaml"));
    }
}
