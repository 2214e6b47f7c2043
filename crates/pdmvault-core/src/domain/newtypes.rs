//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for domain identifiers and values.
//! Each newtype ensures data validity at construction time.

use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// UUID-based ID types
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Create a new random ", stringify!($name))]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a ", stringify!($name), " from an existing UUID")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID value
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self).map_err(|e| {
                    DomainError::InvalidId(format!(concat!("Invalid ", stringify!($name), ": {}"), e))
                })
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

uuid_id!(
    /// Stable identity of a remote `FileRecord`; survives renames
    RecordId
);

uuid_id!(
    /// Identity of a vault in the remote catalog
    VaultId
);

// ============================================================================
// Identity types
// ============================================================================

/// Maximum accepted length of an actor or machine identifier
const MAX_IDENTITY_LEN: usize = 256;

fn validate_identity(kind: &str, value: &str) -> Result<String, DomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::InvalidIdentity(format!("{kind} cannot be empty")));
    }
    if trimmed.len() > MAX_IDENTITY_LEN {
        return Err(DomainError::InvalidIdentity(format!(
            "{kind} exceeds {MAX_IDENTITY_LEN} characters"
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(DomainError::InvalidIdentity(format!(
            "{kind} contains control characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// The user on whose behalf the engine acts (lock owner identity)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ActorId(String);

impl ActorId {
    /// Create a new ActorId
    ///
    /// # Errors
    /// Returns `DomainError::InvalidIdentity` if the value is empty or malformed
    pub fn new(id: impl AsRef<str>) -> Result<Self, DomainError> {
        validate_identity("actor id", id.as_ref()).map(Self)
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The workstation a checkout was taken from
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MachineId(String);

impl MachineId {
    /// Create a new MachineId
    ///
    /// # Errors
    /// Returns `DomainError::InvalidIdentity` if the value is empty or malformed
    pub fn new(id: impl AsRef<str>) -> Result<Self, DomainError> {
        validate_identity("machine id", id.as_ref()).map(Self)
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! string_newtype_conversions {
    ($name:ident) => {
        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = DomainError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::new(s)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

string_newtype_conversions!(ActorId);
string_newtype_conversions!(MachineId);

// ============================================================================
// Path types
// ============================================================================

/// A vault-root-relative path, forward-slash normalized
///
/// RelativePath ensures the path:
/// - Uses `/` as the only separator (backslashes are converted)
/// - Has no leading `/`, drive prefix, or `..` components
/// - Has no empty or `.` components
/// - Is not empty
///
/// It is the unique key of local entries and of active remote records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelativePath(String);

impl RelativePath {
    /// Create and normalize a RelativePath
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if the path is absolute, empty,
    /// escapes the vault via `..`, or contains control characters
    pub fn new(path: impl AsRef<str>) -> Result<Self, DomainError> {
        let raw = path.as_ref();
        let unified = raw.replace('\\', "/");

        if unified.starts_with('/') {
            return Err(DomainError::InvalidPath(format!(
                "Path must be vault-relative: {raw}"
            )));
        }
        let bytes = unified.as_bytes();
        if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
            return Err(DomainError::InvalidPath(format!(
                "Path must not carry a drive prefix: {raw}"
            )));
        }

        let mut parts = Vec::new();
        for component in unified.split('/') {
            match component {
                "" | "." => {}
                ".." => {
                    return Err(DomainError::InvalidPath(format!(
                        "Path escapes vault via ..: {raw}"
                    )))
                }
                c if c.chars().any(char::is_control) => {
                    return Err(DomainError::InvalidPath(format!(
                        "Path contains control characters: {raw:?}"
                    )))
                }
                c => parts.push(c),
            }
        }

        if parts.is_empty() {
            return Err(DomainError::InvalidPath("Path cannot be empty".to_string()));
        }

        Ok(Self(parts.join("/")))
    }

    /// Build a RelativePath from an absolute filesystem path under `root`
    ///
    /// # Errors
    /// Returns `DomainError::PathNotInVault` if `path` is not under `root`,
    /// or `DomainError::InvalidPath` for non UTF-8 components
    pub fn from_absolute(root: &Path, path: &Path) -> Result<Self, DomainError> {
        let relative = path.strip_prefix(root).map_err(|_| {
            DomainError::PathNotInVault(format!(
                "{} is not within {}",
                path.display(),
                root.display()
            ))
        })?;

        let mut parts = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(c) => parts.push(c.to_str().ok_or_else(|| {
                    DomainError::InvalidPath(format!("Non UTF-8 path: {}", path.display()))
                })?),
                Component::CurDir => {}
                _ => {
                    return Err(DomainError::InvalidPath(format!(
                        "Unexpected path component in {}",
                        path.display()
                    )))
                }
            }
        }

        Self::new(parts.join("/"))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve this path against a vault root
    #[must_use]
    pub fn to_absolute(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for component in self.0.split('/') {
            path.push(component);
        }
        path
    }

    /// The final component
    #[must_use]
    pub fn file_name(&self) -> &str {
        match self.0.rfind('/') {
            Some(idx) => &self.0[idx + 1..],
            None => &self.0,
        }
    }

    /// The containing directory, `None` for top-level entries
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0.rfind('/').map(|idx| Self(self.0[..idx].to_string()))
    }

    /// Join a relative component (which may itself contain `/`)
    ///
    /// # Errors
    /// Returns error if the component is invalid
    pub fn join(&self, component: &str) -> Result<Self, DomainError> {
        Self::new(format!("{}/{component}", self.0))
    }

    /// True if this path equals `dir` or lies beneath it
    #[must_use]
    pub fn is_within(&self, dir: &RelativePath) -> bool {
        self.0 == dir.0
            || (self.0.len() > dir.0.len()
                && self.0.starts_with(dir.0.as_str())
                && self.0.as_bytes()[dir.0.len()] == b'/')
    }
}

string_newtype_conversions!(RelativePath);

impl AsRef<str> for RelativePath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Content hash
// ============================================================================

/// Length of a hex-encoded SHA-256 digest
const HASH_HEX_LEN: usize = 64;

/// Content-addressed digest of a file (lowercase hex SHA-256)
///
/// The same value keys blobs in the content store, so equal hashes
/// mean byte-identical content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Create a ContentHash from its hex representation
    ///
    /// Uppercase input is accepted and normalized to lowercase.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidHash` if the string is not 64 hex digits
    pub fn new(hash: impl AsRef<str>) -> Result<Self, DomainError> {
        let hash = hash.as_ref();
        if hash.len() != HASH_HEX_LEN {
            return Err(DomainError::InvalidHash(format!(
                "Expected {HASH_HEX_LEN} hex characters, got {}",
                hash.len()
            )));
        }
        if !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DomainError::InvalidHash(format!(
                "Hash contains non-hex characters: {hash}"
            )));
        }
        Ok(Self(hash.to_ascii_lowercase()))
    }

    /// Hash an in-memory buffer
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = ContentHasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log output
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

string_newtype_conversions!(ContentHash);

/// Incremental hasher producing a [`ContentHash`]
///
/// Lets the scanner hash large CAD files in fixed-size chunks.
#[derive(Default)]
pub struct ContentHasher {
    inner: Sha256,
}

impl ContentHasher {
    /// Create an empty hasher
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed more bytes
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Consume the hasher and produce the digest
    #[must_use]
    pub fn finalize(self) -> ContentHash {
        ContentHash(format!("{:x}", self.inner.finalize()))
    }
}

// ============================================================================
// Unit tests
// ============================================================================
