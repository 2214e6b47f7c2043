//! Vault and identity types

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::ignore::IgnoreRuleSet;
use super::newtypes::{ActorId, MachineId, RelativePath, VaultId};

/// Capability level of the acting user
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Read-only: may download but never mutate remote state
    Viewer,
    /// Regular editor
    #[default]
    Engineer,
    /// May force-release other actors' locks
    Admin,
}

impl Role {
    /// May create, lock, publish or delete records
    pub fn can_mutate(&self) -> bool {
        *self >= Role::Engineer
    }

    /// May release someone else's lock
    pub fn can_force_release(&self) -> bool {
        *self == Role::Admin
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Viewer => "viewer",
            Role::Engineer => "engineer",
            Role::Admin => "admin",
        };
        f.write_str(s)
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "viewer" => Ok(Role::Viewer),
            "engineer" => Ok(Role::Engineer),
            "admin" => Ok(Role::Admin),
            other => Err(DomainError::InvalidIdentity(format!("unknown role '{other}'"))),
        }
    }
}

/// Who is acting, and from where
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub actor: ActorId,
    pub machine: MachineId,
    pub role: Role,
}

impl Identity {
    pub fn new(actor: ActorId, machine: MachineId, role: Role) -> Self {
        Self {
            actor,
            machine,
            role,
        }
    }
}

/// A connected vault: local root, remote identity and ignore rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vault {
    id: VaultId,
    root: PathBuf,
    ignore: IgnoreRuleSet,
    trash_dir: Option<RelativePath>,
}

impl Vault {
    /// Creates a vault rooted at an absolute directory
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if `root` is relative
    pub fn new(id: VaultId, root: impl Into<PathBuf>, ignore: IgnoreRuleSet) -> Result<Self, DomainError> {
        let root = root.into();
        if !root.is_absolute() {
            return Err(DomainError::InvalidPath(format!(
                "vault root must be absolute: {}",
                root.display()
            )));
        }
        Ok(Self {
            id,
            root,
            ignore,
            trash_dir: None,
        })
    }

    /// Sets a vault-relative trash directory for user-visible deletes
    pub fn with_trash_dir(mut self, trash_dir: RelativePath) -> Self {
        self.trash_dir = Some(trash_dir);
        self
    }

    pub fn id(&self) -> VaultId {
        self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ignore(&self) -> &IgnoreRuleSet {
        &self.ignore
    }

    pub fn trash_dir(&self) -> Option<&RelativePath> {
        self.trash_dir.as_ref()
    }

    /// Replace the ignore rules; effective on the next scan
    pub fn set_ignore(&mut self, ignore: IgnoreRuleSet) {
        self.ignore = ignore;
    }

    /// Absolute location of a vault path
    pub fn absolute(&self, path: &RelativePath) -> PathBuf {
        path.to_absolute(&self.root)
    }

    /// Returns true if the path lies in the trash directory
    pub fn is_trash(&self, path: &RelativePath) -> bool {
        self.trash_dir
            .as_ref()
            .is_some_and(|trash| path == trash || path.is_within(trash))
    }

    /// Returns true if the path is excluded from reconciliation
    pub fn is_excluded(&self, path: &RelativePath, is_dir: bool) -> bool {
        self.is_trash(path) || self.ignore.is_ignored(path, is_dir)
    }
}
