//! External collaborators - blob storage, access control and notifications
//!
//! The core never inspects file content, never evaluates permissions itself
//! and never delivers notifications. It talks to these through traits and
//! ships simple default implementations.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::Serialize;
use tracing::info;

use crate::core::error::{PlmError, Result};

// =========================================================================
// Blob store
// =========================================================================

/// Content store keyed by deterministic full file names
pub trait BlobStore: Send + Sync {
    /// Store content under a full name, returning its length
    fn put(&self, full_name: &str, content: &[u8]) -> Result<u64>;

    /// Duplicate content to a new full name
    fn copy(&self, from: &str, to: &str) -> Result<()>;

    /// Remove content; deleting a missing name is not an error
    fn delete(&self, full_name: &str) -> Result<()>;

    fn exists(&self, full_name: &str) -> Result<bool>;
}

fn blob_error(full_name: &str, message: impl std::fmt::Display) -> PlmError {
    PlmError::Blob {
        full_name: full_name.to_string(),
        message: message.to_string(),
    }
}

/// Blob store on the local filesystem, one file per full name
#[derive(Debug, Clone)]
pub struct VaultBlobStore {
    root: PathBuf,
}

impl VaultBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, full_name: &str) -> Result<PathBuf> {
        let relative = std::path::Path::new(full_name);
        let escapes = relative.components().any(|c| {
            !matches!(c, std::path::Component::Normal(_))
        });
        if full_name.is_empty() || escapes {
            return Err(blob_error(full_name, "not a relative vault name"));
        }
        Ok(self.root.join(relative))
    }
}

impl BlobStore for VaultBlobStore {
    fn put(&self, full_name: &str, content: &[u8]) -> Result<u64> {
        let path = self.resolve(full_name)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| blob_error(full_name, e))?;
        }
        std::fs::write(&path, content).map_err(|e| blob_error(full_name, e))?;
        Ok(content.len() as u64)
    }

    fn copy(&self, from: &str, to: &str) -> Result<()> {
        let source = self.resolve(from)?;
        let target = self.resolve(to)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| blob_error(to, e))?;
        }
        std::fs::copy(&source, &target).map_err(|e| blob_error(from, e))?;
        Ok(())
    }

    fn delete(&self, full_name: &str) -> Result<()> {
        let path = self.resolve(full_name)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(blob_error(full_name, e)),
        }
    }

    fn exists(&self, full_name: &str) -> Result<bool> {
        Ok(self.resolve(full_name)?.is_file())
    }
}

/// Blob store held in memory
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Content stored under a full name
    pub fn get(&self, full_name: &str) -> Result<Option<Vec<u8>>> {
        let blobs = self.blobs.lock().map_err(|_| PlmError::LockPoisoned)?;
        Ok(blobs.get(full_name).cloned())
    }

    /// Every stored full name, sorted
    pub fn names(&self) -> Result<Vec<String>> {
        let blobs = self.blobs.lock().map_err(|_| PlmError::LockPoisoned)?;
        Ok(blobs.keys().cloned().collect())
    }
}

impl BlobStore for InMemoryBlobStore {
    fn put(&self, full_name: &str, content: &[u8]) -> Result<u64> {
        let mut blobs = self.blobs.lock().map_err(|_| PlmError::LockPoisoned)?;
        blobs.insert(full_name.to_string(), content.to_vec());
        Ok(content.len() as u64)
    }

    fn copy(&self, from: &str, to: &str) -> Result<()> {
        let mut blobs = self.blobs.lock().map_err(|_| PlmError::LockPoisoned)?;
        let content = blobs
            .get(from)
            .cloned()
            .ok_or_else(|| blob_error(from, "no such blob"))?;
        blobs.insert(to.to_string(), content);
        Ok(())
    }

    fn delete(&self, full_name: &str) -> Result<()> {
        let mut blobs = self.blobs.lock().map_err(|_| PlmError::LockPoisoned)?;
        blobs.remove(full_name);
        Ok(())
    }

    fn exists(&self, full_name: &str) -> Result<bool> {
        let blobs = self.blobs.lock().map_err(|_| PlmError::LockPoisoned)?;
        Ok(blobs.contains_key(full_name))
    }
}

// =========================================================================
// Access control
// =========================================================================

/// Mutations the access policy is asked about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    CreateMaster,
    CreateRevision,
    Checkout,
    Checkin,
    UndoCheckout,
    Release,
    MarkObsolete,
    DeleteRevision,
    EditIteration,
    EditStructure,
    ManageConfigurationItem,
    ManagePathLinks,
    CreateBaseline,
    DeleteBaseline,
    ManageProductInstance,
    ManageEffectivity,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Action::CreateMaster => "create master",
            Action::CreateRevision => "create revision",
            Action::Checkout => "checkout",
            Action::Checkin => "checkin",
            Action::UndoCheckout => "undo checkout",
            Action::Release => "release",
            Action::MarkObsolete => "mark obsolete",
            Action::DeleteRevision => "delete revision",
            Action::EditIteration => "edit iteration",
            Action::EditStructure => "edit structure",
            Action::ManageConfigurationItem => "manage configuration item",
            Action::ManagePathLinks => "manage path links",
            Action::CreateBaseline => "create baseline",
            Action::DeleteBaseline => "delete baseline",
            Action::ManageProductInstance => "manage product instance",
            Action::ManageEffectivity => "manage effectivity",
        };
        f.write_str(name)
    }
}

/// Permission check consulted before every mutation
pub trait AccessPolicy: Send + Sync {
    /// `Err(AccessDenied)` refuses the mutation
    fn check(&self, user: &str, action: Action, key: &str) -> Result<()>;
}

/// Policy granting everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn check(&self, _user: &str, _action: Action, _key: &str) -> Result<()> {
        Ok(())
    }
}

// =========================================================================
// Notifications
// =========================================================================

/// State transitions reported after commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    MasterCreated { master: String, user: String },
    RevisionCreated { revision: String, user: String },
    CheckedOut { revision: String, user: String, iteration: u32 },
    CheckedIn { revision: String, user: String, iteration: u32 },
    CheckoutUndone { revision: String, user: String },
    Released { revision: String, user: String },
    MarkedObsolete { revision: String, user: String },
    RevisionDeleted { revision: String, user: String },
    PathLinksUpgraded { workspace: String, cloned: usize },
    BaselineCreated { ci: String, baseline: i64, name: String },
    BaselineDeleted { ci: String, baseline: i64 },
    InstanceCreated { instance: String, baseline: i64 },
    InstanceCheckedOut { instance: String, user: String, iteration: u32 },
    InstanceCheckedIn { instance: String, user: String, iteration: u32 },
    InstanceDeleted { instance: String },
}

/// Fire-and-forget notification sink
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &Event);
}

/// Notifier writing each event to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: &Event) {
        match serde_json::to_string(event) {
            Ok(json) => info!(target: "plm::events", event = %json, "notification"),
            Err(_) => info!(target: "plm::events", event = ?event, "notification"),
        }
    }
}
