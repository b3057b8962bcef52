//! Product manager - the public facade over the store and collaborators
//!
//! Every public operation runs in one store transaction. Notifications and
//! blob deletions are queued in an [`Outbox`] and only delivered after the
//! transaction commits; a rolled-back operation delivers nothing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Transaction;
use tracing::{debug, warn};

use crate::core::collaborators::{
    AccessPolicy, Action, AllowAll, BlobStore, Event, InMemoryBlobStore, Notifier,
    TracingNotifier, VaultBlobStore,
};
use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::store::Store;

/// Side effects released once a transaction has committed
#[derive(Debug, Default)]
pub struct Outbox {
    events: Vec<Event>,
    blob_deletes: Vec<String>,
}

impl Outbox {
    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    /// Queue best-effort removal of blob content
    pub fn delete_blob(&mut self, full_name: impl Into<String>) {
        self.blob_deletes.push(full_name.into());
    }

    pub fn delete_blobs(&mut self, full_names: impl IntoIterator<Item = String>) {
        self.blob_deletes.extend(full_names);
    }

    fn deliver(self, notifier: &dyn Notifier, blobs: &dyn BlobStore) {
        for full_name in &self.blob_deletes {
            if let Err(e) = blobs.delete(full_name) {
                warn!(file = %full_name, error = %e, "blob cleanup failed");
            }
        }
        for event in &self.events {
            notifier.notify(event);
        }
    }
}

/// Entry point for all PLM operations
///
/// Shareable across threads behind an `Arc`.
pub struct ProductManager {
    store: Store,
    blobs: Arc<dyn BlobStore>,
    access: Arc<dyn AccessPolicy>,
    notifier: Arc<dyn Notifier>,
}

impl ProductManager {
    /// Manager over an opened store with in-memory blobs, no access
    /// restrictions and log notifications
    pub fn new(store: Store) -> Self {
        Self {
            store,
            blobs: Arc::new(InMemoryBlobStore::new()),
            access: Arc::new(AllowAll),
            notifier: Arc::new(TracingNotifier),
        }
    }

    /// Open the database and vault named by a configuration
    pub fn open(config: &Config) -> Result<Self> {
        let store = if config.is_in_memory() {
            Store::open_in_memory()?
        } else {
            Store::open(std::path::Path::new(&config.database), &config.store)?
        };
        debug!(database = %config.database, vault = %config.vault.display(), "opening product manager");
        Ok(Self::new(store).with_blob_store(Arc::new(VaultBlobStore::new(&config.vault))))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Store::open_in_memory()?))
    }

    pub fn with_blob_store(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = blobs;
        self
    }

    pub fn with_access_policy(mut self, access: Arc<dyn AccessPolicy>) -> Self {
        self.access = access;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn blob_store(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    pub(crate) fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    pub(crate) fn authorize(
        &self,
        user: &str,
        action: Action,
        key: impl std::fmt::Display,
    ) -> Result<()> {
        self.access.check(user, action, &key.to_string())
    }

    /// Run a mutation in one transaction, then deliver its outbox
    pub(crate) fn transact<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>, &mut Outbox) -> Result<T>,
    ) -> Result<T> {
        let mut outbox = Outbox::default();
        let value = self.store.write(|tx| f(tx, &mut outbox))?;
        outbox.deliver(self.notifier.as_ref(), self.blobs.as_ref());
        Ok(value)
    }

    /// Run a query against a consistent snapshot of the store
    pub(crate) fn query<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        self.store.read(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::PlmError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Event>>);

    impl Notifier for Recorder {
        fn notify(&self, event: &Event) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_outbox_delivered_only_on_commit() {
        let recorder = Arc::new(Recorder::default());
        let manager = ProductManager::open_in_memory()
            .unwrap()
            .with_notifier(recorder.clone());

        let failed: Result<()> = manager.transact(|_, outbox| {
            outbox.emit(Event::InstanceDeleted {
                instance: "x".to_string(),
            });
            Err(PlmError::LockPoisoned)
        });
        assert!(failed.is_err());
        assert!(recorder.0.lock().unwrap().is_empty());

        manager
            .transact(|_, outbox| {
                outbox.emit(Event::InstanceDeleted {
                    instance: "y".to_string(),
                });
                Ok(())
            })
            .unwrap();
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_open_from_config() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config {
            database: tmp.path().join("plm.db").to_string_lossy().into_owned(),
            vault: tmp.path().join("vault"),
            ..Config::default()
        };
        let manager = ProductManager::open(&config).unwrap();
        manager.blob_store().put("ws/x.txt", b"x").unwrap();
        assert!(tmp.path().join("vault/ws/x.txt").is_file());
    }
}
