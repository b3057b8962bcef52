//! Core module - fundamental types, the store and the product manager

pub mod baseline;
pub mod collaborators;
pub mod config;
pub mod effectivity;
pub mod entity;
pub mod error;
pub mod identity;
pub mod instance;
pub mod lifecycle;
pub mod logging;
pub mod manager;
pub mod path;
pub mod path_links;
pub mod store;
pub mod structure;

pub use collaborators::{
    AccessPolicy, Action, AllowAll, BlobStore, Event, InMemoryBlobStore, Notifier,
    TracingNotifier, VaultBlobStore,
};
pub use config::{Config, LogConfig, LogFormat, StoreConfig};
pub use entity::{CheckoutState, Iterated, RevisionStatus};
pub use error::{Denial, EntityKind, PlmError, Result};
pub use identity::{
    ConfigurationItemKey, IdParseError, IterationKey, LinkId, MasterKey, MasterKind,
    ProductInstanceKey, RevisionKey,
};
pub use lifecycle::{allowed_transitions, is_valid_transition};
pub use manager::ProductManager;
pub use path_links::UpgradeReport;
pub use structure::{PartFilter, ResolvedStructure, StructureNode};
