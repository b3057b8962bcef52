//! Entity type definitions

pub mod baseline;
pub mod configuration;
pub mod content;
pub mod effectivity;
pub mod instance;
pub mod master;
pub mod part;

pub use baseline::{BaselineType, ProductBaseline, SelectionPolicy, Snapshot};
pub use configuration::{ConfigurationItem, PathToPathLink};
pub use content::{AttributeValue, BinaryResource, DocumentLink, InstanceAttribute};
pub use effectivity::{Applicability, Effectivity, EffectivityRange};
pub use instance::{ProductInstance, ProductInstanceIteration};
pub use master::{Iteration, Master, Revision, StatusChange};
pub use part::{PartUsageLink, SubstituteLink, SubstituteSpec, UsageLinkSpec};
