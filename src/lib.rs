//! PLM core: versioned parts and documents, product structures and baselines
//!
//! Tracks masters through revisions and iterations under a checkout/checkin
//! discipline, assembles parts into product structures addressed by paths,
//! keeps typed path-to-path links consistent as the structure evolves, and
//! freezes resolved configurations into baselines and product instances.

pub mod core;
pub mod entities;

pub use crate::core::{PlmError, ProductManager, Result};
