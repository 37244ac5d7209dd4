//! The static cache directory: where published pages end up and what the web
//! server reads from.

pub mod backend;
pub mod error;
mod models;
mod path;

pub use crate::backend::CacheStore;
pub use crate::models::{ArtifactKind, CachedFile};
pub use crate::path::CachePath;
use std::sync::Arc;

pub type StoreHandle = Arc<dyn CacheStore>;
