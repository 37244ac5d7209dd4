//! URL handling shared by every part of the static cache.
//!
//! - [`PathMapper`] converts absolute URLs into cache-relative paths (and back
//!   again when enumerating what is already on disk).
//! - [`Sanitiser`] normalizes raw URLs so that two spellings of the same page
//!   always collapse onto a single queue entry.
//! - [`UrlBundler`] collects normalized URLs with priorities and splits them
//!   into job-sized batches.

mod bundle;
pub mod error;
mod path;
mod sanitise;

pub use crate::bundle::{BatchedUrl, DEFAULT_PRIORITY, PrioritizedUrl, UrlBundler};
pub use crate::path::{PathMapper, path_to_url, url_to_path};
pub use crate::sanitise::{Sanitiser, strip_stage_param};
