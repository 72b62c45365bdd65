//! Persistent, size-bounded media cache.

pub(crate) mod index;
/// The cache itself.
pub mod store;
