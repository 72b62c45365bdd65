//! Static token → media-source index.

/// Descriptor and source-ranking types plus the metadata file schemas.
pub mod model;
/// Catalog construction and lookup.
pub mod source;
