//! Joining materialized media into one artifact.

/// Decode/encode backends (`ffmpeg`).
pub mod codec;
pub mod composer;
