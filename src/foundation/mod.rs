/// Shared value types: tokens, frame rates, output geometry.
pub mod core;
/// Runtime configuration loaded from TOML.
pub mod config;
/// Error taxonomy.
pub mod error;
