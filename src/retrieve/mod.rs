//! Origin transports and the cache-first retriever.

/// Per-kind transports (HTTP, video platforms).
pub mod origin;
pub mod retriever;
/// Attempt budget and backoff.
pub mod retry;
