/// Candidate fallback per token.
pub mod engine;
