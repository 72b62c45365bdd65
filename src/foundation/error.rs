use std::fmt;

/// Convenience result type used across glossreel.
pub type ReelResult<T> = Result<T, ReelError>;

/// Top-level error taxonomy used by library APIs.
#[derive(thiserror::Error, Debug)]
pub enum ReelError {
    /// Invalid caller-provided data (tokens, paths, option values).
    #[error("validation error: {0}")]
    Validation(String),

    /// Malformed or inconsistent source metadata.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Invalid or unreadable configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Local media cache failures (index, capacity, file publication).
    #[error("cache error: {0}")]
    Cache(String),

    /// Media retrieval failure that escaped the fallback protocol.
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    /// Output composition failure.
    #[error(transparent)]
    Composition(#[from] CompositionError),

    /// Errors when serializing or deserializing data structures.
    #[error("serialization error: {0}")]
    Serde(String),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReelError {
    /// Build a [`ReelError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`ReelError::Catalog`] value.
    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }

    /// Build a [`ReelError::Config`] value.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Build a [`ReelError::Cache`] value.
    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    /// Build a [`ReelError::Serde`] value.
    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }
}

/// Why a single descriptor could not be materialized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalErrorKind {
    /// The origin reported that the media does not exist (or refuses to serve it).
    NotFound,
    /// Connection reset, 5xx, truncated body and similar recoverable failures.
    TransientNetwork,
    /// No transport can handle this origin kind or locator scheme.
    UnsupportedOrigin,
    /// Connect/read/request timeout.
    Timeout,
    /// The bytes arrived but could not be published into the local cache.
    Storage,
}

impl RetrievalErrorKind {
    /// Only network-flavoured failures are worth another attempt against the same origin.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::TransientNetwork | Self::Timeout)
    }

    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::TransientNetwork => "transient_network",
            Self::UnsupportedOrigin => "unsupported_origin",
            Self::Timeout => "timeout",
            Self::Storage => "storage",
        }
    }
}

impl fmt::Display for RetrievalErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to fetch one media descriptor.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("retrieval error ({kind}): {message}")]
pub struct RetrievalError {
    /// Failure class, drives the retry decision.
    pub kind: RetrievalErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl RetrievalError {
    /// Build a retrieval error of `kind`.
    pub fn new(kind: RetrievalErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
        }
    }

    /// Build a [`RetrievalErrorKind::NotFound`] error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(RetrievalErrorKind::NotFound, msg)
    }

    /// Build a [`RetrievalErrorKind::TransientNetwork`] error.
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::new(RetrievalErrorKind::TransientNetwork, msg)
    }

    /// Build a [`RetrievalErrorKind::UnsupportedOrigin`] error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::new(RetrievalErrorKind::UnsupportedOrigin, msg)
    }

    /// Build a [`RetrievalErrorKind::Timeout`] error.
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(RetrievalErrorKind::Timeout, msg)
    }

    /// Build a [`RetrievalErrorKind::Storage`] error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::new(RetrievalErrorKind::Storage, msg)
    }

    /// Shorthand for `self.kind.is_retryable()`.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Why composition produced no artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositionErrorKind {
    /// Nothing to compose.
    NoInput,
    /// Every input item failed to decode/normalize.
    DecodeFailure,
    /// The output artifact could not be written.
    WriteFailure,
}

impl CompositionErrorKind {
    /// Stable snake_case name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoInput => "no_input",
            Self::DecodeFailure => "decode_failure",
            Self::WriteFailure => "write_failure",
        }
    }
}

impl fmt::Display for CompositionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal composition failure.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("composition error ({kind}): {message}")]
pub struct CompositionError {
    /// Failure class.
    pub kind: CompositionErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl CompositionError {
    /// Build a composition error of `kind`.
    pub fn new(kind: CompositionErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
        }
    }

    /// Build a [`CompositionErrorKind::NoInput`] error.
    pub fn no_input(msg: impl Into<String>) -> Self {
        Self::new(CompositionErrorKind::NoInput, msg)
    }

    /// Build a [`CompositionErrorKind::DecodeFailure`] error.
    pub fn decode_failure(msg: impl Into<String>) -> Self {
        Self::new(CompositionErrorKind::DecodeFailure, msg)
    }

    /// Build a [`CompositionErrorKind::WriteFailure`] error.
    pub fn write_failure(msg: impl Into<String>) -> Self {
        Self::new(CompositionErrorKind::WriteFailure, msg)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
