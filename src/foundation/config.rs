use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context as _;

use crate::foundation::core::OutputFormat;
use crate::foundation::error::{ReelError, ReelResult};

/// Default cache capacity: 10 GiB.
pub const DEFAULT_CACHE_CAPACITY_BYTES: u64 = 10 * 1024 * 1024 * 1024;

/// Full runtime configuration, loaded once at startup.
///
/// Every field has a default so a partial TOML file (or none at all) is valid.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Metadata table location and source ranking.
    pub catalog: CatalogConfig,
    /// Local media cache.
    pub cache: CacheConfig,
    /// Origin transfer policy.
    pub retrieval: RetrievalConfig,
    /// Per-token fallback policy.
    pub resolution: ResolutionConfig,
    /// Output normalization and naming.
    pub composition: CompositionConfig,
    /// Worker pool and run deadline.
    pub pipeline: RunConfig,
}

/// `[catalog]` section.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogConfig {
    /// Static metadata table (native table or dataset JSON).
    pub metadata_path: PathBuf,
    /// Dataset source names, most preferred first.
    pub preferred_sources: Vec<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            metadata_path: PathBuf::from("metadata.json"),
            preferred_sources: default_preferred_sources(),
        }
    }
}

/// Source ranking the dataset loader falls back to when no config overrides it.
pub fn default_preferred_sources() -> Vec<String> {
    [
        "signschool",
        "asldeafined",
        "valencia-asl",
        "startasl",
        "handspeak",
        "signingsavvy",
        "aslu",
        "aslpro",
        "aslsignbank",
        "aslbrick",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// `[cache]` section.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Directory holding cached media and the index file.
    pub dir: PathBuf,
    /// Upper bound on the summed size of cached media.
    pub capacity_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let dir = dirs::cache_dir()
            .map(|d| d.join("glossreel").join("media"))
            .unwrap_or_else(|| PathBuf::from(".glossreel-cache"));
        Self {
            dir,
            capacity_bytes: DEFAULT_CACHE_CAPACITY_BYTES,
        }
    }
}

/// `[retrieval]` section.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrievalConfig {
    /// Attempts per descriptor (first try included).
    pub max_attempts: u32,
    /// Longest wait for the response headers and for each body chunk.
    pub request_timeout_secs: u64,
    /// Upper bound on a whole attempt, however steadily the data arrives.
    pub attempt_timeout_secs: u64,
    /// TCP/TLS connect timeout for direct transfers.
    pub connect_timeout_secs: u64,
    /// Delay before the second attempt; doubles afterwards.
    pub backoff_base_ms: u64,
    /// Cap on a single backoff delay.
    pub backoff_max_ms: u64,
    /// `User-Agent` header for direct transfers.
    pub user_agent: String,
    /// Register the platform-hosted transport (`yt-dlp`).
    pub enable_platform: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            request_timeout_secs: 30,
            attempt_timeout_secs: 600,
            connect_timeout_secs: 10,
            backoff_base_ms: 1_000,
            backoff_max_ms: 8_000,
            user_agent: format!("glossreel/{}", env!("CARGO_PKG_VERSION")),
            enable_platform: true,
        }
    }
}

impl RetrievalConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// `[resolution]` section.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolutionConfig {
    /// Candidates tried per token before it is reported exhausted.
    pub max_candidates: usize,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self { max_candidates: 3 }
    }
}

/// `[composition]` section.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompositionConfig {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Directory receiving composed artifacts.
    pub output_dir: PathBuf,
    /// Tokens kept verbatim in the output file name.
    pub name_max_tokens: usize,
    /// Character budget for the token part of the output file name.
    pub name_max_chars: usize,
}

impl Default for CompositionConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 25,
            output_dir: std::env::temp_dir().join("glossreel"),
            name_max_tokens: 5,
            name_max_chars: 50,
        }
    }
}

impl CompositionConfig {
    pub fn output_format(&self) -> ReelResult<OutputFormat> {
        OutputFormat::new(self.width, self.height, self.fps)
    }
}

/// `[pipeline]` section.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Tokens resolved concurrently.
    pub workers: usize,
    /// Overall run deadline; unset means no deadline.
    pub deadline_secs: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            deadline_secs: None,
        }
    }
}

impl RunConfig {
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

impl PipelineConfig {
    /// Load and validate a TOML configuration file.
    pub fn from_path(path: &Path) -> ReelResult<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config file '{}'", path.display()))?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate TOML configuration text.
    pub fn from_toml_str(text: &str) -> ReelResult<Self> {
        let cfg: Self =
            toml::from_str(text).map_err(|e| ReelError::config(format!("invalid TOML: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would make a component unusable.
    pub fn validate(&self) -> ReelResult<()> {
        if self.cache.capacity_bytes == 0 {
            return Err(ReelError::config("cache.capacity_bytes must be > 0"));
        }
        if self.retrieval.max_attempts == 0 {
            return Err(ReelError::config("retrieval.max_attempts must be >= 1"));
        }
        if self.retrieval.request_timeout_secs == 0 {
            return Err(ReelError::config(
                "retrieval.request_timeout_secs must be > 0",
            ));
        }
        if self.retrieval.attempt_timeout_secs < self.retrieval.request_timeout_secs {
            return Err(ReelError::config(
                "retrieval.attempt_timeout_secs must be >= retrieval.request_timeout_secs",
            ));
        }
        if self.retrieval.backoff_max_ms < self.retrieval.backoff_base_ms {
            return Err(ReelError::config(
                "retrieval.backoff_max_ms must be >= retrieval.backoff_base_ms",
            ));
        }
        if self.resolution.max_candidates == 0 {
            return Err(ReelError::config("resolution.max_candidates must be >= 1"));
        }
        if self.pipeline.workers == 0 {
            return Err(ReelError::config("pipeline.workers must be >= 1"));
        }
        if self.composition.name_max_tokens == 0 || self.composition.name_max_chars == 0 {
            return Err(ReelError::config(
                "composition name limits must be non-zero",
            ));
        }
        self.composition
            .output_format()
            .map_err(|e| ReelError::config(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/config.rs"]
mod tests;
