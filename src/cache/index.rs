use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::{DateTime, Utc};

use crate::foundation::error::{ReelError, ReelResult};

pub(crate) const INDEX_FILE: &str = "index.json";
pub(crate) const INDEX_VERSION: u32 = 1;
pub(crate) const MEDIA_EXT: &str = "media";

/// Bookkeeping for one cached origin.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CacheEntry {
    pub origin_id: String,
    /// File name inside the cache directory.
    pub file_name: String,
    pub byte_size: u64,
    pub last_access_time: DateTime<Utc>,
    /// Monotonic access counter; the LRU order key.
    pub last_access_tick: u64,
}

impl CacheEntry {
    pub fn file_path(&self, root: &Path) -> PathBuf {
        root.join(&self.file_name)
    }
}

/// On-disk index document.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub(crate) struct IndexFile {
    pub(crate) version: u32,
    pub(crate) next_tick: u64,
    pub(crate) entries: Vec<CacheEntry>,
}

impl IndexFile {
    pub(crate) fn load(root: &Path) -> ReelResult<Option<Self>> {
        let path = root.join(INDEX_FILE);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("read cache index '{}'", path.display()))
                    .into());
            }
        };
        let index: Self = serde_json::from_slice(&bytes)
            .map_err(|e| ReelError::serde(format!("cache index '{}': {e}", path.display())))?;
        if index.version != INDEX_VERSION {
            return Err(ReelError::cache(format!(
                "unsupported cache index version {}",
                index.version
            )));
        }
        Ok(Some(index))
    }

    /// Write through a sibling temp file so a crash never leaves a half-written index.
    pub(crate) fn store(&self, root: &Path) -> ReelResult<()> {
        let path = root.join(INDEX_FILE);
        let tmp = root.join(format!("{INDEX_FILE}.tmp"));
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| ReelError::serde(format!("cache index: {e}")))?;
        std::fs::write(&tmp, bytes)
            .with_context(|| format!("write cache index '{}'", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("publish cache index '{}'", path.display()))?;
        Ok(())
    }
}

/// Map an origin id to a file name that is safe on every platform.
///
/// Short ids made of `[A-Za-z0-9_-]` are used verbatim; anything else is hashed behind a `~`
/// prefix, which verbatim names can never contain.
pub(crate) fn file_name_for(origin_id: &str) -> String {
    let safe = !origin_id.is_empty()
        && origin_id.len() <= 64
        && origin_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if safe {
        format!("{origin_id}.{MEDIA_EXT}")
    } else {
        let h = xxhash_rust::xxh3::xxh3_64(origin_id.as_bytes());
        format!("~{h:016x}.{MEDIA_EXT}")
    }
}
