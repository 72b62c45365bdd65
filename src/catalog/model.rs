use std::fmt;

use crate::foundation::core::Token;

/// Class of external system a media file is retrieved from.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum OriginKind {
    /// Plain streaming transfer of the locator (HTTP/HTTPS).
    DirectTransfer,
    /// Media hosted on a video platform; needs a platform downloader to resolve to bytes.
    PlatformHosted,
}

impl OriginKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DirectTransfer => "direct_transfer",
            Self::PlatformHosted => "platform_hosted",
        }
    }

    /// Classify a dataset URL: video platform hosts are platform-hosted, everything else direct.
    pub fn classify_locator(locator: &str) -> Self {
        let host = reqwest::Url::parse(locator)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()));
        match host {
            Some(h) if is_platform_host(&h) => Self::PlatformHosted,
            _ => Self::DirectTransfer,
        }
    }
}

impl fmt::Display for OriginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_platform_host(host: &str) -> bool {
    const PLATFORM_HOSTS: [&str; 2] = ["youtube.com", "youtu.be"];
    PLATFORM_HOSTS
        .iter()
        .any(|p| host == *p || host.ends_with(&format!(".{p}")))
}

/// One candidate media source for a token.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct MediaDescriptor {
    /// Canonical token this descriptor was declared under.
    pub token: Token,
    /// Stable identifier of the media, independent of `locator`; the cache key.
    pub origin_id: String,
    pub origin_kind: OriginKind,
    /// Lower is preferred.
    pub source_rank: u32,
    pub locator: String,
}

impl MediaDescriptor {
    /// Catalog order: rank first, origin id breaks ties.
    pub fn order_key(&self) -> (u32, &str) {
        (self.source_rank, self.origin_id.as_str())
    }
}

/// Ordered source-name preference used to rank dataset instances.
///
/// Built once from configuration and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourcePriority {
    sources: Vec<String>,
}

impl SourcePriority {
    pub fn new(sources: Vec<String>) -> Self {
        let sources = sources
            .into_iter()
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        Self { sources }
    }

    /// Index of `source` in the preference list; unknown sources rank after every known one.
    pub fn rank_of(&self, source: Option<&str>) -> u32 {
        let unknown = self.sources.len() as u32 + 1;
        let Some(source) = source else {
            return unknown;
        };
        let source = source.trim().to_ascii_lowercase();
        self.sources
            .iter()
            .position(|s| *s == source)
            .map(|i| i as u32)
            .unwrap_or(unknown)
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }
}

impl Default for SourcePriority {
    fn default() -> Self {
        Self::new(crate::foundation::config::default_preferred_sources())
    }
}

/// Native metadata table: `{"entries": [...]}`.
#[derive(Clone, Debug, serde::Deserialize)]
pub(crate) struct CatalogTable {
    pub(crate) entries: Vec<CatalogRow>,
}

#[derive(Clone, Debug, serde::Deserialize)]
pub(crate) struct CatalogRow {
    pub(crate) token: String,
    #[serde(default)]
    pub(crate) aliases: Vec<String>,
    pub(crate) sources: Vec<SourceRow>,
}

#[derive(Clone, Debug, serde::Deserialize)]
pub(crate) struct SourceRow {
    pub(crate) origin_id: String,
    pub(crate) origin_kind: OriginKind,
    pub(crate) locator: String,
    #[serde(default)]
    pub(crate) source_rank: u32,
}

/// Dataset entry: one gloss and its recorded instances.
#[derive(Clone, Debug, serde::Deserialize)]
pub(crate) struct DatasetGloss {
    pub(crate) gloss: String,
    #[serde(default)]
    pub(crate) instances: Vec<DatasetInstance>,
}

#[derive(Clone, Debug, serde::Deserialize)]
pub(crate) struct DatasetInstance {
    #[serde(deserialize_with = "string_or_number")]
    pub(crate) video_id: String,
    pub(crate) url: String,
    #[serde(default)]
    pub(crate) source: Option<String>,
}

/// Either accepted metadata document shape.
#[derive(Clone, Debug, serde::Deserialize)]
#[serde(untagged)]
pub(crate) enum MetadataDocument {
    Table(CatalogTable),
    Dataset(Vec<DatasetGloss>),
}

fn string_or_number<'de, D>(de: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum Raw {
        S(String),
        N(u64),
    }
    Ok(match <Raw as serde::Deserialize>::deserialize(de)? {
        Raw::S(s) => s,
        Raw::N(n) => n.to_string(),
    })
}
