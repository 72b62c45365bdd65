use std::{path::PathBuf, process::Stdio, sync::Arc, time::Duration};

use crate::{
    catalog::model::{MediaDescriptor, OriginKind},
    foundation::config::RetrievalConfig,
    foundation::error::{ReelError, ReelResult, RetrievalError},
};

/// Bytes delivered by an origin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedMedia {
    pub bytes: Vec<u8>,
    /// Size announced by the origin, when it announced one.
    pub declared_size: Option<u64>,
}

impl FetchedMedia {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            declared_size: None,
        }
    }

    /// Size to report to the cache: the declaration if any, else what actually arrived.
    pub fn size_hint(&self) -> u64 {
        self.declared_size.unwrap_or(self.bytes.len() as u64)
    }
}

/// One way of turning a descriptor's locator into bytes.
///
/// A single call is one attempt; retry and caching are layered on top by the retriever.
#[async_trait::async_trait]
pub trait OriginTransport: Send + Sync {
    async fn fetch(&self, descriptor: &MediaDescriptor) -> Result<FetchedMedia, RetrievalError>;
}

/// Transport table keyed by [`OriginKind`]. A kind without a transport is unsupported.
#[derive(Clone, Default)]
pub struct Origins {
    direct: Option<Arc<dyn OriginTransport>>,
    platform: Option<Arc<dyn OriginTransport>>,
}

impl std::fmt::Debug for Origins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Origins")
            .field("direct", &self.direct.is_some())
            .field("platform", &self.platform.is_some())
            .finish()
    }
}

impl Origins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in transports: HTTP(S) always, `yt-dlp` when enabled.
    pub fn from_config(cfg: &RetrievalConfig) -> ReelResult<Self> {
        let mut origins = Self::new().with_direct(Arc::new(DirectTransfer::new(cfg)?));
        if cfg.enable_platform {
            origins = origins.with_platform(Arc::new(PlatformHosted::new(Arc::new(
                YtDlpDownloader::default(),
            ))));
        }
        Ok(origins)
    }

    pub fn with_direct(mut self, transport: Arc<dyn OriginTransport>) -> Self {
        self.direct = Some(transport);
        self
    }

    pub fn with_platform(mut self, transport: Arc<dyn OriginTransport>) -> Self {
        self.platform = Some(transport);
        self
    }

    pub fn transport_for(&self, kind: OriginKind) -> Option<&Arc<dyn OriginTransport>> {
        match kind {
            OriginKind::DirectTransfer => self.direct.as_ref(),
            OriginKind::PlatformHosted => self.platform.as_ref(),
        }
    }
}

/// Streaming HTTP(S) download.
#[derive(Clone, Debug)]
pub struct DirectTransfer {
    client: reqwest::Client,
    read_timeout: Duration,
}

impl DirectTransfer {
    pub fn new(cfg: &RetrievalConfig) -> ReelResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .connect_timeout(cfg.connect_timeout())
            .build()
            .map_err(|e| ReelError::config(format!("http client: {e}")))?;
        Ok(Self::with_client(client, cfg.request_timeout()))
    }

    /// Use a preconfigured client; `read_timeout` bounds the wait for each body chunk.
    pub fn with_client(client: reqwest::Client, read_timeout: Duration) -> Self {
        Self {
            client,
            read_timeout,
        }
    }
}

#[async_trait::async_trait]
impl OriginTransport for DirectTransfer {
    async fn fetch(&self, descriptor: &MediaDescriptor) -> Result<FetchedMedia, RetrievalError> {
        let url = parse_http_locator(&descriptor.locator)?;
        let sent = tokio::time::timeout(self.read_timeout, self.client.get(url).send()).await;
        let mut response = match sent {
            Err(_) => {
                return Err(RetrievalError::timeout(format!(
                    "no response from '{}' within {:?}",
                    descriptor.locator, self.read_timeout
                )));
            }
            Ok(sent) => sent.map_err(classify_transport_error)?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status.as_u16(), &descriptor.locator));
        }

        let declared = response.content_length();
        let mut bytes = Vec::with_capacity(declared.unwrap_or(0).min(64 * 1024 * 1024) as usize);
        loop {
            match tokio::time::timeout(self.read_timeout, response.chunk()).await {
                Err(_) => {
                    return Err(RetrievalError::timeout(format!(
                        "no data from '{}' for {:?}",
                        descriptor.locator, self.read_timeout
                    )));
                }
                Ok(Err(e)) => return Err(classify_transport_error(e)),
                Ok(Ok(Some(chunk))) => bytes.extend_from_slice(&chunk),
                Ok(Ok(None)) => break,
            }
        }

        if let Some(expected) = declared
            && (bytes.len() as u64) < expected
        {
            return Err(RetrievalError::transient(format!(
                "incomplete download from '{}': {}/{expected} bytes",
                descriptor.locator,
                bytes.len()
            )));
        }
        Ok(FetchedMedia {
            bytes,
            declared_size: declared,
        })
    }
}

fn parse_http_locator(locator: &str) -> Result<reqwest::Url, RetrievalError> {
    let url = reqwest::Url::parse(locator)
        .map_err(|e| RetrievalError::unsupported(format!("locator '{locator}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(RetrievalError::unsupported(format!(
            "scheme '{other}' is not supported for direct transfer"
        ))),
    }
}

/// Map a non-success HTTP status to a retrieval error.
pub fn status_error(status: u16, locator: &str) -> RetrievalError {
    let msg = format!("HTTP {status} from '{locator}'");
    match status {
        401 | 403 | 404 | 410 => RetrievalError::not_found(msg),
        408 | 429 | 500..=599 => RetrievalError::transient(msg),
        _ => RetrievalError::not_found(msg),
    }
}

fn classify_transport_error(e: reqwest::Error) -> RetrievalError {
    if e.is_timeout() {
        RetrievalError::timeout(e.to_string())
    } else if e.is_builder() {
        RetrievalError::unsupported(e.to_string())
    } else {
        RetrievalError::transient(e.to_string())
    }
}

/// Resolves a platform page URL to the media bytes behind it.
#[async_trait::async_trait]
pub trait PlatformDownloader: Send + Sync {
    async fn download(&self, locator: &str) -> Result<Vec<u8>, RetrievalError>;
}

/// Platform-hosted transport; all the platform knowledge lives in the downloader.
#[derive(Clone)]
pub struct PlatformHosted {
    downloader: Arc<dyn PlatformDownloader>,
}

impl PlatformHosted {
    pub fn new(downloader: Arc<dyn PlatformDownloader>) -> Self {
        Self { downloader }
    }
}

#[async_trait::async_trait]
impl OriginTransport for PlatformHosted {
    async fn fetch(&self, descriptor: &MediaDescriptor) -> Result<FetchedMedia, RetrievalError> {
        let bytes = self.downloader.download(&descriptor.locator).await?;
        if bytes.is_empty() {
            return Err(RetrievalError::transient(format!(
                "platform download of '{}' produced no data",
                descriptor.locator
            )));
        }
        Ok(FetchedMedia::new(bytes))
    }
}

/// Runs the `yt-dlp` executable and captures the media from its stdout.
#[derive(Clone, Debug)]
pub struct YtDlpDownloader {
    pub program: PathBuf,
    /// `-f` format selector.
    pub format: String,
}

impl Default for YtDlpDownloader {
    fn default() -> Self {
        Self {
            program: PathBuf::from("yt-dlp"),
            format: "best[ext=mp4]/best".to_string(),
        }
    }
}

#[async_trait::async_trait]
impl PlatformDownloader for YtDlpDownloader {
    async fn download(&self, locator: &str) -> Result<Vec<u8>, RetrievalError> {
        let output = tokio::process::Command::new(&self.program)
            .args(["--quiet", "--no-warnings", "--no-progress", "-f"])
            .arg(&self.format)
            .args(["-o", "-"])
            .arg(locator)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RetrievalError::unsupported(
                format!("'{}' not found on PATH", self.program.display()),
            )),
            Err(e) => Err(RetrievalError::transient(format!(
                "spawn '{}': {e}",
                self.program.display()
            ))),
            Ok(out) if out.status.success() => Ok(out.stdout),
            Ok(out) => Err(classify_platform_failure(&String::from_utf8_lossy(
                &out.stderr,
            ))),
        }
    }
}

/// Map downloader diagnostics to a retrieval error kind.
pub fn classify_platform_failure(stderr: &str) -> RetrievalError {
    const GONE: [&str; 5] = [
        "video unavailable",
        "private video",
        "has been removed",
        "does not exist",
        "http error 404",
    ];
    let lower = stderr.to_ascii_lowercase();
    let detail = stderr.trim().lines().last().unwrap_or("").to_string();
    if GONE.iter().any(|g| lower.contains(g)) {
        RetrievalError::not_found(detail)
    } else if lower.contains("unsupported url") {
        RetrievalError::unsupported(detail)
    } else {
        RetrievalError::transient(detail)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/retrieve/origin.rs"]
mod tests;
