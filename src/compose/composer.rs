use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use chrono::NaiveDateTime;

use crate::{
    compose::codec::Codec,
    foundation::config::CompositionConfig,
    foundation::core::{OutputFormat, Token},
    foundation::error::{CompositionError, ReelResult},
};

/// One materialized media file and the token it renders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompositionItem {
    pub token: Token,
    pub path: PathBuf,
}

/// Ordered input of a composition.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompositionSpec {
    pub items: Vec<CompositionItem>,
}

impl CompositionSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, token: Token, path: impl Into<PathBuf>) -> &mut Self {
        self.items.push(CompositionItem {
            token,
            path: path.into(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// A segment that made it into the artifact.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct Segment {
    pub token: Token,
    pub source: PathBuf,
    /// `false` when the source was joined as-is.
    pub normalized: bool,
    /// Playback length of the source, when the codec reported one.
    pub duration_secs: Option<f64>,
}

/// An input item left out of the artifact.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct SkippedItem {
    /// Position in the [`CompositionSpec`].
    pub index: usize,
    pub token: Token,
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct CompositionOutput {
    pub path: PathBuf,
    pub segments: Vec<Segment>,
    pub skipped: Vec<SkippedItem>,
}

impl CompositionOutput {
    /// Sum of the segment lengths; `None` when any of them is unknown.
    pub fn duration_secs(&self) -> Option<f64> {
        self.segments.iter().map(|s| s.duration_secs).sum()
    }
}

/// An item ready to be joined.
struct Prepared {
    index: usize,
    input: PathBuf,
    segment: Segment,
}

/// Joins materialized media into one artifact at a fixed output format.
#[derive(Clone)]
pub struct Composer {
    codec: Arc<dyn Codec>,
    format: OutputFormat,
    output_dir: PathBuf,
    name_max_tokens: usize,
    name_max_chars: usize,
}

impl std::fmt::Debug for Composer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Composer")
            .field("format", &self.format)
            .field("output_dir", &self.output_dir)
            .finish_non_exhaustive()
    }
}

impl Composer {
    pub fn new(codec: Arc<dyn Codec>, format: OutputFormat, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            codec,
            format,
            output_dir: output_dir.into(),
            name_max_tokens: 5,
            name_max_chars: 50,
        }
    }

    pub fn from_config(codec: Arc<dyn Codec>, cfg: &CompositionConfig) -> ReelResult<Self> {
        Ok(Self::new(codec, cfg.output_format()?, cfg.output_dir.clone())
            .with_name_limits(cfg.name_max_tokens, cfg.name_max_chars))
    }

    pub fn with_name_limits(mut self, max_tokens: usize, max_chars: usize) -> Self {
        self.name_max_tokens = max_tokens.max(1);
        self.name_max_chars = max_chars.max(1);
        self
    }

    pub fn format(&self) -> &OutputFormat {
        &self.format
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Compose `spec` in order.
    ///
    /// Items that fail to probe, normalize or decode are skipped and reported; only an empty input
    /// or a total decode failure, or a failure to write the artifact, aborts the composition.
    pub fn compose(&self, spec: &CompositionSpec) -> Result<CompositionOutput, CompositionError> {
        if spec.is_empty() {
            return Err(CompositionError::no_input("composition has no items"));
        }
        std::fs::create_dir_all(&self.output_dir).map_err(|e| {
            CompositionError::write_failure(format!(
                "create output dir '{}': {e}",
                self.output_dir.display()
            ))
        })?;
        let scratch = ScratchDir::create(&self.output_dir)?;

        let mut prepared = Vec::with_capacity(spec.len());
        let mut skipped = Vec::new();
        for (index, item) in spec.items.iter().enumerate() {
            match self.prepare(index, item, scratch.path()) {
                Ok(p) => prepared.push(p),
                Err(e) => skipped.push(skip(index, item, e)),
            }
        }
        if prepared.is_empty() {
            return Err(all_failed(spec));
        }

        let joined = scratch.path().join("joined.mp4");
        let prepared = self.join(spec, prepared, &mut skipped, &joined)?;

        let segments: Vec<Segment> = prepared.into_iter().map(|p| p.segment).collect();
        let tokens: Vec<Token> = segments.iter().map(|s| s.token.clone()).collect();
        let name = output_file_name(
            &tokens,
            chrono::Local::now().naive_local(),
            self.name_max_tokens,
            self.name_max_chars,
        );
        let dest = unique_path(&self.output_dir.join(&name));
        std::fs::rename(&joined, &dest).map_err(|e| {
            CompositionError::write_failure(format!("publish '{}': {e}", dest.display()))
        })?;

        let output = CompositionOutput {
            path: dest,
            segments,
            skipped,
        };
        tracing::info!(
            path = %output.path.display(),
            segments = output.segments.len(),
            skipped = output.skipped.len(),
            duration_secs = ?output.duration_secs(),
            "composed artifact"
        );
        Ok(output)
    }

    fn prepare(
        &self,
        index: usize,
        item: &CompositionItem,
        scratch: &Path,
    ) -> Result<Prepared, CompositionError> {
        let info = self.codec.probe(&item.path)?;
        let segment = |normalized| Segment {
            token: item.token.clone(),
            source: item.path.clone(),
            normalized,
            duration_secs: info.duration_secs,
        };
        if info.is_segment_ready(&self.format) {
            return Ok(Prepared {
                index,
                input: item.path.clone(),
                segment: segment(false),
            });
        }
        let dst = scratch.join(format!("seg_{index:04}.mp4"));
        self.codec.normalize(&item.path, &dst, &self.format)?;
        Ok(Prepared {
            index,
            input: dst,
            segment: segment(true),
        })
    }

    /// Concatenate `prepared` into `dst`.
    ///
    /// When the concat fails, every input is decoded on its own; the ones that fail are moved to
    /// `skipped` and the rest joined again. A failure with no broken input is a write failure.
    fn join(
        &self,
        spec: &CompositionSpec,
        prepared: Vec<Prepared>,
        skipped: &mut Vec<SkippedItem>,
        dst: &Path,
    ) -> Result<Vec<Prepared>, CompositionError> {
        let inputs = |ps: &[Prepared]| ps.iter().map(|p| p.input.clone()).collect::<Vec<_>>();
        let Err(first) = self.codec.concat(&inputs(&prepared), dst, &self.format) else {
            return Ok(prepared);
        };
        let _ = std::fs::remove_file(dst);
        tracing::warn!(error = %first, "concat failed, decoding inputs one by one");

        let before = prepared.len();
        let mut kept = Vec::with_capacity(before);
        for p in prepared {
            match self.codec.verify(&p.input) {
                Ok(()) => kept.push(p),
                Err(e) => {
                    let item = &spec.items[p.index];
                    skipped.push(skip(p.index, item, e));
                }
            }
        }
        skipped.sort_by_key(|s| s.index);
        if kept.len() == before {
            return Err(CompositionError::write_failure(first.message));
        }
        if kept.is_empty() {
            return Err(all_failed(spec));
        }

        if let Err(e) = self.codec.concat(&inputs(&kept), dst, &self.format) {
            let _ = std::fs::remove_file(dst);
            return Err(CompositionError::write_failure(e.message));
        }
        Ok(kept)
    }
}

fn skip(index: usize, item: &CompositionItem, e: CompositionError) -> SkippedItem {
    tracing::warn!(
        index,
        token = %item.token,
        path = %item.path.display(),
        error = %e,
        "skipping undecodable item"
    );
    SkippedItem {
        index,
        token: item.token.clone(),
        reason: e.message,
    }
}

fn all_failed(spec: &CompositionSpec) -> CompositionError {
    CompositionError::decode_failure(format!("all {} items failed to decode", spec.len()))
}

/// `sign_<stem>_<YYYYmmdd_HHMMSS>.mp4`.
///
/// The stem joins the first `max_tokens` tokens with `_` and is cut to `max_chars`. Whenever tokens
/// were dropped or the stem was cut, `_h<8 hex>` derived from the full sequence is appended so
/// distinct long sequences do not share a name.
pub fn output_file_name(
    tokens: &[Token],
    stamp: NaiveDateTime,
    max_tokens: usize,
    max_chars: usize,
) -> String {
    let stamp = stamp.format("%Y%m%d_%H%M%S");
    if tokens.is_empty() {
        return format!("sign_empty_sequence_{stamp}.mp4");
    }

    let full: Vec<String> = tokens.iter().map(|t| sanitize(t.as_str())).collect();
    let joined = full
        .iter()
        .take(max_tokens)
        .cloned()
        .collect::<Vec<_>>()
        .join("_");
    let mut stem: String = joined.chars().take(max_chars).collect();
    let truncated = tokens.len() > max_tokens || stem.len() < joined.len();
    if truncated {
        let stem_trimmed = stem.trim_end_matches('_').len();
        stem.truncate(stem_trimmed);
        let h = xxhash_rust::xxh3::xxh3_64(full.join("_").as_bytes()) as u32;
        stem.push_str(&format!("_h{h:08x}"));
    }
    format!("sign_{stem}_{stamp}.mp4")
}

fn sanitize(token: &str) -> String {
    token
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// `path`, or `<stem>_<n>.<ext>` for the first free `n` when it already exists.
fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parent = path.parent().unwrap_or(Path::new("."));
    (1u32..)
        .map(|n| parent.join(format!("{stem}_{n}.{ext}")))
        .find(|p| !p.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

/// Per-composition working directory, removed on drop.
struct ScratchDir(PathBuf);

impl ScratchDir {
    fn create(parent: &Path) -> Result<Self, CompositionError> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let dir = parent.join(format!(".work-{}-{nanos}", std::process::id()));
        std::fs::create_dir_all(&dir).map_err(|e| {
            CompositionError::write_failure(format!("create scratch dir '{}': {e}", dir.display()))
        })?;
        Ok(Self(dir))
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.0) {
            tracing::warn!(path = %self.0.display(), error = %e, "failed to remove scratch dir");
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/compose/composer.rs"]
mod tests;
