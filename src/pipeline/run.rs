use std::{path::PathBuf, sync::Arc, time::Duration};

use futures::StreamExt as _;
use tokio::time::Instant;

use crate::{
    cache::store::{CacheLease, CacheStore},
    catalog::{model::SourcePriority, source::SourceCatalog},
    compose::{
        codec::{Codec, FfmpegCodec},
        composer::{CompositionSpec, Composer},
    },
    foundation::{
        config::PipelineConfig,
        core::Token,
        error::{CompositionError, CompositionErrorKind, ReelError, ReelResult},
    },
    resolve::engine::{
        CandidateFailure, ResolutionEngine, ResolutionProgress, ResolutionResult, ResolutionStatus,
    },
    retrieve::{origin::Origins, retriever::Retriever},
};

/// Suggestions offered for an unknown token.
const MAX_SUGGESTIONS: usize = 3;

/// Why a token did not make it into the artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    UnknownToken,
    Exhausted,
    DeadlineExceeded,
    /// Retrieved, but the composer could not decode it.
    DecodeFailed,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct UnresolvedToken {
    /// Position in the input sequence.
    pub index: usize,
    pub token: Token,
    pub reason: UnresolvedReason,
    pub attempted_origin_ids: Vec<String>,
    pub failures: Vec<CandidateFailure>,
    /// Close catalog tokens, for unknown tokens only.
    pub suggestions: Vec<Token>,
}

/// Downstream result of a successful run.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct ComposeResult {
    pub output_artifact_path: PathBuf,
    /// Tokens rendered in the artifact, in input order.
    pub resolved_tokens: Vec<Token>,
    /// Tokens left out, in input order.
    pub unresolved_tokens: Vec<Token>,
    pub unresolved: Vec<UnresolvedToken>,
    /// Playback length of the artifact; unknown when any segment's length was.
    pub duration_secs: Option<f64>,
}

/// Terminal run failure: nothing could be composed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{error} ({} unresolved tokens)", .unresolved_tokens.len())]
pub struct PipelineFailure {
    pub error: CompositionError,
    pub unresolved_tokens: Vec<Token>,
    pub unresolved: Vec<UnresolvedToken>,
}

impl From<PipelineFailure> for ReelError {
    fn from(f: PipelineFailure) -> Self {
        ReelError::Composition(f.error)
    }
}

/// Token sequence → composed artifact.
#[derive(Debug, Clone)]
pub struct Pipeline {
    engine: ResolutionEngine,
    composer: Arc<Composer>,
    workers: usize,
    deadline: Option<Duration>,
}

impl Pipeline {
    pub fn new(engine: ResolutionEngine, composer: Composer, workers: usize) -> Self {
        Self {
            engine,
            composer: Arc::new(composer),
            workers: workers.max(1),
            deadline: None,
        }
    }

    /// Per-run deadline applied by [`Pipeline::run`].
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Wire the production components: metadata file, on-disk cache, built-in transports, ffmpeg.
    pub fn from_config(cfg: &PipelineConfig) -> ReelResult<Self> {
        let priority = SourcePriority::new(cfg.catalog.preferred_sources.clone());
        let catalog = Arc::new(SourceCatalog::from_path(&cfg.catalog.metadata_path, &priority)?);
        let cache = Arc::new(CacheStore::open(&cfg.cache.dir, cfg.cache.capacity_bytes)?);
        let origins = Origins::from_config(&cfg.retrieval)?;
        Self::from_parts(catalog, cache, origins, Arc::new(FfmpegCodec::default()), cfg)
    }

    /// Wire caller-provided components with the policy knobs from `cfg`.
    pub fn from_parts(
        catalog: Arc<SourceCatalog>,
        cache: Arc<CacheStore>,
        origins: Origins,
        codec: Arc<dyn Codec>,
        cfg: &PipelineConfig,
    ) -> ReelResult<Self> {
        cfg.validate()?;
        let retriever = Arc::new(Retriever::from_config(cache, origins, &cfg.retrieval));
        let engine = ResolutionEngine::new(catalog, retriever, cfg.resolution.max_candidates);
        let composer = Composer::from_config(codec, &cfg.composition)?;
        Ok(Self::new(engine, composer, cfg.pipeline.workers).with_deadline(cfg.pipeline.deadline()))
    }

    pub fn engine(&self) -> &ResolutionEngine {
        &self.engine
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    /// Resolve every token with at most `workers` in flight; results follow input order.
    ///
    /// When `deadline` passes, in-flight resolutions are dropped (aborting their transfers) and
    /// unfinished tokens come back exhausted with `deadline_exceeded` set, keeping the candidates
    /// they had already tried.
    pub async fn resolve_all(
        &self,
        tokens: &[Token],
        deadline: Option<Instant>,
    ) -> Vec<ResolutionResult> {
        self.resolve_all_leased(tokens, deadline, None).await
    }

    async fn resolve_all_leased(
        &self,
        tokens: &[Token],
        deadline: Option<Instant>,
        lease: Option<&Arc<CacheLease>>,
    ) -> Vec<ResolutionResult> {
        let mut slots: Vec<Option<ResolutionResult>> = vec![None; tokens.len()];
        let progress: Vec<ResolutionProgress> =
            tokens.iter().map(|_| ResolutionProgress::default()).collect();
        let engine = &self.engine;
        let tracked = &progress;
        let mut pending = futures::stream::iter(tokens.iter().enumerate())
            .map(|(index, token)| async move {
                (index, engine.resolve_with(token, lease, &tracked[index]).await)
            })
            .buffer_unordered(self.workers);

        let collect = async {
            while let Some((index, result)) = pending.next().await {
                slots[index] = Some(result);
            }
        };
        match deadline {
            Some(at) => {
                if tokio::time::timeout_at(at, collect).await.is_err() {
                    tracing::warn!("run deadline exceeded, abandoning in-flight resolutions");
                }
            }
            None => collect.await,
        }
        drop(pending);

        slots
            .into_iter()
            .zip(tokens.iter().zip(&progress))
            .map(|(slot, (token, progress))| {
                slot.unwrap_or_else(|| ResolutionResult::timed_out(token.clone(), progress))
            })
            .collect()
    }

    /// [`Pipeline::run_until`] with the configured deadline, if any.
    pub async fn run(&self, tokens: &[Token]) -> Result<ComposeResult, PipelineFailure> {
        let deadline = self.deadline.map(|d| Instant::now() + d);
        self.run_until(tokens, deadline).await
    }

    /// Resolve, then compose whatever resolved.
    ///
    /// Partial failure is data: the artifact is produced as long as one token resolved and decoded.
    pub async fn run_until(
        &self,
        tokens: &[Token],
        deadline: Option<Instant>,
    ) -> Result<ComposeResult, PipelineFailure> {
        tracing::info!(tokens = tokens.len(), workers = self.workers, "starting run");
        // Held until composition is done so nothing this run retrieved is evicted under it.
        let lease = Arc::new(self.engine.retriever().cache().lease());
        let results = self.resolve_all_leased(tokens, deadline, Some(&lease)).await;

        let mut spec = CompositionSpec::new();
        // Spec position → input index.
        let mut spec_origin = Vec::new();
        let mut unresolved = Vec::new();
        for (index, r) in results.iter().enumerate() {
            match (&r.status, &r.materialized_path) {
                (ResolutionStatus::Success, Some(path)) => {
                    spec.push(r.token.clone(), path.clone());
                    spec_origin.push(index);
                }
                _ => unresolved.push(self.unresolved_from(index, r)),
            }
        }

        let composer = Arc::clone(&self.composer);
        let outcome = match tokio::task::spawn_blocking(move || composer.compose(&spec)).await {
            Ok(outcome) => outcome,
            Err(e) => Err(CompositionError::write_failure(format!(
                "composition task failed: {e}"
            ))),
        };
        drop(lease);

        match outcome {
            Ok(output) => {
                for skip in &output.skipped {
                    let index = spec_origin[skip.index];
                    unresolved.push(UnresolvedToken {
                        index,
                        token: skip.token.clone(),
                        reason: UnresolvedReason::DecodeFailed,
                        attempted_origin_ids: results[index].attempted_origin_ids.clone(),
                        failures: results[index].failures.clone(),
                        suggestions: Vec::new(),
                    });
                }
                unresolved.sort_by_key(|u| u.index);
                let duration_secs = output.duration_secs();
                let result = ComposeResult {
                    output_artifact_path: output.path,
                    resolved_tokens: output.segments.into_iter().map(|s| s.token).collect(),
                    unresolved_tokens: unresolved.iter().map(|u| u.token.clone()).collect(),
                    unresolved,
                    duration_secs,
                };
                tracing::info!(
                    path = %result.output_artifact_path.display(),
                    resolved = result.resolved_tokens.len(),
                    unresolved = result.unresolved_tokens.len(),
                    duration_secs = ?result.duration_secs,
                    "run finished"
                );
                Ok(result)
            }
            Err(error) => {
                if error.kind == CompositionErrorKind::DecodeFailure {
                    for &index in &spec_origin {
                        unresolved.push(UnresolvedToken {
                            index,
                            token: results[index].token.clone(),
                            reason: UnresolvedReason::DecodeFailed,
                            attempted_origin_ids: results[index].attempted_origin_ids.clone(),
                            failures: results[index].failures.clone(),
                            suggestions: Vec::new(),
                        });
                    }
                }
                unresolved.sort_by_key(|u| u.index);
                tracing::warn!(error = %error, unresolved = unresolved.len(), "run failed");
                Err(PipelineFailure {
                    error,
                    unresolved_tokens: unresolved.iter().map(|u| u.token.clone()).collect(),
                    unresolved,
                })
            }
        }
    }

    fn unresolved_from(&self, index: usize, r: &ResolutionResult) -> UnresolvedToken {
        let (reason, suggestions) = match r.status {
            ResolutionStatus::TokenUnknown => (
                UnresolvedReason::UnknownToken,
                self.engine
                    .catalog()
                    .similar(r.token.as_str(), MAX_SUGGESTIONS),
            ),
            _ if r.deadline_exceeded => (UnresolvedReason::DeadlineExceeded, Vec::new()),
            _ => (UnresolvedReason::Exhausted, Vec::new()),
        };
        UnresolvedToken {
            index,
            token: r.token.clone(),
            reason,
            attempted_origin_ids: r.attempted_origin_ids.clone(),
            failures: r.failures.clone(),
            suggestions,
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/pipeline/run.rs"]
mod tests;
