use std::{path::PathBuf, sync::Arc};

use parking_lot::Mutex;

use crate::{
    cache::store::CacheLease,
    catalog::source::SourceCatalog,
    foundation::core::Token,
    foundation::error::RetrievalErrorKind,
    retrieve::retriever::Retriever,
};

/// Terminal state of one token's resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Success,
    /// Every candidate tried (up to the cap) failed, or the run deadline hit first.
    Exhausted,
    /// The catalog has no entry for the token; nothing was retrieved.
    TokenUnknown,
}

/// A candidate that was tried and failed.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct CandidateFailure {
    pub origin_id: String,
    pub kind: RetrievalErrorKind,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct ResolutionResult {
    pub token: Token,
    pub status: ResolutionStatus,
    /// Local media file; present only on success.
    pub materialized_path: Option<PathBuf>,
    /// Origin ids tried, in order, including the successful one.
    pub attempted_origin_ids: Vec<String>,
    pub failures: Vec<CandidateFailure>,
    /// Set when the run deadline stopped resolution early.
    pub deadline_exceeded: bool,
}

impl ResolutionResult {
    pub fn unknown(token: Token) -> Self {
        Self {
            token,
            status: ResolutionStatus::TokenUnknown,
            materialized_path: None,
            attempted_origin_ids: Vec::new(),
            failures: Vec::new(),
            deadline_exceeded: false,
        }
    }

    /// Result for a token the run deadline cut off before it finished, keeping what it had tried.
    pub fn timed_out(token: Token, progress: &ResolutionProgress) -> Self {
        let (attempted_origin_ids, failures) = progress.snapshot();
        Self {
            token,
            status: ResolutionStatus::Exhausted,
            materialized_path: None,
            attempted_origin_ids,
            failures,
            deadline_exceeded: true,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResolutionStatus::Success
    }
}

/// Candidates tried so far for one token, readable while the resolution is still running.
#[derive(Debug, Default)]
pub struct ResolutionProgress {
    inner: Mutex<(Vec<String>, Vec<CandidateFailure>)>,
}

impl ResolutionProgress {
    fn attempt(&self, origin_id: &str) {
        self.inner.lock().0.push(origin_id.to_string());
    }

    fn fail(&self, failure: CandidateFailure) {
        self.inner.lock().1.push(failure);
    }

    /// Attempted origin ids and failures recorded so far.
    pub fn snapshot(&self) -> (Vec<String>, Vec<CandidateFailure>) {
        self.inner.lock().clone()
    }
}

/// Walks a token's ranked candidates until one materializes.
#[derive(Debug, Clone)]
pub struct ResolutionEngine {
    catalog: Arc<SourceCatalog>,
    retriever: Arc<Retriever>,
    max_candidates: usize,
}

impl ResolutionEngine {
    pub fn new(catalog: Arc<SourceCatalog>, retriever: Arc<Retriever>, max_candidates: usize) -> Self {
        Self {
            catalog,
            retriever,
            max_candidates: max_candidates.max(1),
        }
    }

    pub fn catalog(&self) -> &Arc<SourceCatalog> {
        &self.catalog
    }

    pub fn retriever(&self) -> &Arc<Retriever> {
        &self.retriever
    }

    pub async fn resolve(&self, token: &Token) -> ResolutionResult {
        self.resolve_with(token, None, &ResolutionProgress::default()).await
    }

    /// Resolve `token`, pinning what it retrieves under `lease` and recording each candidate in
    /// `progress` as it goes.
    #[tracing::instrument(level = "debug", skip_all, fields(token = %token))]
    pub async fn resolve_with(
        &self,
        token: &Token,
        lease: Option<&Arc<CacheLease>>,
        progress: &ResolutionProgress,
    ) -> ResolutionResult {
        if !self.catalog.exists(token.as_str()) {
            tracing::debug!("token not in catalog");
            return ResolutionResult::unknown(token.clone());
        }

        for descriptor in self
            .catalog
            .lookup(token.as_str())
            .iter()
            .take(self.max_candidates)
        {
            progress.attempt(&descriptor.origin_id);
            let fetched = match lease {
                Some(lease) => self.retriever.fetch_leased(descriptor, lease).await,
                None => self.retriever.fetch(descriptor).await,
            };
            match fetched {
                Ok(path) => {
                    tracing::debug!(origin_id = %descriptor.origin_id, "resolved");
                    let (attempted_origin_ids, failures) = progress.snapshot();
                    return ResolutionResult {
                        token: token.clone(),
                        status: ResolutionStatus::Success,
                        materialized_path: Some(path),
                        attempted_origin_ids,
                        failures,
                        deadline_exceeded: false,
                    };
                }
                Err(e) => {
                    tracing::debug!(origin_id = %descriptor.origin_id, error = %e, "candidate failed");
                    progress.fail(CandidateFailure {
                        origin_id: descriptor.origin_id.clone(),
                        kind: e.kind,
                        message: e.message,
                    });
                }
            }
        }

        let (attempted_origin_ids, failures) = progress.snapshot();
        tracing::warn!(tried = attempted_origin_ids.len(), "no candidate could be retrieved");
        ResolutionResult {
            token: token.clone(),
            status: ResolutionStatus::Exhausted,
            materialized_path: None,
            attempted_origin_ids,
            failures,
            deadline_exceeded: false,
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/resolve/engine.rs"]
mod tests;
