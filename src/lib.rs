//! glossreel turns an ordered sequence of sign-language gloss tokens into one composed video.
//!
//! # Pipeline overview
//!
//! 1. **Catalog**: each token maps to ranked candidate media sources ([`SourceCatalog`]).
//! 2. **Resolve**: candidates are tried in rank order until one materializes
//!    ([`ResolutionEngine`]), going through a cache-first [`Retriever`].
//! 3. **Cache**: retrieved media lands in a persistent, size-bounded LRU store ([`CacheStore`]).
//! 4. **Compose**: materialized media is normalized and concatenated in input order
//!    ([`Composer`]), by default through the system `ffmpeg`.
//!
//! [`Pipeline`] wires the stages together, resolves tokens concurrently and reports partial
//! failures as data.
#![forbid(unsafe_code)]

pub mod cache;
pub mod catalog;
pub mod compose;
pub mod foundation;
pub mod pipeline;
pub mod resolve;
pub mod retrieve;

pub use crate::cache::index::CacheEntry;
pub use crate::cache::store::{CacheLease, CacheStats, CacheStore};
pub use crate::catalog::model::{MediaDescriptor, OriginKind, SourcePriority};
pub use crate::catalog::source::{CatalogBuilder, SourceCatalog, SourceSpec};
pub use crate::compose::codec::{
    Codec, FfmpegCodec, MediaInfo, SEGMENT_CODEC, SEGMENT_PIX_FMT, is_ffmpeg_on_path,
};
pub use crate::compose::composer::{
    Composer, CompositionItem, CompositionOutput, CompositionSpec, Segment, SkippedItem,
    output_file_name,
};
pub use crate::foundation::config::PipelineConfig;
pub use crate::foundation::core::{Canvas, Fps, OutputFormat, Token};
pub use crate::foundation::error::{
    CompositionError, CompositionErrorKind, ReelError, ReelResult, RetrievalError,
    RetrievalErrorKind,
};
pub use crate::pipeline::run::{
    ComposeResult, Pipeline, PipelineFailure, UnresolvedReason, UnresolvedToken,
};
pub use crate::resolve::engine::{
    CandidateFailure, ResolutionEngine, ResolutionProgress, ResolutionResult, ResolutionStatus,
};
pub use crate::retrieve::origin::{
    DirectTransfer, FetchedMedia, OriginTransport, Origins, PlatformDownloader, PlatformHosted,
    YtDlpDownloader,
};
pub use crate::retrieve::retriever::{Retriever, RetrieverStats};
pub use crate::retrieve::retry::RetryPolicy;
