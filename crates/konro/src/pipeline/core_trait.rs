use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::context::BatchContext;
use crate::session::SessionError;

/// Names the pipeline phase an error originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Preprocess,
    Infer,
    Postprocess,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Preprocess => "preprocess",
            Stage::Infer => "infer",
            Stage::Postprocess => "postprocess",
        })
    }
}

/// Error raised by a pipeline stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A session-cache contract violation surfaced by a stage.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// A stage failed for a stage-specific reason.
    #[error("{stage} stage failed: {message}")]
    Stage { stage: Stage, message: String },
}

impl PipelineError {
    /// Builds a stage failure with a human-readable message.
    pub fn stage(stage: Stage, message: impl Into<String>) -> Self {
        Self::Stage {
            stage,
            message: message.into(),
        }
    }
}

/// The three-phase processing capability the aggregator wraps.
///
/// Implementations take a batch of raw payloads through preprocess → infer →
/// postprocess, each phase receiving the per-call [`BatchContext`] whose
/// positional id mapping defines which request each item belongs to.
///
/// Streaming pipelines interact with the session cache through the context:
/// `preprocess` calls [`ensure`](crate::SessionCache::ensure) for each new
/// request id, `infer` may serve replies via
/// [`pop_next_reply`](crate::SessionCache::pop_next_reply), and `postprocess`
/// may call [`record_step`](crate::SessionCache::record_step) and push the
/// resulting decision onto the context for the transport.
///
/// Implementations must be safe to call concurrently across micro-batches;
/// wrap a model that is not with
/// [`ServeConfig::with_max_concurrency(1)`](crate::ServeConfig::with_max_concurrency)
/// to degrade dispatch to sequential.
#[async_trait]
pub trait Pipeline: Send + Sync {
    /// Inbound payload type.
    type Raw: Send + 'static;
    /// Normalized item produced by preprocessing.
    type Prepared: Send + 'static;
    /// Model output per item.
    type Output: Send + 'static;
    /// Final per-item result returned to the caller.
    type Response: Send + 'static;

    /// Normalizes raw payloads; for streaming use, ensures a session exists
    /// for each request id in the context.
    async fn preprocess(
        &self,
        ctx: &BatchContext,
        raw: Vec<Self::Raw>,
    ) -> Result<Vec<Self::Prepared>, PipelineError>;

    /// Runs the model over the prepared items.
    async fn infer(
        &self,
        ctx: &BatchContext,
        prepared: Vec<Self::Prepared>,
    ) -> Result<Vec<Self::Output>, PipelineError>;

    /// Shapes outputs into responses; for streaming use, records one
    /// stopping-criteria step per item and surfaces the decision via the
    /// context.
    async fn postprocess(
        &self,
        ctx: &BatchContext,
        outputs: Vec<Self::Output>,
    ) -> Result<Vec<Self::Response>, PipelineError>;
}
