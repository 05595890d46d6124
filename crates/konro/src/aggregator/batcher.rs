//! Micro-batch fan-out and index-ordered fan-in.

use std::sync::Arc;
use futures::future;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error};

use super::split::split_batch;
use crate::config::ServeConfig;
use crate::context::BatchContext;
use crate::pipeline::{Pipeline, PipelineError};
use crate::request::Request;
use crate::session::Decision;

/// Error raised by [`MicroBatchAggregator::handle`].
#[derive(Debug, Error)]
pub enum AggregateError {
    /// The context's id mapping does not cover the batch one-to-one.
    #[error("context supplies {ids} request ids for a batch of {batch}")]
    ContextMismatch { ids: usize, batch: usize },

    /// A micro-batch's pipeline call failed; the whole batch fails with it.
    #[error("micro-batch {index} failed: {source}")]
    Pipeline {
        index: usize,
        #[source]
        source: PipelineError,
    },

    /// A micro-batch worker panicked.
    #[error("micro-batch {index} worker panicked")]
    WorkerPanic { index: usize },

    /// The worker pool was torn down before a micro-batch ran.
    #[error("worker pool closed before micro-batch {index} ran")]
    PoolClosed { index: usize },
}

/// Splits batches into bounded micro-batches, runs each through the wrapped
/// pipeline on a bounded worker pool, and reassembles results in input order.
///
/// The aggregator wraps the pipeline by composition and holds no session
/// state of its own; pipeline stages reach per-request state through the
/// [`BatchContext`]'s cache handle.
pub struct MicroBatchAggregator<P> {
    pipeline: Arc<P>,
    micro_batch_size: usize,
    permits: Arc<Semaphore>,
}

impl<P> MicroBatchAggregator<P>
where
    P: Pipeline + 'static,
{
    /// Wraps `pipeline` with the batch and concurrency bounds from `config`.
    ///
    /// # Panics
    ///
    /// Panics if `micro_batch_size` or `max_concurrency` is zero.
    pub fn new(pipeline: P, config: &ServeConfig) -> Self {
        assert!(
            config.micro_batch_size() > 0,
            "micro batch size must be positive"
        );
        assert!(
            config.max_concurrency() > 0,
            "max concurrency must be positive"
        );
        Self {
            pipeline: Arc::new(pipeline),
            micro_batch_size: config.micro_batch_size(),
            permits: Arc::new(Semaphore::new(config.max_concurrency())),
        }
    }

    /// Processes `batch` through the wrapped pipeline, returning one response
    /// per request in input order.
    ///
    /// Batches no larger than the micro-batch size run as a single pipeline
    /// call. Larger batches are partitioned by input order and dispatched to
    /// the worker pool; regardless of completion order, results and the
    /// decisions recorded on `ctx` are reassembled by micro-batch index.
    ///
    /// The first micro-batch failure fails the whole call with no partial
    /// results; already-dispatched siblings run to completion in the
    /// background and their results are discarded.
    pub async fn handle(
        &self,
        batch: Vec<Request<P::Raw>>,
        ctx: &BatchContext,
    ) -> Result<Vec<P::Response>, AggregateError> {
        if ctx.request_ids().len() != batch.len() {
            return Err(AggregateError::ContextMismatch {
                ids: ctx.request_ids().len(),
                batch: batch.len(),
            });
        }
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        if self.micro_batch_size >= batch.len() {
            let payloads = batch.into_iter().map(Request::into_payload).collect();
            return Self::run_chunk(self.pipeline.as_ref(), ctx, payloads)
                .await
                .map_err(|source| {
                    error!(error = %source, "batch failed");
                    AggregateError::Pipeline { index: 0, source }
                });
        }

        let total = batch.len();
        let chunks = split_batch(batch, self.micro_batch_size);
        debug!(
            batch = total,
            micro_batches = chunks.len(),
            "dispatching micro-batches"
        );

        let mut workers = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let index = chunk.index();
            let offset = chunk.offset();
            let child = ctx.narrow(offset..offset + chunk.len());
            let payloads: Vec<P::Raw> = chunk
                .into_requests()
                .into_iter()
                .map(Request::into_payload)
                .collect();
            let pipeline = self.pipeline.clone();
            let permits = self.permits.clone();

            let handle = tokio::spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| AggregateError::PoolClosed { index })?;
                match Self::run_chunk(pipeline.as_ref(), &child, payloads).await {
                    Ok(responses) => {
                        let decisions = child.drain_decisions().await;
                        Ok((responses, decisions))
                    }
                    Err(source) => {
                        error!(micro_batch = index, error = %source, "micro-batch failed");
                        Err(AggregateError::Pipeline { index, source })
                    }
                }
            });
            workers.push((index, handle));
        }

        // Fan-in in spawn order; the first failure resolves the call while
        // sibling tasks keep running detached.
        let chunk_results = future::try_join_all(workers.into_iter().map(
            |(index, handle)| async move {
                match handle.await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(AggregateError::WorkerPanic { index }),
                }
            },
        ))
        .await?;

        let mut responses = Vec::with_capacity(total);
        let mut decisions: Vec<Decision> = Vec::new();
        for (chunk_responses, chunk_decisions) in chunk_results {
            responses.extend(chunk_responses);
            decisions.extend(chunk_decisions);
        }
        ctx.extend_decisions(decisions).await;
        Ok(responses)
    }

    async fn run_chunk(
        pipeline: &P,
        ctx: &BatchContext,
        raw: Vec<P::Raw>,
    ) -> Result<Vec<P::Response>, PipelineError> {
        let prepared = pipeline.preprocess(ctx, raw).await?;
        let outputs = pipeline.infer(ctx, prepared).await?;
        pipeline.postprocess(ctx, outputs).await
    }
}
