//! # Konro
//!
//! Micro-batched serving primitives for streaming inference pipelines.
//!
//! ## Overview
//!
//! Konro wraps any three-phase pipeline (preprocess → infer → postprocess)
//! in a [`MicroBatchAggregator`] that splits arbitrarily sized batches into
//! bounded micro-batches, runs them on a bounded worker pool, and reassembles
//! results in input order. A shared [`SessionCache`] gives the otherwise
//! stateless pipeline per-request memory across calls; per-session
//! [`StoppingCriteria`] decide when each stream is finished, at which point
//! the cache evicts the session.
//!
//! ## Architecture
//!
//! The library is built around a few key pieces:
//!
//! ### The pipeline capability
//!
//! The [`Pipeline`] trait is the seam between the aggregator and whatever
//! does the actual work. The aggregator composes around it rather than
//! patching its behavior: each micro-batch is taken through all three phases
//! independently, with a [`BatchContext`] scoped to the slice. Pipeline
//! stages reach per-request state only through the context's cache handle.
//!
//! ### Ordering
//!
//! Batch order is semantically significant and preserved end to end.
//! Partitioning is deterministic by input order, dispatch may complete in
//! any order, and reassembly is by micro-batch index, so callers always get
//! one result per request in the order they sent them.
//!
//! ### Streaming sessions
//!
//! A [`StreamingSession`] is created lazily on first sight of a request id,
//! stepped once per processing round, and destroyed by the cache on the step
//! where its stopping criteria first fires. Eviction happens inside the same
//! locked step that observes termination, so it happens exactly once.
//!
//! ### Failure policy
//!
//! The first failing micro-batch fails the whole `handle` call; there is no
//! partial-success return. Already-dispatched siblings run to completion in
//! the background and their results are discarded.

pub mod aggregator;
pub mod config;
pub mod context;
pub mod pipeline;
pub mod request;
pub mod session;

mod worker;

pub use aggregator::{AggregateError, MicroBatchAggregator};
pub use config::ServeConfig;
pub use context::BatchContext;
pub use pipeline::{CannedReplyPipeline, Pipeline, PipelineError, Stage};
pub use request::{Request, RequestId};
pub use session::{
    Decision, SessionCache, SessionError, StoppingCriteria, StreamQueue, StreamQueueError,
    StreamingSession,
};
