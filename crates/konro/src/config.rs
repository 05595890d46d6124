//! Per-deployment serving configuration.

use crate::session::StoppingCriteria;

/// Default number of requests per micro-batch.
pub const DEFAULT_MICRO_BATCH_SIZE: usize = 16;

/// Default bound on concurrently processed micro-batches.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Default number of steps a streaming session may take before it is
/// terminated by length.
pub const DEFAULT_MAX_SEQ_LENGTH: usize = 6;

/// Default reply that terminates a streaming session on match.
pub const DEFAULT_STOP_TOKEN: &str = "hello world ";

/// Serving knobs for the aggregator and streaming sessions.
///
/// Values are per-deployment; the defaults above are starting points, not
/// constants baked into use sites.
#[derive(Debug, Clone)]
pub struct ServeConfig {
    micro_batch_size: usize,
    max_concurrency: usize,
    max_seq_length: usize,
    stop_token: String,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            micro_batch_size: DEFAULT_MICRO_BATCH_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_seq_length: DEFAULT_MAX_SEQ_LENGTH,
            stop_token: DEFAULT_STOP_TOKEN.to_string(),
        }
    }
}

impl ServeConfig {
    /// Creates a configuration with the default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of requests per micro-batch. Must be positive.
    pub fn with_micro_batch_size(mut self, micro_batch_size: usize) -> Self {
        self.micro_batch_size = micro_batch_size;
        self
    }

    /// Sets the worker-pool bound. `1` degrades dispatch to sequential,
    /// for pipelines that are not safe to call concurrently.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Sets the step limit for new streaming sessions.
    pub fn with_max_seq_length(mut self, max_seq_length: usize) -> Self {
        self.max_seq_length = max_seq_length;
        self
    }

    /// Sets the reply that terminates a streaming session on match.
    pub fn with_stop_token(mut self, stop_token: impl Into<String>) -> Self {
        self.stop_token = stop_token.into();
        self
    }

    /// Maximum number of requests per micro-batch.
    pub fn micro_batch_size(&self) -> usize {
        self.micro_batch_size
    }

    /// Bound on concurrently processed micro-batches.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Step limit for new streaming sessions.
    pub fn max_seq_length(&self) -> usize {
        self.max_seq_length
    }

    /// Reply that terminates a streaming session on match.
    pub fn stop_token(&self) -> &str {
        &self.stop_token
    }

    /// Builds the stopping criteria a new streaming session starts with.
    pub fn stopping_criteria(&self) -> StoppingCriteria {
        StoppingCriteria::new(self.max_seq_length, self.stop_token.clone())
    }
}
