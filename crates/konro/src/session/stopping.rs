//! Stopping criteria for streaming sessions.
//!
//! A session is *Active* while it has steps remaining, and transitions to
//! *Terminated* on the evaluation step where the countdown reaches zero or
//! the evaluated reply matches the stop token. Terminated is absorbing: the
//! owning [`SessionCache`](super::SessionCache) evicts the session as part of
//! the same step that observes the transition, so a terminated criteria is
//! never evaluated again.

/// Verdict of one stopping-criteria evaluation, surfaced to transports so
/// they can close the stream on [`Decision::Stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The stream has more output to produce.
    Continue,
    /// The stream is finished; its session has been evicted.
    Stop,
}

/// Per-request termination predicate: a step countdown plus a stop-token
/// match.
///
/// Plain data with a single evaluation step. It holds no reference to the
/// cache that owns it; eviction is the cache's job.
#[derive(Debug, Clone)]
pub struct StoppingCriteria {
    remaining: usize,
    stop_token: String,
}

impl StoppingCriteria {
    /// Creates criteria allowing `max_seq_length` steps, stopping early if a
    /// reply equals `stop_token`.
    pub fn new(max_seq_length: usize, stop_token: impl Into<String>) -> Self {
        Self {
            remaining: max_seq_length,
            stop_token: stop_token.into(),
        }
    }

    /// Steps remaining before termination by length.
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// The reply that terminates the stream on match.
    pub fn stop_token(&self) -> &str {
        &self.stop_token
    }

    /// Evaluates one step: decrements the countdown, then tests for
    /// exhaustion or a stop-token match.
    pub fn step(&mut self, reply: &str) -> Decision {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 || reply == self.stop_token {
            Decision::Stop
        } else {
            Decision::Continue
        }
    }
}
