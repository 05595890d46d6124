//! Per-request streaming state: stopping criteria, the session cache, and
//! the per-stream job queue.

mod cache;
mod queue;
mod stopping;

pub use cache::{SessionCache, SessionError, StreamingSession};
pub use queue::{StreamQueue, StreamQueueError};
pub use stopping::{Decision, StoppingCriteria};
