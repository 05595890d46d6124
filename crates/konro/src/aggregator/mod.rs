//! Micro-batch splitting, bounded dispatch, and ordered reassembly.

mod batcher;
mod split;

pub use batcher::{AggregateError, MicroBatchAggregator};
pub use split::{MicroBatch, split_batch};
