//! The three-phase pipeline capability and its loopback implementation.

mod canned;
mod core_trait;

pub use canned::CannedReplyPipeline;
pub use core_trait::{Pipeline, PipelineError, Stage};
