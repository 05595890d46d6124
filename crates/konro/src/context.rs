//! Per-call batch context.

use std::ops::Range;
use tokio::sync::Mutex;

use crate::request::{Request, RequestId};
use crate::session::{Decision, SessionCache};

/// Context supplied with each batch call.
///
/// Carries the positional request-id mapping (the order index is
/// authoritative: position `i` of the ids corresponds to position `i` of the
/// batch throughout preprocess, infer, and postprocess), a handle to the
/// process-lifetime [`SessionCache`], and the decision side-channel that
/// postprocessing fills so the transport can close streams on
/// [`Decision::Stop`].
pub struct BatchContext {
    request_ids: Vec<RequestId>,
    cache: SessionCache,
    decisions: Mutex<Vec<Decision>>,
}

impl BatchContext {
    /// Creates a context over an explicit id mapping.
    pub fn new(cache: SessionCache, request_ids: Vec<RequestId>) -> Self {
        Self {
            request_ids,
            cache,
            decisions: Mutex::new(Vec::new()),
        }
    }

    /// Creates a context whose id mapping is derived from `batch` in
    /// positional order.
    pub fn for_batch<T>(cache: &SessionCache, batch: &[Request<T>]) -> Self {
        Self::new(
            cache.clone(),
            batch.iter().map(|request| request.id().clone()).collect(),
        )
    }

    /// The positional id mapping for this call.
    pub fn request_ids(&self) -> &[RequestId] {
        &self.request_ids
    }

    /// Handle to the shared session cache.
    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    /// Number of requests in this call.
    pub fn len(&self) -> usize {
        self.request_ids.len()
    }

    /// Whether the call carries no requests.
    pub fn is_empty(&self) -> bool {
        self.request_ids.is_empty()
    }

    /// Appends a stop/continue decision; called by postprocessing, one
    /// decision per item in positional order.
    pub async fn push_decision(&self, decision: Decision) {
        self.decisions.lock().await.push(decision);
    }

    /// Snapshot of the decisions recorded so far.
    pub async fn decisions(&self) -> Vec<Decision> {
        self.decisions.lock().await.clone()
    }

    /// Child context scoped to one micro-batch slice of this call: same
    /// cache, the slice's ids, a fresh decision buffer.
    pub(crate) fn narrow(&self, range: Range<usize>) -> Self {
        Self::new(self.cache.clone(), self.request_ids[range].to_vec())
    }

    /// Takes the recorded decisions, leaving the buffer empty.
    pub(crate) async fn drain_decisions(&self) -> Vec<Decision> {
        std::mem::take(&mut *self.decisions.lock().await)
    }

    /// Appends decisions collected from child contexts, in index order.
    pub(crate) async fn extend_decisions(&self, decisions: Vec<Decision>) {
        self.decisions.lock().await.extend(decisions);
    }
}
