//! Keyed store of per-request streaming sessions.
//!
//! One [`SessionCache`] is constructed when serving starts, cloned into each
//! [`BatchContext`](crate::BatchContext), and dropped at shutdown. All
//! operations lock a shared map, so a request id touched by two concurrently
//! running micro-batches still sees atomic per-key behavior.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use super::stopping::{Decision, StoppingCriteria};
use crate::request::RequestId;

/// Error raised when a caller violates the session contract.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The request id has no open session. Callers must `ensure` a session
    /// in preprocessing before stepping or popping it.
    #[error("no streaming session for request {0}")]
    UnknownRequest(RequestId),

    /// The session exists but its reply buffer is drained.
    #[error("no queued replies for request {0}")]
    NoQueuedReplies(RequestId),
}

/// Mutable per-request state held across otherwise-stateless pipeline calls:
/// the stopping criteria plus a buffer of pending replies.
///
/// Exists only while the request's stream is open; the cache destroys it on
/// the step where the criteria terminates.
#[derive(Debug, Clone)]
pub struct StreamingSession {
    criteria: StoppingCriteria,
    pending_replies: Vec<String>,
}

impl StreamingSession {
    /// Creates a session with an empty reply buffer.
    pub fn new(criteria: StoppingCriteria) -> Self {
        Self {
            criteria,
            pending_replies: Vec::new(),
        }
    }

    /// Seeds the reply buffer. Replies are consumed most-recent-first, so the
    /// last element of `replies` is served first.
    pub fn with_pending_replies(mut self, replies: Vec<String>) -> Self {
        self.pending_replies = replies;
        self
    }

    /// The session's stopping criteria.
    pub fn criteria(&self) -> &StoppingCriteria {
        &self.criteria
    }

    /// Replies queued for this session, oldest first.
    pub fn pending_replies(&self) -> &[String] {
        &self.pending_replies
    }
}

/// Shared map of open streaming sessions, keyed by request id.
///
/// Cloning shares the underlying map. The cache owns session eviction:
/// [`record_step`](SessionCache::record_step) removes a session in the same
/// locked step that observes its termination, so eviction happens exactly
/// once and a stopped session can never be stepped again.
#[derive(Debug, Clone, Default)]
pub struct SessionCache {
    sessions: Arc<Mutex<HashMap<RequestId, StreamingSession>>>,
}

impl SessionCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the session for `id`, constructing and storing one via
    /// `factory` if none exists.
    ///
    /// Idempotent: an existing session is returned untouched, never
    /// reinitialized, so in-flight stopping-criteria state survives repeated
    /// preprocessing of the same stream.
    pub async fn ensure<F>(&self, id: &RequestId, factory: F) -> StreamingSession
    where
        F: FnOnce() -> StreamingSession,
    {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(id) {
            return existing.clone();
        }
        let session = factory();
        debug!(request = %id, "created streaming session");
        sessions.insert(id.clone(), session.clone());
        session
    }

    /// Evaluates the session's stopping criteria against `reply`.
    ///
    /// On [`Decision::Stop`] the session is evicted within the same locked
    /// step, atomically with the decision. A later call for the same id fails
    /// with [`SessionError::UnknownRequest`].
    pub async fn record_step(
        &self,
        id: &RequestId,
        reply: &str,
    ) -> Result<Decision, SessionError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::UnknownRequest(id.clone()))?;
        match session.criteria.step(reply) {
            Decision::Stop => {
                sessions.remove(id);
                debug!(request = %id, "evicted streaming session");
                Ok(Decision::Stop)
            }
            Decision::Continue => Ok(Decision::Continue),
        }
    }

    /// Removes and returns the most-recently-queued reply for `id`.
    ///
    /// The buffer is consumed last-in-first-out; sessions seeded with a
    /// canned script stream it back-to-front.
    pub async fn pop_next_reply(&self, id: &RequestId) -> Result<String, SessionError> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::UnknownRequest(id.clone()))?;
        session
            .pending_replies
            .pop()
            .ok_or_else(|| SessionError::NoQueuedReplies(id.clone()))
    }

    /// Whether a session is open for `id`.
    pub async fn contains(&self, id: &RequestId) -> bool {
        self.sessions.lock().await.contains_key(id)
    }

    /// Number of open sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Whether no sessions are open.
    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(max_seq_length: usize, stop_token: &str) -> StreamingSession {
        StreamingSession::new(StoppingCriteria::new(max_seq_length, stop_token))
    }

    #[tokio::test]
    async fn ensure_creates_once_and_is_idempotent() {
        let cache = SessionCache::new();
        let id = RequestId::new("req-0");

        let first = cache
            .ensure(&id, || {
                session(6, "stop").with_pending_replies(vec!["a".into()])
            })
            .await;
        assert_eq!(first.pending_replies(), ["a".to_string()]);

        // A second factory must never overwrite the stored session.
        let second = cache
            .ensure(&id, || {
                session(1, "other").with_pending_replies(vec!["b".into()])
            })
            .await;
        assert_eq!(second.pending_replies(), ["a".to_string()]);
        assert_eq!(second.criteria().remaining(), 6);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn evicts_on_exactly_the_sixth_step() {
        let cache = SessionCache::new();
        let id = RequestId::new("req-0");
        cache.ensure(&id, || session(6, "never")).await;

        for step in 1..=5 {
            let decision = cache.record_step(&id, "hello ").await.unwrap();
            assert_eq!(decision, Decision::Continue, "step {step}");
            assert!(cache.contains(&id).await);
        }
        let decision = cache.record_step(&id, "hello ").await.unwrap();
        assert_eq!(decision, Decision::Stop);
        assert!(!cache.contains(&id).await);
    }

    #[tokio::test]
    async fn evicts_early_on_stop_token() {
        let cache = SessionCache::new();
        let id = RequestId::new("req-0");
        cache.ensure(&id, || session(6, "hello world ")).await;

        let decision = cache.record_step(&id, "hello world ").await.unwrap();
        assert_eq!(decision, Decision::Stop);
        assert!(!cache.contains(&id).await);
    }

    #[tokio::test]
    async fn stepping_after_eviction_is_unknown() {
        let cache = SessionCache::new();
        let id = RequestId::new("req-0");
        cache.ensure(&id, || session(1, "stop")).await;
        cache.record_step(&id, "anything").await.unwrap();

        assert!(matches!(
            cache.record_step(&id, "more").await,
            Err(SessionError::UnknownRequest(_))
        ));
        assert!(matches!(
            cache.pop_next_reply(&id).await,
            Err(SessionError::UnknownRequest(_))
        ));
    }

    #[tokio::test]
    async fn scripted_decisions_match_replies() {
        let cache = SessionCache::new();
        let id = RequestId::new("req-0");
        cache.ensure(&id, || session(3, "X")).await;

        let mut decisions = Vec::new();
        for reply in ["a", "b", "X"] {
            decisions.push(cache.record_step(&id, reply).await.unwrap());
        }
        assert_eq!(
            decisions,
            vec![Decision::Continue, Decision::Continue, Decision::Stop]
        );
        assert!(!cache.contains(&id).await);
    }

    #[tokio::test]
    async fn replies_pop_most_recent_first() {
        let cache = SessionCache::new();
        let id = RequestId::new("req-0");
        cache
            .ensure(&id, || {
                session(6, "stop").with_pending_replies(vec![
                    "first".into(),
                    "second".into(),
                    "third".into(),
                ])
            })
            .await;

        assert_eq!(cache.pop_next_reply(&id).await.unwrap(), "third");
        assert_eq!(cache.pop_next_reply(&id).await.unwrap(), "second");
        assert_eq!(cache.pop_next_reply(&id).await.unwrap(), "first");
        assert!(matches!(
            cache.pop_next_reply(&id).await,
            Err(SessionError::NoQueuedReplies(_))
        ));
    }

    #[tokio::test]
    async fn unknown_request_fails_fast() {
        let cache = SessionCache::new();
        let id = RequestId::new("never-ensured");
        assert!(matches!(
            cache.pop_next_reply(&id).await,
            Err(SessionError::UnknownRequest(_))
        ));
        // The failed read must not have created a session.
        assert!(cache.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_stop_steps_evict_exactly_once() {
        let cache = SessionCache::new();
        let id = RequestId::new("req-0");
        cache.ensure(&id, || session(100, "X")).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let id = id.clone();
            handles.push(tokio::spawn(
                async move { cache.record_step(&id, "X").await },
            ));
        }

        let mut stops = 0;
        let mut unknown = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(Decision::Stop) => stops += 1,
                Err(SessionError::UnknownRequest(_)) => unknown += 1,
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
        assert_eq!(stops, 1);
        assert_eq!(unknown, 7);
        assert!(cache.is_empty().await);
    }
}
