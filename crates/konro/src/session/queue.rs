//! Per-stream inbound job queue.
//!
//! Transports hand successive invocations of one logical stream to the
//! serving loop through a [`StreamQueue`]: a bounded FIFO that stops
//! accepting once the stream ends or sits idle past its limit.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tracing::{error, warn};

use crate::request::RequestId;
use crate::worker::WorkerHandle;

/// Error raised when a job cannot be enqueued.
#[derive(Debug, Error)]
pub enum StreamQueueError {
    /// The stream stopped accepting jobs (ended or idle-expired).
    #[error("stream {stream} is no longer accepting jobs")]
    Expired { stream: RequestId },

    /// The queue is at capacity.
    #[error("stream {stream} already has {capacity} jobs pending")]
    Full { stream: RequestId, capacity: usize },
}

struct QueueState<J> {
    pending: VecDeque<J>,
    accepting: bool,
    last_enqueue: Instant,
}

/// Bounded FIFO of pending jobs for one logical stream.
///
/// Jobs are enqueued by the transport and polled by the serving loop in
/// arrival order. An optional idle monitor flips the queue to non-accepting
/// after `max_idle` without an enqueue, so abandoned streams do not pin
/// resources.
pub struct StreamQueue<J> {
    stream_id: RequestId,
    max_pending: usize,
    max_idle: Duration,
    state: Arc<Mutex<QueueState<J>>>,
    arrived: Arc<Notify>,
    monitor: Option<WorkerHandle>,
}

impl<J: Send + 'static> StreamQueue<J> {
    /// Creates a queue for `stream_id` holding at most `max_pending` jobs.
    ///
    /// The idle clock starts at construction, so a queue that never receives
    /// a job still expires.
    pub fn new(stream_id: RequestId, max_pending: usize, max_idle: Duration) -> Self {
        assert!(max_pending > 0, "max pending must be positive");
        Self {
            stream_id,
            max_pending,
            max_idle,
            state: Arc::new(Mutex::new(QueueState {
                pending: VecDeque::with_capacity(max_pending),
                accepting: true,
                last_enqueue: Instant::now(),
            })),
            arrived: Arc::new(Notify::new()),
            monitor: None,
        }
    }

    /// Identifier of the stream this queue serves.
    pub fn stream_id(&self) -> &RequestId {
        &self.stream_id
    }

    /// Appends a job, rejecting it if the queue expired or is full.
    pub async fn enqueue(&self, job: J) -> Result<(), StreamQueueError> {
        let mut state = self.state.lock().await;
        if !state.accepting {
            error!(stream = %self.stream_id, "rejecting job for expired stream");
            return Err(StreamQueueError::Expired {
                stream: self.stream_id.clone(),
            });
        }
        if state.pending.len() >= self.max_pending {
            error!(
                stream = %self.stream_id,
                capacity = self.max_pending,
                "rejecting job for full stream queue"
            );
            return Err(StreamQueueError::Full {
                stream: self.stream_id.clone(),
                capacity: self.max_pending,
            });
        }
        state.pending.push_back(job);
        state.last_enqueue = Instant::now();
        drop(state);
        self.arrived.notify_one();
        Ok(())
    }

    /// Pops the oldest pending job, waiting up to `timeout` for one to
    /// arrive. Returns `None` on timeout.
    pub async fn poll(&self, timeout: Duration) -> Option<J> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut state = self.state.lock().await;
                if let Some(job) = state.pending.pop_front() {
                    return Some(job);
                }
            }
            if tokio::time::timeout_at(deadline, self.arrived.notified())
                .await
                .is_err()
            {
                return None;
            }
        }
    }

    /// Whether the queue still accepts jobs.
    pub async fn accepting(&self) -> bool {
        self.state.lock().await.accepting
    }

    /// Marks the stream as accepting or not; transports use this to signal
    /// end of stream explicitly.
    pub async fn set_accepting(&self, accepting: bool) {
        self.state.lock().await.accepting = accepting;
    }

    /// Number of jobs pending.
    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Whether no jobs are pending.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.pending.is_empty()
    }

    /// Spawns the idle watcher: after `max_idle` without an enqueue the
    /// queue stops accepting jobs. Idempotent.
    pub fn monitor_idle(&mut self) {
        if self.monitor.is_some() {
            return;
        }
        let state = self.state.clone();
        let stream = self.stream_id.clone();
        let max_idle = self.max_idle;
        self.monitor = Some(WorkerHandle::new(move |running, notifier| {
            tokio::spawn(async move {
                while running.load(Ordering::SeqCst) {
                    let idle = {
                        let mut state = state.lock().await;
                        let idle = state.last_enqueue.elapsed();
                        if idle >= max_idle {
                            state.accepting = false;
                            warn!(stream = %stream, "stream idle past limit, closing queue");
                            return;
                        }
                        idle
                    };
                    tokio::select! {
                        _ = notifier.notified() => {}
                        _ = tokio::time::sleep(max_idle - idle) => {}
                    }
                }
            })
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(max_pending: usize, max_idle: Duration) -> StreamQueue<u32> {
        StreamQueue::new(RequestId::new("stream-0"), max_pending, max_idle)
    }

    #[tokio::test]
    async fn polls_in_fifo_order() {
        let queue = queue(4, Duration::from_secs(10));
        queue.enqueue(1).await.unwrap();
        queue.enqueue(2).await.unwrap();
        queue.enqueue(3).await.unwrap();

        assert_eq!(queue.poll(Duration::from_millis(10)).await, Some(1));
        assert_eq!(queue.poll(Duration::from_millis(10)).await, Some(2));
        assert_eq!(queue.poll(Duration::from_millis(10)).await, Some(3));
    }

    #[tokio::test]
    async fn poll_times_out_when_empty() {
        let queue = queue(4, Duration::from_secs(10));
        assert_eq!(queue.poll(Duration::from_millis(20)).await, None);
    }

    #[tokio::test]
    async fn poll_wakes_on_enqueue() {
        let queue = Arc::new(queue(4, Duration::from_secs(10)));
        let poller = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.poll(Duration::from_secs(1)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(7).await.unwrap();
        assert_eq!(poller.await.unwrap(), Some(7));
    }

    #[tokio::test]
    async fn rejects_when_full() {
        let queue = queue(2, Duration::from_secs(10));
        queue.enqueue(1).await.unwrap();
        queue.enqueue(2).await.unwrap();

        assert!(matches!(
            queue.enqueue(3).await,
            Err(StreamQueueError::Full { capacity: 2, .. })
        ));
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn rejects_after_explicit_close() {
        let queue = queue(2, Duration::from_secs(10));
        queue.set_accepting(false).await;

        assert!(matches!(
            queue.enqueue(1).await,
            Err(StreamQueueError::Expired { .. })
        ));
    }

    #[tokio::test]
    async fn idle_monitor_expires_the_queue() {
        let mut queue = queue(2, Duration::from_millis(30));
        queue.monitor_idle();
        assert!(queue.accepting().await);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!queue.accepting().await);
        assert!(matches!(
            queue.enqueue(1).await,
            Err(StreamQueueError::Expired { .. })
        ));
    }

    #[tokio::test]
    async fn enqueue_defers_idle_expiry() {
        let mut queue = queue(4, Duration::from_millis(80));
        queue.monitor_idle();

        tokio::time::sleep(Duration::from_millis(40)).await;
        queue.enqueue(1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        // 80ms after construction but only 40ms after the last enqueue.
        assert!(queue.accepting().await);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(!queue.accepting().await);
    }
}
