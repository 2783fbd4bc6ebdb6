//! Background work bookkeeping.
//!
//! # Responsibilities
//! - Collect detached work spawned while handling one request ([`RequestTasks`])
//! - Join that work after the response is produced, logging the first failure
//! - Track all in-flight background work so shutdown can drain it ([`BackgroundTracker`])
//!
//! # Design Decisions
//! - The response never waits for request tasks; the join itself runs in the background
//! - A failing task is a warning, never a failed response

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::observability::metrics;

/// Work detached from one request.
#[derive(Debug, Default)]
pub struct RequestTasks {
    handles: Mutex<Vec<(&'static str, JoinHandle<Result<(), String>>)>>,
}

impl RequestTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn<F, E>(&self, name: &'static str, fut: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: std::fmt::Display,
    {
        let handle = tokio::spawn(async move { fut.await.map_err(|e| e.to_string()) });
        if let Ok(mut handles) = self.handles.lock() {
            handles.push((name, handle));
        }
    }

    pub fn len(&self) -> usize {
        self.handles.lock().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for every task. Returns the number that failed.
    pub async fn join(self) -> usize {
        let handles = self.handles.into_inner().unwrap_or_default();
        let mut failed = 0;
        for (name, handle) in handles {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(e) => Err(e.to_string()),
            };
            if let Err(e) = outcome {
                if failed == 0 {
                    tracing::warn!(task = name, error = %e, "background task failed");
                }
                failed += 1;
            }
        }
        failed
    }
}

/// Counts in-flight background work for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct BackgroundTracker {
    active: Arc<AtomicU64>,
}

impl BackgroundTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a guard that decrements on drop.
    pub fn track(&self) -> TaskGuard {
        let count = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::record_background_tasks(count);
        TaskGuard {
            active: Arc::clone(&self.active),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }

    /// Join a request's tasks in the background.
    pub fn drain_request(&self, tasks: RequestTasks) {
        if tasks.is_empty() {
            return;
        }
        let guard = self.track();
        tokio::spawn(async move {
            tasks.join().await;
            drop(guard);
        });
    }

    /// Wait until no background work is left, up to `timeout`. Returns whether it drained.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let drained = tokio::time::timeout(timeout, async {
            while self.active.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        drained.is_ok()
    }
}

#[derive(Debug)]
pub struct TaskGuard {
    active: Arc<AtomicU64>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        let count = self.active.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::record_background_tasks(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_counts_failures() {
        let tasks = RequestTasks::new();
        tasks.spawn("ok", async { Ok::<(), String>(()) });
        tasks.spawn("bad", async { Err::<(), _>("boom") });
        tasks.spawn("bad2", async { Err::<(), _>("boom") });
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks.join().await, 2);
    }

    #[test]
    fn test_tracker_counts() {
        let tracker = BackgroundTracker::new();
        let g1 = tracker.track();
        let g2 = tracker.track();
        assert_eq!(tracker.active_count(), 2);
        drop(g1);
        drop(g2);
        assert_eq!(tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn test_drain_request_and_wait_idle() {
        let tracker = BackgroundTracker::new();
        let tasks = RequestTasks::new();
        tasks.spawn("slow", async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<(), String>(())
        });
        tracker.drain_request(tasks);
        assert!(tracker.wait_idle(Duration::from_secs(2)).await);
        assert_eq!(tracker.active_count(), 0);
    }
}
