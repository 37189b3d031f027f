//! Tracking for one-shot background tasks (memtable flushes, compactions).
//!
//! Every spawned task is recorded so `join_all` can wait for full
//! quiescence at close time, including tasks that other tasks spawn while
//! the join is draining.

use std::future::Future;
use std::sync::Mutex;

use tokio::task::JoinHandle;

use crate::error::Result;

pub(crate) struct TaskPool {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskPool {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawns a tracked task. Failures are logged, not surfaced: background
    /// work is retried by later triggers rather than failing a writer.
    pub fn spawn<F>(&self, name: &'static str, future: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            if let Err(e) = future.await {
                tracing::error!(task = name, error = %e, "background task failed");
            }
        });
        self.handles.lock().unwrap().push(handle);
    }

    /// Waits for every tracked task, including ones spawned while waiting.
    pub async fn join_all(&self) -> Result<()> {
        loop {
            let handle = self.handles.lock().unwrap().pop();
            match handle {
                Some(handle) => handle.await?,
                None => return Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_join_all_waits_for_tasks() {
        let pool = TaskPool::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            pool.spawn("test", async move {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        }

        pool.join_all().await.expect("join");
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_failed_task_does_not_poison_pool() {
        let pool = TaskPool::new();
        pool.spawn("failing", async move {
            Err(crate::error::Error::IO("synthetic".to_string()))
        });
        pool.join_all().await.expect("join should succeed");
    }
}
