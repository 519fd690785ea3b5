//! Bounded worker pool for procedure bodies.
//!
//! Connection I/O runs on the async runtime; CPU- or IO-heavy procedure work
//! (hashing, key generation) is handed to this pool so that a slow procedure
//! cannot starve other connections' event processing.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::procedure::ProcedureError;

/// A bounded pool of blocking workers.
///
/// At most `size` jobs run at the same time; further submissions wait for a
/// free slot. Jobs run on the runtime's blocking thread pool via
/// `spawn_blocking`, never on the task that submitted them. Cloning is cheap
/// and clones share the same bound.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Creates a pool that runs at most `size` jobs concurrently.
    ///
    /// A size of zero is raised to one.
    #[must_use]
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Creates a pool sized to the machine's available parallelism.
    #[must_use]
    pub fn with_available_parallelism() -> Self {
        Self::new(std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get))
    }

    /// Maximum number of concurrently running jobs.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of idle slots right now.
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Runs `work` on the pool and resolves with its result.
    ///
    /// The slot is held until `work` returns, even if the returned future is
    /// dropped early.
    ///
    /// # Errors
    ///
    /// Returns whatever `work` returns, or `ProcedureError::Unexpected` if the
    /// job panicked or the pool was shut down.
    pub async fn run<F, T>(&self, work: F) -> Result<T, ProcedureError>
    where
        F: FnOnce() -> Result<T, ProcedureError> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| anyhow::anyhow!("worker pool is closed"))?;

        let job = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        });

        match job.await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("worker job failed: {e}").into()),
        }
    }

    /// Rejects all waiting and future submissions.
    pub fn close(&self) {
        self.permits.close();
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::with_available_parallelism()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::error::Reason;

    #[test]
    fn zero_size_is_raised_to_one() {
        assert_eq!(WorkerPool::new(0).size(), 1);
    }

    #[tokio::test]
    async fn run_returns_work_result() {
        let pool = WorkerPool::new(2);
        let value = pool.run(|| Ok(21 * 2)).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn run_propagates_logic_errors() {
        let pool = WorkerPool::new(1);
        let result: Result<(), _> = pool
            .run(|| Err(ProcedureError::Logic(Reason::InvalidArguments.error())))
            .await;
        assert!(matches!(
            result,
            Err(ProcedureError::Logic(e)) if e.code() == "invalid.arguments"
        ));
    }

    #[tokio::test]
    async fn panicking_job_is_unexpected_failure() {
        let pool = WorkerPool::new(1);
        let result: Result<(), _> = pool.run(|| panic!("boom")).await;
        assert!(matches!(result, Err(ProcedureError::Unexpected(_))));
        // The slot is returned even though the job panicked.
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrency_never_exceeds_size() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut jobs = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            jobs.push(tokio::spawn(async move {
                pool.run(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }
        for job in jobs {
            job.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn closed_pool_rejects_work() {
        let pool = WorkerPool::new(1);
        pool.close();
        let result = pool.run(|| Ok(())).await;
        assert!(matches!(result, Err(ProcedureError::Unexpected(_))));
    }
}
