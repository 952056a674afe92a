//! Auto-scaling background worker pool
//!
//! Long-running per-call work (conference joins, barge-in, kick/promote)
//! runs here so the signaling path never waits on an external bridge.
//! Workers are tokio tasks pulling boxed futures off a shared queue. The
//! pool grows when the backlog exceeds twice the worker count and shrinks
//! when it falls under half, checked at most once per resize interval.

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::ThreadPoolConfig;
use crate::errors::{Result, SccpError};

type Job = BoxFuture<'static, ()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeDecision {
    Grow,
    Shrink,
    Keep,
}

/// Resize rule applied on every size check
pub fn resize_decision(jobs: usize, workers: usize, min: usize, max: usize) -> ResizeDecision {
    if jobs > workers * 2 && workers < max {
        ResizeDecision::Grow
    } else if workers > min && jobs < workers / 2 {
        ResizeDecision::Shrink
    } else {
        ResizeDecision::Keep
    }
}

struct Worker {
    id: usize,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct PoolInner {
    config: ThreadPoolConfig,
    queue: Mutex<VecDeque<Job>>,
    notify: Notify,
    workers: Mutex<Vec<Worker>>,
    next_worker_id: AtomicUsize,
    last_size_check: Mutex<Instant>,
    high_water_mark: AtomicUsize,
    completed_jobs: AtomicU64,
    shutting_down: AtomicBool,
    shutdown: CancellationToken,
}

impl PoolInner {
    fn spawn_worker(self: &Arc<Self>) {
        let id = self.next_worker_id.fetch_add(1, Ordering::AcqRel);
        let token = self.shutdown.child_token();
        let handle = tokio::spawn(run_worker(self.clone(), token.clone(), id));
        self.workers.lock().push(Worker { id, token, handle });
        debug!("Threadpool: added worker {}", id);
    }

    async fn next_job(&self) -> Job {
        loop {
            let notified = self.notify.notified();
            if let Some(job) = self.queue.lock().pop_front() {
                return job;
            }
            notified.await;
        }
    }

    fn check_size(self: &Arc<Self>) -> ResizeDecision {
        let jobs = self.queue.lock().len();
        let workers = self.workers.lock().len();
        let decision = resize_decision(jobs, workers, self.config.min_threads, self.config.max_threads);
        match decision {
            ResizeDecision::Grow => {
                info!("Threadpool: {} queued jobs on {} workers, adding a worker", jobs, workers);
                self.spawn_worker();
            }
            ResizeDecision::Shrink => {
                if let Some(worker) = self.workers.lock().pop() {
                    info!("Threadpool: {} queued jobs on {} workers, removing worker {}", jobs, workers, worker.id);
                    // Exits once its current job is done
                    worker.token.cancel();
                }
            }
            ResizeDecision::Keep => {}
        }
        *self.last_size_check.lock() = Instant::now();
        self.high_water_mark.store(jobs, Ordering::Release);
        decision
    }

    fn maybe_check_size(self: &Arc<Self>) {
        let due = self.last_size_check.lock().elapsed() > self.config.resize_interval();
        if due && !self.shutting_down.load(Ordering::Acquire) {
            self.check_size();
        }
    }
}

async fn run_worker(inner: Arc<PoolInner>, token: CancellationToken, id: usize) {
    loop {
        let job = tokio::select! {
            _ = token.cancelled() => break,
            job = inner.next_job() => job,
        };
        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
            error!("Threadpool worker {}: job panicked", id);
        }
        inner.completed_jobs.fetch_add(1, Ordering::AcqRel);
        inner.maybe_check_size();
    }
    debug!("Threadpool worker {} exiting", id);
}

/// Bounded pool of background workers
#[derive(Clone)]
pub struct ThreadPool {
    inner: Arc<PoolInner>,
}

impl ThreadPool {
    /// Start `min_threads` workers on the current tokio runtime
    pub fn start(config: ThreadPoolConfig) -> Result<Self> {
        config.validate()?;
        tokio::runtime::Handle::try_current()
            .map_err(|e| SccpError::ResourceExhausted(format!("no runtime for threadpool: {}", e)))?;

        let min = config.min_threads;
        let inner = Arc::new(PoolInner {
            config,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            workers: Mutex::new(Vec::new()),
            next_worker_id: AtomicUsize::new(0),
            last_size_check: Mutex::new(Instant::now()),
            high_water_mark: AtomicUsize::new(0),
            completed_jobs: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        });
        for _ in 0..min {
            inner.spawn_worker();
        }
        info!("Threadpool started with {} workers", min);
        Ok(Self { inner })
    }

    /// Queue a job. Refused once shutdown has begun.
    pub fn add_work<F>(&self, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return Err(SccpError::ShuttingDown);
        }
        let queued = {
            let mut queue = self.inner.queue.lock();
            queue.push_back(Box::pin(job));
            queue.len()
        };
        self.inner.high_water_mark.fetch_max(queued, Ordering::AcqRel);
        self.inner.notify.notify_one();
        Ok(())
    }

    /// Resize immediately, ignoring the interval
    pub fn check_size(&self) -> ResizeDecision {
        self.inner.check_size()
    }

    pub fn worker_count(&self) -> usize {
        self.inner.workers.lock().len()
    }

    pub fn queued_jobs(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn completed_jobs(&self) -> u64 {
        self.inner.completed_jobs.load(Ordering::Acquire)
    }

    pub fn high_water_mark(&self) -> usize {
        self.inner.high_water_mark.load(Ordering::Acquire)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    /// Stop accepting work, cancel idle workers and wait for them to exit.
    /// Queued jobs that have not started are dropped.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.shutdown.cancel();
        let workers: Vec<Worker> = self.inner.workers.lock().drain(..).collect();
        let dropped = {
            let mut queue = self.inner.queue.lock();
            let n = queue.len();
            queue.clear();
            n
        };
        for worker in workers {
            if let Err(e) = worker.handle.await {
                error!("Threadpool worker {} ended abnormally: {}", worker.id, e);
            }
        }
        info!("Threadpool stopped, {} queued jobs dropped", dropped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;
    use tokio::sync::{mpsc, Semaphore};

    fn config(min: usize, max: usize) -> ThreadPoolConfig {
        ThreadPoolConfig {
            min_threads: min,
            max_threads: max,
            resize_interval_secs: 3600,
        }
    }

    #[test]
    fn test_resize_rule() {
        assert_eq!(resize_decision(5, 2, 2, 10), ResizeDecision::Grow);
        assert_eq!(resize_decision(4, 2, 2, 10), ResizeDecision::Keep);
        assert_eq!(resize_decision(50, 10, 2, 10), ResizeDecision::Keep);
        assert_eq!(resize_decision(0, 4, 2, 10), ResizeDecision::Shrink);
        assert_eq!(resize_decision(0, 2, 2, 10), ResizeDecision::Keep);
    }

    proptest! {
        #[test]
        fn resize_stays_within_bounds(jobs in 0usize..200, min in 1usize..5, extra in 0usize..8, offset in 0usize..13) {
            let max = min + extra;
            let workers = (min + offset).min(max);
            match resize_decision(jobs, workers, min, max) {
                ResizeDecision::Grow => prop_assert!(workers < max),
                ResizeDecision::Shrink => prop_assert!(workers > min),
                ResizeDecision::Keep => {}
            }
        }
    }

    #[tokio::test]
    async fn test_runs_queued_jobs() {
        let pool = ThreadPool::start(config(2, 4)).unwrap();
        assert_eq!(pool.worker_count(), 2);
        let (tx, mut rx) = mpsc::unbounded_channel();
        for i in 0..10 {
            let tx = tx.clone();
            pool.add_work(async move {
                let _ = tx.send(i);
            })
            .unwrap();
        }
        let mut seen = Vec::new();
        for _ in 0..10 {
            seen.push(rx.recv().await.unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_grows_and_shrinks_with_backlog() {
        let pool = ThreadPool::start(config(1, 3)).unwrap();
        let gate = Arc::new(Semaphore::new(0));
        for _ in 0..6 {
            let gate = gate.clone();
            pool.add_work(async move {
                let _permit = gate.acquire().await;
            })
            .unwrap();
        }
        assert_eq!(pool.high_water_mark(), 6);

        assert_eq!(pool.check_size(), ResizeDecision::Grow);
        assert_eq!(pool.worker_count(), 2);
        let _ = pool.check_size();
        assert_eq!(pool.worker_count(), 3);
        assert_eq!(pool.check_size(), ResizeDecision::Keep);

        gate.add_permits(6);
        tokio::time::timeout(Duration::from_secs(5), async {
            while pool.completed_jobs() < 6 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(pool.check_size(), ResizeDecision::Shrink);
        assert_eq!(pool.worker_count(), 2);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_panicking_job_keeps_worker_alive() {
        let pool = ThreadPool::start(config(1, 1)).unwrap();
        pool.add_work(async { panic!("boom") }).unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        pool.add_work(async move {
            let _ = tx.send(());
        })
        .unwrap();
        tokio::time::timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_refuses_work() {
        let pool = ThreadPool::start(config(2, 2)).unwrap();
        pool.shutdown().await;
        assert!(pool.is_shutting_down());
        assert_eq!(pool.worker_count(), 0);
        assert!(matches!(pool.add_work(async {}), Err(SccpError::ShuttingDown)));
    }
}
