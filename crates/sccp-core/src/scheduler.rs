//! Timer service for digit timeouts, delayed hangups and similar deferred work
//!
//! Every scheduled task carries a typed state. Cancellation and firing race
//! on one compare-and-swap, so a task whose channel was torn down in the
//! meantime observes `Cancelled` and never runs.

use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{Result, SccpError};

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const CANCELLED: u8 = 2;
const COMPLETED: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Cancelled,
    Completed,
}

impl From<u8> for TaskState {
    fn from(raw: u8) -> Self {
        match raw {
            PENDING => TaskState::Pending,
            RUNNING => TaskState::Running,
            CANCELLED => TaskState::Cancelled,
            _ => TaskState::Completed,
        }
    }
}

/// Handle to a scheduled task
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: u64,
    name: Arc<str>,
    state: Arc<AtomicU8>,
}

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> TaskState {
        TaskState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_pending(&self) -> bool {
        self.state() == TaskState::Pending
    }

    /// `true` if the task had not fired yet and now never will
    pub fn cancel(&self) -> bool {
        let cancelled = self
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if cancelled {
            debug!("Cancelled scheduled task {} ({})", self.id, self.name);
        }
        cancelled
    }

    fn try_start(&self) -> bool {
        self.state
            .compare_exchange(PENDING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn complete(&self) {
        self.state.store(COMPLETED, Ordering::Release);
    }
}

pub struct Scheduler {
    next_id: AtomicU64,
    pending: Arc<DashMap<u64, TaskHandle>>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Run `task` after `delay` unless cancelled first. Needs a tokio runtime.
    pub fn schedule_after<F>(&self, name: &str, delay: Duration, task: F) -> Result<TaskHandle>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(SccpError::ShuttingDown);
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SccpError::ResourceExhausted(format!("no runtime for timer {}: {}", name, e)))?;

        let handle = TaskHandle {
            id: self.next_id.fetch_add(1, Ordering::AcqRel),
            name: Arc::from(name),
            state: Arc::new(AtomicU8::new(PENDING)),
        };
        self.pending.insert(handle.id, handle.clone());

        let task_handle = handle.clone();
        let pending = self.pending.clone();
        let shutdown = self.shutdown.clone();
        runtime.spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    task_handle.cancel();
                }
                _ = tokio::time::sleep(delay) => {
                    if task_handle.try_start() {
                        task.await;
                        task_handle.complete();
                    } else {
                        debug!("Scheduled task {} ({}) skipped: {:?}", task_handle.id, task_handle.name, task_handle.state());
                    }
                }
            }
            pending.remove(&task_handle.id);
        });
        Ok(handle)
    }

    /// Tasks that have neither fired nor been cancelled
    pub fn pending_count(&self) -> usize {
        self.pending.iter().filter(|t| t.is_pending()).count()
    }

    /// Cancel everything still pending
    pub fn shutdown(&self) {
        let outstanding = self.pending_count();
        if outstanding > 0 {
            warn!("Scheduler shutting down with {} pending tasks", outstanding);
        }
        self.shutdown.cancel();
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}
