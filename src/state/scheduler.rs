//! Single owner of every timer and background task a component starts.
//!
//! Backoff retries, polling loops and countdown ticks all go through a
//! [`Scheduler`], so tearing a component down is one [`Scheduler::shutdown`]
//! call and no timer can outlive its owner.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use tokio::{
    task::AbortHandle,
    time::{Instant, MissedTickBehavior, interval_at, sleep},
};

type TaskMap = Arc<DashMap<u64, AbortHandle>>;

/// Spawns and tracks cancellable Tokio tasks.
#[derive(Debug, Default)]
pub struct Scheduler {
    tasks: TaskMap,
    next_id: AtomicU64,
    closed: AtomicBool,
}

/// Cancellation handle for one scheduled task.
///
/// Dropping the handle leaves the task running.
#[derive(Debug)]
pub struct TaskHandle {
    id: u64,
    abort: Option<AbortHandle>,
    tasks: TaskMap,
}

impl TaskHandle {
    /// Abort the task if it is still pending.
    pub fn cancel(&self) {
        if let Some(abort) = &self.abort {
            abort.abort();
            self.tasks.remove(&self.id);
        }
    }

    /// Whether the task has completed or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.abort.as_ref().is_none_or(AbortHandle::is_finished)
    }
}

impl Scheduler {
    /// Create an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` on the runtime, tracked for cancellation.
    pub fn spawn<F>(&self, task: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if self.closed.load(Ordering::Acquire) {
            return TaskHandle {
                id,
                abort: None,
                tasks: Arc::clone(&self.tasks),
            };
        }

        // The entry guard is held across the spawn so the task's own removal
        // can only run once its handle is registered.
        let tasks = Arc::clone(&self.tasks);
        let abort = self
            .tasks
            .entry(id)
            .or_insert_with(|| {
                tokio::spawn(async move {
                    task.await;
                    tasks.remove(&id);
                })
                .abort_handle()
            })
            .value()
            .clone();

        TaskHandle {
            id,
            abort: Some(abort),
            tasks: Arc::clone(&self.tasks),
        }
    }

    /// Run `task` once after `delay`.
    pub fn schedule_after<F>(&self, delay: Duration, task: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(async move {
            sleep(delay).await;
            task.await;
        })
    }

    /// Run `task` every `period`, first run one period from now.
    ///
    /// A run that overruns delays the next one instead of bursting.
    pub fn schedule_every<F, Fut>(&self, period: Duration, mut task: F) -> TaskHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                task().await;
            }
        })
    }

    /// Number of tasks still pending.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Whether [`Scheduler::shutdown`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Abort every pending task and refuse new ones. Safe to call repeatedly.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let ids: Vec<u64> = self.tasks.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, abort)) = self.tasks.remove(&id) {
                abort.abort();
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
