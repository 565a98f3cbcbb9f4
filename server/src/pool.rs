//! Worker pool used to run request processing and response writing off the
//! read loop.
//!
//! The listener only depends on the [`Scheduler`] contract: a submitted
//! [`Task`] runs exactly once on one of a bounded set of routines, and a
//! task that panics does not take its routine or the submitter down with it.
//!
//! [`WorkPool`] is the tokio implementation; [`InlineScheduler`] runs tasks
//! on the submitting task and is meant for tests.

use crate::error::PoolError;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

/// Index of the routine a task runs on
pub type RoutineId = usize;

/// A unit of work. Any context it needs is captured by the task itself.
#[async_trait]
pub trait Task: Send + 'static {
    async fn run(self: Box<Self>, routine: RoutineId);
}

/// A task the scheduler would not queue, handed back to the caller
pub struct Refused {
    pub task: Box<dyn Task>,
    pub reason: PoolError,
}

impl fmt::Debug for Refused {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Refused")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

/// Task submission interface the listener is built on
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Queues a task. May wait while the queue is full.
    async fn submit(&self, task: Box<dyn Task>) -> Result<(), PoolError>;

    /// Queues a task without waiting for queue space. A full queue hands the
    /// task back with [`PoolError::Full`].
    async fn try_submit(&self, task: Box<dyn Task>) -> Result<(), Refused>;

    /// Stops accepting tasks and waits for queued ones to finish
    async fn shutdown(&self) {}
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    pool: u64,
    routine: RoutineId,
}

tokio::task_local! {
    static CURRENT: Slot;
}

static NEXT_POOL: AtomicU64 = AtomicU64::new(1);

/// Routine running the calling task, or `None` outside of pool tasks
pub fn current_routine() -> Option<RoutineId> {
    CURRENT.try_with(|slot| slot.routine).ok()
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub routines: usize,
    pub queue_capacity: usize,
}

impl PoolConfig {
    pub fn new(routines: usize, queue_capacity: usize) -> Self {
        Self {
            routines,
            queue_capacity,
        }
    }
}

/// Snapshot of pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    pub routines: usize,
    pub submitted: u64,
    pub executed: u64,
    pub panicked: u64,
    pub active: usize,
    pub pending: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    executed: AtomicU64,
    panicked: AtomicU64,
    active: AtomicUsize,
}

impl Counters {
    fn snapshot(&self, routines: usize) -> PoolStats {
        let submitted = self.submitted.load(Ordering::SeqCst);
        let executed = self.executed.load(Ordering::SeqCst);
        let active = self.active.load(Ordering::SeqCst);
        PoolStats {
            routines,
            submitted,
            executed,
            panicked: self.panicked.load(Ordering::SeqCst),
            active,
            pending: submitted.saturating_sub(executed + active as u64),
        }
    }
}

type TaskReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Box<dyn Task>>>>;

/// Fixed set of tokio routines pulling tasks from one bounded queue
pub struct WorkPool {
    id: u64,
    name: String,
    routines: usize,
    sender: Mutex<Option<mpsc::Sender<Box<dyn Task>>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl WorkPool {
    /// Spawns the routines. Must be called from within a tokio runtime.
    pub fn new(name: &str, config: PoolConfig) -> Result<Self, PoolError> {
        if config.routines == 0 {
            return Err(PoolError::InvalidConfig("routines must be at least 1".into()));
        }
        if config.queue_capacity == 0 {
            return Err(PoolError::InvalidConfig(
                "queue capacity must be at least 1".into(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| PoolError::NoRuntime)?;

        let id = NEXT_POOL.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let receiver: TaskReceiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let counters = Arc::new(Counters::default());

        let handles = (0..config.routines)
            .map(|routine| {
                runtime.spawn(Self::routine(
                    name.to_string(),
                    Slot { pool: id, routine },
                    Arc::clone(&receiver),
                    Arc::clone(&counters),
                ))
            })
            .collect();

        info!(
            "Work pool {} started with {} routines (queue {})",
            name, config.routines, config.queue_capacity
        );

        Ok(Self {
            id,
            name: name.to_string(),
            routines: config.routines,
            sender: Mutex::new(Some(sender)),
            handles: Mutex::new(handles),
            counters,
        })
    }

    async fn routine(name: String, slot: Slot, receiver: TaskReceiver, counters: Arc<Counters>) {
        let id = slot.routine;
        loop {
            let task = {
                let mut receiver = receiver.lock().await;
                receiver.recv().await
            };
            let Some(task) = task else {
                break;
            };

            counters.active.fetch_add(1, Ordering::SeqCst);
            // Each task gets its own tokio task so a panic ends up in the
            // JoinError instead of unwinding through the routine.
            if let Err(e) = tokio::spawn(CURRENT.scope(slot, task.run(id))).await {
                if e.is_panic() {
                    counters.panicked.fetch_add(1, Ordering::SeqCst);
                    warn!("Work pool {} routine {}: task panicked", name, id);
                } else {
                    debug!("Work pool {} routine {}: task cancelled", name, id);
                }
            }
            counters.active.fetch_sub(1, Ordering::SeqCst);
            counters.executed.fetch_add(1, Ordering::SeqCst);
        }

        debug!("Work pool {} routine {} stopped", name, id);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.routines)
    }

    fn sender(&self) -> Option<mpsc::Sender<Box<dyn Task>>> {
        match self.sender.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Scheduler for WorkPool {
    async fn submit(&self, task: Box<dyn Task>) -> Result<(), PoolError> {
        let sender = self.sender().ok_or(PoolError::Closed)?;
        self.counters.submitted.fetch_add(1, Ordering::SeqCst);
        if sender.send(task).await.is_err() {
            self.counters.submitted.fetch_sub(1, Ordering::SeqCst);
            return Err(PoolError::Closed);
        }
        Ok(())
    }

    async fn try_submit(&self, task: Box<dyn Task>) -> Result<(), Refused> {
        let Some(sender) = self.sender() else {
            return Err(Refused {
                task,
                reason: PoolError::Closed,
            });
        };
        self.counters.submitted.fetch_add(1, Ordering::SeqCst);
        sender.try_send(task).map_err(|e| {
            self.counters.submitted.fetch_sub(1, Ordering::SeqCst);
            match e {
                TrySendError::Full(task) => Refused {
                    task,
                    reason: PoolError::Full,
                },
                TrySendError::Closed(task) => Refused {
                    task,
                    reason: PoolError::Closed,
                },
            }
        })
    }

    /// When called from one of this pool's own tasks, that task's routine is
    /// not waited for; it exits on its own once the queue is empty.
    async fn shutdown(&self) {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if sender.is_none() {
            return;
        }
        // Dropping the last sender lets routines drain the queue and exit.
        drop(sender);

        let handles = match self.handles.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        let own = CURRENT
            .try_with(|slot| *slot)
            .ok()
            .filter(|slot| slot.pool == self.id)
            .map(|slot| slot.routine);
        for (routine, handle) in handles.into_iter().enumerate() {
            if own == Some(routine) {
                continue;
            }
            let _ = handle.await;
        }

        let stats = self.stats();
        info!(
            "Work pool {} shut down: {} executed, {} panicked",
            self.name, stats.executed, stats.panicked
        );
    }
}

impl Drop for WorkPool {
    fn drop(&mut self) {
        if let Ok(handles) = self.handles.get_mut() {
            for handle in handles.drain(..) {
                handle.abort();
            }
        }
    }
}

/// Runs every task to completion inside `submit`, on routine 0. A panic is
/// still contained in the task and counted.
#[derive(Debug, Default)]
pub struct InlineScheduler {
    counters: Counters,
}

impl InlineScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(1)
    }

    async fn execute(&self, task: Box<dyn Task>) {
        self.counters.submitted.fetch_add(1, Ordering::SeqCst);
        self.counters.active.fetch_add(1, Ordering::SeqCst);
        let slot = Slot {
            pool: 0,
            routine: 0,
        };
        if let Err(e) = tokio::spawn(CURRENT.scope(slot, task.run(0))).await {
            if e.is_panic() {
                self.counters.panicked.fetch_add(1, Ordering::SeqCst);
                warn!("Inline scheduler: task panicked");
            }
        }
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
        self.counters.executed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Scheduler for InlineScheduler {
    async fn submit(&self, task: Box<dyn Task>) -> Result<(), PoolError> {
        self.execute(task).await;
        Ok(())
    }

    async fn try_submit(&self, task: Box<dyn Task>) -> Result<(), Refused> {
        self.execute(task).await;
        Ok(())
    }
}
