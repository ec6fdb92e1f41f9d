// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Delayed message delivery to sessions.
//!
//! A min-heap ordered by fire time feeds a single ticker task. Scheduling
//! pokes the ticker so it recomputes its next deadline. Firing marks the
//! task, looks up the session, and posts the message to its overlay
//! endpoint best-effort; a delivery failure is recorded on the finished
//! task and never retried. Tasks live only in memory, so a daemon restart
//! delivers at most once.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dw_core::{Clock, DirFilter, ScheduledTask, Session, SystemClock, TaskStatus};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::overlay;
use crate::registry::SessionRegistry;

/// Finished tasks kept around for inspection (fired or canceled).
const FINISHED_CAPACITY: usize = 64;

/// Heap entry; `Reverse` turns the std max-heap into a min-heap.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct HeapEntry {
    fire_at: Instant,
    task_id: String,
}

struct SchedulerInner {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    /// Pending tasks by id; fired and canceled tasks move to `finished`.
    pending: HashMap<String, ScheduledTask>,
    finished: VecDeque<ScheduledTask>,
}

impl SchedulerInner {
    fn finish(&mut self, task: ScheduledTask) {
        if self.finished.len() == FINISHED_CAPACITY {
            self.finished.pop_front();
        }
        self.finished.push_back(task);
    }
}

/// Timer-driven scheduler for SESSION SCHEDULE/CANCEL/TASKS.
pub struct TaskScheduler<C: Clock = SystemClock> {
    inner: Mutex<SchedulerInner>,
    /// Wakes the ticker to recompute its deadline after heap changes.
    notify: Notify,
    clock: C,
}

impl<C: Clock> TaskScheduler<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            inner: Mutex::new(SchedulerInner {
                heap: BinaryHeap::new(),
                pending: HashMap::new(),
                finished: VecDeque::new(),
            }),
            notify: Notify::new(),
            clock,
        }
    }

    /// Queue a message for delivery to `session` after `duration`.
    pub fn schedule(
        &self,
        session: &Session,
        duration: Duration,
        message: impl Into<String>,
    ) -> ScheduledTask {
        let task = ScheduledTask {
            task_id: uuid::Uuid::new_v4().to_string(),
            session_code: session.code.clone(),
            directory: session.directory.clone(),
            fire_at_ms: self.clock.epoch_ms() + duration.as_millis() as u64,
            message: message.into(),
            status: TaskStatus::Pending,
            delivery_error: None,
        };

        {
            let mut inner = self.inner.lock();
            inner.heap.push(Reverse(HeapEntry {
                fire_at: self.clock.now() + duration,
                task_id: task.task_id.clone(),
            }));
            inner.pending.insert(task.task_id.clone(), task.clone());
        }
        self.notify.notify_one();
        debug!(task_id = %task.task_id, session = %task.session_code, "task scheduled");
        task
    }

    /// Cancel a pending task. Returns false when it already fired, was
    /// canceled, or never existed.
    pub fn cancel(&self, task_id: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.pending.remove(task_id) {
            Some(mut task) => {
                task.status = TaskStatus::Canceled;
                inner.finish(task);
                // The heap entry stays behind; firing skips non-pending ids.
                true
            }
            None => false,
        }
    }

    /// Pending tasks selected by the directory filter, soonest first.
    pub fn tasks(&self, filter: &DirFilter) -> Vec<ScheduledTask> {
        let inner = self.inner.lock();
        let mut tasks: Vec<ScheduledTask> = inner
            .pending
            .values()
            .filter(|t| filter.matches(&t.directory))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.fire_at_ms);
        tasks
    }

    /// Finished tasks (fired or canceled), oldest first.
    pub fn finished(&self) -> Vec<ScheduledTask> {
        self.inner.lock().finished.iter().cloned().collect()
    }

    /// Earliest pending fire time.
    pub fn next_deadline(&self) -> Option<Instant> {
        let mut inner = self.inner.lock();
        // Drop stale heap entries for canceled tasks first.
        while let Some(Reverse(entry)) = inner.heap.peek() {
            if inner.pending.contains_key(&entry.task_id) {
                return Some(entry.fire_at);
            }
            inner.heap.pop();
        }
        None
    }

    /// Pop every task due at `now`, marking each as fired.
    pub fn due_tasks(&self, now: Instant) -> Vec<ScheduledTask> {
        let mut inner = self.inner.lock();
        let mut due = Vec::new();
        loop {
            match inner.heap.peek() {
                Some(Reverse(entry)) if entry.fire_at <= now => {}
                _ => break,
            }
            let Some(Reverse(entry)) = inner.heap.pop() else {
                break;
            };
            // Canceled tasks leave stale heap entries behind; skip them.
            if let Some(mut task) = inner.pending.remove(&entry.task_id) {
                task.status = TaskStatus::Fired;
                due.push(task);
            }
        }
        due
    }

    /// Record the outcome of a fired task.
    fn record_fired(&self, mut task: ScheduledTask, error: Option<String>) {
        task.delivery_error = error;
        self.inner.lock().finish(task);
    }
}

impl TaskScheduler<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for TaskScheduler<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

/// Far-future sleep used when the heap is empty.
const IDLE_SLEEP: Duration = Duration::from_secs(3600);

/// Spawn the single ticker task driving deliveries until shutdown.
pub fn spawn_ticker<C: Clock + 'static>(
    scheduler: Arc<TaskScheduler<C>>,
    registry: Arc<SessionRegistry<C>>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let deadline = scheduler
                .next_deadline()
                .unwrap_or_else(|| Instant::now() + IDLE_SLEEP);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                // A schedule() changed the heap; recompute the deadline.
                _ = scheduler.notify.notified() => continue,
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {}
            }

            for task in scheduler.due_tasks(scheduler.clock.now()) {
                let outcome = match registry.get(&task.session_code) {
                    Some(session) => {
                        info!(
                            task_id = %task.task_id,
                            session = %task.session_code,
                            "delivering scheduled message"
                        );
                        overlay::deliver(&session.overlay_endpoint, &task.message)
                            .await
                            .err()
                            .map(|e| e.to_string())
                    }
                    None => Some(format!("session {} no longer registered", task.session_code)),
                };
                if let Some(error) = &outcome {
                    warn!(task_id = %task.task_id, error, "scheduled delivery failed");
                }
                scheduler.record_fired(task, outcome);
            }
        }
    })
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
