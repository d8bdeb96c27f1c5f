//! Single-flight rule group queue
//!
//! Rule group ids are queued FIFO and de-duplicated: an id that is pending,
//! reserved by the consumer, or executing is not queued again. One consumer
//! task runs them one at a time while holding the process-wide execution
//! lock. The consumer exits when the queue drains and is restarted by the
//! next enqueue.

use crate::core::event_bus::{Event, EventBus, EventType};
use crate::core::progress::ProgressReporter;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Held by anything that mutates collection state
pub type ExecutionLock = Arc<Mutex<()>>;

pub fn execution_lock() -> ExecutionLock {
    Arc::new(Mutex::new(()))
}

/// How a single rule group execution ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Finished,
    Aborted,
    Failed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Finished => "finished",
            RunOutcome::Aborted => "aborted",
            RunOutcome::Failed => "failed",
        }
    }
}

/// Executes one rule group; must observe `token` between pages
#[async_trait]
pub trait RuleGroupRunner: Send + Sync {
    async fn run(&self, rule_group_id: i64, token: CancellationToken) -> RunOutcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// Already pending, reserved or executing
    Duplicate,
    /// The queue is shutting down
    Rejected,
}

impl EnqueueOutcome {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, EnqueueOutcome::Rejected)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStatus {
    pub processing: bool,
    pub executing_id: Option<i64>,
    pub queued_ids: Vec<i64>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<i64>,
    /// Taken off `pending` but still waiting for the execution lock
    reserved: HashMap<i64, CancellationToken>,
    executing: Option<(i64, CancellationToken)>,
    consumer: Option<JoinHandle<()>>,
    shutting_down: bool,
}

impl QueueState {
    fn contains(&self, id: i64) -> bool {
        self.pending.contains(&id)
            || self.reserved.contains_key(&id)
            || self.executing.as_ref().is_some_and(|(e, _)| *e == id)
    }

    fn status(&self) -> QueueStatus {
        let mut queued_ids: Vec<i64> = self.reserved.keys().copied().collect();
        queued_ids.extend(self.pending.iter().copied());
        QueueStatus {
            processing: self.executing.is_some() || self.consumer.is_some(),
            executing_id: self.executing.as_ref().map(|(id, _)| *id),
            queued_ids,
        }
    }
}

struct Inner {
    state: Mutex<QueueState>,
    runner: Arc<dyn RuleGroupRunner>,
    lock: ExecutionLock,
    event_bus: Arc<EventBus>,
    progress: Arc<ProgressReporter>,
}

#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Inner>,
}

impl TaskQueue {
    pub fn new(
        runner: Arc<dyn RuleGroupRunner>,
        lock: ExecutionLock,
        event_bus: Arc<EventBus>,
        progress: Arc<ProgressReporter>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                runner,
                lock,
                event_bus,
                progress,
            }),
        }
    }

    /// Queue a rule group; returns without waiting for execution
    pub async fn enqueue(&self, rule_group_id: i64) -> EnqueueOutcome {
        let status = {
            let mut state = self.inner.state.lock().await;
            if state.shutting_down {
                warn!(rule_group_id, "Queue is shutting down, rejecting rule group");
                return EnqueueOutcome::Rejected;
            }
            if state.contains(rule_group_id) {
                debug!(rule_group_id, "Rule group already queued");
                return EnqueueOutcome::Duplicate;
            }

            state.pending.push_back(rule_group_id);
            if state.consumer.is_none() {
                let inner = Arc::clone(&self.inner);
                state.consumer = Some(tokio::spawn(consume(inner)));
            }
            state.status()
        };

        info!(rule_group_id, queued = status.queued_ids.len(), "Rule group queued");
        self.inner.notify(status).await;
        EnqueueOutcome::Queued
    }

    /// Drop a pending id, or cancel it if it is already running
    pub async fn stop_processing_rule_group(&self, rule_group_id: i64) -> bool {
        let (stopped, status) = {
            let mut state = self.inner.state.lock().await;
            let before = state.pending.len();
            state.pending.retain(|id| *id != rule_group_id);
            let mut stopped = state.pending.len() != before;

            if let Some(token) = state.reserved.get(&rule_group_id) {
                token.cancel();
                stopped = true;
            }
            if let Some((id, token)) = &state.executing {
                if *id == rule_group_id {
                    info!(rule_group_id, "Cancelling executing rule group");
                    token.cancel();
                    stopped = true;
                }
            }
            (stopped, state.status())
        };

        if stopped {
            self.inner.notify(status).await;
        }
        stopped
    }

    /// Remove a pending id without touching a running execution
    pub async fn remove_pending(&self, rule_group_id: i64) -> bool {
        let (removed, status) = {
            let mut state = self.inner.state.lock().await;
            let before = state.pending.len();
            state.pending.retain(|id| *id != rule_group_id);
            (state.pending.len() != before, state.status())
        };

        if removed {
            debug!(rule_group_id, "Removed rule group from queue");
            self.inner.notify(status).await;
        }
        removed
    }

    pub async fn get_status(&self) -> QueueStatus {
        self.inner.state.lock().await.status()
    }

    /// Drop pending ids, cancel the running one and wait for it to unwind
    pub async fn stop(&self) {
        let consumer = {
            let mut state = self.inner.state.lock().await;
            state.shutting_down = true;
            state.pending.clear();
            for token in state.reserved.values() {
                token.cancel();
            }
            if let Some((id, token)) = &state.executing {
                info!(rule_group_id = *id, "Cancelling executing rule group for shutdown");
                token.cancel();
            }
            state.consumer.take()
        };

        if let Some(handle) = consumer {
            if let Err(e) = handle.await {
                error!(error = %e, "Queue consumer ended abnormally");
            }
        }
        info!("Task queue stopped");
    }
}

impl Inner {
    async fn notify(&self, status: QueueStatus) {
        self.progress.set_queue(status.queued_ids.clone());
        self.event_bus
            .publish(Event::system(
                EventType::QueueStatusUpdated,
                serde_json::to_value(&status).unwrap_or_default(),
            ))
            .await;
    }
}

async fn consume(inner: Arc<Inner>) {
    loop {
        let (rule_group_id, token, status) = {
            let mut state = inner.state.lock().await;
            let Some(id) = state.pending.pop_front() else {
                state.consumer = None;
                break;
            };
            let token = CancellationToken::new();
            state.reserved.insert(id, token.clone());
            (id, token, state.status())
        };
        inner.notify(status).await;

        let guard = inner.lock.lock().await;

        let (stopped, status) = {
            let mut state = inner.state.lock().await;
            state.reserved.remove(&rule_group_id);
            // stopped while waiting for the lock
            let stopped = token.is_cancelled();
            if !stopped {
                state.executing = Some((rule_group_id, token.clone()));
            }
            (stopped, state.status())
        };
        if stopped {
            drop(guard);
            info!(rule_group_id, "Rule group stopped before it started");
            inner.notify(status).await;
            continue;
        }
        inner.notify(status).await;

        debug!(rule_group_id, "Executing rule group");
        let runner = Arc::clone(&inner.runner);
        let outcome = match tokio::spawn(async move { runner.run(rule_group_id, token).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(rule_group_id, error = %e, "Rule group execution panicked");
                RunOutcome::Failed
            }
        };
        drop(guard);

        info!(rule_group_id, outcome = outcome.as_str(), "Rule group execution ended");

        let status = {
            let mut state = inner.state.lock().await;
            state.executing = None;
            state.status()
        };
        inner.notify(status).await;
    }

    let status = inner.state.lock().await.status();
    inner.notify(status).await;
}
