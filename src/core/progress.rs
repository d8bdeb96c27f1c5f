//! Rule execution progress
//!
//! The latest snapshot lives in a watch channel. Consumers either hold a
//! receiver or turn it into a stream of snapshots; slow consumers only ever
//! see the most recent state.

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Finished,
    Aborted,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Finished => "finished",
            RunState::Aborted => "aborted",
            RunState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Finished | RunState::Aborted | RunState::Failed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleExecutionProgress {
    pub processing: bool,
    pub executing_rule_group_id: Option<i64>,
    pub rule_group_name: Option<String>,
    pub processed_evaluations: usize,
    pub total_evaluations: usize,
    pub state: RunState,
    /// Rule groups waiting behind the current one
    pub queue: Vec<i64>,
}

pub type ProgressWatcher = watch::Receiver<RuleExecutionProgress>;

pub struct ProgressReporter {
    sender: watch::Sender<RuleExecutionProgress>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(RuleExecutionProgress::default());
        Self { sender }
    }

    /// A run begins; `total_evaluations` is items × rules
    pub fn start(&self, rule_group_id: i64, name: &str, total_evaluations: usize) {
        self.sender.send_modify(|p| {
            p.processing = true;
            p.executing_rule_group_id = Some(rule_group_id);
            p.rule_group_name = Some(name.to_string());
            p.processed_evaluations = 0;
            p.total_evaluations = total_evaluations;
            p.state = RunState::Running;
        });
    }

    /// The library reported a different size than first estimated
    pub fn set_total(&self, total_evaluations: usize) {
        self.sender
            .send_modify(|p| p.total_evaluations = total_evaluations);
    }

    pub fn set_processed(&self, processed_evaluations: usize) {
        self.sender.send_modify(|p| {
            p.processed_evaluations = if p.total_evaluations > 0 {
                processed_evaluations.min(p.total_evaluations)
            } else {
                processed_evaluations
            };
        });
    }

    pub fn finish(&self, state: RunState) {
        self.sender.send_modify(|p| {
            p.processing = false;
            p.state = state;
        });
    }

    pub fn set_queue(&self, queue: Vec<i64>) {
        self.sender.send_if_modified(|p| {
            if p.queue == queue {
                return false;
            }
            p.queue = queue;
            true
        });
    }

    pub fn snapshot(&self) -> RuleExecutionProgress {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> ProgressWatcher {
        self.sender.subscribe()
    }

    /// Current snapshot first, then one item per change
    pub fn stream(&self) -> impl Stream<Item = RuleExecutionProgress> {
        futures::stream::unfold((self.subscribe(), true), |(mut receiver, first)| async move {
            if !first {
                receiver.changed().await.ok()?;
            }
            let snapshot = receiver.borrow_and_update().clone();
            Some((snapshot, (receiver, false)))
        })
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}
