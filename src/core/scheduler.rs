//! Cron-driven enqueueing
//!
//! Each active rule group with its own cron expression gets a timer task that
//! enqueues it. A single global timer sweeps every active rule group without
//! one. A plain interval prunes collection logs.

use crate::core::config::RulesConfig;
use crate::core::error::{Result, SweepError};
use crate::core::services::CollectionService;
use crate::core::task_queue::TaskQueue;
use crate::db::models::RuleGroup;
use crate::db::repository::RuleGroupRepository;
use chrono::Utc;
use cron::Schedule;
use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Parse a cron expression; classic five-field expressions get a leading seconds field
pub fn parse_schedule(expression: &str) -> std::result::Result<Schedule, cron::error::Error> {
    let trimmed = expression.trim();
    if trimmed.split_whitespace().count() == 5 {
        Schedule::from_str(&format!("0 {}", trimmed))
    } else {
        Schedule::from_str(trimmed)
    }
}

struct Timer {
    label: String,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl Timer {
    fn cron<F, Fut>(label: String, schedule: Schedule, mut on_tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let name = label.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    warn!(timer = %name, "Schedule has no upcoming run");
                    break;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or_default();

                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {
                        debug!(timer = %name, "Schedule fired");
                        on_tick().await;
                    }
                }
            }
        });

        Self { label, token, handle }
    }

    fn interval<F, Fut>(label: String, period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    _ = timer.tick() => on_tick().await,
                }
            }
        });

        Self { label, token, handle }
    }

    /// Whether the timer task ended cleanly
    async fn stop(self) -> bool {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            error!(timer = %self.label, error = %e, "Timer task ended abnormally");
            return false;
        }
        true
    }
}

/// What a rule group was last registered with
struct Registration {
    active: bool,
    expression: Option<String>,
    timer: Option<Timer>,
}

pub struct Scheduler {
    queue: TaskQueue,
    rule_groups: Arc<RuleGroupRepository>,
    collections: Arc<CollectionService>,
    global_schedule: Schedule,
    log_cleanup_interval: Duration,
    registrations: Mutex<HashMap<i64, Registration>>,
    background: Mutex<Vec<Timer>>,
}

impl Scheduler {
    pub fn new(
        config: &RulesConfig,
        queue: TaskQueue,
        rule_groups: Arc<RuleGroupRepository>,
        collections: Arc<CollectionService>,
    ) -> Result<Self> {
        let global_schedule = parse_schedule(&config.global_schedule)
            .map_err(|e| SweepError::ConfigError(format!("global schedule: {}", e)))?;

        Ok(Self {
            queue,
            rule_groups,
            collections,
            global_schedule,
            log_cleanup_interval: Duration::from_secs(config.log_cleanup_interval),
            registrations: Mutex::new(HashMap::new()),
            background: Mutex::new(Vec::new()),
        })
    }

    /// Register every active rule group and start the global and cleanup timers
    pub async fn start(&self) -> Result<()> {
        for group in self.rule_groups.find_active().await? {
            if let Err(e) = self.sync_rule_group(&group).await {
                error!(rule_group_id = group.id, error = %e, "Could not schedule rule group");
            }
        }

        let queue = self.queue.clone();
        let rule_groups = Arc::clone(&self.rule_groups);
        let global = Timer::cron("global".to_string(), self.global_schedule.clone(), move || {
            let queue = queue.clone();
            let rule_groups = Arc::clone(&rule_groups);
            async move {
                match enqueue_unscheduled(&rule_groups, &queue).await {
                    Ok(count) => info!(count, "Global schedule queued rule groups"),
                    Err(e) => error!(error = %e, "Global schedule sweep failed"),
                }
            }
        });

        let collections = Arc::clone(&self.collections);
        let cleanup = Timer::interval("log_cleanup".to_string(), self.log_cleanup_interval, move || {
            let collections = Arc::clone(&collections);
            async move {
                if let Err(e) = collections.prune_logs().await {
                    error!(error = %e, "Collection log cleanup failed");
                }
            }
        });

        let mut background = self.background.lock().await;
        background.push(global);
        background.push(cleanup);

        info!(
            rule_groups = self.registrations.lock().await.len(),
            "Scheduler started"
        );
        Ok(())
    }

    /// Bring a rule group's registration in line with its stored settings
    ///
    /// A changed schedule or activity tears down the old timer and drops the
    /// group from the queue if it is still waiting there.
    pub async fn sync_rule_group(&self, group: &RuleGroup) -> Result<()> {
        let expression = group
            .cron_schedule
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string);

        let mut registrations = self.registrations.lock().await;
        if let Some(current) = registrations.get(&group.id) {
            if current.active == group.is_active && current.expression == expression {
                return Ok(());
            }
        }

        let schedule = match (&expression, group.is_active) {
            (Some(expr), true) => Some(parse_schedule(expr).map_err(|e| {
                SweepError::ValidationError(format!("rule group {} schedule: {}", group.id, e))
            })?),
            _ => None,
        };

        if let Some(stale) = registrations.remove(&group.id) {
            if let Some(timer) = stale.timer {
                timer.stop().await;
            }
            if self.queue.remove_pending(group.id).await {
                info!(rule_group_id = group.id, "Dropped rule group queued under a stale schedule");
            }
        }

        let timer = schedule.map(|schedule| {
            let queue = self.queue.clone();
            let rule_group_id = group.id;
            Timer::cron(format!("rule_group:{}", group.id), schedule, move || {
                let queue = queue.clone();
                async move {
                    queue.enqueue(rule_group_id).await;
                }
            })
        });

        debug!(
            rule_group_id = group.id,
            active = group.is_active,
            schedule = ?expression,
            "Rule group schedule registered"
        );
        registrations.insert(
            group.id,
            Registration {
                active: group.is_active,
                expression,
                timer,
            },
        );
        Ok(())
    }

    /// The rule group was deleted
    pub async fn remove_rule_group(&self, rule_group_id: i64) {
        let removed = self.registrations.lock().await.remove(&rule_group_id);
        if let Some(Registration { timer: Some(timer), .. }) = removed {
            timer.stop().await;
        }
        self.queue.stop_processing_rule_group(rule_group_id).await;
    }

    /// Whether a rule group currently has its own cron timer
    pub async fn has_own_schedule(&self, rule_group_id: i64) -> bool {
        self.registrations
            .lock()
            .await
            .get(&rule_group_id)
            .is_some_and(|r| r.timer.is_some())
    }

    pub async fn stop(&self) {
        let registrations: Vec<Registration> =
            self.registrations.lock().await.drain().map(|(_, r)| r).collect();
        for timer in registrations.into_iter().filter_map(|r| r.timer) {
            timer.stop().await;
        }
        for timer in self.background.lock().await.drain(..) {
            timer.stop().await;
        }
        info!("Scheduler stopped");
    }
}

/// Queue every active rule group that has no schedule of its own
pub async fn enqueue_unscheduled(rule_groups: &RuleGroupRepository, queue: &TaskQueue) -> Result<usize> {
    let mut queued = 0;
    for group in rule_groups.find_active().await? {
        let has_own = group
            .cron_schedule
            .as_deref()
            .is_some_and(|e| !e.trim().is_empty());
        if !has_own && queue.enqueue(group.id).await.is_accepted() {
            queued += 1;
        }
    }
    Ok(queued)
}
