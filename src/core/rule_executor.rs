//! Rule group execution
//!
//! One run walks a rule group through evaluation, reconciliation, manual
//! sync and grace-period handling. Every run ends in exactly one of
//! finished, aborted or failed, each with its own event.

use crate::core::actions::ActionHandler;
use crate::core::collection_handler::CollectionHandler;
use crate::core::error::{ErrorSummary, Result, SweepError};
use crate::core::evaluation::{RuleEvaluator, RunContext};
use crate::core::event_bus::{Event, EventBus, EventType};
use crate::core::progress::{ProgressReporter, RunState};
use crate::core::reconciler::{ExclusionIndex, Reconciler};
use crate::core::task_queue::{RuleGroupRunner, RunOutcome};
use crate::db::models::{Collection, RuleGroup};
use crate::db::repository::{
    CollectionRepository, ExclusionRepository, Repository, RuleGroupRepository,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct RuleExecutor {
    rule_groups: RuleGroupRepository,
    collections: CollectionRepository,
    exclusions: ExclusionRepository,
    evaluator: RuleEvaluator,
    reconciler: Arc<Reconciler>,
    handler: CollectionHandler,
    progress: Arc<ProgressReporter>,
    event_bus: Arc<EventBus>,
}

/// How far a started run got before it returned without error
enum Completion {
    Finished { handled: usize },
    Aborted,
}

impl RuleExecutor {
    pub fn new(
        db: Arc<crate::db::DatabaseManager>,
        evaluator: RuleEvaluator,
        reconciler: Arc<Reconciler>,
        handler: CollectionHandler,
        progress: Arc<ProgressReporter>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            rule_groups: RuleGroupRepository::new(db.clone()),
            collections: CollectionRepository::new(db.clone()),
            exclusions: ExclusionRepository::new(db),
            evaluator,
            reconciler,
            handler,
            progress,
            event_bus,
        }
    }

    fn actions(&self) -> &ActionHandler {
        self.handler.actions()
    }

    /// Load and validate a rule group without touching anything; `None` when it is inactive
    async fn prepare(&self, rule_group_id: i64) -> Result<Option<(RuleGroup, Collection)>> {
        let group = self
            .rule_groups
            .find_by_id(rule_group_id)
            .await?
            .ok_or_else(|| SweepError::NotFound(format!("Rule group not found: {}", rule_group_id)))?;
        if !group.is_active {
            debug!(rule_group_id, "Rule group inactive, skipping");
            return Ok(None);
        }
        if group.library_id.trim().is_empty() {
            return Err(SweepError::ConfigError(format!(
                "Rule group {} has no library assigned",
                rule_group_id
            )));
        }

        let collection = self
            .collections
            .find_by_id(group.collection_id)
            .await?
            .ok_or_else(|| {
                SweepError::NotFound(format!("Collection not found: {}", group.collection_id))
            })?;
        if !collection.is_active {
            debug!(rule_group_id, collection_id = collection.id, "Collection inactive, skipping");
            return Ok(None);
        }
        self.actions().check_binding(&collection)?;

        Ok(Some((group, collection)))
    }

    async fn execute(&self, ctx: &mut RunContext) -> Result<Completion> {
        let rule_group_id = ctx.rule_group.id;
        if ctx.collection.media_type != ctx.rule_group.data_type {
            self.reconciler
                .reset(&mut ctx.collection, ctx.rule_group.data_type)
                .await?;
        }

        let evaluation = self.evaluator.evaluate(ctx).await?;
        if evaluation.cancelled {
            return Ok(Completion::Aborted);
        }

        let exclusions = ExclusionIndex::new(&self.exclusions.find_for_rule_group(rule_group_id).await?);
        let summary = self
            .reconciler
            .reconcile(
                rule_group_id,
                &mut ctx.collection,
                &evaluation.passing,
                &evaluation.stats,
                &exclusions,
            )
            .await?;
        debug!(
            rule_group_id,
            added = summary.added,
            removed = summary.removed,
            "Collection reconciled"
        );

        if ctx.is_cancelled() {
            return Ok(Completion::Aborted);
        }
        self.reconciler.sync_manual(rule_group_id, &mut ctx.collection).await?;

        let handled = self
            .handler
            .handle_due(rule_group_id, &mut ctx.collection, &exclusions, &ctx.token)
            .await?;
        if handled.cancelled {
            return Ok(Completion::Aborted);
        }

        self.collections
            .record_run(ctx.collection.id, ctx.elapsed_ms(), handled.handled as i64)
            .await?;

        Ok(Completion::Finished {
            handled: handled.handled,
        })
    }

    async fn aborted(&self, rule_group_id: i64) -> RunOutcome {
        info!(rule_group_id, "Rule group execution aborted");
        self.progress.finish(RunState::Aborted);
        self.event_bus
            .publish(Event::rule_handler(
                EventType::RuleHandlerAborted,
                rule_group_id,
                json!({}),
            ))
            .await;
        RunOutcome::Aborted
    }

    /// `started` is false for failures found before the run was announced,
    /// which leave the progress snapshot alone
    async fn failed(&self, rule_group_id: i64, e: SweepError, started: bool) -> RunOutcome {
        if e.is_configuration() {
            warn!(rule_group_id, error = %e, "Rule group misconfigured");
        } else {
            error!(rule_group_id, error = %e, error_type = e.error_type(), "Rule group execution failed");
        }
        if started {
            self.progress.finish(RunState::Failed);
        }
        self.event_bus
            .publish(Event::rule_handler(
                EventType::RuleHandlerFailed,
                rule_group_id,
                serde_json::to_value(ErrorSummary::from_error(&e)).unwrap_or_default(),
            ))
            .await;
        RunOutcome::Failed
    }
}

#[async_trait]
impl RuleGroupRunner for RuleExecutor {
    async fn run(&self, rule_group_id: i64, token: CancellationToken) -> RunOutcome {
        let (group, collection) = match self.prepare(rule_group_id).await {
            Ok(Some(prepared)) => prepared,
            Ok(None) => return RunOutcome::Finished,
            Err(e) => return self.failed(rule_group_id, e, false).await,
        };
        if token.is_cancelled() {
            debug!(rule_group_id, "Rule group stopped before it started");
            return RunOutcome::Aborted;
        }

        self.progress.start(group.id, &group.name, 0);
        self.event_bus
            .publish(Event::rule_handler(
                EventType::RuleHandlerStarted,
                group.id,
                json!({ "name": group.name, "collection_id": collection.id }),
            ))
            .await;
        info!(rule_group_id, name = %group.name, "Rule group execution started");

        let mut ctx = RunContext::new(group, collection, token);
        match self.execute(&mut ctx).await {
            Ok(Completion::Finished { handled }) => {
                info!(rule_group_id, handled, "Rule group execution finished");
                self.progress.finish(RunState::Finished);
                self.event_bus
                    .publish(Event::rule_handler(
                        EventType::RuleHandlerFinished,
                        rule_group_id,
                        json!({ "handled": handled }),
                    ))
                    .await;
                RunOutcome::Finished
            }
            Ok(Completion::Aborted) => self.aborted(rule_group_id).await,
            Err(e) if e.is_cancellation() => self.aborted(rule_group_id).await,
            Err(e) => self.failed(rule_group_id, e, true).await,
        }
    }
}
