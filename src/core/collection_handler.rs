//! Grace-period handling of collection members
//!
//! Members that have sat in a collection for `delete_after_days` get the
//! collection's action applied and leave the collection. A member whose
//! action failed stays and is retried on the next run.

use crate::core::actions::{ActionHandler, ActionOutcome};
use crate::core::error::Result;
use crate::core::event_bus::{Event, EventBus, EventType};
use crate::core::reconciler::{ExclusionIndex, Reconciler};
use crate::db::models::{Collection, CollectionMedia, LogCategory, RuleAction};
use crate::db::repository::{CollectionLogRepository, CollectionMediaRepository};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HandledSummary {
    pub handled: usize,
    pub failed: usize,
    pub cancelled: bool,
}

pub struct CollectionHandler {
    actions: ActionHandler,
    reconciler: Arc<Reconciler>,
    media: CollectionMediaRepository,
    logs: CollectionLogRepository,
    event_bus: Arc<EventBus>,
}

/// Members whose grace period is over at `now`
pub fn due_members<'a>(
    collection: &Collection,
    members: &'a [CollectionMedia],
    now: DateTime<Utc>,
) -> Vec<&'a CollectionMedia> {
    let Some(days) = collection.delete_after_days else {
        return Vec::new();
    };
    let grace = Duration::days(days.max(0));
    members
        .iter()
        .filter(|m| m.added_at + grace <= now)
        .collect()
}

impl CollectionHandler {
    pub fn new(
        db: Arc<crate::db::DatabaseManager>,
        actions: ActionHandler,
        reconciler: Arc<Reconciler>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            actions,
            reconciler,
            media: CollectionMediaRepository::new(db.clone()),
            logs: CollectionLogRepository::new(db),
            event_bus,
        }
    }

    pub fn actions(&self) -> &ActionHandler {
        &self.actions
    }

    /// Excluded directly or through the season or show it belongs to
    async fn is_excluded(&self, exclusions: &ExclusionIndex, member: &CollectionMedia) -> bool {
        if exclusions.is_empty() {
            return false;
        }
        if exclusions.excludes_id(&member.media_server_id) {
            return true;
        }
        self.actions
            .media_server()
            .get_metadata(&member.media_server_id)
            .await
            .is_some_and(|item| exclusions.excludes(&item))
    }

    /// Apply the collection action to every due member; cancellation is checked between members
    pub async fn handle_due(
        &self,
        rule_group_id: i64,
        collection: &mut Collection,
        exclusions: &ExclusionIndex,
        token: &CancellationToken,
    ) -> Result<HandledSummary> {
        let mut summary = HandledSummary::default();
        if collection.arr_action == RuleAction::DoNothing || collection.delete_after_days.is_none() {
            return Ok(summary);
        }

        let members = self.media.find_by_collection(collection.id).await?;
        let due = due_members(collection, &members, Utc::now());
        if due.is_empty() {
            return Ok(summary);
        }
        debug!(collection_id = collection.id, due = due.len(), "Handling due collection media");

        for member in due {
            if token.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            if self.is_excluded(exclusions, member).await {
                debug!(item_id = %member.media_server_id, "Skipping excluded item");
                continue;
            }

            let outcome = self.actions.handle(collection, member).await?;
            if !outcome.is_settled() {
                summary.failed += 1;
                continue;
            }

            if let Err(e) = self
                .reconciler
                .remove_member(collection, &member.media_server_id)
                .await
            {
                warn!(
                    collection_id = collection.id,
                    item_id = %member.media_server_id,
                    error = %e,
                    "Handled item could not be removed from the collection"
                );
                summary.failed += 1;
                continue;
            }
            self.logs
                .add(
                    collection.id,
                    handled_message(collection.arr_action, outcome, &member.media_server_id),
                    LogCategory::Media,
                    Some(json!({ "outcome": outcome.as_str() })),
                )
                .await?;
            self.event_bus
                .publish(Event::rule_handler(
                    EventType::CollectionMediaHandled,
                    rule_group_id,
                    json!({
                        "collection_id": collection.id,
                        "item_id": member.media_server_id,
                        "action": collection.arr_action.as_str(),
                        "outcome": outcome.as_str(),
                    }),
                ))
                .await;
            summary.handled += 1;
        }

        if summary.handled > 0 {
            self.reconciler.drop_if_empty(collection).await?;
        }
        info!(
            collection_id = collection.id,
            handled = summary.handled,
            failed = summary.failed,
            "Handled due collection media"
        );
        Ok(summary)
    }
}

fn handled_message(action: RuleAction, outcome: ActionOutcome, item_id: &str) -> String {
    match outcome {
        ActionOutcome::FallbackDeleted => format!(
            "{} was not found in the companion service and was deleted through the media server",
            item_id
        ),
        ActionOutcome::NotFound => format!(
            "{} was not found in the companion service; removed from the collection",
            item_id
        ),
        ActionOutcome::Unsupported => format!(
            "{} removed from the collection; {} is not supported for this item type",
            item_id, action
        ),
        _ => format!("Handled {} with action {}", item_id, action),
    }
}
