//! Collection services
//!
//! User-driven collection edits and log retention. Edits take the same
//! execution lock as the rule group queue so they never interleave with a
//! running reconciliation.

use crate::clients::MediaServer;
use crate::core::error::{Result, SweepError};
use crate::core::event_bus::{Event, EventBus, EventSource, EventType};
use crate::core::identifier::embedded_id;
use crate::core::reconciler::Reconciler;
use crate::core::task_queue::ExecutionLock;
use crate::db::models::{Collection, CollectionMedia, LogCategory};
use crate::db::repository::{
    CollectionLogRepository, CollectionMediaRepository, CollectionRepository, Repository,
};
use chrono::{Months, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

pub struct CollectionService {
    collections: CollectionRepository,
    media: CollectionMediaRepository,
    logs: CollectionLogRepository,
    media_server: Arc<dyn MediaServer>,
    reconciler: Arc<Reconciler>,
    lock: ExecutionLock,
    event_bus: Arc<EventBus>,
}

impl CollectionService {
    pub fn new(
        db: Arc<crate::db::DatabaseManager>,
        media_server: Arc<dyn MediaServer>,
        reconciler: Arc<Reconciler>,
        lock: ExecutionLock,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            collections: CollectionRepository::new(db.clone()),
            media: CollectionMediaRepository::new(db.clone()),
            logs: CollectionLogRepository::new(db),
            media_server,
            reconciler,
            lock,
            event_bus,
        }
    }

    async fn collection(&self, collection_id: i64) -> Result<Collection> {
        self.collections
            .find_by_id(collection_id)
            .await?
            .ok_or_else(|| SweepError::NotFound(format!("Collection not found: {}", collection_id)))
    }

    /// Add an item by hand; returns false when it was already a member
    pub async fn add_manual_item(&self, collection_id: i64, item_id: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;

        let mut collection = self.collection(collection_id).await?;
        let item = self
            .media_server
            .get_metadata(item_id)
            .await
            .ok_or_else(|| SweepError::NotFound(format!("Media item not found: {}", item_id)))?;
        if item.media_type != collection.media_type {
            return Err(SweepError::ValidationError(format!(
                "Collection {} holds {} items, {} is a {}",
                collection_id, collection.media_type, item_id, item.media_type
            )));
        }

        let external_id = self.reconciler.ensure_collection(&mut collection).await?;
        self.media_server
            .add_to_collection(&external_id, item_id)
            .await?;

        let added = self
            .media
            .add(&CollectionMedia {
                id: 0,
                collection_id,
                media_server_id: item_id.to_string(),
                secondary_id: embedded_id(&item),
                added_at: Utc::now(),
                is_manual: true,
            })
            .await?;
        if !added {
            debug!(collection_id, item_id, "Item already in collection");
            return Ok(false);
        }

        self.logs
            .add(
                collection_id,
                format!("\"{}\" was added manually", item.title),
                LogCategory::Media,
                Some(json!({ "source": "manual" })),
            )
            .await?;
        self.event_bus
            .publish(Event::new(
                EventType::CollectionMediaAdded,
                EventSource::User("api".to_string()),
                json!({ "collection_id": collection_id, "items": [item_id], "manual": true }),
            ))
            .await;

        info!(collection_id, item_id, "Manually added item to collection");
        Ok(true)
    }

    /// Remove an item by hand; returns false when it was not a member
    pub async fn remove_manual_item(&self, collection_id: i64, item_id: &str) -> Result<bool> {
        let _guard = self.lock.lock().await;

        let mut collection = self.collection(collection_id).await?;
        if !self.reconciler.remove_member(&collection, item_id).await? {
            return Ok(false);
        }

        self.logs
            .add(
                collection_id,
                format!("{} was removed manually", item_id),
                LogCategory::Media,
                Some(json!({ "source": "manual" })),
            )
            .await?;
        self.event_bus
            .publish(Event::new(
                EventType::CollectionMediaRemoved,
                EventSource::User("api".to_string()),
                json!({ "collection_id": collection_id, "items": [item_id], "manual": true }),
            ))
            .await;
        self.reconciler.drop_if_empty(&mut collection).await?;

        info!(collection_id, item_id, "Manually removed item from collection");
        Ok(true)
    }

    /// Delete log entries past each collection's retention; 0 months keeps everything
    pub async fn prune_logs(&self) -> Result<usize> {
        let now = Utc::now();
        let mut pruned = 0;

        for collection in self.collections.find_all().await? {
            let Ok(months) = u32::try_from(collection.keep_logs_for_months) else {
                continue;
            };
            if months == 0 {
                continue;
            }
            let Some(cutoff) = now.checked_sub_months(Months::new(months)) else {
                continue;
            };
            pruned += self.logs.prune_older_than(collection.id, cutoff).await?;
        }

        if pruned > 0 {
            info!(pruned, "Pruned collection logs");
        }
        Ok(pruned)
    }
}

#[cfg(test)]
impl CollectionService {
    pub fn for_tests(db: Arc<crate::db::DatabaseManager>) -> Self {
        use crate::clients::fake::FakeMediaServer;
        use crate::core::config::ReconciliationConfig;

        let server = Arc::new(FakeMediaServer::new());
        let events = Arc::new(EventBus::new());
        let reconciler = Arc::new(Reconciler::new(
            db.clone(),
            server.clone(),
            events.clone(),
            ReconciliationConfig::default(),
        ));
        Self::new(db, server, reconciler, crate::core::task_queue::execution_lock(), events)
    }
}
