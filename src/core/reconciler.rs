//! Collection reconciliation
//!
//! `plan` is the pure diff between what the rules want and what the
//! collection holds. [`Reconciler`] applies a plan to the media server and
//! the membership table, keeps the materialized collection alive, and
//! mirrors edits a user made directly in the media server.

use crate::clients::{ComparisonStatistic, CreateCollection, LibraryItem, MediaServer};
use crate::core::config::ReconciliationConfig;
use crate::core::error::Result;
use crate::core::event_bus::{Event, EventBus, EventType};
use crate::core::identifier::embedded_id;
use crate::db::models::{Collection, CollectionMedia, Exclusion, LogCategory, MediaType};
use crate::db::repository::{
    CollectionLogRepository, CollectionMediaRepository, CollectionRepository,
};
use chrono::Utc;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Excluded ids, matched against an item and its parent and grandparent
#[derive(Debug, Default)]
pub struct ExclusionIndex {
    ids: HashSet<String>,
}

impl ExclusionIndex {
    pub fn new(exclusions: &[Exclusion]) -> Self {
        Self {
            ids: exclusions
                .iter()
                .map(|e| e.media_server_id.clone())
                .collect(),
        }
    }

    pub fn excludes(&self, item: &LibraryItem) -> bool {
        self.excludes_id(&item.id)
            || item.parent_id.as_deref().is_some_and(|p| self.excludes_id(p))
            || item
                .grandparent_id
                .as_deref()
                .is_some_and(|g| self.excludes_id(g))
    }

    pub fn excludes_id(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ReconcilePlan {
    pub to_add: Vec<LibraryItem>,
    pub to_remove: Vec<CollectionMedia>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Diff passing items against current membership
///
/// desired = (passing - excluded) + manual members. Nothing is removed when
/// `keep_members` is set.
pub fn plan(
    passing: &[LibraryItem],
    exclusions: &ExclusionIndex,
    current: &[CollectionMedia],
    keep_members: bool,
) -> ReconcilePlan {
    let current_ids: HashSet<&str> = current.iter().map(|m| m.media_server_id.as_str()).collect();

    let mut desired: HashSet<&str> = current
        .iter()
        .filter(|m| m.is_manual)
        .map(|m| m.media_server_id.as_str())
        .collect();

    let mut to_add = Vec::new();
    for item in passing {
        if exclusions.excludes(item) {
            continue;
        }
        if desired.insert(item.id.as_str()) && !current_ids.contains(item.id.as_str()) {
            to_add.push(item.clone());
        }
    }

    let to_remove = if keep_members {
        Vec::new()
    } else {
        let mut removed = HashSet::new();
        current
            .iter()
            .filter(|m| !desired.contains(m.media_server_id.as_str()))
            .filter(|m| removed.insert(m.media_server_id.as_str()))
            .cloned()
            .collect()
    };

    ReconcilePlan { to_add, to_remove }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: usize,
    pub removed: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ManualSyncSummary {
    pub added: usize,
    pub removed: usize,
    pub skipped: bool,
}

pub struct Reconciler {
    media_server: Arc<dyn MediaServer>,
    collections: CollectionRepository,
    media: CollectionMediaRepository,
    logs: CollectionLogRepository,
    event_bus: Arc<EventBus>,
    settings: ReconciliationConfig,
}

impl Reconciler {
    pub fn new(
        db: Arc<crate::db::DatabaseManager>,
        media_server: Arc<dyn MediaServer>,
        event_bus: Arc<EventBus>,
        settings: ReconciliationConfig,
    ) -> Self {
        Self {
            media_server,
            collections: CollectionRepository::new(db.clone()),
            media: CollectionMediaRepository::new(db.clone()),
            logs: CollectionLogRepository::new(db),
            event_bus,
            settings,
        }
    }

    /// Id of the materialized collection, re-creating it and re-attaching
    /// every known member if it is missing
    pub async fn ensure_collection(&self, collection: &mut Collection) -> Result<String> {
        if let Some(id) = &collection.media_server_id {
            if self.media_server.get_collection(id).await.is_some() {
                return Ok(id.clone());
            }
            warn!(
                collection_id = collection.id,
                media_server_id = %id,
                "Collection no longer exists in the media server"
            );
        }

        let external_id = self
            .media_server
            .create_collection(&CreateCollection {
                library_id: collection.library_id.clone(),
                title: collection.title.clone(),
                media_type: collection.media_type,
            })
            .await?;
        self.collections
            .set_media_server_id(collection.id, Some(external_id.clone()))
            .await?;
        collection.media_server_id = Some(external_id.clone());

        let members = self.media.find_by_collection(collection.id).await?;
        for member in &members {
            if let Err(e) = self
                .media_server
                .add_to_collection(&external_id, &member.media_server_id)
                .await
            {
                error!(
                    collection_id = collection.id,
                    item_id = %member.media_server_id,
                    error = %e,
                    "Failed to re-attach member"
                );
            }
        }

        info!(
            collection_id = collection.id,
            media_server_id = %external_id,
            members = members.len(),
            "Created collection in the media server"
        );
        self.logs
            .add(
                collection.id,
                format!("Created collection in the media server with {} existing items", members.len()),
                LogCategory::Collection,
                None,
            )
            .await?;

        Ok(external_id)
    }

    /// Apply rule results to one collection
    pub async fn reconcile(
        &self,
        rule_group_id: i64,
        collection: &mut Collection,
        passing: &[LibraryItem],
        stats: &HashMap<String, ComparisonStatistic>,
        exclusions: &ExclusionIndex,
    ) -> Result<ReconcileSummary> {
        let current = self.media.find_by_collection(collection.id).await?;
        let plan = plan(passing, exclusions, &current, collection.manual);

        if current.is_empty() && plan.to_add.is_empty() {
            self.drop_if_empty(collection).await?;
            return Ok(ReconcileSummary::default());
        }

        // existing members are re-attached before any new intent is applied
        let external_id = self.ensure_collection(collection).await?;

        if plan.is_empty() {
            debug!(collection_id = collection.id, "Collection already up to date");
            return Ok(ReconcileSummary::default());
        }

        if !plan.to_remove.is_empty() {
            self.publish_batch(
                EventType::CollectionMediaRemoved,
                rule_group_id,
                collection.id,
                plan.to_remove.iter().map(|m| m.media_server_id.as_str()),
                stats,
            )
            .await;
        }
        if !plan.to_add.is_empty() {
            self.publish_batch(
                EventType::CollectionMediaAdded,
                rule_group_id,
                collection.id,
                plan.to_add.iter().map(|i| i.id.as_str()),
                stats,
            )
            .await;
        }

        let mut summary = ReconcileSummary::default();

        for member in &plan.to_remove {
            let item_id = member.media_server_id.as_str();
            if let Err(e) = self
                .media_server
                .remove_from_collection(&external_id, item_id)
                .await
            {
                // the row stays so manual sync does not adopt the item; retried next run
                warn!(collection_id = collection.id, item_id, error = %e, "Failed to remove item from collection");
                continue;
            }
            self.media.remove(collection.id, item_id).await?;
            self.logs
                .add(
                    collection.id,
                    format!("Removed {} because it no longer matches the rules", item_id),
                    LogCategory::Media,
                    stat_meta(stats, item_id),
                )
                .await?;
            summary.removed += 1;
        }

        for item in &plan.to_add {
            if let Err(e) = self
                .media_server
                .add_to_collection(&external_id, &item.id)
                .await
            {
                warn!(collection_id = collection.id, item_id = %item.id, error = %e, "Failed to add item to collection");
                continue;
            }
            self.media
                .add(&CollectionMedia {
                    id: 0,
                    collection_id: collection.id,
                    media_server_id: item.id.clone(),
                    secondary_id: embedded_id(item),
                    added_at: Utc::now(),
                    is_manual: false,
                })
                .await?;
            self.logs
                .add(
                    collection.id,
                    format!("Added \"{}\" because it matches the rules", item.title),
                    LogCategory::Media,
                    stat_meta(stats, &item.id),
                )
                .await?;
            summary.added += 1;
        }

        info!(
            rule_group_id,
            collection_id = collection.id,
            added = summary.added,
            removed = summary.removed,
            "Collection reconciled"
        );

        self.drop_if_empty(collection).await?;
        Ok(summary)
    }

    /// Mirror additions and removals a user made in the media server
    pub async fn sync_manual(&self, rule_group_id: i64, collection: &mut Collection) -> Result<ManualSyncSummary> {
        let Some(external_id) = collection.media_server_id.clone() else {
            return Ok(ManualSyncSummary { skipped: true, ..Default::default() });
        };

        let Some(children) = self.read_children(collection.id, &external_id).await else {
            return Ok(ManualSyncSummary { skipped: true, ..Default::default() });
        };

        let current = self.media.find_by_collection(collection.id).await?;
        let known: HashSet<&str> = current.iter().map(|m| m.media_server_id.as_str()).collect();
        let present: HashSet<&str> = children.iter().map(|c| c.id.as_str()).collect();
        let mut summary = ManualSyncSummary::default();

        for child in children.iter().filter(|c| !known.contains(c.id.as_str())) {
            self.media
                .add(&CollectionMedia {
                    id: 0,
                    collection_id: collection.id,
                    media_server_id: child.id.clone(),
                    secondary_id: embedded_id(child),
                    added_at: Utc::now(),
                    is_manual: true,
                })
                .await?;
            self.logs
                .add(
                    collection.id,
                    format!("\"{}\" was added manually in the media server", child.title),
                    LogCategory::Media,
                    Some(json!({ "source": "manual" })),
                )
                .await?;
            self.event_bus
                .publish(Event::rule_handler(
                    EventType::CollectionMediaAdded,
                    rule_group_id,
                    json!({ "collection_id": collection.id, "items": [child.id], "manual": true }),
                ))
                .await;
            summary.added += 1;
        }

        for member in current.iter().filter(|m| !present.contains(m.media_server_id.as_str())) {
            self.media
                .remove(collection.id, &member.media_server_id)
                .await?;
            self.logs
                .add(
                    collection.id,
                    format!("{} was removed manually in the media server", member.media_server_id),
                    LogCategory::Media,
                    Some(json!({ "source": "manual" })),
                )
                .await?;
            self.event_bus
                .publish(Event::rule_handler(
                    EventType::CollectionMediaRemoved,
                    rule_group_id,
                    json!({ "collection_id": collection.id, "items": [member.media_server_id], "manual": true }),
                ))
                .await;
            summary.removed += 1;
        }

        if summary.added + summary.removed > 0 {
            info!(
                collection_id = collection.id,
                added = summary.added,
                removed = summary.removed,
                "Synced manual collection edits"
            );
        }
        Ok(summary)
    }

    /// Remove one member from the collection and the membership table
    ///
    /// The membership row is only deleted once the media server accepted the
    /// removal.
    pub async fn remove_member(&self, collection: &Collection, item_id: &str) -> Result<bool> {
        if let Some(external_id) = &collection.media_server_id {
            self.media_server
                .remove_from_collection(external_id, item_id)
                .await?;
        }
        self.media.remove(collection.id, item_id).await
    }

    /// Delete the materialized collection of an empty, non-manual collection
    pub async fn drop_if_empty(&self, collection: &mut Collection) -> Result<bool> {
        if collection.manual {
            return Ok(false);
        }
        let Some(external_id) = collection.media_server_id.clone() else {
            return Ok(false);
        };
        if self.media.count(collection.id).await? > 0 {
            return Ok(false);
        }

        if let Err(e) = self.media_server.delete_collection(&external_id).await {
            warn!(collection_id = collection.id, error = %e, "Failed to delete empty collection");
            return Ok(false);
        }
        self.collections.set_media_server_id(collection.id, None).await?;
        collection.media_server_id = None;
        info!(collection_id = collection.id, "Deleted empty collection from the media server");
        Ok(true)
    }

    /// Start over after the rule group switched item type
    pub async fn reset(&self, collection: &mut Collection, media_type: MediaType) -> Result<()> {
        if let Some(external_id) = &collection.media_server_id {
            if let Err(e) = self.media_server.delete_collection(external_id).await {
                warn!(collection_id = collection.id, error = %e, "Failed to delete collection during reset");
            }
        }
        self.collections.reset_type(collection.id, media_type).await?;
        self.logs
            .add(
                collection.id,
                format!(
                    "Collection reset: item type changed from {} to {}",
                    collection.media_type, media_type
                ),
                LogCategory::Collection,
                None,
            )
            .await?;
        info!(
            collection_id = collection.id,
            from = %collection.media_type,
            to = %media_type,
            "Collection reset"
        );
        collection.media_type = media_type;
        collection.media_server_id = None;
        Ok(())
    }

    /// Children of the external collection, or `None` when they cannot be trusted
    async fn read_children(&self, collection_id: i64, external_id: &str) -> Option<Vec<LibraryItem>> {
        let min = self.settings.manual_sync_min_children;
        let children = self.media_server.get_collection_children(external_id).await?;
        if children.len() >= min {
            return Some(children);
        }

        let delay = self.settings.manual_sync_settle_delay;
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let children = self.media_server.get_collection_children(external_id).await?;
            if children.len() >= min {
                return Some(children);
            }
        }

        debug!(
            collection_id,
            min_children = min,
            "Collection reports too few children, skipping manual sync"
        );
        None
    }

    async fn publish_batch<'a>(
        &self,
        event_type: EventType,
        rule_group_id: i64,
        collection_id: i64,
        ids: impl Iterator<Item = &'a str>,
        stats: &HashMap<String, ComparisonStatistic>,
    ) {
        let mut seen = HashSet::new();
        let items: Vec<serde_json::Value> = ids
            .filter(|id| seen.insert(*id))
            .map(|id| json!({ "id": id, "statistic": stats.get(id) }))
            .collect();

        self.event_bus
            .publish(Event::rule_handler(
                event_type,
                rule_group_id,
                json!({ "collection_id": collection_id, "items": items }),
            ))
            .await;
    }
}

fn stat_meta(stats: &HashMap<String, ComparisonStatistic>, item_id: &str) -> Option<serde_json::Value> {
    stats
        .get(item_id)
        .and_then(|s| serde_json::to_value(s).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::fake::{self, FakeMediaServer};
    use crate::core::error::SweepError;
    use crate::core::event_bus::EventFilter;
    use crate::db::fixtures;
    use crate::db::repository::Repository;
    use proptest::prelude::*;

    fn member(id: &str, is_manual: bool) -> CollectionMedia {
        CollectionMedia {
            id: 0,
            collection_id: 1,
            media_server_id: id.to_string(),
            secondary_id: None,
            added_at: Utc::now(),
            is_manual,
        }
    }

    fn exclusion(id: &str) -> Exclusion {
        Exclusion {
            id: 0,
            media_server_id: id.to_string(),
            parent: None,
            rule_group_id: None,
            media_type: None,
        }
    }

    fn ids<'a>(items: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
        let mut ids: Vec<&str> = items.collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_plan_diff() {
        let passing = vec![fake::movie("a", 1), fake::movie("b", 2), fake::movie("c", 3)];
        let current = vec![member("b", false), member("d", false), member("e", true)];
        let index = ExclusionIndex::new(&[exclusion("c")]);

        let plan = plan(&passing, &index, &current, false);
        assert_eq!(ids(plan.to_add.iter().map(|i| i.id.as_str())), vec!["a"]);
        assert_eq!(ids(plan.to_remove.iter().map(|m| m.media_server_id.as_str())), vec!["d"]);
    }

    #[test]
    fn test_plan_excludes_through_hierarchy() {
        let passing = vec![
            fake::episode("e1", "s1", "show1", 1, 1),
            fake::season("s2", "show2", 1),
            fake::episode("e3", "s3", "show3", 1, 1),
        ];
        let index = ExclusionIndex::new(&[exclusion("show1"), exclusion("show2")]);

        let plan = plan(&passing, &index, &[], false);
        assert_eq!(ids(plan.to_add.iter().map(|i| i.id.as_str())), vec!["e3"]);
    }

    #[test]
    fn test_plan_keeps_members_of_manual_collection() {
        let plan = plan(&[], &ExclusionIndex::default(), &[member("a", false)], true);
        assert!(plan.is_empty());
    }

    #[test]
    fn test_plan_deduplicates_passing_items() {
        let passing = vec![fake::movie("a", 1), fake::movie("a", 1)];
        let plan = plan(&passing, &ExclusionIndex::default(), &[], false);
        assert_eq!(plan.to_add.len(), 1);
    }

    fn arb_item() -> impl Strategy<Value = LibraryItem> {
        (0u8..12, proptest::option::of(0u8..6), proptest::option::of(0u8..4)).prop_map(
            |(id, parent, grandparent)| {
                let mut item = fake::movie(&format!("i{}", id), id as i64);
                item.parent_id = parent.map(|p| format!("p{}", p));
                item.grandparent_id = grandparent.map(|g| format!("g{}", g));
                item
            },
        )
    }

    fn arb_member() -> impl Strategy<Value = CollectionMedia> {
        (0u8..12, any::<bool>()).prop_map(|(id, manual)| member(&format!("i{}", id), manual))
    }

    fn arb_exclusion_id() -> impl Strategy<Value = String> {
        prop_oneof![
            (0u8..12).prop_map(|i| format!("i{}", i)),
            (0u8..6).prop_map(|p| format!("p{}", p)),
            (0u8..4).prop_map(|g| format!("g{}", g)),
        ]
    }

    proptest! {
        #[test]
        fn prop_plan_respects_manual_and_exclusions(
            passing in proptest::collection::vec(arb_item(), 0..20),
            current in proptest::collection::vec(arb_member(), 0..12),
            excluded in proptest::collection::vec(arb_exclusion_id(), 0..6),
            keep in any::<bool>(),
        ) {
            let exclusions: Vec<Exclusion> = excluded.iter().map(|e| exclusion(e)).collect();
            let index = ExclusionIndex::new(&exclusions);
            let result = plan(&passing, &index, &current, keep);

            let manual: HashSet<&str> = current
                .iter()
                .filter(|m| m.is_manual)
                .map(|m| m.media_server_id.as_str())
                .collect();
            let excluded: HashSet<&str> = excluded.iter().map(String::as_str).collect();

            for removed in &result.to_remove {
                prop_assert!(!manual.contains(removed.media_server_id.as_str()));
            }
            for added in &result.to_add {
                prop_assert!(!excluded.contains(added.id.as_str()));
                prop_assert!(added.parent_id.as_deref().map_or(true, |p| !excluded.contains(p)));
                prop_assert!(added.grandparent_id.as_deref().map_or(true, |g| !excluded.contains(g)));
            }

            let added: HashSet<&str> = result.to_add.iter().map(|i| i.id.as_str()).collect();
            let removed: HashSet<&str> = result.to_remove.iter().map(|m| m.media_server_id.as_str()).collect();
            prop_assert!(added.is_disjoint(&removed));
            prop_assert_eq!(added.len(), result.to_add.len());
            prop_assert_eq!(removed.len(), result.to_remove.len());
        }
    }

    struct Setup {
        db: Arc<crate::db::DatabaseManager>,
        server: Arc<FakeMediaServer>,
        events: Arc<EventBus>,
        reconciler: Reconciler,
    }

    fn setup(server: FakeMediaServer, settings: ReconciliationConfig) -> Setup {
        let db = fixtures::database();
        let server = Arc::new(server);
        let events = Arc::new(EventBus::new());
        let reconciler = Reconciler::new(db.clone(), server.clone(), events.clone(), settings);
        Setup { db, server, events, reconciler }
    }

    #[tokio::test]
    async fn test_recreates_missing_collection_with_existing_members() {
        let s = setup(FakeMediaServer::new(), ReconciliationConfig::default());
        let (mut collection, group) =
            fixtures::seed(&s.db, Collection::new("Old", "1", MediaType::Movie)).await;
        for id in ["1", "2", "3", "4", "5"] {
            fixtures::add_member(&s.db, collection.id, id, false).await;
        }

        let passing: Vec<LibraryItem> = ["1", "2", "3", "4", "5", "6"]
            .iter()
            .map(|id| fake::movie(id, 1))
            .collect();
        let summary = s
            .reconciler
            .reconcile(group.id, &mut collection, &passing, &HashMap::new(), &ExclusionIndex::default())
            .await
            .unwrap();

        assert_eq!(summary, ReconcileSummary { added: 1, removed: 0 });
        assert_eq!(collection.media_server_id.as_deref(), Some("c1"));
        assert_eq!(
            s.server.mutating_calls(),
            vec![
                "create_collection:Old",
                "add_to_collection:c1:1",
                "add_to_collection:c1:2",
                "add_to_collection:c1:3",
                "add_to_collection:c1:4",
                "add_to_collection:c1:5",
                "add_to_collection:c1:6",
            ]
        );

        let stored = CollectionRepository::new(s.db.clone())
            .find_by_id(collection.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.media_server_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn test_reconcile_applies_and_drops_empty_collection() {
        let s = setup(
            FakeMediaServer::new().with_collection("c9", &["a", "b"]),
            ReconciliationConfig::default(),
        );
        let mut seeded = Collection::new("Old", "1", MediaType::Movie);
        seeded.media_server_id = Some("c9".to_string());
        let (mut collection, group) = fixtures::seed(&s.db, seeded).await;
        fixtures::add_member(&s.db, collection.id, "a", false).await;
        fixtures::add_member(&s.db, collection.id, "b", false).await;

        let summary = s
            .reconciler
            .reconcile(group.id, &mut collection, &[], &HashMap::new(), &ExclusionIndex::default())
            .await
            .unwrap();

        assert_eq!(summary.removed, 2);
        assert!(fixtures::member_ids(&s.db, collection.id).await.is_empty());
        assert!(!s.server.has_collection("c9"));
        assert_eq!(collection.media_server_id, None);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let removed = s
            .events
            .get_history(EventFilter::new().with_event_types(vec![EventType::CollectionMediaRemoved]))
            .await;
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].rule_group_id(), Some(group.id));
        assert_eq!(removed[0].data["items"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_manual_members_survive_reconciliation() {
        let s = setup(
            FakeMediaServer::new().with_collection("c9", &["a", "m"]),
            ReconciliationConfig::default(),
        );
        let mut seeded = Collection::new("Old", "1", MediaType::Movie);
        seeded.media_server_id = Some("c9".to_string());
        let (mut collection, group) = fixtures::seed(&s.db, seeded).await;
        fixtures::add_member(&s.db, collection.id, "a", false).await;
        fixtures::add_member(&s.db, collection.id, "m", true).await;

        s.reconciler
            .reconcile(group.id, &mut collection, &[], &HashMap::new(), &ExclusionIndex::default())
            .await
            .unwrap();

        assert_eq!(fixtures::member_ids(&s.db, collection.id).await, vec!["m"]);
        assert_eq!(s.server.children_of("c9"), vec!["m"]);
    }

    #[tokio::test]
    async fn test_failed_removal_is_not_adopted_as_manual() {
        let s = setup(
            FakeMediaServer::new()
                .with_collection("c9", &["a", "b"])
                .failing_removals(),
            ReconciliationConfig::default(),
        );
        let mut seeded = Collection::new("Old", "1", MediaType::Movie);
        seeded.media_server_id = Some("c9".to_string());
        let (mut collection, group) = fixtures::seed(&s.db, seeded).await;
        fixtures::add_member(&s.db, collection.id, "a", false).await;
        fixtures::add_member(&s.db, collection.id, "b", false).await;

        let summary = s
            .reconciler
            .reconcile(
                group.id,
                &mut collection,
                &[fake::movie("a", 1)],
                &HashMap::new(),
                &ExclusionIndex::default(),
            )
            .await
            .unwrap();
        assert_eq!(summary.removed, 0);

        let synced = s.reconciler.sync_manual(group.id, &mut collection).await.unwrap();
        assert_eq!(synced, ManualSyncSummary::default());

        let members = CollectionMediaRepository::new(s.db.clone())
            .find_by_collection(collection.id)
            .await
            .unwrap();
        let b = members.iter().find(|m| m.media_server_id == "b").unwrap();
        assert!(!b.is_manual);
    }

    #[tokio::test]
    async fn test_remove_member_keeps_row_when_media_server_fails() {
        let s = setup(
            FakeMediaServer::new()
                .with_collection("c9", &["a"])
                .failing_removals(),
            ReconciliationConfig::default(),
        );
        let mut seeded = Collection::new("Old", "1", MediaType::Movie);
        seeded.media_server_id = Some("c9".to_string());
        let (collection, _) = fixtures::seed(&s.db, seeded).await;
        fixtures::add_member(&s.db, collection.id, "a", false).await;

        let result = s.reconciler.remove_member(&collection, "a").await;

        assert!(matches!(result, Err(SweepError::Timeout(_))));
        assert_eq!(fixtures::member_ids(&s.db, collection.id).await, vec!["a"]);
    }

    #[tokio::test]
    async fn test_manual_sync_mirrors_user_edits() {
        let s = setup(
            FakeMediaServer::new().with_collection("c9", &["a", "b"]),
            ReconciliationConfig::default(),
        );
        let mut seeded = Collection::new("Old", "1", MediaType::Movie);
        seeded.media_server_id = Some("c9".to_string());
        let (mut collection, group) = fixtures::seed(&s.db, seeded).await;
        fixtures::add_member(&s.db, collection.id, "a", false).await;
        fixtures::add_member(&s.db, collection.id, "gone", false).await;

        let summary = s.reconciler.sync_manual(group.id, &mut collection).await.unwrap();

        assert_eq!(summary, ManualSyncSummary { added: 1, removed: 1, skipped: false });
        assert_eq!(fixtures::member_ids(&s.db, collection.id).await, vec!["a", "b"]);
        let members = CollectionMediaRepository::new(s.db.clone())
            .find_by_collection(collection.id)
            .await
            .unwrap();
        assert!(members.iter().find(|m| m.media_server_id == "b").unwrap().is_manual);
    }

    #[tokio::test]
    async fn test_manual_sync_skips_transient_empty_collection() {
        let s = setup(
            FakeMediaServer::new().with_collection("c9", &[]),
            ReconciliationConfig::default(),
        );
        let mut seeded = Collection::new("Old", "1", MediaType::Movie);
        seeded.media_server_id = Some("c9".to_string());
        let (mut collection, group) = fixtures::seed(&s.db, seeded).await;
        fixtures::add_member(&s.db, collection.id, "a", false).await;

        let summary = s.reconciler.sync_manual(group.id, &mut collection).await.unwrap();

        assert!(summary.skipped);
        assert_eq!(fixtures::member_ids(&s.db, collection.id).await, vec!["a"]);
    }

    #[tokio::test]
    async fn test_manual_sync_rereads_after_settle_delay() {
        let s = setup(
            FakeMediaServer::new().with_collection("c9", &["a"]),
            ReconciliationConfig {
                manual_sync_min_children: 1,
                manual_sync_settle_delay: 10,
            },
        );
        s.server.script_children(Some(vec![]));

        let mut seeded = Collection::new("Old", "1", MediaType::Movie);
        seeded.media_server_id = Some("c9".to_string());
        let (mut collection, group) = fixtures::seed(&s.db, seeded).await;
        fixtures::add_member(&s.db, collection.id, "a", false).await;

        let summary = s.reconciler.sync_manual(group.id, &mut collection).await.unwrap();

        assert!(!summary.skipped);
        assert_eq!(summary.removed, 0);
        let reads = s
            .server
            .calls()
            .iter()
            .filter(|c| c.starts_with("get_collection_children"))
            .count();
        assert_eq!(reads, 2);
    }

    #[tokio::test]
    async fn test_reset_clears_members_and_type() {
        let s = setup(
            FakeMediaServer::new().with_collection("c9", &["a"]),
            ReconciliationConfig::default(),
        );
        let mut seeded = Collection::new("Old", "1", MediaType::Movie);
        seeded.media_server_id = Some("c9".to_string());
        let (mut collection, _) = fixtures::seed(&s.db, seeded).await;
        fixtures::add_member(&s.db, collection.id, "a", false).await;

        s.reconciler.reset(&mut collection, MediaType::Show).await.unwrap();

        assert_eq!(collection.media_type, MediaType::Show);
        assert!(!s.server.has_collection("c9"));
        assert!(fixtures::member_ids(&s.db, collection.id).await.is_empty());
        let stored = CollectionRepository::new(s.db.clone())
            .find_by_id(collection.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.media_type, MediaType::Show);
        assert_eq!(stored.media_server_id, None);
    }
}
