//! Seed data shared by the engine tests

use super::*;
use std::sync::Arc;

pub fn database() -> Arc<DatabaseManager> {
    Arc::new(DatabaseManager::new_in_memory().unwrap())
}

pub fn rule_group(collection_id: i64, data_type: MediaType) -> RuleGroup {
    RuleGroup {
        id: 0,
        name: "Unwatched".to_string(),
        description: None,
        library_id: "1".to_string(),
        data_type,
        rules: vec![serde_json::json!({ "operator": null })],
        is_active: true,
        cron_schedule: None,
        collection_id,
    }
}

/// Store `collection` and a rule group targeting it; both come back with their ids
pub async fn seed(db: &Arc<DatabaseManager>, mut collection: Collection) -> (Collection, RuleGroup) {
    collection.id = CollectionRepository::new(db.clone())
        .create(&collection)
        .await
        .unwrap();

    let mut group = rule_group(collection.id, collection.media_type);
    group.library_id = collection.library_id.clone();
    group.id = RuleGroupRepository::new(db.clone())
        .create(&group)
        .await
        .unwrap();

    (collection, group)
}

pub async fn add_member(db: &Arc<DatabaseManager>, collection_id: i64, item_id: &str, is_manual: bool) {
    CollectionMediaRepository::new(db.clone())
        .add(&CollectionMedia {
            id: 0,
            collection_id,
            media_server_id: item_id.to_string(),
            secondary_id: None,
            added_at: chrono::Utc::now(),
            is_manual,
        })
        .await
        .unwrap();
}

pub async fn member_ids(db: &Arc<DatabaseManager>, collection_id: i64) -> Vec<String> {
    let mut ids: Vec<String> = CollectionMediaRepository::new(db.clone())
        .find_by_collection(collection_id)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.media_server_id)
        .collect();
    ids.sort();
    ids
}
