//! Cleanup actions against companion services
//!
//! Every (action, item type) pair is matched explicitly. An item the
//! companion service does not know falls back to deletion through the
//! media server for the delete family of actions, and to nothing otherwise.
//! Companion failures are reported as [`ActionOutcome::Failed`]; only a
//! companion binding that names an unconfigured service is an error.

mod movie;
mod show;

use crate::clients::{CompanionRegistry, MediaServer};
use crate::core::error::{Result, SweepError};
use crate::core::identifier::IdentifierResolver;
use crate::db::models::{Collection, CollectionMedia, MediaType, RuleAction};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The companion service carried out the action
    Handled,
    /// The companion service did not know the item; deleted through the media server
    FallbackDeleted,
    /// Nobody knows the item and the action has no fallback
    NotFound,
    /// Documented no-op for this action and item type
    Unsupported,
    /// `DoNothing`
    Skipped,
    /// A companion or media server call failed; retried on the next run
    Failed,
}

impl ActionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionOutcome::Handled => "handled",
            ActionOutcome::FallbackDeleted => "fallback_deleted",
            ActionOutcome::NotFound => "not_found",
            ActionOutcome::Unsupported => "unsupported",
            ActionOutcome::Skipped => "skipped",
            ActionOutcome::Failed => "failed",
        }
    }

    /// The member can leave the collection
    pub fn is_settled(&self) -> bool {
        !matches!(self, ActionOutcome::Failed)
    }
}

pub struct ActionHandler {
    media_server: Arc<dyn MediaServer>,
    resolver: IdentifierResolver,
    companions: CompanionRegistry,
}

impl ActionHandler {
    pub fn new(
        media_server: Arc<dyn MediaServer>,
        resolver: IdentifierResolver,
        companions: CompanionRegistry,
    ) -> Self {
        Self {
            media_server,
            resolver,
            companions,
        }
    }

    pub fn media_server(&self) -> &dyn MediaServer {
        self.media_server.as_ref()
    }

    /// Fails when the collection names a companion service that is not configured
    pub fn check_binding(&self, collection: &Collection) -> Result<()> {
        let Some(name) = collection.companion_server.as_deref() else {
            return Ok(());
        };
        if collection.arr_action == RuleAction::DoNothing {
            return Ok(());
        }

        let bound = match collection.media_type {
            MediaType::Movie => self.companions.movie_manager(name).is_some(),
            MediaType::Show | MediaType::Season | MediaType::Episode => {
                self.companions.show_manager(name).is_some()
            }
        };
        if bound {
            Ok(())
        } else {
            Err(SweepError::ConfigError(format!(
                "collection {} is bound to companion service '{}' which is not configured for {} items",
                collection.id, name, collection.media_type
            )))
        }
    }

    pub async fn handle(&self, collection: &Collection, member: &CollectionMedia) -> Result<ActionOutcome> {
        let action = collection.arr_action;
        if action == RuleAction::DoNothing {
            return Ok(ActionOutcome::Skipped);
        }
        self.check_binding(collection)?;

        let item = self.media_server.get_metadata(&member.media_server_id).await;
        let outcome = match (collection.media_type, collection.companion_server.as_deref()) {
            (_, None) => self.fallback(collection, member).await,
            (MediaType::Movie, Some(name)) => {
                let Some(manager) = self.companions.movie_manager(name) else {
                    return Ok(ActionOutcome::Failed);
                };
                movie::handle(self, manager.as_ref(), collection, member, item.as_ref()).await
            }
            (media_type, Some(name)) => {
                let Some(manager) = self.companions.show_manager(name) else {
                    return Ok(ActionOutcome::Failed);
                };
                show::handle(self, manager.as_ref(), media_type, collection, member, item.as_ref()).await
            }
        };

        info!(
            collection_id = collection.id,
            item_id = %member.media_server_id,
            action = action.as_str(),
            outcome = outcome.as_str(),
            "Handled collection media"
        );
        Ok(outcome)
    }

    /// Delete through the media server when the action deletes files
    async fn fallback(&self, collection: &Collection, member: &CollectionMedia) -> ActionOutcome {
        if !collection.arr_action.deletes_files() {
            info!(
                collection_id = collection.id,
                item_id = %member.media_server_id,
                action = collection.arr_action.as_str(),
                "Item unknown to companion service, nothing to do"
            );
            return ActionOutcome::NotFound;
        }

        match self.media_server.delete_from_disk(&member.media_server_id).await {
            Ok(()) => {
                info!(
                    collection_id = collection.id,
                    item_id = %member.media_server_id,
                    "Deleted item through the media server"
                );
                ActionOutcome::FallbackDeleted
            }
            Err(e) => {
                warn!(
                    collection_id = collection.id,
                    item_id = %member.media_server_id,
                    error = %e,
                    "Fallback delete failed"
                );
                ActionOutcome::Failed
            }
        }
    }
}

/// Collapse a companion call result into an outcome, logging failures
fn settle(result: Result<()>, collection: &Collection, member: &CollectionMedia) -> ActionOutcome {
    match result {
        Ok(()) => ActionOutcome::Handled,
        Err(e) => {
            warn!(
                collection_id = collection.id,
                item_id = %member.media_server_id,
                action = collection.arr_action.as_str(),
                error = %e,
                "Companion service call failed"
            );
            ActionOutcome::Failed
        }
    }
}

fn unsupported(collection: &Collection, member: &CollectionMedia, media_type: MediaType) -> ActionOutcome {
    warn!(
        collection_id = collection.id,
        item_id = %member.media_server_id,
        action = collection.arr_action.as_str(),
        media_type = media_type.as_str(),
        "Action is not supported for this item type"
    );
    ActionOutcome::Unsupported
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::fake::{self, FakeMediaServer, FakeMovieManager, FakeShowManager};
    use chrono::Utc;

    pub(super) fn member(id: &str, secondary_id: Option<i64>) -> CollectionMedia {
        CollectionMedia {
            id: 1,
            collection_id: 1,
            media_server_id: id.to_string(),
            secondary_id,
            added_at: Utc::now(),
            is_manual: false,
        }
    }

    pub(super) fn collection(media_type: MediaType, action: RuleAction, companion: Option<&str>) -> Collection {
        let mut collection = Collection::new("Cleanup", "1", media_type);
        collection.id = 1;
        collection.arr_action = action;
        collection.companion_server = companion.map(str::to_string);
        collection
    }

    pub(super) struct Harness {
        pub server: Arc<FakeMediaServer>,
        pub movies: Arc<FakeMovieManager>,
        pub shows: Arc<FakeShowManager>,
        pub handler: ActionHandler,
    }

    pub(super) fn harness(server: FakeMediaServer, movies: FakeMovieManager, shows: FakeShowManager) -> Harness {
        let server = Arc::new(server);
        let movies = Arc::new(movies);
        let shows = Arc::new(shows);
        let companions = CompanionRegistry::new()
            .with_movie_manager(movies.clone())
            .with_show_manager(shows.clone());
        let handler = ActionHandler::new(
            server.clone(),
            IdentifierResolver::new(server.clone(), None),
            companions,
        );
        Harness { server, movies, shows, handler }
    }

    /// A show library with one season and one episode
    fn library() -> FakeMediaServer {
        FakeMediaServer::new()
            .with_metadata(fake::movie("m1", 603))
            .with_metadata(fake::show("100", 81189))
            .with_metadata(fake::season("200", "100", 2))
            .with_metadata(fake::episode("300", "200", "100", 2, 1))
    }

    fn item_for(media_type: MediaType) -> &'static str {
        match media_type {
            MediaType::Movie => "m1",
            MediaType::Show => "100",
            MediaType::Season => "200",
            MediaType::Episode => "300",
        }
    }

    /// Companion mutating calls each pair is documented to make
    fn expected_calls(action: RuleAction, media_type: MediaType) -> Vec<&'static str> {
        use MediaType::*;
        use RuleAction::*;
        match (action, media_type) {
            (DoNothing, _) => vec![],
            (Delete, Movie) | (UnmonitorDeleteExisting, Movie) => vec!["delete_movie:1:true:false"],
            (Unmonitor, Movie) => {
                vec!["update_movie:1:monitored=Some(false):profile=None:delete_files=false"]
            }
            (UnmonitorDeleteAll, Movie) => {
                vec!["update_movie:1:monitored=Some(false):profile=None:delete_files=true"]
            }
            (ChangeQualityProfile, Movie) => vec![
                "update_movie:1:monitored=None:profile=Some(7):delete_files=true",
                "search_movie:1",
            ],
            (Delete, Show) => vec!["delete_series:1:true:false"],
            (Unmonitor, Show) => vec!["set_series_monitored:1:false"],
            (UnmonitorDeleteAll, Show) => vec![
                "set_series_monitored:1:false",
                "set_season_monitored:1:1:false",
                "set_season_monitored:1:2:false",
                "delete_episode_file:111",
                "delete_episode_file:112",
                "delete_episode_file:121",
            ],
            (UnmonitorDeleteExisting, Show) => vec![
                "set_episodes_monitored:[11, 12, 21]:false",
                "delete_episode_file:111",
                "delete_episode_file:112",
                "delete_episode_file:121",
            ],
            (ChangeQualityProfile, Show) => vec!["set_quality_profile:1:7", "search_series:1"],
            (Delete, Season) => vec!["set_season_monitored:1:2:false", "delete_episode_file:121"],
            (Unmonitor, Season) => vec!["set_season_monitored:1:2:false"],
            (UnmonitorDeleteExisting, Season) => vec![
                "set_episodes_monitored:[21]:false",
                "delete_episode_file:121",
            ],
            (Delete, Episode) => vec!["set_episodes_monitored:[21]:false", "delete_episode_file:121"],
            (Unmonitor, Episode) => vec!["set_episodes_monitored:[21]:false"],
            (UnmonitorDeleteAll, Season)
            | (UnmonitorDeleteAll, Episode)
            | (UnmonitorDeleteExisting, Episode)
            | (ChangeQualityProfile, Season)
            | (ChangeQualityProfile, Episode) => vec![],
        }
    }

    #[tokio::test]
    async fn test_every_action_and_type_is_handled() {
        for action in RuleAction::ALL {
            for media_type in MediaType::ALL {
                let h = harness(
                    library(),
                    FakeMovieManager::new("radarr").with_movie(1, 603),
                    FakeShowManager::new("sonarr").with_series(1, 81189),
                );
                let companion = if media_type == MediaType::Movie { "radarr" } else { "sonarr" };
                let mut collection = collection(media_type, action, Some(companion));
                collection.quality_profile_id = Some(7);
                collection.replace_files_on_quality_change = true;

                let outcome = h
                    .handler
                    .handle(&collection, &member(item_for(media_type), None))
                    .await
                    .unwrap();

                let mut calls = h.movies.mutating_calls();
                calls.extend(h.shows.mutating_calls());
                assert_eq!(
                    calls,
                    expected_calls(action, media_type),
                    "{} on {}",
                    action,
                    media_type
                );
                assert!(h.server.mutating_calls().is_empty(), "{} on {}", action, media_type);
                assert_ne!(outcome, ActionOutcome::Failed, "{} on {}", action, media_type);
            }
        }
    }

    #[tokio::test]
    async fn test_unknown_movie_falls_back_to_media_server_delete() {
        let h = harness(
            library(),
            FakeMovieManager::new("radarr"),
            FakeShowManager::new("sonarr"),
        );
        let collection = collection(MediaType::Movie, RuleAction::Delete, Some("radarr"));

        let outcome = h.handler.handle(&collection, &member("m1", None)).await.unwrap();

        assert_eq!(outcome, ActionOutcome::FallbackDeleted);
        assert_eq!(h.server.mutating_calls(), vec!["delete_from_disk:m1"]);
        assert!(h.movies.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_movie_unmonitor_has_no_fallback() {
        let h = harness(
            library(),
            FakeMovieManager::new("radarr"),
            FakeShowManager::new("sonarr"),
        );
        let collection = collection(MediaType::Movie, RuleAction::Unmonitor, Some("radarr"));

        let outcome = h.handler.handle(&collection, &member("m1", None)).await.unwrap();

        assert_eq!(outcome, ActionOutcome::NotFound);
        assert!(h.server.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_episode_falls_back_to_media_server_delete() {
        let h = harness(
            library(),
            FakeMovieManager::new("radarr"),
            FakeShowManager::new("sonarr"),
        );
        let collection = collection(MediaType::Episode, RuleAction::UnmonitorDeleteExisting, Some("sonarr"));

        let outcome = h.handler.handle(&collection, &member("300", None)).await.unwrap();

        assert_eq!(outcome, ActionOutcome::FallbackDeleted);
        assert_eq!(h.server.mutating_calls(), vec!["delete_from_disk:300"]);
    }

    #[tokio::test]
    async fn test_without_companion_binding_deletes_through_media_server() {
        let h = harness(
            library(),
            FakeMovieManager::new("radarr").with_movie(1, 603),
            FakeShowManager::new("sonarr"),
        );
        let collection = collection(MediaType::Movie, RuleAction::Delete, None);

        let outcome = h.handler.handle(&collection, &member("m1", None)).await.unwrap();

        assert_eq!(outcome, ActionOutcome::FallbackDeleted);
        assert!(h.movies.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_companion_is_a_configuration_error() {
        let h = harness(
            library(),
            FakeMovieManager::new("radarr"),
            FakeShowManager::new("sonarr"),
        );
        let collection = collection(MediaType::Movie, RuleAction::Delete, Some("radarr-4k"));

        let err = h.handler.handle(&collection, &member("m1", None)).await.unwrap_err();
        assert!(err.is_configuration());
        assert!(h.handler.check_binding(&collection).is_err());
    }

    #[tokio::test]
    async fn test_companion_failure_is_reported_not_raised() {
        let h = harness(
            library(),
            FakeMovieManager::new("radarr").with_movie(1, 603).failing(),
            FakeShowManager::new("sonarr"),
        );
        let collection = collection(MediaType::Movie, RuleAction::Delete, Some("radarr"));

        let outcome = h.handler.handle(&collection, &member("m1", None)).await.unwrap();
        assert_eq!(outcome, ActionOutcome::Failed);
        assert!(!outcome.is_settled());
    }

    #[tokio::test]
    async fn test_known_secondary_id_skips_guid_lookup() {
        let h = harness(
            FakeMediaServer::new(),
            FakeMovieManager::new("radarr").with_movie(1, 603),
            FakeShowManager::new("sonarr"),
        );
        let collection = collection(MediaType::Movie, RuleAction::Delete, Some("radarr"));

        let outcome = h.handler.handle(&collection, &member("gone", Some(603))).await.unwrap();

        assert_eq!(outcome, ActionOutcome::Handled);
        assert_eq!(h.movies.mutating_calls(), vec!["delete_movie:1:true:false"]);
    }
}
