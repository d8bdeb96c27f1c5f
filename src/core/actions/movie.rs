use super::{settle, unsupported, ActionHandler, ActionOutcome};
use crate::clients::{LibraryItem, MovieManager, MoviePatch};
use crate::db::models::{Collection, CollectionMedia, MediaType, RuleAction};
use tracing::debug;

pub(super) async fn handle(
    handler: &ActionHandler,
    manager: &dyn MovieManager,
    collection: &Collection,
    member: &CollectionMedia,
    item: Option<&LibraryItem>,
) -> ActionOutcome {
    let tmdb_id = match item {
        Some(item) => handler.resolver.resolve_item(item, member.secondary_id).await,
        None => member.secondary_id,
    };
    let movie = match tmdb_id {
        Some(tmdb_id) => manager.get_by_tmdb_id(tmdb_id).await,
        None => None,
    };
    let Some(movie) = movie else {
        debug!(
            item_id = %member.media_server_id,
            tmdb_id = ?tmdb_id,
            server = manager.name(),
            "Movie not found in companion service"
        );
        return handler.fallback(collection, member).await;
    };

    match collection.arr_action {
        RuleAction::Delete | RuleAction::UnmonitorDeleteExisting => settle(
            manager
                .delete_movie(movie.id, true, collection.list_exclusions)
                .await,
            collection,
            member,
        ),
        RuleAction::Unmonitor => {
            let patch = MoviePatch {
                monitored: Some(false),
                ..MoviePatch::default()
            };
            let outcome = settle(manager.update_movie(movie.id, &patch).await, collection, member);
            if outcome == ActionOutcome::Handled && collection.list_exclusions {
                return settle(manager.add_exclusion(&movie).await, collection, member);
            }
            outcome
        }
        RuleAction::UnmonitorDeleteAll => {
            let patch = MoviePatch {
                monitored: Some(false),
                delete_files: true,
                ..MoviePatch::default()
            };
            settle(manager.update_movie(movie.id, &patch).await, collection, member)
        }
        RuleAction::ChangeQualityProfile => {
            let Some(profile) = collection.quality_profile_id else {
                return unsupported(collection, member, MediaType::Movie);
            };
            let patch = MoviePatch {
                quality_profile_id: Some(profile),
                delete_files: collection.replace_files_on_quality_change,
                ..MoviePatch::default()
            };
            let outcome = settle(manager.update_movie(movie.id, &patch).await, collection, member);
            if outcome == ActionOutcome::Handled && collection.replace_files_on_quality_change {
                return settle(manager.search_movie(movie.id).await, collection, member);
            }
            outcome
        }
        RuleAction::DoNothing => ActionOutcome::Skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{collection, harness, member};
    use super::*;
    use crate::clients::fake::{self, FakeMediaServer, FakeMovieManager, FakeShowManager};

    #[tokio::test]
    async fn test_unmonitor_adds_list_exclusion_when_configured() {
        let h = harness(
            FakeMediaServer::new().with_metadata(fake::movie("m1", 603)),
            FakeMovieManager::new("radarr").with_movie(1, 603),
            FakeShowManager::new("sonarr"),
        );
        let mut collection = collection(MediaType::Movie, RuleAction::Unmonitor, Some("radarr"));
        collection.list_exclusions = true;

        let outcome = h.handler.handle(&collection, &member("m1", None)).await.unwrap();

        assert_eq!(outcome, ActionOutcome::Handled);
        assert_eq!(
            h.movies.mutating_calls(),
            vec![
                "update_movie:1:monitored=Some(false):profile=None:delete_files=false",
                "add_exclusion:603",
            ]
        );
    }

    #[tokio::test]
    async fn test_quality_change_without_profile_is_a_no_op() {
        let h = harness(
            FakeMediaServer::new().with_metadata(fake::movie("m1", 603)),
            FakeMovieManager::new("radarr").with_movie(1, 603),
            FakeShowManager::new("sonarr"),
        );
        let collection = collection(MediaType::Movie, RuleAction::ChangeQualityProfile, Some("radarr"));

        let outcome = h.handler.handle(&collection, &member("m1", None)).await.unwrap();

        assert_eq!(outcome, ActionOutcome::Unsupported);
        assert!(h.movies.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_quality_change_without_replace_skips_search() {
        let h = harness(
            FakeMediaServer::new().with_metadata(fake::movie("m1", 603)),
            FakeMovieManager::new("radarr").with_movie(1, 603),
            FakeShowManager::new("sonarr"),
        );
        let mut collection = collection(MediaType::Movie, RuleAction::ChangeQualityProfile, Some("radarr"));
        collection.quality_profile_id = Some(4);

        h.handler.handle(&collection, &member("m1", None)).await.unwrap();

        assert_eq!(
            h.movies.mutating_calls(),
            vec!["update_movie:1:monitored=None:profile=Some(4):delete_files=false"]
        );
    }
}
