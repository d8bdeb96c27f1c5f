use super::{settle, unsupported, ActionHandler, ActionOutcome};
use crate::clients::{ArrEpisode, ArrSeries, LibraryItem, ShowManager};
use crate::core::error::{Result, SweepError};
use crate::db::models::{Collection, CollectionMedia, MediaType, RuleAction};
use tracing::debug;

pub(super) async fn handle(
    handler: &ActionHandler,
    manager: &dyn ShowManager,
    media_type: MediaType,
    collection: &Collection,
    member: &CollectionMedia,
    item: Option<&LibraryItem>,
) -> ActionOutcome {
    let tvdb_id = match item {
        Some(item) => handler.resolver.resolve_item(item, member.secondary_id).await,
        None => member.secondary_id,
    };
    let series = match tvdb_id {
        Some(tvdb_id) => manager.get_by_tvdb_id(tvdb_id).await,
        None => None,
    };
    let Some(series) = series else {
        debug!(
            item_id = %member.media_server_id,
            tvdb_id = ?tvdb_id,
            server = manager.name(),
            "Series not found in companion service"
        );
        return handler.fallback(collection, member).await;
    };

    let result = match media_type {
        MediaType::Show => show_scope(manager, &series, collection).await,
        MediaType::Season => {
            let Some(season) = item.and_then(|i| i.index) else {
                debug!(item_id = %member.media_server_id, "Season number unknown");
                return ActionOutcome::NotFound;
            };
            season_scope(manager, &series, season, collection).await
        }
        MediaType::Episode => {
            let numbers = item.and_then(|i| Some((i.parent_index?, i.index?)));
            let Some((season, number)) = numbers else {
                debug!(item_id = %member.media_server_id, "Episode number unknown");
                return ActionOutcome::NotFound;
            };
            episode_scope(manager, &series, season, number, collection).await
        }
        MediaType::Movie => return unsupported(collection, member, media_type),
    };

    match result {
        Ok(Some(outcome)) => outcome,
        Ok(None) => unsupported(collection, member, media_type),
        other => settle(other.map(|_| ()), collection, member),
    }
}

/// `Ok(None)` marks a documented no-op
type ScopeResult = Result<Option<ActionOutcome>>;

async fn show_scope(manager: &dyn ShowManager, series: &ArrSeries, collection: &Collection) -> ScopeResult {
    match collection.arr_action {
        RuleAction::Delete => {
            manager
                .delete_series(series.id, true, collection.list_exclusions)
                .await?;
        }
        RuleAction::Unmonitor => {
            manager.set_series_monitored(series.id, false).await?;
        }
        RuleAction::UnmonitorDeleteAll => {
            manager.set_series_monitored(series.id, false).await?;
            for season in series.seasons.iter().filter(|s| s.episode_file_count() > 0) {
                manager
                    .set_season_monitored(series.id, season.season_number, false)
                    .await?;
            }
            let episodes = episodes(manager, series.id, None).await?;
            delete_files(manager, &episodes).await?;
        }
        RuleAction::UnmonitorDeleteExisting => {
            let episodes = episodes(manager, series.id, None).await?;
            unmonitor_and_delete_existing(manager, &episodes).await?;
        }
        RuleAction::ChangeQualityProfile => {
            let Some(profile) = collection.quality_profile_id else {
                return Ok(None);
            };
            manager.set_quality_profile(series.id, profile).await?;
            if collection.replace_files_on_quality_change {
                manager.search_series(series.id).await?;
            }
        }
        RuleAction::DoNothing => return Ok(Some(ActionOutcome::Skipped)),
    }
    Ok(Some(ActionOutcome::Handled))
}

async fn season_scope(
    manager: &dyn ShowManager,
    series: &ArrSeries,
    season: i64,
    collection: &Collection,
) -> ScopeResult {
    match collection.arr_action {
        RuleAction::Delete => {
            let episodes = episodes(manager, series.id, Some(season)).await?;
            manager.set_season_monitored(series.id, season, false).await?;
            delete_files(manager, &episodes).await?;
        }
        RuleAction::Unmonitor => {
            manager.set_season_monitored(series.id, season, false).await?;
        }
        RuleAction::UnmonitorDeleteExisting => {
            let episodes = episodes(manager, series.id, Some(season)).await?;
            unmonitor_and_delete_existing(manager, &episodes).await?;
        }
        RuleAction::UnmonitorDeleteAll | RuleAction::ChangeQualityProfile => return Ok(None),
        RuleAction::DoNothing => return Ok(Some(ActionOutcome::Skipped)),
    }
    Ok(Some(ActionOutcome::Handled))
}

async fn episode_scope(
    manager: &dyn ShowManager,
    series: &ArrSeries,
    season: i64,
    number: i64,
    collection: &Collection,
) -> ScopeResult {
    let keep_file = match collection.arr_action {
        RuleAction::Delete => false,
        RuleAction::Unmonitor => true,
        RuleAction::UnmonitorDeleteAll
        | RuleAction::UnmonitorDeleteExisting
        | RuleAction::ChangeQualityProfile => return Ok(None),
        RuleAction::DoNothing => return Ok(Some(ActionOutcome::Skipped)),
    };

    let episode = episodes(manager, series.id, Some(season))
        .await?
        .into_iter()
        .find(|e| e.episode_number == number);
    let Some(episode) = episode else {
        debug!(series_id = series.id, season, episode = number, "Episode not found in companion service");
        return Ok(Some(ActionOutcome::NotFound));
    };

    manager.set_episodes_monitored(&[episode.id], false).await?;
    if !keep_file {
        if let Some(file_id) = episode.episode_file_id {
            manager.delete_episode_file(file_id).await?;
        }
    }
    Ok(Some(ActionOutcome::Handled))
}

/// An unanswered lookup is a failure, not an empty season
async fn episodes(manager: &dyn ShowManager, series_id: i64, season: Option<i64>) -> Result<Vec<ArrEpisode>> {
    manager.get_episodes(series_id, season).await.ok_or_else(|| {
        SweepError::CompanionError(format!(
            "{}: episode lookup failed for series {}",
            manager.name(),
            series_id
        ))
    })
}

async fn delete_files(manager: &dyn ShowManager, episodes: &[ArrEpisode]) -> Result<()> {
    for file_id in episodes.iter().filter_map(|e| e.episode_file_id) {
        manager.delete_episode_file(file_id).await?;
    }
    Ok(())
}

/// Episodes that have a file are unmonitored and deleted; the season stays monitored
async fn unmonitor_and_delete_existing(manager: &dyn ShowManager, episodes: &[ArrEpisode]) -> Result<()> {
    let existing: Vec<&ArrEpisode> = episodes.iter().filter(|e| e.episode_file_id.is_some()).collect();
    if existing.is_empty() {
        return Ok(());
    }

    let ids: Vec<i64> = existing.iter().map(|e| e.id).collect();
    manager.set_episodes_monitored(&ids, false).await?;
    for file_id in existing.iter().filter_map(|e| e.episode_file_id) {
        manager.delete_episode_file(file_id).await?;
    }
    Ok(())
}
