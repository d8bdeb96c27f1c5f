//! Sonarr companion adapter

use super::arr::ArrApi;
use super::{ArrEpisode, ArrSeries, ShowManager};
use crate::core::config::CompanionConfig;
use crate::core::error::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

pub struct SonarrClient {
    api: ArrApi,
}

impl SonarrClient {
    pub fn new(config: &CompanionConfig) -> Result<Self> {
        Ok(Self {
            api: ArrApi::new(config)?,
        })
    }

    async fn series_resource(&self, series_id: i64) -> Result<Value> {
        self.api.get(&format!("/series/{}", series_id), &[]).await
    }

    async fn put_series(&self, series_id: i64, resource: &Value) -> Result<()> {
        self.api.put(&format!("/series/{}", series_id), resource).await
    }
}

fn set_season_flag(resource: &mut Value, season_number: i64, monitored: bool) -> bool {
    let Some(seasons) = resource["seasons"].as_array_mut() else {
        return false;
    };
    let mut found = false;
    for season in seasons
        .iter_mut()
        .filter(|s| s["seasonNumber"].as_i64() == Some(season_number))
    {
        season["monitored"] = Value::Bool(monitored);
        found = true;
    }
    found
}

#[async_trait]
impl ShowManager for SonarrClient {
    fn name(&self) -> &str {
        self.api.name()
    }

    async fn get_by_tvdb_id(&self, tvdb_id: i64) -> Option<ArrSeries> {
        match self
            .api
            .get::<Vec<ArrSeries>>("/series", &[("tvdbId", tvdb_id.to_string())])
            .await
        {
            Ok(series) => series.into_iter().next(),
            Err(e) => {
                debug!(server = %self.api.name(), tvdb_id, error = %e, "Series lookup failed");
                None
            }
        }
    }

    async fn delete_series(&self, series_id: i64, delete_files: bool, add_exclusion: bool) -> Result<()> {
        self.api
            .delete(
                &format!("/series/{}", series_id),
                &[
                    ("deleteFiles", delete_files.to_string()),
                    ("addImportListExclusion", add_exclusion.to_string()),
                ],
            )
            .await?;
        info!(server = %self.api.name(), series_id, "Removed series");
        Ok(())
    }

    async fn set_series_monitored(&self, series_id: i64, monitored: bool) -> Result<()> {
        let mut resource = self.series_resource(series_id).await?;
        resource["monitored"] = Value::Bool(monitored);
        self.put_series(series_id, &resource).await
    }

    async fn set_season_monitored(&self, series_id: i64, season_number: i64, monitored: bool) -> Result<()> {
        let mut resource = self.series_resource(series_id).await?;
        if !set_season_flag(&mut resource, season_number, monitored) {
            debug!(series_id, season_number, "Season not present in series resource");
            return Ok(());
        }
        self.put_series(series_id, &resource).await
    }

    async fn set_quality_profile(&self, series_id: i64, quality_profile_id: i64) -> Result<()> {
        let mut resource = self.series_resource(series_id).await?;
        resource["qualityProfileId"] = Value::from(quality_profile_id);
        self.put_series(series_id, &resource).await
    }

    async fn get_episodes(&self, series_id: i64, season_number: Option<i64>) -> Option<Vec<ArrEpisode>> {
        let mut query = vec![("seriesId", series_id.to_string())];
        if let Some(season) = season_number {
            query.push(("seasonNumber", season.to_string()));
        }

        match self.api.get::<Vec<ArrEpisode>>("/episode", &query).await {
            Ok(episodes) => Some(episodes),
            Err(e) => {
                debug!(server = %self.api.name(), series_id, error = %e, "Episode lookup failed");
                None
            }
        }
    }

    async fn set_episodes_monitored(&self, episode_ids: &[i64], monitored: bool) -> Result<()> {
        if episode_ids.is_empty() {
            return Ok(());
        }
        self.api
            .put(
                "/episode/monitor",
                &json!({ "episodeIds": episode_ids, "monitored": monitored }),
            )
            .await
    }

    async fn delete_episode_file(&self, episode_file_id: i64) -> Result<()> {
        self.api
            .delete(&format!("/episodefile/{}", episode_file_id), &[])
            .await
    }

    async fn search_series(&self, series_id: i64) -> Result<()> {
        self.api
            .post(
                "/command",
                &json!({ "name": "SeriesSearch", "seriesId": series_id }),
            )
            .await
    }
}
