//! Radarr companion adapter

use super::arr::ArrApi;
use super::{ArrMovie, MovieManager, MoviePatch};
use crate::core::config::CompanionConfig;
use crate::core::error::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

pub struct RadarrClient {
    api: ArrApi,
}

impl RadarrClient {
    pub fn new(config: &CompanionConfig) -> Result<Self> {
        Ok(Self {
            api: ArrApi::new(config)?,
        })
    }

    /// Apply the patch to the movie's full resource
    ///
    /// The v3 API replaces the whole resource on PUT, so the current one is
    /// read first.
    fn apply_patch(resource: &mut Value, patch: &MoviePatch) {
        if let Some(monitored) = patch.monitored {
            resource["monitored"] = Value::Bool(monitored);
        }
        if let Some(profile) = patch.quality_profile_id {
            resource["qualityProfileId"] = Value::from(profile);
        }
    }
}

#[async_trait]
impl MovieManager for RadarrClient {
    fn name(&self) -> &str {
        self.api.name()
    }

    async fn get_by_tmdb_id(&self, tmdb_id: i64) -> Option<ArrMovie> {
        match self
            .api
            .get::<Vec<ArrMovie>>("/movie", &[("tmdbId", tmdb_id.to_string())])
            .await
        {
            Ok(movies) => movies.into_iter().next(),
            Err(e) => {
                debug!(server = %self.api.name(), tmdb_id, error = %e, "Movie lookup failed");
                None
            }
        }
    }

    async fn delete_movie(&self, movie_id: i64, delete_files: bool, add_exclusion: bool) -> Result<()> {
        self.api
            .delete(
                &format!("/movie/{}", movie_id),
                &[
                    ("deleteFiles", delete_files.to_string()),
                    ("addImportExclusion", add_exclusion.to_string()),
                ],
            )
            .await?;
        info!(server = %self.api.name(), movie_id, "Removed movie");
        Ok(())
    }

    async fn update_movie(&self, movie_id: i64, patch: &MoviePatch) -> Result<()> {
        let path = format!("/movie/{}", movie_id);
        let mut resource: Value = self.api.get(&path, &[]).await?;

        if patch.delete_files {
            if let Some(file_id) = resource["movieFile"]["id"].as_i64() {
                self.api
                    .delete(&format!("/moviefile/{}", file_id), &[])
                    .await?;
            }
        }

        Self::apply_patch(&mut resource, patch);
        self.api.put(&path, &resource).await
    }

    async fn add_exclusion(&self, movie: &ArrMovie) -> Result<()> {
        self.api
            .post(
                "/exclusions",
                &json!({ "tmdbId": movie.tmdb_id, "movieTitle": movie.title }),
            )
            .await
    }

    async fn search_movie(&self, movie_id: i64) -> Result<()> {
        self.api
            .post(
                "/command",
                &json!({ "name": "MoviesSearch", "movieIds": [movie_id] }),
            )
            .await
    }
}
