//! TMDB cross-reference lookups

use super::CatalogLookup;
use crate::core::config::TmdbConfig;
use crate::core::error::{Result, SweepError};
use crate::db::models::MediaType;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const BASE_URL: &str = "https://api.themoviedb.org/3";

pub struct TmdbClient {
    client: Client,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct FindResponse {
    #[serde(default)]
    movie_results: Vec<IdOnly>,
    #[serde(default)]
    tv_results: Vec<IdOnly>,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct ExternalIds {
    tvdb_id: Option<i64>,
}

impl TmdbClient {
    /// `None` when no API key is configured
    pub fn from_config(config: &TmdbConfig) -> Result<Option<Self>> {
        let Some(api_key) = config.api_key.as_ref().filter(|k| !k.is_empty()) else {
            return Ok(None);
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SweepError::InitializationError(format!("tmdb http client: {}", e)))?;

        Ok(Some(Self::with_client(client, api_key)))
    }

    pub fn with_client(client: Client, api_key: &str) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", BASE_URL, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let response = self
            .client
            .get(self.url(path))
            .query(&[("api_key", self.api_key.as_str())])
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SweepError::NetworkError(format!(
                "tmdb returned {}: {}",
                status.as_u16(),
                message
            )));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl CatalogLookup for TmdbClient {
    async fn tmdb_from_imdb(&self, imdb_id: &str, media_type: MediaType) -> Option<i64> {
        let found: FindResponse = match self
            .get(
                &format!("/find/{}", imdb_id),
                &[("external_source", "imdb_id")],
            )
            .await
        {
            Ok(found) => found,
            Err(e) => {
                debug!(imdb_id = %imdb_id, error = %e, "TMDB find failed");
                return None;
            }
        };

        let results = match media_type {
            MediaType::Movie => found.movie_results,
            _ => found.tv_results,
        };
        results.first().map(|r| r.id)
    }

    async fn tvdb_from_tmdb_show(&self, tmdb_id: i64) -> Option<i64> {
        match self
            .get::<ExternalIds>(&format!("/tv/{}/external_ids", tmdb_id), &[])
            .await
        {
            Ok(ids) => ids.tvdb_id,
            Err(e) => {
                debug!(tmdb_id, error = %e, "TMDB external id lookup failed");
                None
            }
        }
    }
}
