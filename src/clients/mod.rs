//! External collaborators
//!
//! The engine talks to four kinds of services through the traits in this module:
//! the media server library, the predicate engine, companion services (a movie
//! manager and a show manager), and a cross-reference catalog. Lookups answer
//! `None` for not-found, timeouts and transport errors; only mutating calls
//! return `Err`.

mod arr;
pub mod plex;
pub mod radarr;
pub mod rules;
pub mod sonarr;
pub mod tmdb;

#[cfg(test)]
pub mod fake;

use crate::core::error::Result;
use crate::db::models::{MediaType, RuleGroup};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use plex::PlexClient;
pub use radarr::RadarrClient;
pub use rules::RemotePredicateEngine;
pub use sonarr::SonarrClient;
pub use tmdb::TmdbClient;

/// An item in the media server library
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LibraryItem {
    pub id: String,
    pub title: String,
    pub media_type: MediaType,
    /// Show for a season, season for an episode
    pub parent_id: Option<String>,
    /// Show for an episode
    pub grandparent_id: Option<String>,
    /// Season number for a season, episode number for an episode
    pub index: Option<i64>,
    /// Season number for an episode
    pub parent_index: Option<i64>,
    /// External ids such as `tmdb://603`, `tvdb://81189`, `imdb://tt0133093`
    #[serde(default)]
    pub guids: Vec<String>,
}

impl LibraryItem {
    /// Numeric id from a `scheme://value` guid
    pub fn guid_number(&self, scheme: &str) -> Option<i64> {
        self.guid_value(scheme).and_then(|v| v.parse().ok())
    }

    pub fn guid_value(&self, scheme: &str) -> Option<&str> {
        let prefix = format!("{}://", scheme);
        self.guids
            .iter()
            .find_map(|guid| guid.strip_prefix(prefix.as_str()))
    }

    /// The show this item belongs to, for items in the show hierarchy
    pub fn show_id(&self) -> Option<&str> {
        match self.media_type {
            MediaType::Movie => None,
            MediaType::Show => Some(self.id.as_str()),
            MediaType::Season => self.parent_id.as_deref(),
            MediaType::Episode => self.grandparent_id.as_deref(),
        }
    }
}

/// One page request against a library
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
    pub media_type: MediaType,
}

#[derive(Debug, Clone, Default)]
pub struct LibraryPage {
    pub items: Vec<LibraryItem>,
    pub total_size: usize,
}

/// A collection as the media server reports it
#[derive(Debug, Clone, PartialEq)]
pub struct MediaCollection {
    pub id: String,
    pub title: String,
    pub child_count: usize,
}

#[derive(Debug, Clone)]
pub struct CreateCollection {
    pub library_id: String,
    pub title: String,
    pub media_type: MediaType,
}

/// Library adapter for the media server
#[async_trait]
pub trait MediaServer: Send + Sync {
    /// `None` when the library is unreachable
    async fn get_library_contents(&self, library_id: &str, page: PageRequest) -> Option<LibraryPage>;

    async fn get_metadata(&self, item_id: &str) -> Option<LibraryItem>;

    async fn get_collection(&self, collection_id: &str) -> Option<MediaCollection>;

    /// `None` when the collection could not be read
    async fn get_collection_children(&self, collection_id: &str) -> Option<Vec<LibraryItem>>;

    /// Returns the id of the new collection
    async fn create_collection(&self, request: &CreateCollection) -> Result<String>;

    async fn delete_collection(&self, collection_id: &str) -> Result<()>;

    async fn add_to_collection(&self, collection_id: &str, item_id: &str) -> Result<()>;

    async fn remove_from_collection(&self, collection_id: &str, item_id: &str) -> Result<()>;

    async fn delete_from_disk(&self, item_id: &str) -> Result<()>;
}

/// Per-item trace of which rules matched, attached to collection logs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonStatistic {
    #[serde(rename = "plexId")]
    pub item_id: String,
    pub result: bool,
    #[serde(default, rename = "sectionResults")]
    pub section_results: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub data: Vec<LibraryItem>,
    #[serde(default)]
    pub stats: Vec<ComparisonStatistic>,
}

/// Called with the number of evaluations completed within the current page
pub type ProgressCallback<'a> = &'a (dyn Fn(usize) + Send + Sync);

/// Opaque evaluator of a rule group's predicates
#[async_trait]
pub trait PredicateEngine: Send + Sync {
    async fn evaluate(
        &self,
        rule_group: &RuleGroup,
        items: &[LibraryItem],
        on_progress: ProgressCallback<'_>,
        token: &CancellationToken,
    ) -> Result<EvaluationResult>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrMovie {
    pub id: i64,
    pub title: String,
    pub monitored: bool,
    #[serde(default, rename = "hasFile")]
    pub has_file: bool,
    #[serde(rename = "tmdbId")]
    pub tmdb_id: i64,
}

/// Fields to change on a movie; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MoviePatch {
    pub monitored: Option<bool>,
    pub quality_profile_id: Option<i64>,
    /// Remove the movie file as part of the update
    pub delete_files: bool,
}

/// Movie-oriented companion service
#[async_trait]
pub trait MovieManager: Send + Sync {
    fn name(&self) -> &str;

    async fn get_by_tmdb_id(&self, tmdb_id: i64) -> Option<ArrMovie>;

    async fn delete_movie(&self, movie_id: i64, delete_files: bool, add_exclusion: bool) -> Result<()>;

    async fn update_movie(&self, movie_id: i64, patch: &MoviePatch) -> Result<()>;

    async fn add_exclusion(&self, movie: &ArrMovie) -> Result<()>;

    async fn search_movie(&self, movie_id: i64) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrSeason {
    #[serde(rename = "seasonNumber")]
    pub season_number: i64,
    pub monitored: bool,
    #[serde(default)]
    pub statistics: Option<SeasonStatistics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonStatistics {
    #[serde(default, rename = "episodeFileCount")]
    pub episode_file_count: i64,
}

impl ArrSeason {
    pub fn episode_file_count(&self) -> i64 {
        self.statistics.as_ref().map_or(0, |s| s.episode_file_count)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrSeries {
    pub id: i64,
    pub title: String,
    pub monitored: bool,
    #[serde(rename = "tvdbId")]
    pub tvdb_id: i64,
    #[serde(default)]
    pub seasons: Vec<ArrSeason>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrEpisode {
    pub id: i64,
    #[serde(rename = "seasonNumber")]
    pub season_number: i64,
    #[serde(rename = "episodeNumber")]
    pub episode_number: i64,
    pub monitored: bool,
    #[serde(default, rename = "hasFile")]
    pub has_file: bool,
    #[serde(default, rename = "episodeFileId")]
    pub episode_file_id: Option<i64>,
}

/// Show-oriented companion service
#[async_trait]
pub trait ShowManager: Send + Sync {
    fn name(&self) -> &str;

    async fn get_by_tvdb_id(&self, tvdb_id: i64) -> Option<ArrSeries>;

    async fn delete_series(&self, series_id: i64, delete_files: bool, add_exclusion: bool) -> Result<()>;

    async fn set_series_monitored(&self, series_id: i64, monitored: bool) -> Result<()>;

    async fn set_season_monitored(&self, series_id: i64, season_number: i64, monitored: bool) -> Result<()>;

    async fn set_quality_profile(&self, series_id: i64, quality_profile_id: i64) -> Result<()>;

    /// All episodes of a series, or only those of one season
    async fn get_episodes(&self, series_id: i64, season_number: Option<i64>) -> Option<Vec<ArrEpisode>>;

    async fn set_episodes_monitored(&self, episode_ids: &[i64], monitored: bool) -> Result<()>;

    async fn delete_episode_file(&self, episode_file_id: i64) -> Result<()>;

    async fn search_series(&self, series_id: i64) -> Result<()>;
}

/// Third catalog used to cross-reference ids the media server does not carry
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    /// Catalog (tmdb) id for an imdb id
    async fn tmdb_from_imdb(&self, imdb_id: &str, media_type: MediaType) -> Option<i64>;

    /// tvdb id of a show known by its tmdb id
    async fn tvdb_from_tmdb_show(&self, tmdb_id: i64) -> Option<i64>;
}

/// Configured companion services, addressed by name from a collection
#[derive(Clone, Default)]
pub struct CompanionRegistry {
    movie_managers: HashMap<String, Arc<dyn MovieManager>>,
    show_managers: HashMap<String, Arc<dyn ShowManager>>,
}

impl CompanionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_movie_manager(mut self, manager: Arc<dyn MovieManager>) -> Self {
        self.movie_managers.insert(manager.name().to_string(), manager);
        self
    }

    pub fn with_show_manager(mut self, manager: Arc<dyn ShowManager>) -> Self {
        self.show_managers.insert(manager.name().to_string(), manager);
        self
    }

    pub fn movie_manager(&self, name: &str) -> Option<Arc<dyn MovieManager>> {
        self.movie_managers.get(name).cloned()
    }

    pub fn show_manager(&self, name: &str) -> Option<Arc<dyn ShowManager>> {
        self.show_managers.get(name).cloned()
    }
}
