//! In-process collaborators that record every call

use super::*;
use crate::core::error::SweepError;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap()
}

pub fn movie(id: &str, tmdb_id: i64) -> LibraryItem {
    LibraryItem {
        id: id.to_string(),
        title: format!("Movie {}", id),
        media_type: MediaType::Movie,
        parent_id: None,
        grandparent_id: None,
        index: None,
        parent_index: None,
        guids: vec![format!("tmdb://{}", tmdb_id)],
    }
}

pub fn show(id: &str, tvdb_id: i64) -> LibraryItem {
    LibraryItem {
        id: id.to_string(),
        title: format!("Show {}", id),
        media_type: MediaType::Show,
        parent_id: None,
        grandparent_id: None,
        index: None,
        parent_index: None,
        guids: vec![format!("tvdb://{}", tvdb_id)],
    }
}

pub fn season(id: &str, show_id: &str, number: i64) -> LibraryItem {
    LibraryItem {
        id: id.to_string(),
        title: format!("Season {}", number),
        media_type: MediaType::Season,
        parent_id: Some(show_id.to_string()),
        grandparent_id: None,
        index: Some(number),
        parent_index: None,
        guids: vec![],
    }
}

pub fn episode(id: &str, season_id: &str, show_id: &str, season: i64, number: i64) -> LibraryItem {
    LibraryItem {
        id: id.to_string(),
        title: format!("Episode {}", number),
        media_type: MediaType::Episode,
        parent_id: Some(season_id.to_string()),
        grandparent_id: Some(show_id.to_string()),
        index: Some(number),
        parent_index: Some(season),
        guids: vec![],
    }
}

#[derive(Default)]
pub struct FakeMediaServer {
    library: Mutex<Vec<LibraryItem>>,
    unreachable: Mutex<bool>,
    unreachable_from: Mutex<Option<usize>>,
    failing_removals: Mutex<bool>,
    metadata: Mutex<HashMap<String, LibraryItem>>,
    collections: Mutex<HashMap<String, Vec<String>>>,
    scripted_children: Mutex<VecDeque<Option<Vec<LibraryItem>>>>,
    next_collection: Mutex<u64>,
    pages: Mutex<Vec<PageRequest>>,
    calls: Mutex<Vec<String>>,
}

impl FakeMediaServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_library(self, items: Vec<LibraryItem>) -> Self {
        for item in &items {
            lock(&self.metadata).insert(item.id.clone(), item.clone());
        }
        *lock(&self.library) = items;
        self
    }

    pub fn with_metadata(self, item: LibraryItem) -> Self {
        lock(&self.metadata).insert(item.id.clone(), item);
        self
    }

    pub fn with_collection(self, id: &str, children: &[&str]) -> Self {
        lock(&self.collections).insert(
            id.to_string(),
            children.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    pub fn unreachable(self) -> Self {
        *lock(&self.unreachable) = true;
        self
    }

    /// Library pages at or past `offset` come back as unreachable
    pub fn unreachable_from(self, offset: usize) -> Self {
        *lock(&self.unreachable_from) = Some(offset);
        self
    }

    /// `remove_from_collection` times out and leaves the collection unchanged
    pub fn failing_removals(self) -> Self {
        *lock(&self.failing_removals) = true;
        self
    }

    /// Queue answers for `get_collection_children`, consumed before the real state
    pub fn script_children(&self, answer: Option<Vec<LibraryItem>>) {
        lock(&self.scripted_children).push_back(answer);
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("get_"))
            .collect()
    }

    pub fn pages(&self) -> Vec<PageRequest> {
        lock(&self.pages).clone()
    }

    pub fn children_of(&self, collection_id: &str) -> Vec<String> {
        lock(&self.collections)
            .get(collection_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_collection(&self, collection_id: &str) -> bool {
        lock(&self.collections).contains_key(collection_id)
    }

    /// Simulate a user editing the collection directly in the media server
    pub fn user_adds(&self, collection_id: &str, item: LibraryItem) {
        lock(&self.collections)
            .entry(collection_id.to_string())
            .or_default()
            .push(item.id.clone());
        lock(&self.metadata).insert(item.id.clone(), item);
    }

    fn record(&self, call: String) {
        lock(&self.calls).push(call);
    }

    fn item(&self, id: &str) -> LibraryItem {
        lock(&self.metadata)
            .get(id)
            .cloned()
            .unwrap_or_else(|| movie(id, 0))
    }
}

#[async_trait]
impl MediaServer for FakeMediaServer {
    async fn get_library_contents(&self, library_id: &str, page: PageRequest) -> Option<LibraryPage> {
        self.record(format!("get_library_contents:{}:{}", library_id, page.offset));
        lock(&self.pages).push(page);

        if *lock(&self.unreachable) {
            return None;
        }
        if lock(&self.unreachable_from).is_some_and(|from| page.offset >= from) {
            return None;
        }

        let library = lock(&self.library);
        let items = library
            .iter()
            .filter(|i| i.media_type == page.media_type)
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect();
        let total_size = library
            .iter()
            .filter(|i| i.media_type == page.media_type)
            .count();

        Some(LibraryPage { items, total_size })
    }

    async fn get_metadata(&self, item_id: &str) -> Option<LibraryItem> {
        self.record(format!("get_metadata:{}", item_id));
        lock(&self.metadata).get(item_id).cloned()
    }

    async fn get_collection(&self, collection_id: &str) -> Option<MediaCollection> {
        self.record(format!("get_collection:{}", collection_id));
        lock(&self.collections)
            .get(collection_id)
            .map(|children| MediaCollection {
                id: collection_id.to_string(),
                title: String::new(),
                child_count: children.len(),
            })
    }

    async fn get_collection_children(&self, collection_id: &str) -> Option<Vec<LibraryItem>> {
        self.record(format!("get_collection_children:{}", collection_id));
        if let Some(answer) = lock(&self.scripted_children).pop_front() {
            return answer;
        }
        let ids = lock(&self.collections).get(collection_id).cloned()?;
        Some(ids.iter().map(|id| self.item(id)).collect())
    }

    async fn create_collection(&self, request: &CreateCollection) -> Result<String> {
        self.record(format!("create_collection:{}", request.title));
        let id = {
            let mut next = lock(&self.next_collection);
            *next += 1;
            format!("c{}", *next)
        };
        lock(&self.collections).insert(id.clone(), Vec::new());
        Ok(id)
    }

    async fn delete_collection(&self, collection_id: &str) -> Result<()> {
        self.record(format!("delete_collection:{}", collection_id));
        lock(&self.collections).remove(collection_id);
        Ok(())
    }

    async fn add_to_collection(&self, collection_id: &str, item_id: &str) -> Result<()> {
        self.record(format!("add_to_collection:{}:{}", collection_id, item_id));
        let mut collections = lock(&self.collections);
        let children = collections
            .get_mut(collection_id)
            .ok_or_else(|| SweepError::MediaServerError(format!("no collection {}", collection_id)))?;
        if !children.iter().any(|c| c == item_id) {
            children.push(item_id.to_string());
        }
        Ok(())
    }

    async fn remove_from_collection(&self, collection_id: &str, item_id: &str) -> Result<()> {
        self.record(format!("remove_from_collection:{}:{}", collection_id, item_id));
        if *lock(&self.failing_removals) {
            return Err(SweepError::Timeout(format!("removing {}", item_id)));
        }
        if let Some(children) = lock(&self.collections).get_mut(collection_id) {
            children.retain(|c| c != item_id);
        }
        Ok(())
    }

    async fn delete_from_disk(&self, item_id: &str) -> Result<()> {
        self.record(format!("delete_from_disk:{}", item_id));
        Ok(())
    }
}

/// Passes the configured item ids and can cancel the run after a number of pages
#[derive(Default)]
pub struct FakePredicateEngine {
    passing: Mutex<HashSet<String>>,
    cancel_after_pages: Mutex<Option<usize>>,
    pages_seen: Mutex<Vec<usize>>,
}

impl FakePredicateEngine {
    pub fn passing(ids: &[&str]) -> Self {
        let engine = Self::default();
        *lock(&engine.passing) = ids.iter().map(|s| s.to_string()).collect();
        engine
    }

    pub fn cancel_after_pages(self, pages: usize) -> Self {
        *lock(&self.cancel_after_pages) = Some(pages);
        self
    }

    /// Number of items in each evaluated page
    pub fn pages_seen(&self) -> Vec<usize> {
        lock(&self.pages_seen).clone()
    }
}

#[async_trait]
impl PredicateEngine for FakePredicateEngine {
    async fn evaluate(
        &self,
        _rule_group: &RuleGroup,
        items: &[LibraryItem],
        on_progress: ProgressCallback<'_>,
        token: &CancellationToken,
    ) -> Result<EvaluationResult> {
        let passing = lock(&self.passing).clone();
        let mut result = EvaluationResult::default();

        for (done, item) in items.iter().enumerate() {
            let matched = passing.contains(&item.id);
            if matched {
                result.data.push(item.clone());
            }
            result.stats.push(ComparisonStatistic {
                item_id: item.id.clone(),
                result: matched,
                section_results: serde_json::Value::Null,
            });
            on_progress(done + 1);
        }

        let seen = {
            let mut pages = lock(&self.pages_seen);
            pages.push(items.len());
            pages.len()
        };
        if *lock(&self.cancel_after_pages) == Some(seen) {
            token.cancel();
        }

        Ok(result)
    }
}

#[derive(Default)]
pub struct FakeMovieManager {
    name: String,
    movies: Mutex<HashMap<i64, ArrMovie>>,
    fail_mutations: Mutex<bool>,
    calls: Mutex<Vec<String>>,
}

impl FakeMovieManager {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_movie(self, id: i64, tmdb_id: i64) -> Self {
        lock(&self.movies).insert(
            tmdb_id,
            ArrMovie {
                id,
                title: format!("Movie {}", id),
                monitored: true,
                has_file: true,
                tmdb_id,
            },
        );
        self
    }

    pub fn failing(self) -> Self {
        *lock(&self.fail_mutations) = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("get_"))
            .collect()
    }

    fn mutate(&self, call: String) -> Result<()> {
        lock(&self.calls).push(call);
        if *lock(&self.fail_mutations) {
            return Err(SweepError::CompanionError("radarr unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl MovieManager for FakeMovieManager {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_by_tmdb_id(&self, tmdb_id: i64) -> Option<ArrMovie> {
        lock(&self.calls).push(format!("get_by_tmdb_id:{}", tmdb_id));
        lock(&self.movies).get(&tmdb_id).cloned()
    }

    async fn delete_movie(&self, movie_id: i64, delete_files: bool, add_exclusion: bool) -> Result<()> {
        self.mutate(format!("delete_movie:{}:{}:{}", movie_id, delete_files, add_exclusion))
    }

    async fn update_movie(&self, movie_id: i64, patch: &MoviePatch) -> Result<()> {
        self.mutate(format!(
            "update_movie:{}:monitored={:?}:profile={:?}:delete_files={}",
            movie_id, patch.monitored, patch.quality_profile_id, patch.delete_files
        ))
    }

    async fn add_exclusion(&self, movie: &ArrMovie) -> Result<()> {
        self.mutate(format!("add_exclusion:{}", movie.tmdb_id))
    }

    async fn search_movie(&self, movie_id: i64) -> Result<()> {
        self.mutate(format!("search_movie:{}", movie_id))
    }
}

fn season_entry(number: i64, files: i64) -> ArrSeason {
    ArrSeason {
        season_number: number,
        monitored: true,
        statistics: Some(SeasonStatistics {
            episode_file_count: files,
        }),
    }
}

#[derive(Default)]
pub struct FakeShowManager {
    name: String,
    series: Mutex<HashMap<i64, ArrSeries>>,
    episodes: Mutex<HashMap<i64, Vec<ArrEpisode>>>,
    episodes_unreachable: Mutex<bool>,
    calls: Mutex<Vec<String>>,
}

impl FakeShowManager {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// A series with two seasons; season 1 fully downloaded, season 2 with one file
    pub fn with_series(self, id: i64, tvdb_id: i64) -> Self {
        lock(&self.series).insert(
            tvdb_id,
            ArrSeries {
                id,
                title: format!("Series {}", id),
                monitored: true,
                tvdb_id,
                seasons: vec![season_entry(1, 2), season_entry(2, 1)],
            },
        );
        let episode = |eid: i64, season: i64, number: i64, file: Option<i64>| ArrEpisode {
            id: eid,
            season_number: season,
            episode_number: number,
            monitored: true,
            has_file: file.is_some(),
            episode_file_id: file,
        };
        lock(&self.episodes).insert(
            id,
            vec![
                episode(11, 1, 1, Some(111)),
                episode(12, 1, 2, Some(112)),
                episode(21, 2, 1, Some(121)),
                episode(22, 2, 2, None),
            ],
        );
        self
    }

    /// Episode lookups fail as if the service timed out
    pub fn episodes_unreachable(self) -> Self {
        *lock(&self.episodes_unreachable) = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("get_"))
            .collect()
    }

    fn mutate(&self, call: String) -> Result<()> {
        lock(&self.calls).push(call);
        Ok(())
    }
}

#[async_trait]
impl ShowManager for FakeShowManager {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_by_tvdb_id(&self, tvdb_id: i64) -> Option<ArrSeries> {
        lock(&self.calls).push(format!("get_by_tvdb_id:{}", tvdb_id));
        lock(&self.series).get(&tvdb_id).cloned()
    }

    async fn delete_series(&self, series_id: i64, delete_files: bool, add_exclusion: bool) -> Result<()> {
        self.mutate(format!("delete_series:{}:{}:{}", series_id, delete_files, add_exclusion))
    }

    async fn set_series_monitored(&self, series_id: i64, monitored: bool) -> Result<()> {
        self.mutate(format!("set_series_monitored:{}:{}", series_id, monitored))
    }

    async fn set_season_monitored(&self, series_id: i64, season_number: i64, monitored: bool) -> Result<()> {
        self.mutate(format!(
            "set_season_monitored:{}:{}:{}",
            series_id, season_number, monitored
        ))
    }

    async fn set_quality_profile(&self, series_id: i64, quality_profile_id: i64) -> Result<()> {
        self.mutate(format!("set_quality_profile:{}:{}", series_id, quality_profile_id))
    }

    async fn get_episodes(&self, series_id: i64, season_number: Option<i64>) -> Option<Vec<ArrEpisode>> {
        lock(&self.calls).push(format!("get_episodes:{}:{:?}", series_id, season_number));
        if *lock(&self.episodes_unreachable) {
            return None;
        }
        let episodes = lock(&self.episodes).get(&series_id).cloned()?;
        Some(
            episodes
                .into_iter()
                .filter(|e| season_number.map_or(true, |s| e.season_number == s))
                .collect(),
        )
    }

    async fn set_episodes_monitored(&self, episode_ids: &[i64], monitored: bool) -> Result<()> {
        self.mutate(format!("set_episodes_monitored:{:?}:{}", episode_ids, monitored))
    }

    async fn delete_episode_file(&self, episode_file_id: i64) -> Result<()> {
        self.mutate(format!("delete_episode_file:{}", episode_file_id))
    }

    async fn search_series(&self, series_id: i64) -> Result<()> {
        self.mutate(format!("search_series:{}", series_id))
    }
}

#[derive(Default)]
pub struct FakeCatalog {
    imdb: Mutex<HashMap<String, i64>>,
    tvdb: Mutex<HashMap<i64, i64>>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_imdb(self, imdb_id: &str, tmdb_id: i64) -> Self {
        lock(&self.imdb).insert(imdb_id.to_string(), tmdb_id);
        self
    }

    pub fn with_tvdb(self, tmdb_id: i64, tvdb_id: i64) -> Self {
        lock(&self.tvdb).insert(tmdb_id, tvdb_id);
        self
    }
}

#[async_trait]
impl CatalogLookup for FakeCatalog {
    async fn tmdb_from_imdb(&self, imdb_id: &str, _media_type: MediaType) -> Option<i64> {
        lock(&self.imdb).get(imdb_id).copied()
    }

    async fn tvdb_from_tmdb_show(&self, tmdb_id: i64) -> Option<i64> {
        lock(&self.tvdb).get(&tmdb_id).copied()
    }
}
