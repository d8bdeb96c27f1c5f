//! Secondary catalog id resolution
//!
//! Movies are addressed in the movie manager by their tmdb id, everything in
//! the show hierarchy by the tvdb id of the show it belongs to.

use crate::clients::{CatalogLookup, LibraryItem, MediaServer};
use crate::db::models::MediaType;
use std::sync::Arc;
use tracing::debug;

/// The id a membership record can carry without any lookups
pub fn embedded_id(item: &LibraryItem) -> Option<i64> {
    match item.media_type {
        MediaType::Movie => item.guid_number("tmdb"),
        MediaType::Show => item.guid_number("tvdb"),
        MediaType::Season | MediaType::Episode => None,
    }
}

pub struct IdentifierResolver {
    media_server: Arc<dyn MediaServer>,
    catalog: Option<Arc<dyn CatalogLookup>>,
}

impl IdentifierResolver {
    pub fn new(media_server: Arc<dyn MediaServer>, catalog: Option<Arc<dyn CatalogLookup>>) -> Self {
        Self { media_server, catalog }
    }

    /// Resolve by media server id; `None` when nothing along the way knows the item
    pub async fn resolve(&self, item_id: &str, known: Option<i64>) -> Option<i64> {
        if known.is_some() {
            return known;
        }
        let item = self.media_server.get_metadata(item_id).await?;
        self.resolve_item(&item, None).await
    }

    pub async fn resolve_item(&self, item: &LibraryItem, known: Option<i64>) -> Option<i64> {
        if known.is_some() {
            return known;
        }

        match item.media_type {
            MediaType::Movie => self.movie_id(item).await,
            MediaType::Show => self.show_id(item).await,
            MediaType::Season | MediaType::Episode => {
                let show_id = item.show_id()?;
                let Some(show) = self.media_server.get_metadata(show_id).await else {
                    debug!(item_id = %item.id, show_id, "Parent show not found");
                    return None;
                };
                self.show_id(&show).await
            }
        }
    }

    async fn movie_id(&self, item: &LibraryItem) -> Option<i64> {
        if let Some(tmdb_id) = item.guid_number("tmdb") {
            return Some(tmdb_id);
        }

        let imdb_id = item.guid_value("imdb")?;
        let catalog = self.catalog.as_ref()?;
        let found = catalog.tmdb_from_imdb(imdb_id, MediaType::Movie).await;
        debug!(item_id = %item.id, imdb_id, tmdb_id = ?found, "Resolved movie through catalog");
        found
    }

    async fn show_id(&self, show: &LibraryItem) -> Option<i64> {
        if let Some(tvdb_id) = show.guid_number("tvdb") {
            return Some(tvdb_id);
        }

        let catalog = self.catalog.as_ref()?;
        let tmdb_id = match show.guid_number("tmdb") {
            Some(id) => id,
            None => {
                let imdb_id = show.guid_value("imdb")?;
                catalog.tmdb_from_imdb(imdb_id, MediaType::Show).await?
            }
        };
        let found = catalog.tvdb_from_tmdb_show(tmdb_id).await;
        debug!(item_id = %show.id, tmdb_id, tvdb_id = ?found, "Resolved show through catalog");
        found
    }
}
