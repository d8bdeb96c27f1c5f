//! Plex media server adapter

use super::{
    CreateCollection, LibraryItem, LibraryPage, MediaCollection, MediaServer, PageRequest,
};
use crate::core::config::MediaServerConfig;
use crate::core::error::{Result, SweepError};
use crate::db::models::MediaType;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

pub struct PlexClient {
    client: Client,
    base_url: Arc<str>,
    token: String,
    machine_id: OnceCell<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "MediaContainer")]
    media_container: T,
}

#[derive(Debug, Deserialize)]
struct MetadataContainer {
    #[serde(default, rename = "totalSize")]
    total_size: Option<usize>,
    #[serde(default, rename = "Metadata")]
    metadata: Vec<PlexMetadata>,
}

#[derive(Debug, Deserialize)]
struct IdentityContainer {
    #[serde(rename = "machineIdentifier")]
    machine_identifier: String,
}

#[derive(Debug, Deserialize)]
struct PlexGuid {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PlexMetadata {
    #[serde(rename = "ratingKey")]
    rating_key: String,
    #[serde(default)]
    title: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, rename = "parentRatingKey")]
    parent_rating_key: Option<String>,
    #[serde(default, rename = "grandparentRatingKey")]
    grandparent_rating_key: Option<String>,
    #[serde(default)]
    index: Option<i64>,
    #[serde(default, rename = "parentIndex")]
    parent_index: Option<i64>,
    #[serde(default, rename = "childCount")]
    child_count: Option<usize>,
    #[serde(default, rename = "Guid")]
    guids: Vec<PlexGuid>,
}

impl PlexMetadata {
    fn into_item(self) -> Option<LibraryItem> {
        let media_type = match self.kind.as_str() {
            "movie" => MediaType::Movie,
            "show" => MediaType::Show,
            "season" => MediaType::Season,
            "episode" => MediaType::Episode,
            _ => return None,
        };

        Some(LibraryItem {
            id: self.rating_key,
            title: self.title,
            media_type,
            parent_id: self.parent_rating_key,
            grandparent_id: self.grandparent_rating_key,
            index: self.index,
            parent_index: self.parent_index,
            guids: self.guids.into_iter().map(|g| g.id).collect(),
        })
    }
}

/// Plex numeric library type
fn plex_type(media_type: MediaType) -> u8 {
    match media_type {
        MediaType::Movie => 1,
        MediaType::Show => 2,
        MediaType::Season => 3,
        MediaType::Episode => 4,
    }
}

impl PlexClient {
    pub fn new(config: &MediaServerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| SweepError::InitializationError(format!("plex http client: {}", e)))?;
        Ok(Self::with_client(client, &config.url, &config.token))
    }

    pub fn with_client(client: Client, base_url: &str, token: &str) -> Self {
        Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            token: token.to_string(),
            machine_id: OnceCell::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header("X-Plex-Token", &self.token)
            .header(reqwest::header::ACCEPT, "application/json")
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SweepError::MediaServerError(format!(
                "plex returned {}: {}",
                status.as_u16(),
                message
            )));
        }
        Ok(response.json().await?)
    }

    async fn send(&self, request: RequestBuilder) -> Result<()> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SweepError::MediaServerError(format!(
                "plex returned {}: {}",
                status.as_u16(),
                message
            )));
        }
        Ok(())
    }

    async fn machine_id(&self) -> Result<&str> {
        let id = self
            .machine_id
            .get_or_try_init(|| async {
                let identity: Envelope<IdentityContainer> =
                    self.fetch(self.request(Method::GET, "/identity")).await?;
                Ok::<_, SweepError>(identity.media_container.machine_identifier)
            })
            .await?;
        Ok(id.as_str())
    }

    async fn item_uri(&self, item_id: &str) -> Result<String> {
        Ok(format!(
            "server://{}/com.plexapp.plugins.library/library/metadata/{}",
            self.machine_id().await?,
            item_id
        ))
    }
}

#[async_trait]
impl MediaServer for PlexClient {
    async fn get_library_contents(&self, library_id: &str, page: PageRequest) -> Option<LibraryPage> {
        let request = self
            .request(Method::GET, &format!("/library/sections/{}/all", library_id))
            .query(&[
                ("type", plex_type(page.media_type).to_string()),
                ("includeGuids", "1".to_string()),
                ("X-Plex-Container-Start", page.offset.to_string()),
                ("X-Plex-Container-Size", page.limit.to_string()),
            ]);

        match self.fetch::<Envelope<MetadataContainer>>(request).await {
            Ok(envelope) => {
                let container = envelope.media_container;
                let total_size = container.total_size.unwrap_or(container.metadata.len());
                let items = container
                    .metadata
                    .into_iter()
                    .filter_map(PlexMetadata::into_item)
                    .collect();
                Some(LibraryPage { items, total_size })
            }
            Err(e) => {
                warn!(library_id = %library_id, offset = page.offset, error = %e, "Failed to fetch library page");
                None
            }
        }
    }

    async fn get_metadata(&self, item_id: &str) -> Option<LibraryItem> {
        let request = self
            .request(Method::GET, &format!("/library/metadata/{}", item_id))
            .query(&[("includeGuids", "1")]);

        match self.fetch::<Envelope<MetadataContainer>>(request).await {
            Ok(envelope) => envelope
                .media_container
                .metadata
                .into_iter()
                .next()
                .and_then(PlexMetadata::into_item),
            Err(e) => {
                debug!(item_id = %item_id, error = %e, "Metadata lookup failed");
                None
            }
        }
    }

    async fn get_collection(&self, collection_id: &str) -> Option<MediaCollection> {
        let request = self.request(Method::GET, &format!("/library/collections/{}", collection_id));

        match self.fetch::<Envelope<MetadataContainer>>(request).await {
            Ok(envelope) => envelope.media_container.metadata.into_iter().next().map(|m| {
                MediaCollection {
                    id: m.rating_key,
                    title: m.title,
                    child_count: m.child_count.unwrap_or(0),
                }
            }),
            Err(e) => {
                debug!(collection_id = %collection_id, error = %e, "Collection lookup failed");
                None
            }
        }
    }

    async fn get_collection_children(&self, collection_id: &str) -> Option<Vec<LibraryItem>> {
        let request = self.request(
            Method::GET,
            &format!("/library/collections/{}/children", collection_id),
        );

        match self.fetch::<Envelope<MetadataContainer>>(request).await {
            Ok(envelope) => Some(
                envelope
                    .media_container
                    .metadata
                    .into_iter()
                    .filter_map(PlexMetadata::into_item)
                    .collect(),
            ),
            Err(e) => {
                warn!(collection_id = %collection_id, error = %e, "Failed to read collection children");
                None
            }
        }
    }

    async fn create_collection(&self, request: &CreateCollection) -> Result<String> {
        let uri = format!(
            "server://{}/com.plexapp.plugins.library",
            self.machine_id().await?
        );
        let http = self.request(Method::POST, "/library/collections").query(&[
            ("type", plex_type(request.media_type).to_string()),
            ("title", request.title.clone()),
            ("smart", "0".to_string()),
            ("sectionId", request.library_id.clone()),
            ("uri", uri),
        ]);

        let envelope: Envelope<MetadataContainer> = self.fetch(http).await?;
        envelope
            .media_container
            .metadata
            .into_iter()
            .next()
            .map(|m| m.rating_key)
            .ok_or_else(|| SweepError::MediaServerError("collection creation returned no id".into()))
    }

    async fn delete_collection(&self, collection_id: &str) -> Result<()> {
        self.send(self.request(Method::DELETE, &format!("/library/collections/{}", collection_id)))
            .await
    }

    async fn add_to_collection(&self, collection_id: &str, item_id: &str) -> Result<()> {
        let uri = self.item_uri(item_id).await?;
        self.send(
            self.request(Method::PUT, &format!("/library/collections/{}/items", collection_id))
                .query(&[("uri", uri)]),
        )
        .await
    }

    async fn remove_from_collection(&self, collection_id: &str, item_id: &str) -> Result<()> {
        self.send(self.request(
            Method::DELETE,
            &format!("/library/collections/{}/children/{}", collection_id, item_id),
        ))
        .await
    }

    async fn delete_from_disk(&self, item_id: &str) -> Result<()> {
        self.send(self.request(Method::DELETE, &format!("/library/metadata/{}", item_id)))
            .await
    }
}
