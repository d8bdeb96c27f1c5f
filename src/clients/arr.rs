//! Shared HTTP plumbing for the v3 APIs of the companion services

use crate::core::config::CompanionConfig;
use crate::core::error::{Result, SweepError};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct ArrApi {
    client: Client,
    base_url: Arc<str>,
    api_key: String,
    name: String,
}

impl ArrApi {
    pub(crate) fn new(config: &CompanionConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| {
                SweepError::InitializationError(format!("{} http client: {}", config.name, e))
            })?;

        Ok(Self::with_client(client, &config.name, &config.url, &config.api_key))
    }

    pub(crate) fn with_client(client: Client, name: &str, base_url: &str, api_key: &str) -> Self {
        Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            name: name.to_string(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}/api/v3{}", self.base_url, path)
    }

    pub(crate) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header("X-Api-Key", &self.api_key)
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(SweepError::NotFound(format!("{}: {}", self.name, response.url())));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SweepError::CompanionError(format!(
                "{} returned {}: {}",
                self.name,
                status.as_u16(),
                message
            )));
        }
        Ok(response)
    }

    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self.request(Method::GET, path).query(query).send().await?;
        Ok(self.check(response).await?.json().await?)
    }

    pub(crate) async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        let response = self.request(Method::PUT, path).json(body).send().await?;
        self.check(response).await?;
        Ok(())
    }

    pub(crate) async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        let response = self.request(Method::POST, path).json(body).send().await?;
        self.check(response).await?;
        Ok(())
    }

    pub(crate) async fn delete(&self, path: &str, query: &[(&str, String)]) -> Result<()> {
        let response = self.request(Method::DELETE, path).query(query).send().await?;
        self.check(response).await?;
        Ok(())
    }
}
