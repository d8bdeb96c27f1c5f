//! Remote predicate engine
//!
//! Posts one page of items together with the rule group to an external
//! evaluator and reads back the passing items and per-item statistics.

use super::{EvaluationResult, LibraryItem, PredicateEngine, ProgressCallback};
use crate::core::config::RulesEngineConfig;
use crate::core::error::{Result, SweepError};
use crate::db::models::RuleGroup;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct RemotePredicateEngine {
    client: Client,
    url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EvaluateRequest<'a> {
    rule_group: &'a RuleGroup,
    items: &'a [LibraryItem],
}

impl RemotePredicateEngine {
    pub fn new(config: &RulesEngineConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| SweepError::InitializationError(format!("rules engine http client: {}", e)))?;

        Ok(Self {
            client,
            url: format!("{}/evaluate", config.url.trim_end_matches('/')),
        })
    }

    async fn post(&self, rule_group: &RuleGroup, items: &[LibraryItem]) -> Result<EvaluationResult> {
        let response = self
            .client
            .post(&self.url)
            .json(&EvaluateRequest { rule_group, items })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SweepError::EvaluationError(format!(
                "rules engine returned {}: {}",
                status.as_u16(),
                message
            )));
        }

        response
            .json()
            .await
            .map_err(|e| SweepError::DeserializationError(format!("rules engine response: {}", e)))
    }
}

#[async_trait]
impl PredicateEngine for RemotePredicateEngine {
    async fn evaluate(
        &self,
        rule_group: &RuleGroup,
        items: &[LibraryItem],
        on_progress: ProgressCallback<'_>,
        token: &CancellationToken,
    ) -> Result<EvaluationResult> {
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Err(SweepError::Cancelled(format!("rule group {}", rule_group.id)));
            }
            result = self.post(rule_group, items) => result?,
        };

        on_progress(items.len());
        Ok(result)
    }
}
