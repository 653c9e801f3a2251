//! YouTube Data API v3 search client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http::{request_error, status_error};
use super::{VideoSearch, with_deadline};
use crate::domain::VideoId;
use crate::{Error, Result};

const CALL: &str = "youtube_search";

/// Reasons the API uses for exhausted quota.
const QUOTA_REASONS: &[&str] = &["quotaExceeded", "dailyLimitExceeded", "rateLimitExceeded"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YouTubeSearchConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Quota service name reported in errors.
    #[serde(default = "default_service")]
    pub service: String,
    #[serde(default = "default_safe_search")]
    pub safe_search: String,
    /// Restrict results to embeddable videos.
    #[serde(default = "default_true")]
    pub embeddable_only: bool,
}

fn default_base_url() -> String {
    "https://www.googleapis.com/youtube/v3".to_string()
}

fn default_service() -> String {
    "video_search".to_string()
}

fn default_safe_search() -> String {
    "strict".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for YouTubeSearchConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            service: default_service(),
            safe_search: default_safe_search(),
            embeddable_only: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
}

#[derive(Debug, Deserialize)]
struct SearchItemId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ErrorDetail>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: String,
}

/// Search client backed by the `search.list` endpoint.
///
/// Every request is charged against the API quota, so a search is sent
/// exactly once and never retried here. The governor records one call per
/// [`VideoSearch::search`].
pub struct YouTubeSearchClient {
    client: reqwest::Client,
    config: YouTubeSearchConfig,
    timeout: Duration,
}

impl YouTubeSearchClient {
    pub fn new(
        client: reqwest::Client,
        config: YouTubeSearchConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            config,
            timeout,
        }
    }

    async fn search_once(&self, topic: &str) -> Result<VideoId> {
        let url = format!("{}/search", self.config.base_url.trim_end_matches('/'));
        let mut query = vec![
            ("part", "snippet"),
            ("type", "video"),
            ("maxResults", "1"),
            ("q", topic),
            ("safeSearch", self.config.safe_search.as_str()),
            ("key", self.config.api_key.as_str()),
        ];
        if self.config.embeddable_only {
            query.push(("videoEmbeddable", "true"));
        }

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| request_error(CALL, e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| request_error(CALL, e))?;

        if !status.is_success() {
            return Err(classify_error(&self.config.service, status, &body));
        }
        parse_search_response(&body, topic)
    }
}

#[async_trait]
impl VideoSearch for YouTubeSearchClient {
    async fn search(&self, topic: &str) -> Result<VideoId> {
        debug!(call = CALL, topic, "Searching for video");
        with_deadline(CALL, self.timeout, self.search_once(topic)).await
    }
}

/// An empty result set is final for the query, not a transient failure.
fn parse_search_response(body: &str, topic: &str) -> Result<VideoId> {
    let response: SearchResponse = serde_json::from_str(body)?;
    response
        .items
        .into_iter()
        .find_map(|item| item.id.video_id.filter(|id| !id.is_empty()))
        .map(VideoId::new)
        .ok_or_else(|| Error::not_found("video search result", topic))
}

/// The API reports exhausted quota as `403` with a reason code, not `429`.
fn classify_error(service: &str, status: reqwest::StatusCode, body: &str) -> Error {
    let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) else {
        return status_error(service, CALL, status, body);
    };
    if let Some(detail) = envelope
        .error
        .errors
        .iter()
        .find(|d| QUOTA_REASONS.contains(&d.reason.as_str()))
    {
        return Error::quota_exceeded(service, detail.reason.clone());
    }
    if envelope.error.message.is_empty() {
        status_error(service, CALL, status, body)
    } else {
        status_error(service, CALL, status, &envelope.error.message)
    }
}
