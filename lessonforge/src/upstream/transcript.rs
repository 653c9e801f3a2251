//! HTTP transcript service client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http::{request_error, status_error};
use super::{RetryPolicy, Transcriber, TranscriptResult, call_upstream};
use crate::Result;
use crate::domain::VideoId;

const CALL: &str = "transcript_fetch";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriberConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranscriptResponse {
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    segments: Vec<Segment>,
}

#[derive(Debug, Deserialize)]
struct Segment {
    text: String,
}

/// Fetches transcripts from `GET {base_url}/transcripts/{video_id}`.
pub struct HttpTranscriber {
    client: reqwest::Client,
    config: TranscriberConfig,
    timeout: Duration,
    retry: RetryPolicy,
}

impl HttpTranscriber {
    pub fn new(
        client: reqwest::Client,
        config: TranscriberConfig,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            config,
            timeout,
            retry,
        }
    }

    async fn fetch_once(&self, video_id: &VideoId) -> Result<TranscriptResult> {
        let url = format!(
            "{}/transcripts/{}",
            self.config.base_url.trim_end_matches('/'),
            video_id
        );
        let mut request = self.client.get(&url);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| request_error(CALL, e))?;
        let status = response.status();
        // No captions for this video.
        if status == StatusCode::NOT_FOUND {
            return Ok(TranscriptResult::unavailable());
        }
        let body = response.text().await.map_err(|e| request_error(CALL, e))?;
        if !status.is_success() {
            return Err(status_error("transcription", CALL, status, &body));
        }
        parse_transcript_response(&body)
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn get_transcript(&self, video_id: &VideoId) -> Result<TranscriptResult> {
        debug!(call = CALL, video_id = %video_id, "Fetching transcript");
        call_upstream(CALL, self.timeout, &self.retry, || self.fetch_once(video_id)).await
    }
}

/// Accepts either a flat `transcript` string or timed `segments`.
fn parse_transcript_response(body: &str) -> Result<TranscriptResult> {
    let response: TranscriptResponse = serde_json::from_str(body)?;
    let text = match response.transcript {
        Some(text) if !text.trim().is_empty() => text,
        _ => response
            .segments
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
    };

    if text.trim().is_empty() {
        Ok(TranscriptResult::unavailable())
    } else {
        Ok(TranscriptResult::ok(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_transcript() {
        let result = parse_transcript_response(r#"{"transcript": "hello world"}"#).unwrap();
        assert_eq!(result, TranscriptResult::ok("hello world"));
    }

    #[test]
    fn joins_segments() {
        let body = r#"{"segments": [{"start": 0.0, "text": " a tree "}, {"text": ""}, {"text": "is a graph"}]}"#;
        let result = parse_transcript_response(body).unwrap();
        assert_eq!(result.transcript, "a tree is a graph");
        assert!(result.success);
    }

    #[test]
    fn empty_body_is_unavailable() {
        let result = parse_transcript_response(r#"{"segments": []}"#).unwrap();
        assert!(!result.is_usable());
    }

    #[test]
    fn malformed_json_is_error() {
        assert!(parse_transcript_response("<html>").is_err());
    }
}
