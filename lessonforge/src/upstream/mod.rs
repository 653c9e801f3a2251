//! External collaborators: video search, transcription and text generation.
//!
//! The pipelines depend only on the traits here. Concrete HTTP clients live
//! in the submodules.

pub mod http;
pub mod llm;
pub mod resilience;
pub mod transcript;
pub mod youtube;

use async_trait::async_trait;

use crate::Result;
use crate::domain::{Question, VideoId};

pub use http::{UpstreamConfig, build_http_client, install_rustls_provider};
pub use llm::{ChatCompletionsClient, ChatCompletionsConfig};
pub use resilience::{RetryPolicy, call_upstream, with_deadline};
pub use transcript::{HttpTranscriber, TranscriberConfig};
pub use youtube::{YouTubeSearchClient, YouTubeSearchConfig};

/// Result of a transcript fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranscriptResult {
    pub transcript: String,
    pub success: bool,
}

impl TranscriptResult {
    pub fn ok(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            success: true,
        }
    }

    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Whether the result carries usable text.
    pub fn is_usable(&self) -> bool {
        self.success && !self.transcript.trim().is_empty()
    }
}

/// Quota-metered video search.
#[async_trait]
pub trait VideoSearch: Send + Sync {
    /// Find a representative video for `topic`.
    ///
    /// Remote quota exhaustion is reported as [`crate::Error::QuotaExceeded`].
    async fn search(&self, topic: &str) -> Result<VideoId>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn get_transcript(&self, video_id: &VideoId) -> Result<TranscriptResult>;
}

#[async_trait]
pub trait SummaryGenerator: Send + Sync {
    async fn summarize(&self, text: &str, topic: &str) -> Result<String>;
}

#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    async fn generate(&self, text: &str, topic: &str) -> Result<Vec<Question>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_usability() {
        assert!(TranscriptResult::ok("some words").is_usable());
        assert!(!TranscriptResult::ok("   ").is_usable());
        assert!(!TranscriptResult::unavailable().is_usable());
    }
}
