//! Video identifiers, assignments and the deterministic fallback pool.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::GenerationStatus;
use super::text::normalize_query;
use crate::{Error, Result};

/// Identifier of a video on the external video platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VideoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Video persisted for a chapter.
///
/// `COMPLETED` marks a real search result. Anything else is a fallback
/// placeholder that a later search may supersede.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoAssignment {
    pub video_id: VideoId,
    pub status: GenerationStatus,
}

impl VideoAssignment {
    pub fn searched(video_id: VideoId) -> Self {
        Self {
            video_id,
            status: GenerationStatus::Completed,
        }
    }

    pub fn fallback(video_id: VideoId) -> Self {
        Self {
            video_id,
            status: GenerationStatus::Pending,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.status != GenerationStatus::Completed
    }
}

/// Quota-free set of substitute videos.
///
/// Selection is a pure function of the normalized topic so every process
/// picks the same fallback for the same topic.
#[derive(Debug, Clone)]
pub struct FallbackPool {
    ids: Vec<VideoId>,
}

impl FallbackPool {
    pub fn new(ids: impl IntoIterator<Item = impl Into<String>>) -> Result<Self> {
        let ids: Vec<VideoId> = ids
            .into_iter()
            .map(Into::into)
            .map(|id: String| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .map(VideoId)
            .collect();
        if ids.is_empty() {
            return Err(Error::config("fallback video pool must not be empty"));
        }
        Ok(Self { ids })
    }

    pub fn select(&self, topic: &str) -> VideoId {
        let digest = Sha256::digest(normalize_query(topic).as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        let index = (u64::from_be_bytes(prefix) % self.ids.len() as u64) as usize;
        self.ids[index].clone()
    }

    pub fn contains(&self, id: &VideoId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
