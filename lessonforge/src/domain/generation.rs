//! Chapter generation status vocabulary.
//!
//! Both pipelines and the UI collaborator speak this vocabulary:
//! `PENDING -> PROCESSING -> COMPLETED | FAILED`, with `FAILED` (and a
//! `COMPLETED` chapter whose artifacts went missing) eligible for another
//! attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::ChapterId;

/// Kind of artifact a generation state row tracks.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactKind {
    Video,
    Quiz,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }
}

/// Generation status values.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenerationStatus {
    /// Nothing has been generated yet, or only a placeholder exists.
    #[default]
    Pending,
    /// A worker holds the chapter and is generating.
    Processing,
    /// The artifact was generated and persisted.
    Completed,
    /// The last attempt failed; a new attempt may be started.
    Failed,
}

impl GenerationStatus {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    pub fn parse(s: &str) -> Option<Self> {
        s.parse().ok()
    }

    /// Whether a worker may move a row from `self` to `next`.
    ///
    /// `PROCESSING -> PROCESSING` is deliberately absent: taking over an
    /// abandoned claim goes through the stale-reclaim path instead.
    pub fn can_transition_to(&self, next: GenerationStatus) -> bool {
        use GenerationStatus::*;
        matches!(
            (self, next),
            (Pending | Failed | Completed, Processing) | (Processing, Completed | Failed)
        )
    }
}

/// Persisted generation state for one (chapter, artifact kind) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationState {
    pub chapter_id: ChapterId,
    pub artifact_kind: ArtifactKind,
    pub status: GenerationStatus,
    pub last_transition_at: DateTime<Utc>,
    /// Fencing token of the latest `PROCESSING` claim; 0 before any claim.
    pub claim_seq: i64,
}

impl GenerationState {
    /// State reported for a chapter that has no row yet.
    pub fn pending(chapter_id: ChapterId, artifact_kind: ArtifactKind) -> Self {
        Self {
            chapter_id,
            artifact_kind,
            status: GenerationStatus::Pending,
            last_transition_at: DateTime::<Utc>::UNIX_EPOCH,
            claim_seq: 0,
        }
    }

    /// A `PROCESSING` row older than `window` is considered abandoned.
    pub fn is_stale(&self, now: DateTime<Utc>, window: Duration) -> bool {
        if self.status != GenerationStatus::Processing {
            return false;
        }
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(self.last_transition_at) >= window
    }
}
