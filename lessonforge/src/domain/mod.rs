//! Domain types shared by the pipelines, the persistence layer and callers.

pub mod generation;
pub mod question;
pub mod text;
pub mod video;

use serde::{Deserialize, Serialize};

pub use generation::{ArtifactKind, GenerationState, GenerationStatus};
pub use question::Question;
pub use video::{FallbackPool, VideoAssignment, VideoId};

/// Identifier of a chapter owned by the persistence collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChapterId(pub i64);

impl std::fmt::Display for ChapterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ChapterId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}
