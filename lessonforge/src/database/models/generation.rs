//! Generation state database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::ms_to_datetime;
use crate::domain::{ArtifactKind, ChapterId, GenerationState, GenerationStatus};
use crate::{Error, Result};

/// Row of `chapter_generation_state`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GenerationStateDbModel {
    pub chapter_id: i64,
    /// VIDEO or QUIZ
    pub artifact_kind: String,
    /// PENDING, PROCESSING, COMPLETED or FAILED
    pub status: String,
    /// Unix epoch milliseconds of the last status change.
    pub last_transition_at: i64,
    /// Incremented on every entry into PROCESSING.
    pub claim_seq: i64,
}

impl TryFrom<GenerationStateDbModel> for GenerationState {
    type Error = Error;

    fn try_from(row: GenerationStateDbModel) -> Result<Self> {
        let artifact_kind = ArtifactKind::parse(&row.artifact_kind).ok_or_else(|| {
            Error::Database(format!("unknown artifact kind {:?}", row.artifact_kind))
        })?;
        let status = GenerationStatus::parse(&row.status)
            .ok_or_else(|| Error::Database(format!("unknown generation status {:?}", row.status)))?;
        Ok(GenerationState {
            chapter_id: ChapterId(row.chapter_id),
            artifact_kind,
            status,
            last_transition_at: ms_to_datetime(row.last_transition_at),
            claim_seq: row.claim_seq,
        })
    }
}
