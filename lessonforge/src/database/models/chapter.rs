//! Chapter database model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::{ChapterId, GenerationStatus, VideoAssignment, VideoId};

/// The generation-relevant columns of a chapter.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChapterDbModel {
    pub id: i64,
    pub title: String,
    pub video_id: Option<String>,
    /// COMPLETED for a searched video, PENDING for a fallback placeholder.
    pub video_status: Option<String>,
    pub summary: Option<String>,
    pub transcript: Option<String>,
    /// Unix epoch milliseconds of the last write.
    pub updated_at: i64,
}

impl ChapterDbModel {
    pub fn chapter_id(&self) -> ChapterId {
        ChapterId(self.id)
    }

    /// The persisted video assignment, if any.
    ///
    /// A row with a video but an unreadable status is treated as a fallback so
    /// it stays eligible for replacement.
    pub fn video_assignment(&self) -> Option<VideoAssignment> {
        let video_id = self.video_id.as_deref().filter(|id| !id.is_empty())?;
        let status = self
            .video_status
            .as_deref()
            .and_then(GenerationStatus::parse)
            .unwrap_or(GenerationStatus::Pending);
        Some(VideoAssignment {
            video_id: VideoId::new(video_id),
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(video_id: Option<&str>, status: Option<&str>) -> ChapterDbModel {
        ChapterDbModel {
            id: 1,
            title: "Trees".to_string(),
            video_id: video_id.map(str::to_string),
            video_status: status.map(str::to_string),
            summary: None,
            transcript: None,
            updated_at: 0,
        }
    }

    #[test]
    fn test_video_assignment() {
        assert!(model(None, None).video_assignment().is_none());
        assert!(model(Some(""), Some("COMPLETED")).video_assignment().is_none());

        let searched = model(Some("abc"), Some("COMPLETED"))
            .video_assignment()
            .unwrap();
        assert!(!searched.is_fallback());

        let unknown = model(Some("abc"), Some("garbage")).video_assignment().unwrap();
        assert!(unknown.is_fallback());
    }
}
