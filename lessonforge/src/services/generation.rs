//! Caller-facing surface over the generation pipelines.

use std::sync::Arc;

use serde::Serialize;

use crate::Result;
use crate::database::repositories::ChapterStore;
use crate::domain::{ArtifactKind, ChapterId, GenerationState, Question};
use crate::pipeline::{QuizPipeline, VideoPipeline};
use crate::quota::{QuotaGovernor, QuotaStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoResponse {
    pub video_id: String,
    pub from_cache: bool,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuickVideoResponse {
    pub video_id: String,
    pub success: bool,
}

/// Entry point used by the route layer.
#[derive(Clone)]
pub struct GenerationService {
    store: Arc<dyn ChapterStore>,
    governor: Arc<QuotaGovernor>,
    video: VideoPipeline,
    quiz: QuizPipeline,
}

impl GenerationService {
    pub fn new(
        store: Arc<dyn ChapterStore>,
        governor: Arc<QuotaGovernor>,
        video: VideoPipeline,
        quiz: QuizPipeline,
    ) -> Self {
        Self {
            store,
            governor,
            video,
            quiz,
        }
    }

    pub fn video_pipeline(&self) -> &VideoPipeline {
        &self.video
    }

    pub fn quiz_pipeline(&self) -> &QuizPipeline {
        &self.quiz
    }

    /// Always returns a usable video.
    pub async fn resolve_video(&self, chapter_id: ChapterId, topic: &str) -> VideoResponse {
        let resolution = self.video.resolve(chapter_id, topic).await;
        VideoResponse {
            video_id: resolution.video_id.0,
            from_cache: resolution.from_cache,
            success: resolution.success,
        }
    }

    pub async fn resolve_video_quick(&self, chapter_id: ChapterId, topic: &str) -> QuickVideoResponse {
        let resolution = self.video.resolve_quick(chapter_id, topic).await;
        QuickVideoResponse {
            video_id: resolution.video_id.0,
            success: resolution.success,
        }
    }

    /// Questions for a chapter. A generation running elsewhere surfaces as
    /// an error for which [`crate::Error::is_in_progress`] holds.
    pub async fn get_or_generate_quiz(
        &self,
        chapter_id: ChapterId,
        topic: &str,
        topic_name: &str,
    ) -> Result<Vec<Question>> {
        self.quiz
            .get_or_generate_questions(chapter_id, topic, topic_name)
            .await
    }

    pub fn quota_status(&self) -> QuotaStatus {
        self.governor.status()
    }

    pub async fn generation_status(
        &self,
        chapter_id: ChapterId,
        kind: ArtifactKind,
    ) -> Result<GenerationState> {
        self.store.get_generation_state(chapter_id, kind).await
    }

    /// Drop cached artifacts after a chapter edit.
    pub fn invalidate_chapter(&self, chapter_id: ChapterId, topic: Option<&str>) {
        self.quiz.invalidate_chapter(chapter_id);
        if let Some(topic) = topic {
            self.video.invalidate_topic(topic);
        }
    }
}
