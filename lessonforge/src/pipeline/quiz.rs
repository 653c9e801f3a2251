//! Quiz generation: transcript, lazy summary, question generation and
//! batched persistence under a claimed generation status.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::status::{DEFAULT_STALE_AFTER, GenerationClaim, GenerationStateMachine};
use super::video::VideoPipeline;
use crate::cache::{CacheStats, SingleFlightCache, Sweepable};
use crate::database::repositories::ChapterStore;
use crate::domain::text::{truncate_words, word_count};
use crate::domain::{ArtifactKind, ChapterId, GenerationStatus, Question, VideoId};
use crate::upstream::{QuestionGenerator, SummaryGenerator, Transcriber, with_deadline};
use crate::{Error, Result};

const TRANSCRIPT_CALL: &str = "transcript_fetch";
const SUMMARY_CALL: &str = "summary_generation";
const QUESTION_CALL: &str = "question_generation";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizPipelineConfig {
    /// Age after which a `PROCESSING` claim may be taken over.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// Word budget for text sent to the generators.
    #[serde(default = "default_max_input_words")]
    pub max_input_words: usize,
    #[serde(default = "default_max_questions")]
    pub max_questions: usize,
    /// Questions per insert statement when persisting a generated set.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_transcript_timeout_ms")]
    pub transcript_timeout_ms: u64,
    #[serde(default = "default_generation_timeout_ms")]
    pub generation_timeout_ms: u64,
}

fn default_stale_after_secs() -> u64 {
    DEFAULT_STALE_AFTER.as_secs()
}

fn default_max_input_words() -> usize {
    3000
}

fn default_max_questions() -> usize {
    10
}

fn default_batch_size() -> usize {
    5
}

fn default_cache_ttl_secs() -> u64 {
    60 * 60
}

fn default_transcript_timeout_ms() -> u64 {
    60_000
}

fn default_generation_timeout_ms() -> u64 {
    180_000
}

impl Default for QuizPipelineConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
            max_input_words: default_max_input_words(),
            max_questions: default_max_questions(),
            batch_size: default_batch_size(),
            cache_ttl_secs: default_cache_ttl_secs(),
            transcript_timeout_ms: default_transcript_timeout_ms(),
            generation_timeout_ms: default_generation_timeout_ms(),
        }
    }
}

impl QuizPipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::config("batch_size must be greater than 0"));
        }
        if self.max_questions == 0 {
            return Err(Error::config("max_questions must be greater than 0"));
        }
        if self.max_input_words == 0 {
            return Err(Error::config("max_input_words must be greater than 0"));
        }
        if self.stale_after_secs == 0 {
            return Err(Error::config("stale_after_secs must be greater than 0"));
        }
        Ok(())
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn transcript_timeout(&self) -> Duration {
        Duration::from_millis(self.transcript_timeout_ms)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }
}

/// Upstream collaborators used by the quiz pipeline.
#[derive(Clone)]
pub struct QuizCollaborators {
    pub transcriber: Arc<dyn Transcriber>,
    pub summarizer: Arc<dyn SummaryGenerator>,
    pub generator: Arc<dyn QuestionGenerator>,
}

/// Questions plus whether they may be served from cache.
#[derive(Debug, Clone)]
struct QuizOutcome {
    questions: Arc<Vec<Question>>,
    /// Previously persisted questions returned after a quota failure.
    degraded: bool,
}

/// Returns persisted quiz questions or generates them, at most once per
/// chapter at a time.
#[derive(Clone)]
pub struct QuizPipeline {
    store: Arc<dyn ChapterStore>,
    upstream: QuizCollaborators,
    video: VideoPipeline,
    status: GenerationStateMachine,
    cache: SingleFlightCache<QuizOutcome>,
    config: Arc<QuizPipelineConfig>,
}

impl QuizPipeline {
    pub fn new(
        store: Arc<dyn ChapterStore>,
        upstream: QuizCollaborators,
        video: VideoPipeline,
        config: QuizPipelineConfig,
    ) -> Self {
        Self {
            status: GenerationStateMachine::with_stale_after(store.clone(), config.stale_after()),
            cache: SingleFlightCache::with_ttl("quiz", config.cache_ttl()),
            store,
            upstream,
            video,
            config: Arc::new(config),
        }
    }

    pub fn status(&self) -> &GenerationStateMachine {
        &self.status
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Handle for the cache sweeper.
    pub fn sweepable(&self) -> Arc<dyn Sweepable> {
        Arc::new(self.cache.clone())
    }

    /// Get the chapter's questions, generating them when none are complete.
    ///
    /// Fails with [`Error::GenerationInProgress`] while another execution is
    /// generating, and with [`Error::PersistenceConflict`] when another
    /// execution reclaimed this one's claim before it could persist.
    pub async fn get_or_generate_questions(
        &self,
        chapter_id: ChapterId,
        topic: &str,
        topic_name: &str,
    ) -> Result<Vec<Question>> {
        let key = cache_key(chapter_id, topic);
        let pipeline = self.clone();
        let topic_name = topic_name.to_string();
        let outcome = self
            .cache
            .with_lock(&key, move || async move {
                pipeline.load_or_generate(chapter_id, &topic_name).await
            })
            .await?;

        if outcome.degraded {
            self.cache.invalidate(&key);
        }
        Ok(outcome.questions.as_ref().clone())
    }

    /// Drop the cached questions for one chapter topic.
    pub fn invalidate(&self, chapter_id: ChapterId, topic: &str) {
        self.cache.invalidate(&cache_key(chapter_id, topic));
    }

    /// Drop every cached entry for a chapter.
    pub fn invalidate_chapter(&self, chapter_id: ChapterId) {
        let prefix = format!("questions_{chapter_id}_");
        self.cache.invalidate_where(|key| key.starts_with(&prefix));
    }

    async fn load_or_generate(&self, chapter_id: ChapterId, topic_name: &str) -> Result<QuizOutcome> {
        let state = self.status.current(chapter_id, ArtifactKind::Quiz).await?;
        if self.status.is_held_elsewhere(&state) {
            return Err(Error::GenerationInProgress {
                chapter_id,
                kind: ArtifactKind::Quiz,
            });
        }
        if state.status == GenerationStatus::Completed {
            let questions = self.store.get_questions(chapter_id).await?;
            if !questions.is_empty() {
                debug!(%chapter_id, count = questions.len(), "Serving persisted questions");
                return Ok(QuizOutcome::fresh(questions));
            }
        }

        let claim = self.status.claim(chapter_id, ArtifactKind::Quiz).await?;
        match self.generate(&claim, topic_name).await {
            Ok(questions) => {
                self.status.complete(&claim).await?;
                info!(%chapter_id, count = questions.len(), reclaimed = claim.reclaimed, "Quiz generated");
                Ok(QuizOutcome::fresh(questions))
            }
            Err(err @ Error::PersistenceConflict { .. }) => {
                warn!(%chapter_id, artifact_kind = "QUIZ", claim_seq = claim.claim_seq, "Quiz claim taken over, discarding result");
                Err(err)
            }
            Err(err) => {
                error!(%chapter_id, artifact_kind = "QUIZ", error = %err, "Quiz generation failed");
                if let Err(release_err) = self.status.fail(&claim).await {
                    warn!(%chapter_id, error = %release_err, "Failed to record quiz failure");
                }
                if err.is_quota_exceeded() {
                    let prior = self.store.get_questions(chapter_id).await.unwrap_or_default();
                    if !prior.is_empty() {
                        warn!(%chapter_id, count = prior.len(), "Quota exhausted, serving previous questions");
                        return Ok(QuizOutcome {
                            questions: Arc::new(prior),
                            degraded: true,
                        });
                    }
                }
                Err(err)
            }
        }
    }

    async fn generate(&self, claim: &GenerationClaim, topic_name: &str) -> Result<Vec<Question>> {
        let chapter_id = claim.chapter_id;
        let mut summary = self.store.get_chapter_summary(chapter_id).await?;
        let mut transcript = None;

        if summary.is_none() {
            let text = match self.store.get_chapter_transcript(chapter_id).await? {
                Some(text) => text,
                None => self.fetch_transcript(chapter_id, topic_name).await?,
            };
            summary = self.derive_summary(chapter_id, &text, topic_name).await;
            transcript = Some(text);
        }

        let from_summary = summary.is_some();
        let source = summary
            .or(transcript)
            .ok_or_else(|| Error::upstream(QUESTION_CALL, "no source text available"))?;
        let text = truncate_words(&source, self.config.max_input_words);
        debug!(
            %chapter_id,
            call = QUESTION_CALL,
            from_summary,
            words = word_count(&text),
            "Requesting questions"
        );

        let raw = with_deadline(
            QUESTION_CALL,
            self.config.generation_timeout(),
            self.upstream.generator.generate(&text, topic_name),
        )
        .await?;
        let received = raw.len();
        let questions: Vec<Question> = raw
            .into_iter()
            .filter_map(Question::normalized)
            .take(self.config.max_questions)
            .collect();
        if questions.len() < received {
            debug!(%chapter_id, received, kept = questions.len(), "Dropped unusable or surplus questions");
        }
        if questions.is_empty() {
            return Err(Error::upstream(QUESTION_CALL, "generator returned no usable questions"));
        }

        let written = self
            .store
            .replace_questions(chapter_id, claim.claim_seq, &questions, self.config.batch_size)
            .await?;
        if !written {
            return Err(Error::PersistenceConflict {
                chapter_id,
                kind: ArtifactKind::Quiz,
            });
        }
        Ok(questions)
    }

    async fn fetch_transcript(&self, chapter_id: ChapterId, topic_name: &str) -> Result<String> {
        let video_id = self.video_for(chapter_id, topic_name).await?;
        let result = with_deadline(
            TRANSCRIPT_CALL,
            self.config.transcript_timeout(),
            self.upstream.transcriber.get_transcript(&video_id),
        )
        .await?;
        if !result.is_usable() {
            return Err(Error::upstream(
                TRANSCRIPT_CALL,
                format!("no transcript available for video {video_id}"),
            ));
        }

        if let Err(err) = self
            .store
            .set_chapter_transcript(chapter_id, &result.transcript)
            .await
        {
            warn!(%chapter_id, error = %err, "Failed to persist transcript");
        }
        Ok(result.transcript)
    }

    async fn video_for(&self, chapter_id: ChapterId, topic_name: &str) -> Result<VideoId> {
        if let Some(assignment) = self.store.get_chapter_video(chapter_id).await? {
            return Ok(assignment.video_id);
        }
        Ok(self.video.resolve(chapter_id, topic_name).await.video_id)
    }

    /// Summaries are an optimization: failure falls back to the transcript.
    async fn derive_summary(&self, chapter_id: ChapterId, transcript: &str, topic_name: &str) -> Option<String> {
        let input = truncate_words(transcript, self.config.max_input_words);
        let summary = match with_deadline(
            SUMMARY_CALL,
            self.config.generation_timeout(),
            self.upstream.summarizer.summarize(&input, topic_name),
        )
        .await
        {
            Ok(summary) if !summary.trim().is_empty() => summary,
            Ok(_) => {
                warn!(%chapter_id, call = SUMMARY_CALL, "Empty summary, using transcript");
                return None;
            }
            Err(err) => {
                warn!(%chapter_id, call = SUMMARY_CALL, error = %err, "Summary failed, using transcript");
                return None;
            }
        };

        if let Err(err) = self.store.set_chapter_summary(chapter_id, &summary).await {
            warn!(%chapter_id, error = %err, "Failed to persist summary");
        }
        Some(summary)
    }
}

impl QuizOutcome {
    fn fresh(questions: Vec<Question>) -> Self {
        Self {
            questions: Arc::new(questions),
            degraded: false,
        }
    }
}

fn cache_key(chapter_id: ChapterId, topic: &str) -> String {
    format!("questions_{chapter_id}_{topic}")
}
