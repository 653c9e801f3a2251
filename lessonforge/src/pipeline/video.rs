//! Video resolution: persisted assignment, cache, quota-gated search, fallback.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, SingleFlightCache, Sweepable};
use crate::database::repositories::ChapterStore;
use crate::domain::text::normalize_query;
use crate::domain::{ChapterId, FallbackPool, GenerationStatus, VideoAssignment, VideoId};
use crate::quota::QuotaGovernor;
use crate::upstream::{VideoSearch, with_deadline};
use crate::{Error, Result};

const SEARCH_CALL: &str = "video_search";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoPipelineConfig {
    /// Videos served when search is unavailable or fails.
    #[serde(default)]
    pub fallback_video_ids: Vec<String>,
    /// Run full resolution in the background after a quick fallback.
    #[serde(default = "default_true")]
    pub background_refresh: bool,
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Overall bound on one search, including the client's own retries.
    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl_secs() -> u64 {
    60 * 60
}

fn default_search_timeout_ms() -> u64 {
    45_000
}

impl Default for VideoPipelineConfig {
    fn default() -> Self {
        Self {
            fallback_video_ids: Vec::new(),
            background_refresh: default_true(),
            cache_ttl_secs: default_cache_ttl_secs(),
            search_timeout_ms: default_search_timeout_ms(),
        }
    }
}

impl VideoPipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.fallback_video_ids.iter().all(|id| id.trim().is_empty()) {
            return Err(Error::config("fallback_video_ids must contain at least one id"));
        }
        if self.search_timeout_ms == 0 {
            return Err(Error::config("search_timeout_ms must be greater than 0"));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }
}

/// Outcome of [`VideoPipeline::resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoResolution {
    pub video_id: VideoId,
    pub from_cache: bool,
    /// Always `true`: a fallback is still a usable video.
    pub success: bool,
    pub is_fallback: bool,
}

impl VideoResolution {
    fn cached(assignment: VideoAssignment) -> Self {
        Self {
            is_fallback: assignment.is_fallback(),
            video_id: assignment.video_id,
            from_cache: true,
            success: true,
        }
    }

    fn searched(video_id: VideoId) -> Self {
        Self {
            video_id,
            from_cache: false,
            success: true,
            is_fallback: false,
        }
    }

    fn fallback(video_id: VideoId) -> Self {
        Self {
            video_id,
            from_cache: false,
            success: true,
            is_fallback: true,
        }
    }
}

/// Resolves a representative video for a chapter. Never fails.
#[derive(Clone)]
pub struct VideoPipeline {
    store: Arc<dyn ChapterStore>,
    search: Arc<dyn VideoSearch>,
    governor: Arc<QuotaGovernor>,
    cache: SingleFlightCache<VideoId>,
    fallback: Arc<FallbackPool>,
    config: Arc<VideoPipelineConfig>,
    background: TaskTracker,
}

impl VideoPipeline {
    pub fn new(
        store: Arc<dyn ChapterStore>,
        search: Arc<dyn VideoSearch>,
        governor: Arc<QuotaGovernor>,
        config: VideoPipelineConfig,
    ) -> Result<Self> {
        let fallback = FallbackPool::new(config.fallback_video_ids.iter().cloned())?;
        Ok(Self {
            store,
            search,
            governor,
            cache: SingleFlightCache::with_ttl("video", config.cache_ttl()),
            fallback: Arc::new(fallback),
            config: Arc::new(config),
            background: TaskTracker::new(),
        })
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Handle for the cache sweeper.
    pub fn sweepable(&self) -> Arc<dyn Sweepable> {
        Arc::new(self.cache.clone())
    }

    pub fn background_tasks(&self) -> &TaskTracker {
        &self.background
    }

    /// Resolve a video for `chapter_id`, searching when quota allows.
    pub async fn resolve(&self, chapter_id: ChapterId, topic: &str) -> VideoResolution {
        let persisted = self.persisted(chapter_id).await;
        match &persisted {
            Some(assignment) if !assignment.is_fallback() => {
                return VideoResolution::cached(assignment.clone());
            }
            Some(assignment) if !self.may_supersede() => {
                debug!(%chapter_id, "Keeping fallback video, quota is constrained");
                return VideoResolution::cached(assignment.clone());
            }
            _ => {}
        }

        if let Some(video_id) = self.cached(topic) {
            self.persist(chapter_id, &video_id, GenerationStatus::Completed)
                .await;
            return VideoResolution::cached(VideoAssignment::searched(video_id));
        }

        match self.search_shared(topic).await {
            Ok(video_id) => {
                info!(%chapter_id, video_id = %video_id, topic, "Resolved video by search");
                self.persist(chapter_id, &video_id, GenerationStatus::Completed)
                    .await;
                VideoResolution::searched(video_id)
            }
            Err(err) => {
                warn!(
                    %chapter_id,
                    artifact_kind = "VIDEO",
                    call = SEARCH_CALL,
                    topic,
                    error = %err,
                    "Video search unavailable, using fallback"
                );
                match persisted {
                    Some(assignment) => VideoResolution::cached(assignment),
                    None => self.assign_fallback(chapter_id, topic).await,
                }
            }
        }
    }

    /// Resolve from persisted state or cache only.
    ///
    /// On a miss the deterministic fallback is returned at once and, when
    /// enabled, full resolution continues in the background.
    pub async fn resolve_quick(&self, chapter_id: ChapterId, topic: &str) -> VideoResolution {
        if let Some(assignment) = self.persisted(chapter_id).await {
            if assignment.is_fallback() && self.may_supersede() {
                self.refresh_in_background(chapter_id, topic);
            }
            return VideoResolution::cached(assignment);
        }

        if let Some(video_id) = self.cached(topic) {
            return VideoResolution::cached(VideoAssignment::searched(video_id));
        }

        self.refresh_in_background(chapter_id, topic);
        VideoResolution::fallback(self.fallback.select(topic))
    }

    /// Drop the cached search result for `topic`.
    pub fn invalidate_topic(&self, topic: &str) {
        self.cache.invalidate(&cache_key(topic));
    }

    async fn persisted(&self, chapter_id: ChapterId) -> Option<VideoAssignment> {
        match self.store.get_chapter_video(chapter_id).await {
            Ok(assignment) => assignment,
            Err(err) => {
                warn!(%chapter_id, artifact_kind = "VIDEO", error = %err, "Failed to read persisted video");
                None
            }
        }
    }

    fn may_supersede(&self) -> bool {
        self.governor.is_available() && !self.governor.is_soft_limited()
    }

    fn cached(&self, topic: &str) -> Option<VideoId> {
        let key = cache_key(topic);
        if let Some(video_id) = self.cache.get(&key) {
            return Some(video_id);
        }
        let memoized = VideoId::new(self.governor.cache_get(topic)?);
        self.cache.insert(key, memoized.clone());
        Some(memoized)
    }

    async fn search_shared(&self, topic: &str) -> Result<VideoId> {
        if !self.governor.is_available() {
            return Err(Error::quota_exceeded(
                self.governor.config().service.clone(),
                "daily budget unavailable",
            ));
        }

        let search = self.search.clone();
        let governor = self.governor.clone();
        let timeout = self.config.search_timeout();
        let topic = topic.to_string();
        self.cache
            .with_lock(&cache_key(&topic), move || async move {
                if !governor.try_acquire() {
                    return Err(Error::quota_exceeded(
                        governor.config().service.clone(),
                        "daily budget unavailable",
                    ));
                }
                match with_deadline(SEARCH_CALL, timeout, search.search(&topic)).await {
                    Ok(video_id) => {
                        governor.cache_set(&topic, video_id.as_str());
                        Ok(video_id)
                    }
                    Err(Error::QuotaExceeded { service, reason }) => {
                        governor.mark_exhausted(&reason);
                        Err(Error::QuotaExceeded { service, reason })
                    }
                    Err(err) => Err(err),
                }
            })
            .await
    }

    async fn assign_fallback(&self, chapter_id: ChapterId, topic: &str) -> VideoResolution {
        let video_id = self.fallback.select(topic);
        if self
            .persist(chapter_id, &video_id, GenerationStatus::Pending)
            .await
        {
            return VideoResolution::fallback(video_id);
        }

        // A searched video landed concurrently and is never downgraded.
        match self.persisted(chapter_id).await {
            Some(assignment) if !assignment.is_fallback() => VideoResolution::cached(assignment),
            _ => VideoResolution::fallback(video_id),
        }
    }

    /// Write through to persistence. Failures are logged, not propagated.
    async fn persist(&self, chapter_id: ChapterId, video_id: &VideoId, status: GenerationStatus) -> bool {
        match self.store.set_chapter_video(chapter_id, video_id, status).await {
            Ok(applied) => {
                if !applied {
                    debug!(%chapter_id, video_id = %video_id, "Kept existing searched video");
                }
                applied
            }
            Err(err) => {
                warn!(
                    %chapter_id,
                    artifact_kind = "VIDEO",
                    video_id = %video_id,
                    error = %err,
                    "Failed to persist video assignment"
                );
                false
            }
        }
    }

    fn refresh_in_background(&self, chapter_id: ChapterId, topic: &str) {
        if !self.config.background_refresh || self.background.is_closed() {
            return;
        }
        let pipeline = self.clone();
        let topic = topic.to_string();
        self.background.spawn(async move {
            let resolution = pipeline.resolve(chapter_id, &topic).await;
            debug!(
                %chapter_id,
                video_id = %resolution.video_id,
                is_fallback = resolution.is_fallback,
                "Background video resolution finished"
            );
        });
    }
}

fn cache_key(topic: &str) -> String {
    format!("video:{}", normalize_query(topic))
}
