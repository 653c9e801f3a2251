//! Service container for dependency injection.
//!
//! Holds the process-lifetime components (store, governor, caches,
//! pipelines) and manages their background tasks.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;
use crate::cache::CacheSweeper;
use crate::config::AppConfig;
use crate::database::repositories::{ChapterStore, SqlxChapterStore};
use crate::pipeline::{QuizCollaborators, QuizPipeline, VideoPipeline};
use crate::quota::{QuotaGovernor, QuotaResetScheduler};
use crate::services::GenerationService;
use crate::upstream::{
    ChatCompletionsClient, HttpTranscriber, QuestionGenerator, SummaryGenerator, Transcriber,
    VideoSearch, YouTubeSearchClient, build_http_client,
};

/// The external collaborators the pipelines call.
#[derive(Clone)]
pub struct Upstreams {
    pub search: Arc<dyn VideoSearch>,
    pub transcriber: Arc<dyn Transcriber>,
    pub summarizer: Arc<dyn SummaryGenerator>,
    pub generator: Arc<dyn QuestionGenerator>,
}

impl Upstreams {
    /// HTTP clients built from configuration, sharing one connection pool.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let client = build_http_client(&config.upstream)?;
        let retry = config.upstream.retry.clone();

        if config.youtube.api_key.is_empty() {
            warn!("No video search API key configured, every chapter will use a fallback video");
        }

        let llm = Arc::new(ChatCompletionsClient::new(
            client.clone(),
            config.llm.clone(),
            config.upstream.generation_timeout(),
            retry.clone(),
        ));
        Ok(Self {
            search: Arc::new(YouTubeSearchClient::new(
                client.clone(),
                config.youtube.clone(),
                config.upstream.request_timeout(),
            )),
            transcriber: Arc::new(HttpTranscriber::new(
                client,
                config.transcriber.clone(),
                config.upstream.request_timeout(),
                retry,
            )),
            summarizer: llm.clone(),
            generator: llm,
        })
    }
}

pub struct ServiceContainer {
    pub pool: SqlitePool,
    pub store: Arc<dyn ChapterStore>,
    pub governor: Arc<QuotaGovernor>,
    pub generation: GenerationService,
    config: AppConfig,
    cancellation_token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ServiceContainer {
    pub fn new(pool: SqlitePool, config: AppConfig, upstreams: Upstreams) -> Result<Self> {
        info!("Initializing service container");

        let store: Arc<dyn ChapterStore> = Arc::new(SqlxChapterStore::new(pool.clone()));
        let governor = Arc::new(QuotaGovernor::new(config.quota.clone()));

        let video = VideoPipeline::new(
            store.clone(),
            upstreams.search,
            governor.clone(),
            config.video.clone(),
        )?;
        let quiz = QuizPipeline::new(
            store.clone(),
            QuizCollaborators {
                transcriber: upstreams.transcriber,
                summarizer: upstreams.summarizer,
                generator: upstreams.generator,
            },
            video.clone(),
            config.quiz.clone(),
        );
        let generation = GenerationService::new(store.clone(), governor.clone(), video, quiz);

        info!(
            daily_limit = config.quota.daily_limit,
            stale_after = ?config.quiz.stale_after(),
            "Service container initialized"
        );

        Ok(Self {
            pool,
            store,
            governor,
            generation,
            config,
            cancellation_token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start the quota reset scheduler and the cache sweeper.
    pub fn start_background_tasks(&self) {
        let scheduler = QuotaResetScheduler::new(self.governor.clone());
        let sweeper = CacheSweeper::new(self.config.cache.sweep_interval())
            .with_target(self.governor.clone())
            .with_target(self.generation.video_pipeline().sweepable())
            .with_target(self.generation.quiz_pipeline().sweepable());

        let mut tasks = self.tasks.lock();
        tasks.push(scheduler.start(self.cancellation_token.child_token()));
        tasks.push(sweeper.start(self.cancellation_token.child_token()));
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(self.config.shutdown_timeout()).await
    }

    /// Stop background tasks and wait for in-flight background resolutions.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        info!("Shutting down services (timeout: {:?})", timeout);

        self.cancellation_token.cancel();

        let background = self.generation.video_pipeline().background_tasks().clone();
        background.close();
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());

        let drained = tokio::time::timeout(timeout, async {
            background.wait().await;
            for task in tasks {
                if let Err(e) = task.await {
                    warn!(error = %e, "Background task ended abnormally");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                pending = background.len(),
                "Shutdown timeout reached, abandoning background work"
            );
        }

        info!("Closing database pool...");
        self.pool.close().await;

        info!("Services shut down");
        Ok(())
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
