//! Shared fixtures: a migrated SQLite store in a temp directory and
//! counting fakes for the upstream collaborators.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::Notify;

use lessonforge::database::repositories::{ChapterStore, SqlxChapterStore};
use lessonforge::database::{DbPool, init_pool, run_migrations};
use lessonforge::domain::{Question, VideoId};
use lessonforge::pipeline::{
    QuizCollaborators, QuizPipeline, QuizPipelineConfig, VideoPipeline, VideoPipelineConfig,
};
use lessonforge::quota::{QuotaConfig, QuotaGovernor};
use lessonforge::upstream::{
    QuestionGenerator, SummaryGenerator, Transcriber, TranscriptResult, VideoSearch,
};
use lessonforge::{Error, Result};

pub const FALLBACK_IDS: [&str; 3] = ["fallback-a", "fallback-b", "fallback-c"];

pub struct TestDb {
    // Keeps the database directory alive.
    _dir: TempDir,
    pub pool: DbPool,
    pub store: Arc<SqlxChapterStore>,
}

impl TestDb {
    pub fn store(&self) -> Arc<dyn ChapterStore> {
        self.store.clone()
    }
}

pub async fn test_db() -> TestDb {
    let dir = TempDir::new().unwrap();
    let url = format!(
        "sqlite:{}?mode=rwc",
        dir.path().join("test.db").to_string_lossy().replace('\\', "/")
    );
    let pool = init_pool(&url).await.unwrap();
    run_migrations(&pool).await.unwrap();
    TestDb {
        _dir: dir,
        store: Arc::new(SqlxChapterStore::new(pool.clone())),
        pool,
    }
}

/// Force a generation row into `status` with a transition `age` in the past.
pub async fn force_state(pool: &DbPool, chapter_id: i64, kind: &str, status: &str, age: Duration) {
    let at = chrono::Utc::now().timestamp_millis() - age.as_millis() as i64;
    sqlx::query(
        r#"
        INSERT INTO chapter_generation_state (chapter_id, artifact_kind, status, last_transition_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(chapter_id, artifact_kind) DO UPDATE SET
            status = excluded.status, last_transition_at = excluded.last_transition_at
        "#,
    )
    .bind(chapter_id)
    .bind(kind)
    .bind(status)
    .bind(at)
    .execute(pool)
    .await
    .unwrap();
}

pub fn governor(daily_limit: u32) -> Arc<QuotaGovernor> {
    Arc::new(QuotaGovernor::new(QuotaConfig {
        daily_limit,
        ..Default::default()
    }))
}

pub fn video_config() -> VideoPipelineConfig {
    VideoPipelineConfig {
        fallback_video_ids: FALLBACK_IDS.iter().map(|s| s.to_string()).collect(),
        background_refresh: true,
        ..Default::default()
    }
}

pub fn video_pipeline(
    store: Arc<dyn ChapterStore>,
    search: Arc<FakeSearch>,
    governor: Arc<QuotaGovernor>,
) -> VideoPipeline {
    VideoPipeline::new(store, search, governor, video_config()).unwrap()
}

pub struct QuizFakes {
    pub search: Arc<FakeSearch>,
    pub transcriber: Arc<FakeTranscriber>,
    pub summarizer: Arc<FakeSummarizer>,
    pub generator: Arc<FakeGenerator>,
}

impl QuizFakes {
    pub fn healthy() -> Self {
        Self {
            search: FakeSearch::returning("bst-lecture"),
            transcriber: FakeTranscriber::returning(LECTURE),
            summarizer: FakeSummarizer::returning("A BST keeps smaller keys left and larger keys right."),
            generator: FakeGenerator::returning(bst_questions()),
        }
    }

    pub fn pipeline(&self, store: Arc<dyn ChapterStore>) -> QuizPipeline {
        self.pipeline_with(store, QuizPipelineConfig::default())
    }

    pub fn pipeline_with(&self, store: Arc<dyn ChapterStore>, config: QuizPipelineConfig) -> QuizPipeline {
        let video = video_pipeline(store.clone(), self.search.clone(), governor(100));
        QuizPipeline::new(
            store,
            QuizCollaborators {
                transcriber: self.transcriber.clone(),
                summarizer: self.summarizer.clone(),
                generator: self.generator.clone(),
            },
            video,
            config,
        )
    }
}

pub const LECTURE: &str = "Today we look at binary search trees. Every node has at most two children. \
    Keys in the left subtree are smaller than the node and keys in the right subtree are larger.";

pub fn bst_questions() -> Vec<Question> {
    vec![
        Question::new(
            "Where are smaller keys stored in a BST?",
            "Left subtree",
            ["Left subtree", "Right subtree", "Root only"],
        ),
        Question::new(
            "What is the worst-case search time in an unbalanced BST?",
            "O(n)",
            ["O(1)", "O(log n)"],
        ),
        Question::new(
            "How many children can a BST node have at most?",
            "Two",
            ["One", "two", "Three", "One"],
        ),
    ]
}

/// Waits on a gate when one is installed.
#[derive(Default)]
pub struct Gate {
    entered: Notify,
    release: Mutex<Option<Arc<Notify>>>,
}

impl Gate {
    pub fn close(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.release.lock() = Some(notify.clone());
        notify
    }

    /// Resolves once a call has reached the gate.
    pub async fn entered(&self) {
        tokio::time::timeout(Duration::from_secs(5), self.entered.notified())
            .await
            .expect("call never reached the gate");
    }

    async fn pass(&self) {
        self.entered.notify_one();
        let release = self.release.lock().clone();
        if let Some(release) = release {
            release.notified().await;
        }
    }
}

pub enum SearchMode {
    Found(String),
    Fail,
    Quota,
}

pub struct FakeSearch {
    pub calls: AtomicUsize,
    pub gate: Gate,
    mode: Mutex<SearchMode>,
}

impl FakeSearch {
    pub fn returning(id: &str) -> Arc<Self> {
        Self::with_mode(SearchMode::Found(id.to_string()))
    }

    pub fn failing() -> Arc<Self> {
        Self::with_mode(SearchMode::Fail)
    }

    pub fn with_mode(mode: SearchMode) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            gate: Gate::default(),
            mode: Mutex::new(mode),
        })
    }

    pub fn set_mode(&self, mode: SearchMode) {
        *self.mode.lock() = mode;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoSearch for FakeSearch {
    async fn search(&self, topic: &str) -> Result<VideoId> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.pass().await;
        match &*self.mode.lock() {
            SearchMode::Found(id) => Ok(VideoId::new(id.clone())),
            SearchMode::Fail => Err(Error::upstream("video_search", format!("no results for {topic}"))),
            SearchMode::Quota => Err(Error::quota_exceeded("video_search", "quotaExceeded")),
        }
    }
}

pub struct FakeTranscriber {
    pub calls: AtomicUsize,
    transcript: Option<String>,
    pub last_video: Mutex<Option<VideoId>>,
}

impl FakeTranscriber {
    pub fn returning(text: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            transcript: Some(text.to_string()),
            last_video: Mutex::new(None),
        })
    }

    pub fn unavailable() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            transcript: None,
            last_video: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    async fn get_transcript(&self, video_id: &VideoId) -> Result<TranscriptResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_video.lock() = Some(video_id.clone());
        Ok(match &self.transcript {
            Some(text) => TranscriptResult::ok(text.clone()),
            None => TranscriptResult::unavailable(),
        })
    }
}

pub struct FakeSummarizer {
    pub calls: AtomicUsize,
    summary: Option<String>,
}

impl FakeSummarizer {
    pub fn returning(summary: &str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            summary: Some(summary.to_string()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            summary: None,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SummaryGenerator for FakeSummarizer {
    async fn summarize(&self, _text: &str, _topic: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.summary
            .clone()
            .ok_or_else(|| Error::upstream("summary_generation", "model overloaded"))
    }
}

pub enum GeneratorMode {
    Questions(Vec<Question>),
    Fail,
    Quota,
}

pub struct FakeGenerator {
    pub calls: AtomicUsize,
    pub gate: Gate,
    pub last_input: Mutex<Option<String>>,
    mode: Mutex<GeneratorMode>,
}

impl FakeGenerator {
    pub fn returning(questions: Vec<Question>) -> Arc<Self> {
        Self::with_mode(GeneratorMode::Questions(questions))
    }

    pub fn with_mode(mode: GeneratorMode) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            gate: Gate::default(),
            last_input: Mutex::new(None),
            mode: Mutex::new(mode),
        })
    }

    pub fn set_mode(&self, mode: GeneratorMode) {
        *self.mode.lock() = mode;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_input(&self) -> Option<String> {
        self.last_input.lock().clone()
    }
}

#[async_trait]
impl QuestionGenerator for FakeGenerator {
    async fn generate(&self, text: &str, _topic: &str) -> Result<Vec<Question>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_input.lock() = Some(text.to_string());
        self.gate.pass().await;
        match &*self.mode.lock() {
            GeneratorMode::Questions(questions) => Ok(questions.clone()),
            GeneratorMode::Fail => Err(Error::upstream("question_generation", "HTTP 503")),
            GeneratorMode::Quota => Err(Error::quota_exceeded("text_generation", "429")),
        }
    }
}
