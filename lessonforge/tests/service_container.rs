mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FALLBACK_IDS, QuizFakes, test_db};
use lessonforge::config::AppConfig;
use lessonforge::domain::{ArtifactKind, ChapterId, GenerationStatus};
use lessonforge::services::{ServiceContainer, Upstreams};

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.video.fallback_video_ids = FALLBACK_IDS.iter().map(|s| s.to_string()).collect();
    config.transcriber.base_url = "http://localhost:9000".to_string();
    config.cache.sweep_interval_secs = 1;
    config
}

fn upstreams(fakes: &QuizFakes) -> Upstreams {
    Upstreams {
        search: fakes.search.clone(),
        transcriber: fakes.transcriber.clone(),
        summarizer: fakes.summarizer.clone(),
        generator: fakes.generator.clone(),
    }
}

#[tokio::test]
async fn generation_service_end_to_end() {
    let db = test_db().await;
    let fakes = QuizFakes::healthy();
    let config = config();
    config.validate().unwrap();

    let container = ServiceContainer::new(db.pool.clone(), config, upstreams(&fakes)).unwrap();
    container.start_background_tasks();
    let service = &container.generation;

    let video = service.resolve_video(ChapterId(123), "Binary Search Trees").await;
    assert_eq!(video.video_id, "bst-lecture");
    assert!(video.success);
    assert!(!video.from_cache);

    let quick = service.resolve_video_quick(ChapterId(123), "Binary Search Trees").await;
    assert_eq!(quick.video_id, "bst-lecture");

    let questions = service
        .get_or_generate_quiz(ChapterId(123), "bst", "Binary Search Trees")
        .await
        .unwrap();
    assert_eq!(questions.len(), 3);
    assert_eq!(fakes.search.calls(), 1, "the quiz reused the resolved video");

    let state = service
        .generation_status(ChapterId(123), ArtifactKind::Quiz)
        .await
        .unwrap();
    assert_eq!(state.status, GenerationStatus::Completed);

    let quota = service.quota_status();
    assert_eq!(quota.request_count, 1);
    assert!(quota.available);

    service.invalidate_chapter(ChapterId(123), Some("Binary Search Trees"));
    assert_eq!(service.quiz_pipeline().cache_stats().entry_count, 0);

    container.shutdown_with_timeout(Duration::from_secs(5)).await.unwrap();
    assert!(container.is_shutting_down());
}

#[tokio::test]
async fn container_rejects_empty_fallback_pool() {
    let db = test_db().await;
    let fakes = QuizFakes::healthy();
    let mut config = config();
    config.video.fallback_video_ids.clear();

    assert!(ServiceContainer::new(db.pool.clone(), config, upstreams(&fakes)).is_err());
}

#[tokio::test]
async fn upstreams_build_from_config() {
    let upstreams = Upstreams::from_config(&config()).unwrap();
    assert_eq!(Arc::strong_count(&upstreams.generator), 2);
}
