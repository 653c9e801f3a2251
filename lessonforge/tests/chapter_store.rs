mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;

use common::{force_state, test_db};
use lessonforge::database::repositories::ChapterStore;
use lessonforge::domain::{ArtifactKind, ChapterId, GenerationStatus, Question, VideoId};

const CHAPTER: ChapterId = ChapterId(7);

#[tokio::test]
async fn missing_state_reads_as_pending() {
    let db = test_db().await;
    let status = db
        .store
        .get_generation_status(CHAPTER, ArtifactKind::Quiz)
        .await
        .unwrap();
    assert_eq!(status, GenerationStatus::Pending);
}

#[tokio::test]
async fn compare_and_set_only_applies_on_expected_status() {
    let db = test_db().await;
    let store = &db.store;
    use GenerationStatus::*;

    assert!(store.compare_and_set_generation_status(CHAPTER, ArtifactKind::Quiz, Pending, Processing).await.unwrap());
    assert!(!store.compare_and_set_generation_status(CHAPTER, ArtifactKind::Quiz, Pending, Processing).await.unwrap());
    assert!(!store.compare_and_set_generation_status(CHAPTER, ArtifactKind::Quiz, Failed, Processing).await.unwrap());
    assert!(store.compare_and_set_generation_status(CHAPTER, ArtifactKind::Quiz, Processing, Completed).await.unwrap());

    let state = store.get_generation_state(CHAPTER, ArtifactKind::Quiz).await.unwrap();
    assert_eq!(state.status, Completed);
    assert!(Utc::now().signed_duration_since(state.last_transition_at) < chrono::Duration::seconds(30));

    // Kinds are tracked independently.
    assert_eq!(
        store.get_generation_status(CHAPTER, ArtifactKind::Video).await.unwrap(),
        Pending
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_claims_have_one_winner() {
    let db = test_db().await;
    let mut set = JoinSet::new();
    for _ in 0..16 {
        let store = db.store.clone();
        set.spawn(async move {
            store
                .compare_and_set_generation_status(
                    ChapterId(99),
                    ArtifactKind::Quiz,
                    GenerationStatus::Pending,
                    GenerationStatus::Processing,
                )
                .await
                .unwrap()
        });
    }

    let mut winners = 0;
    while let Some(won) = set.join_next().await {
        if won.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn stale_reclaim_wins_once() {
    let db = test_db().await;
    let window = chrono::Duration::minutes(10);

    force_state(&db.pool, CHAPTER.0, "QUIZ", "PROCESSING", Duration::from_secs(60)).await;
    let fresh = db
        .store
        .reclaim_stale_generation(CHAPTER, ArtifactKind::Quiz, Utc::now() - window)
        .await
        .unwrap();
    assert!(fresh.is_none(), "a fresh claim must not be reclaimed");

    force_state(&db.pool, CHAPTER.0, "QUIZ", "PROCESSING", Duration::from_secs(3600)).await;
    let stale_before = Utc::now() - window;
    let seq = db.store.reclaim_stale_generation(CHAPTER, ArtifactKind::Quiz, stale_before).await.unwrap();
    assert!(seq.is_some());
    assert!(db.store.reclaim_stale_generation(CHAPTER, ArtifactKind::Quiz, stale_before).await.unwrap().is_none());

    let state = db.store.get_generation_state(CHAPTER, ArtifactKind::Quiz).await.unwrap();
    assert_eq!(state.status, GenerationStatus::Processing);
    assert_eq!(Some(state.claim_seq), seq);
}

#[tokio::test]
async fn release_requires_the_current_claim() {
    let db = test_db().await;
    use GenerationStatus::*;

    let first = db.store.begin_generation(CHAPTER, ArtifactKind::Quiz, Pending).await.unwrap().unwrap();
    assert!(db.store.begin_generation(CHAPTER, ArtifactKind::Quiz, Pending).await.unwrap().is_none());

    // The first owner stalls long enough to be reclaimed.
    force_state(&db.pool, CHAPTER.0, "QUIZ", "PROCESSING", Duration::from_secs(3600)).await;
    let second = db
        .store
        .reclaim_stale_generation(CHAPTER, ArtifactKind::Quiz, Utc::now() - chrono::Duration::minutes(10))
        .await
        .unwrap()
        .unwrap();
    assert!(second > first);

    assert!(!db.store.release_generation(CHAPTER, ArtifactKind::Quiz, first, Completed).await.unwrap());
    assert_eq!(db.store.get_generation_status(CHAPTER, ArtifactKind::Quiz).await.unwrap(), Processing);

    assert!(db.store.release_generation(CHAPTER, ArtifactKind::Quiz, second, Completed).await.unwrap());
    assert!(!db.store.release_generation(CHAPTER, ArtifactKind::Quiz, second, Failed).await.unwrap());
    assert_eq!(db.store.get_generation_status(CHAPTER, ArtifactKind::Quiz).await.unwrap(), Completed);

    // Regeneration from a terminal state takes a new token.
    let third = db.store.begin_generation(CHAPTER, ArtifactKind::Quiz, Completed).await.unwrap().unwrap();
    assert!(third > second);
}

#[tokio::test]
async fn reclaim_ignores_terminal_rows() {
    let db = test_db().await;
    force_state(&db.pool, CHAPTER.0, "QUIZ", "FAILED", Duration::from_secs(3600)).await;
    assert!(db.store.reclaim_stale_generation(CHAPTER, ArtifactKind::Quiz, Utc::now()).await.unwrap().is_none());
}

#[tokio::test]
async fn searched_video_is_never_downgraded() {
    let db = test_db().await;
    let searched = VideoId::new("searched");
    let fallback = VideoId::new("fallback-a");

    assert!(db.store.set_chapter_video(CHAPTER, &fallback, GenerationStatus::Pending).await.unwrap());
    let assignment = db.store.get_chapter_video(CHAPTER).await.unwrap().unwrap();
    assert!(assignment.is_fallback());
    assert_eq!(
        db.store.get_generation_status(CHAPTER, ArtifactKind::Video).await.unwrap(),
        GenerationStatus::Pending
    );

    assert!(db.store.set_chapter_video(CHAPTER, &searched, GenerationStatus::Completed).await.unwrap());
    assert!(!db.store.set_chapter_video(CHAPTER, &fallback, GenerationStatus::Pending).await.unwrap());

    let assignment = db.store.get_chapter_video(CHAPTER).await.unwrap().unwrap();
    assert_eq!(assignment.video_id, searched);
    assert!(!assignment.is_fallback());
    assert_eq!(
        db.store.get_generation_status(CHAPTER, ArtifactKind::Video).await.unwrap(),
        GenerationStatus::Completed
    );
}

#[tokio::test]
async fn questions_append_in_order_and_delete() {
    let db = test_db().await;
    let first = vec![Question::new("Q1", "A1", ["A1", "B1"])];
    let second = vec![
        Question::new("Q2", "A2", ["A2", "B2"]),
        Question::new("Q3", "A3", Vec::<String>::new()),
    ];

    db.store.save_questions(CHAPTER, &first).await.unwrap();
    db.store.save_questions(CHAPTER, &second).await.unwrap();

    let stored = db.store.get_questions(CHAPTER).await.unwrap();
    let texts: Vec<&str> = stored.iter().map(|q| q.question.as_str()).collect();
    assert_eq!(texts, ["Q1", "Q2", "Q3"]);
    assert_eq!(stored[1].options, ["A2", "B2"]);
    assert!(stored[2].options.is_empty());

    assert_eq!(db.store.delete_questions(CHAPTER).await.unwrap(), 3);
    assert!(db.store.get_questions(CHAPTER).await.unwrap().is_empty());
}

fn numbered_questions(count: usize) -> Vec<Question> {
    (1..=count)
        .map(|i| Question::new(format!("Q{i}"), format!("A{i}"), [format!("A{i}"), format!("B{i}")]))
        .collect()
}

fn question_texts(stored: &[Question]) -> Vec<String> {
    stored.iter().map(|q| q.question.clone()).collect()
}

#[tokio::test]
async fn replace_questions_keeps_order_across_batches() {
    let db = test_db().await;
    db.store.save_questions(CHAPTER, &[Question::new("Old", "A", ["A"])]).await.unwrap();
    let seq = db
        .store
        .begin_generation(CHAPTER, ArtifactKind::Quiz, GenerationStatus::Pending)
        .await
        .unwrap()
        .unwrap();

    assert!(db.store.replace_questions(CHAPTER, seq, &numbered_questions(7), 3).await.unwrap());

    let stored = db.store.get_questions(CHAPTER).await.unwrap();
    assert_eq!(question_texts(&stored), ["Q1", "Q2", "Q3", "Q4", "Q5", "Q6", "Q7"]);
    assert_eq!(stored[6].options, ["A7", "B7"]);
}

#[tokio::test]
async fn replace_questions_rejects_a_superseded_claim() {
    let db = test_db().await;
    let seq = db
        .store
        .begin_generation(CHAPTER, ArtifactKind::Quiz, GenerationStatus::Pending)
        .await
        .unwrap()
        .unwrap();
    assert!(db.store.replace_questions(CHAPTER, seq, &numbered_questions(3), 10).await.unwrap());

    assert!(!db.store.replace_questions(CHAPTER, seq + 1, &numbered_questions(1), 10).await.unwrap());

    db.store
        .release_generation(CHAPTER, ArtifactKind::Quiz, seq, GenerationStatus::Completed)
        .await
        .unwrap();
    assert!(!db.store.replace_questions(CHAPTER, seq, &numbered_questions(1), 10).await.unwrap());

    assert_eq!(question_texts(&db.store.get_questions(CHAPTER).await.unwrap()), ["Q1", "Q2", "Q3"]);
}

#[tokio::test]
async fn failed_replace_keeps_previous_questions() {
    let db = test_db().await;
    db.store.save_questions(CHAPTER, &numbered_questions(2)).await.unwrap();
    let seq = db
        .store
        .begin_generation(CHAPTER, ArtifactKind::Quiz, GenerationStatus::Pending)
        .await
        .unwrap()
        .unwrap();

    sqlx::query(
        "CREATE TRIGGER reject_marked BEFORE INSERT ON chapter_questions \
         WHEN NEW.question = 'rejected' BEGIN SELECT RAISE(ABORT, 'rejected question'); END",
    )
    .execute(&db.pool)
    .await
    .unwrap();

    // The second batch fails after the delete and the first batch have run.
    let mut fresh = numbered_questions(3);
    fresh.push(Question::new("rejected", "A", ["A"]));
    assert!(db.store.replace_questions(CHAPTER, seq, &fresh, 3).await.is_err());

    assert_eq!(question_texts(&db.store.get_questions(CHAPTER).await.unwrap()), ["Q1", "Q2"]);
}

#[tokio::test]
async fn summary_and_transcript_round_trip() {
    let db = test_db().await;
    assert_eq!(db.store.get_chapter_summary(CHAPTER).await.unwrap(), None);

    db.store.upsert_chapter(CHAPTER, "Graphs").await.unwrap();
    db.store.set_chapter_transcript(CHAPTER, "long transcript").await.unwrap();
    db.store.set_chapter_summary(CHAPTER, "   ").await.unwrap();

    assert_eq!(
        db.store.get_chapter_transcript(CHAPTER).await.unwrap().as_deref(),
        Some("long transcript")
    );
    // Blank summaries count as missing.
    assert_eq!(db.store.get_chapter_summary(CHAPTER).await.unwrap(), None);

    db.store.set_chapter_summary(CHAPTER, "short").await.unwrap();
    assert_eq!(db.store.get_chapter_summary(CHAPTER).await.unwrap().as_deref(), Some("short"));

    let (title,): (String,) = sqlx::query_as("SELECT title FROM chapters WHERE id = ?")
        .bind(CHAPTER.0)
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(title, "Graphs");
}

#[tokio::test]
async fn store_is_usable_as_trait_object() {
    let db = test_db().await;
    let store: Arc<dyn ChapterStore> = db.store();
    store.upsert_chapter(CHAPTER, "Sorting").await.unwrap();
    assert!(store.get_chapter_video(CHAPTER).await.unwrap().is_none());
}
