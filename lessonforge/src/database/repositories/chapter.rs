//! Chapter store: the persistence contract the pipelines depend on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::database::models::{ChapterDbModel, GenerationStateDbModel, QuestionDbModel};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::{datetime_to_ms, now_ms};
use crate::domain::{
    ArtifactKind, ChapterId, GenerationState, GenerationStatus, Question, VideoAssignment,
    VideoId,
};
use crate::Result;

/// Persistence operations used by the generation pipelines.
///
/// Generation state is only ever changed through the conditional writes
/// [`compare_and_set_generation_status`](Self::compare_and_set_generation_status)
/// and [`reclaim_stale_generation`](Self::reclaim_stale_generation), which are
/// the cross-process mutual-exclusion point.
#[async_trait]
pub trait ChapterStore: Send + Sync {
    /// Create the chapter row if missing and set its title.
    async fn upsert_chapter(&self, chapter_id: ChapterId, title: &str) -> Result<()>;

    async fn get_chapter_video(&self, chapter_id: ChapterId) -> Result<Option<VideoAssignment>>;

    /// Persist a video for a chapter and record the VIDEO generation status.
    ///
    /// A searched (`COMPLETED`) assignment is never downgraded to a fallback;
    /// returns whether the write was applied.
    async fn set_chapter_video(
        &self,
        chapter_id: ChapterId,
        video_id: &VideoId,
        status: GenerationStatus,
    ) -> Result<bool>;

    async fn get_chapter_summary(&self, chapter_id: ChapterId) -> Result<Option<String>>;
    async fn set_chapter_summary(&self, chapter_id: ChapterId, summary: &str) -> Result<()>;
    async fn get_chapter_transcript(&self, chapter_id: ChapterId) -> Result<Option<String>>;
    async fn set_chapter_transcript(&self, chapter_id: ChapterId, transcript: &str) -> Result<()>;

    /// Questions in their persisted order.
    async fn get_questions(&self, chapter_id: ChapterId) -> Result<Vec<Question>>;
    /// Append questions after any already persisted, in one write.
    async fn save_questions(&self, chapter_id: ChapterId, questions: &[Question]) -> Result<()>;
    async fn delete_questions(&self, chapter_id: ChapterId) -> Result<u64>;

    /// Replace the chapter's questions on behalf of the QUIZ claim `claim_seq`.
    ///
    /// The delete and every batch of at most `batch_size` rows commit in one
    /// transaction, and only while that claim still holds `PROCESSING`.
    /// Returns `false`, writing nothing, once the claim was taken over.
    async fn replace_questions(
        &self,
        chapter_id: ChapterId,
        claim_seq: i64,
        questions: &[Question],
        batch_size: usize,
    ) -> Result<bool>;

    /// Full state row; a missing row reads as `PENDING`.
    async fn get_generation_state(
        &self,
        chapter_id: ChapterId,
        kind: ArtifactKind,
    ) -> Result<GenerationState>;

    async fn get_generation_status(
        &self,
        chapter_id: ChapterId,
        kind: ArtifactKind,
    ) -> Result<GenerationStatus> {
        Ok(self.get_generation_state(chapter_id, kind).await?.status)
    }

    /// Move the status from `expected` to `new` only if it is still `expected`.
    async fn compare_and_set_generation_status(
        &self,
        chapter_id: ChapterId,
        kind: ArtifactKind,
        expected: GenerationStatus,
        new: GenerationStatus,
    ) -> Result<bool>;

    /// Compare-and-set from `expected` into `PROCESSING`, returning the new
    /// claim's fencing token, or `None` when the row was no longer `expected`.
    async fn begin_generation(
        &self,
        chapter_id: ChapterId,
        kind: ArtifactKind,
        expected: GenerationStatus,
    ) -> Result<Option<i64>>;

    /// Take over a `PROCESSING` row last touched before `stale_before`.
    ///
    /// The row stays `PROCESSING` with a fresh timestamp and a new fencing
    /// token, so at most one caller wins and the previous holder can no
    /// longer release it.
    async fn reclaim_stale_generation(
        &self,
        chapter_id: ChapterId,
        kind: ArtifactKind,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<i64>>;

    /// Move a `PROCESSING` row held by `claim_seq` to `next`.
    async fn release_generation(
        &self,
        chapter_id: ChapterId,
        kind: ArtifactKind,
        claim_seq: i64,
        next: GenerationStatus,
    ) -> Result<bool>;
}

/// SQLx implementation of ChapterStore.
#[derive(Clone)]
pub struct SqlxChapterStore {
    pool: SqlitePool,
}

impl SqlxChapterStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn get_chapter(&self, chapter_id: ChapterId) -> Result<Option<ChapterDbModel>> {
        let chapter = sqlx::query_as::<_, ChapterDbModel>("SELECT * FROM chapters WHERE id = ?")
            .bind(chapter_id.0)
            .fetch_optional(&self.pool)
            .await?;
        Ok(chapter)
    }

    /// Conditional status write. Returns the row's `claim_seq` after the
    /// write, which entering `PROCESSING` increments.
    async fn try_transition(
        &self,
        chapter_id: ChapterId,
        kind: ArtifactKind,
        expected: GenerationStatus,
        new: GenerationStatus,
    ) -> Result<Option<i64>> {
        let now = now_ms();
        let bump = i64::from(new == GenerationStatus::Processing);
        // A PENDING row can appear between the two statements (video
        // fallbacks insert one), so the update is retried once.
        for _ in 0..2 {
            let updated: Option<(i64,)> = sqlx::query_as(
                r#"
                UPDATE chapter_generation_state
                SET status = ?, last_transition_at = ?, claim_seq = claim_seq + ?
                WHERE chapter_id = ? AND artifact_kind = ? AND status = ?
                RETURNING claim_seq
                "#,
            )
            .bind(new.as_str())
            .bind(now)
            .bind(bump)
            .bind(chapter_id.0)
            .bind(kind.as_str())
            .bind(expected.as_str())
            .fetch_optional(&self.pool)
            .await?;
            if let Some((claim_seq,)) = updated {
                return Ok(Some(claim_seq));
            }

            if expected != GenerationStatus::Pending {
                return Ok(None);
            }

            // RETURNING yields nothing when the insert is ignored.
            let inserted: Option<(i64,)> = sqlx::query_as(
                r#"
                INSERT OR IGNORE INTO chapter_generation_state
                    (chapter_id, artifact_kind, status, last_transition_at, claim_seq)
                VALUES (?, ?, ?, ?, ?)
                RETURNING claim_seq
                "#,
            )
            .bind(chapter_id.0)
            .bind(kind.as_str())
            .bind(new.as_str())
            .bind(now)
            .bind(bump)
            .fetch_optional(&self.pool)
            .await?;
            if let Some((claim_seq,)) = inserted {
                return Ok(Some(claim_seq));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl ChapterStore for SqlxChapterStore {
    async fn upsert_chapter(&self, chapter_id: ChapterId, title: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chapters (id, title, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET title = excluded.title, updated_at = excluded.updated_at
            "#,
        )
        .bind(chapter_id.0)
        .bind(title)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_chapter_video(&self, chapter_id: ChapterId) -> Result<Option<VideoAssignment>> {
        Ok(self
            .get_chapter(chapter_id)
            .await?
            .and_then(|chapter| chapter.video_assignment()))
    }

    async fn set_chapter_video(
        &self,
        chapter_id: ChapterId,
        video_id: &VideoId,
        status: GenerationStatus,
    ) -> Result<bool> {
        retry_on_sqlite_busy("set_chapter_video", || async {
            let now = now_ms();
            let mut tx = self.pool.begin().await?;

            let applied = sqlx::query(
                r#"
                INSERT INTO chapters (id, video_id, video_status, updated_at) VALUES (?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    video_id = excluded.video_id,
                    video_status = excluded.video_status,
                    updated_at = excluded.updated_at
                WHERE chapters.video_status IS NULL
                    OR chapters.video_status != 'COMPLETED'
                    OR excluded.video_status = 'COMPLETED'
                "#,
            )
            .bind(chapter_id.0)
            .bind(video_id.as_str())
            .bind(status.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected()
                == 1;

            if applied {
                sqlx::query(
                    r#"
                    INSERT INTO chapter_generation_state
                        (chapter_id, artifact_kind, status, last_transition_at)
                    VALUES (?, 'VIDEO', ?, ?)
                    ON CONFLICT(chapter_id, artifact_kind) DO UPDATE SET
                        status = excluded.status,
                        last_transition_at = excluded.last_transition_at
                    "#,
                )
                .bind(chapter_id.0)
                .bind(status.as_str())
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(applied)
        })
        .await
    }

    async fn get_chapter_summary(&self, chapter_id: ChapterId) -> Result<Option<String>> {
        Ok(self
            .get_chapter(chapter_id)
            .await?
            .and_then(|chapter| chapter.summary)
            .filter(|s| !s.trim().is_empty()))
    }

    async fn set_chapter_summary(&self, chapter_id: ChapterId, summary: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chapters (id, summary, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET summary = excluded.summary, updated_at = excluded.updated_at
            "#,
        )
        .bind(chapter_id.0)
        .bind(summary)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_chapter_transcript(&self, chapter_id: ChapterId) -> Result<Option<String>> {
        Ok(self
            .get_chapter(chapter_id)
            .await?
            .and_then(|chapter| chapter.transcript)
            .filter(|t| !t.trim().is_empty()))
    }

    async fn set_chapter_transcript(&self, chapter_id: ChapterId, transcript: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chapters (id, transcript, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET transcript = excluded.transcript, updated_at = excluded.updated_at
            "#,
        )
        .bind(chapter_id.0)
        .bind(transcript)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_questions(&self, chapter_id: ChapterId) -> Result<Vec<Question>> {
        let rows = sqlx::query_as::<_, QuestionDbModel>(
            "SELECT * FROM chapter_questions WHERE chapter_id = ? ORDER BY position, id",
        )
        .bind(chapter_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(QuestionDbModel::into_question).collect()
    }

    async fn save_questions(&self, chapter_id: ChapterId, questions: &[Question]) -> Result<()> {
        if questions.is_empty() {
            return Ok(());
        }

        let mut encoded = Vec::with_capacity(questions.len());
        for question in questions {
            encoded.push(serde_json::to_string(&question.options)?);
        }

        let now = now_ms();
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT OR IGNORE INTO chapters (id, updated_at) VALUES (?, ?)")
            .bind(chapter_id.0)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let (next_position,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(position), -1) + 1 FROM chapter_questions WHERE chapter_id = ?",
        )
        .bind(chapter_id.0)
        .fetch_one(&mut *tx)
        .await?;

        for (offset, (question, options)) in questions.iter().zip(&encoded).enumerate() {
            sqlx::query(
                r#"
                INSERT INTO chapter_questions
                    (chapter_id, position, question, answer, options, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(chapter_id.0)
            .bind(next_position + offset as i64)
            .bind(&question.question)
            .bind(&question.answer)
            .bind(options)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_questions(&self, chapter_id: ChapterId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM chapter_questions WHERE chapter_id = ?")
            .bind(chapter_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn replace_questions(
        &self,
        chapter_id: ChapterId,
        claim_seq: i64,
        questions: &[Question],
        batch_size: usize,
    ) -> Result<bool> {
        let mut rows = Vec::with_capacity(questions.len());
        for question in questions {
            rows.push((question, serde_json::to_string(&question.options)?));
        }
        let batch_size = batch_size.max(1);

        retry_on_sqlite_busy("replace_questions", || async {
            let now = now_ms();
            let mut tx = self.pool.begin().await?;

            // Writing the state row first takes the write lock, so the claim
            // cannot change hands before commit.
            let held = sqlx::query(
                r#"
                UPDATE chapter_generation_state
                SET last_transition_at = last_transition_at
                WHERE chapter_id = ? AND artifact_kind = 'QUIZ'
                    AND status = 'PROCESSING' AND claim_seq = ?
                "#,
            )
            .bind(chapter_id.0)
            .bind(claim_seq)
            .execute(&mut *tx)
            .await?
            .rows_affected()
                == 1;
            if !held {
                tx.rollback().await?;
                return Ok(false);
            }

            sqlx::query("INSERT OR IGNORE INTO chapters (id, updated_at) VALUES (?, ?)")
                .bind(chapter_id.0)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM chapter_questions WHERE chapter_id = ?")
                .bind(chapter_id.0)
                .execute(&mut *tx)
                .await?;

            for (batch_index, batch) in rows.chunks(batch_size).enumerate() {
                let first_position = (batch_index * batch_size) as i64;
                let mut insert = QueryBuilder::<Sqlite>::new(
                    "INSERT INTO chapter_questions \
                     (chapter_id, position, question, answer, options, created_at) ",
                );
                insert.push_values(
                    batch.iter().enumerate(),
                    |mut row, (offset, (question, options))| {
                        row.push_bind(chapter_id.0)
                            .push_bind(first_position + offset as i64)
                            .push_bind(question.question.as_str())
                            .push_bind(question.answer.as_str())
                            .push_bind(options.as_str())
                            .push_bind(now);
                    },
                );
                insert.build().execute(&mut *tx).await?;
            }

            tx.commit().await?;
            Ok(true)
        })
        .await
    }

    async fn get_generation_state(
        &self,
        chapter_id: ChapterId,
        kind: ArtifactKind,
    ) -> Result<GenerationState> {
        let row = sqlx::query_as::<_, GenerationStateDbModel>(
            "SELECT * FROM chapter_generation_state WHERE chapter_id = ? AND artifact_kind = ?",
        )
        .bind(chapter_id.0)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => GenerationState::try_from(row),
            None => Ok(GenerationState::pending(chapter_id, kind)),
        }
    }

    async fn compare_and_set_generation_status(
        &self,
        chapter_id: ChapterId,
        kind: ArtifactKind,
        expected: GenerationStatus,
        new: GenerationStatus,
    ) -> Result<bool> {
        let written = retry_on_sqlite_busy("compare_and_set_generation_status", || {
            self.try_transition(chapter_id, kind, expected, new)
        })
        .await?;
        Ok(written.is_some())
    }

    async fn begin_generation(
        &self,
        chapter_id: ChapterId,
        kind: ArtifactKind,
        expected: GenerationStatus,
    ) -> Result<Option<i64>> {
        retry_on_sqlite_busy("begin_generation", || {
            self.try_transition(chapter_id, kind, expected, GenerationStatus::Processing)
        })
        .await
    }

    async fn reclaim_stale_generation(
        &self,
        chapter_id: ChapterId,
        kind: ArtifactKind,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<i64>> {
        let stale_before = datetime_to_ms(stale_before);
        retry_on_sqlite_busy("reclaim_stale_generation", || async {
            let reclaimed: Option<(i64,)> = sqlx::query_as(
                r#"
                UPDATE chapter_generation_state
                SET last_transition_at = ?, claim_seq = claim_seq + 1
                WHERE chapter_id = ? AND artifact_kind = ?
                    AND status = 'PROCESSING' AND last_transition_at < ?
                RETURNING claim_seq
                "#,
            )
            .bind(now_ms())
            .bind(chapter_id.0)
            .bind(kind.as_str())
            .bind(stale_before)
            .fetch_optional(&self.pool)
            .await?;
            Ok(reclaimed.map(|(claim_seq,)| claim_seq))
        })
        .await
    }

    async fn release_generation(
        &self,
        chapter_id: ChapterId,
        kind: ArtifactKind,
        claim_seq: i64,
        next: GenerationStatus,
    ) -> Result<bool> {
        retry_on_sqlite_busy("release_generation", || async {
            let result = sqlx::query(
                r#"
                UPDATE chapter_generation_state
                SET status = ?, last_transition_at = ?
                WHERE chapter_id = ? AND artifact_kind = ?
                    AND status = 'PROCESSING' AND claim_seq = ?
                "#,
            )
            .bind(next.as_str())
            .bind(now_ms())
            .bind(chapter_id.0)
            .bind(kind.as_str())
            .bind(claim_seq)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        })
        .await
    }
}
