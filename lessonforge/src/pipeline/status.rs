//! Generation status state machine over the persistence collaborator.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::database::repositories::ChapterStore;
use crate::domain::{ArtifactKind, ChapterId, GenerationState, GenerationStatus};
use crate::{Error, Result};

/// Default age after which a `PROCESSING` row is considered abandoned.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(10 * 60);

/// Proof that this execution holds `PROCESSING` for a chapter artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationClaim {
    pub chapter_id: ChapterId,
    pub kind: ArtifactKind,
    /// Status the row had before the claim.
    pub previous: GenerationStatus,
    /// Whether the claim took over an abandoned `PROCESSING` row.
    pub reclaimed: bool,
    /// Fencing token; a later claim on the same row gets a larger one.
    pub claim_seq: i64,
}

/// Moves generation rows through `PENDING -> PROCESSING -> COMPLETED | FAILED`
/// using conditional writes only.
#[derive(Clone)]
pub struct GenerationStateMachine {
    store: Arc<dyn ChapterStore>,
    stale_after: Duration,
}

impl GenerationStateMachine {
    pub fn new(store: Arc<dyn ChapterStore>) -> Self {
        Self::with_stale_after(store, DEFAULT_STALE_AFTER)
    }

    pub fn with_stale_after(store: Arc<dyn ChapterStore>, stale_after: Duration) -> Self {
        Self { store, stale_after }
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    pub async fn current(&self, chapter_id: ChapterId, kind: ArtifactKind) -> Result<GenerationState> {
        self.store.get_generation_state(chapter_id, kind).await
    }

    /// Whether another execution holds a fresh `PROCESSING` claim.
    pub fn is_held_elsewhere(&self, state: &GenerationState) -> bool {
        state.status == GenerationStatus::Processing && !state.is_stale(Utc::now(), self.stale_after)
    }

    /// Enter `PROCESSING`.
    ///
    /// Fails with [`Error::GenerationInProgress`] while a fresh claim exists
    /// and with [`Error::PersistenceConflict`] when another execution wins
    /// the conditional write.
    pub async fn claim(&self, chapter_id: ChapterId, kind: ArtifactKind) -> Result<GenerationClaim> {
        let state = self.current(chapter_id, kind).await?;

        if state.status == GenerationStatus::Processing {
            let now = Utc::now();
            if !state.is_stale(now, self.stale_after) {
                debug!(%chapter_id, artifact_kind = %kind, "Generation already in progress");
                return Err(Error::GenerationInProgress { chapter_id, kind });
            }

            let stale_before = now
                - chrono::Duration::from_std(self.stale_after).unwrap_or(chrono::Duration::zero());
            let Some(claim_seq) = self
                .store
                .reclaim_stale_generation(chapter_id, kind, stale_before)
                .await?
            else {
                return Err(Error::PersistenceConflict { chapter_id, kind });
            };

            warn!(
                %chapter_id,
                artifact_kind = %kind,
                last_transition_at = %state.last_transition_at,
                "Reclaimed abandoned generation"
            );
            return Ok(GenerationClaim {
                chapter_id,
                kind,
                previous: GenerationStatus::Processing,
                reclaimed: true,
                claim_seq,
            });
        }

        if !state.status.can_transition_to(GenerationStatus::Processing) {
            return Err(Error::InvalidStateTransition {
                from: state.status.to_string(),
                to: GenerationStatus::Processing.to_string(),
            });
        }

        let Some(claim_seq) = self
            .store
            .begin_generation(chapter_id, kind, state.status)
            .await?
        else {
            debug!(%chapter_id, artifact_kind = %kind, "Lost generation claim race");
            return Err(Error::PersistenceConflict { chapter_id, kind });
        };

        debug!(%chapter_id, artifact_kind = %kind, previous = %state.status, "Claimed generation");
        Ok(GenerationClaim {
            chapter_id,
            kind,
            previous: state.status,
            reclaimed: false,
            claim_seq,
        })
    }

    pub async fn complete(&self, claim: &GenerationClaim) -> Result<()> {
        self.release(claim, GenerationStatus::Completed).await?;
        info!(chapter_id = %claim.chapter_id, artifact_kind = %claim.kind, "Generation completed");
        Ok(())
    }

    pub async fn fail(&self, claim: &GenerationClaim) -> Result<()> {
        self.release(claim, GenerationStatus::Failed).await
    }

    /// Leave `PROCESSING`, but only while `claim` still holds the row.
    ///
    /// A claim taken over by a stale reclaim fails with
    /// [`Error::PersistenceConflict`] and leaves the new holder untouched.
    async fn release(&self, claim: &GenerationClaim, next: GenerationStatus) -> Result<()> {
        let released = self
            .store
            .release_generation(claim.chapter_id, claim.kind, claim.claim_seq, next)
            .await?;
        if released {
            return Ok(());
        }

        let current = self.current(claim.chapter_id, claim.kind).await?;
        warn!(
            chapter_id = %claim.chapter_id,
            artifact_kind = %claim.kind,
            claim_seq = claim.claim_seq,
            current = %current.status,
            current_claim_seq = current.claim_seq,
            target = %next,
            "Generation claim was lost before release"
        );
        if current.status == GenerationStatus::Processing {
            return Err(Error::PersistenceConflict {
                chapter_id: claim.chapter_id,
                kind: claim.kind,
            });
        }
        Err(Error::InvalidStateTransition {
            from: current.status.to_string(),
            to: next.to_string(),
        })
    }
}
