/// In-process store.
pub mod memory;
/// MongoDB store.
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::time::SystemTime;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::models::{
    ActiveChallengeEntity, ChallengeFilter, ParticipantEntity, SessionStateEntity, VoteEntity,
};
use crate::dao::storage::StorageResult;

pub use memory::MemoryArenaStore;

/// Abstraction over the persistence layer holding participants, challenge records and votes.
///
/// Every mutation is either an upsert keyed by a natural key or a relative increment, so
/// concurrent callers never need a lock above this layer.
pub trait ArenaStore: Send + Sync {
    /// Participant row by id.
    fn get_participant(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>>;
    /// Insert a participant; a taken id or display name is a [`StorageError::Conflict`].
    ///
    /// [`StorageError::Conflict`]: crate::dao::storage::StorageError::Conflict
    fn create_participant(
        &self,
        participant: ParticipantEntity,
    ) -> BoxFuture<'static, StorageResult<ParticipantEntity>>;
    /// Participant matching both display name and access code.
    fn find_participant(
        &self,
        display_name: String,
        access_code: String,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>>;
    /// Atomically add `delta` to the score, returning the updated row (`None` if unknown).
    fn increment_score(
        &self,
        id: Uuid,
        delta: i64,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>>;
    /// Participants ordered by score descending, then join time ascending.
    fn list_participants(
        &self,
        limit: Option<usize>,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantEntity>>>;
    /// Insert or replace the record for `record.challenge_id`; returns the previous row.
    fn upsert_active_challenge(
        &self,
        record: ActiveChallengeEntity,
    ) -> BoxFuture<'static, StorageResult<Option<ActiveChallengeEntity>>>;
    /// Replace an existing record; returns the previous row or `None` when absent.
    fn update_active_challenge(
        &self,
        record: ActiveChallengeEntity,
    ) -> BoxFuture<'static, StorageResult<Option<ActiveChallengeEntity>>>;
    /// Remove the record of a challenge; `false` when there was none.
    fn delete_active_challenge(&self, challenge_id: String) -> BoxFuture<'static, StorageResult<bool>>;
    /// End every active record in one batch, returning exactly the rows it ended, as they were
    /// before.
    fn end_all_active_challenges(
        &self,
        ended_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<ActiveChallengeEntity>>>;
    /// Challenge records matching `filter`, oldest start first.
    fn list_active_challenges(
        &self,
        filter: ChallengeFilter,
    ) -> BoxFuture<'static, StorageResult<Vec<ActiveChallengeEntity>>>;
    /// Persisted session singleton, if one was ever saved.
    fn load_session_state(&self) -> BoxFuture<'static, StorageResult<Option<SessionStateEntity>>>;
    /// Overwrite the session singleton.
    fn save_session_state(&self, state: SessionStateEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Replace the vote for `(user_id, question_id)`; returns the vote it replaced.
    ///
    /// The closed check and the write are one atomic step: a vote on a closed question fails
    /// with [`StorageError::Rejected`].
    ///
    /// [`StorageError::Rejected`]: crate::dao::storage::StorageError::Rejected
    fn upsert_vote(&self, vote: VoteEntity) -> BoxFuture<'static, StorageResult<Option<VoteEntity>>>;
    /// Every vote cast on a question.
    fn list_votes(&self, question_id: String) -> BoxFuture<'static, StorageResult<Vec<VoteEntity>>>;
    /// Mark a poll question closed; `false` when it was already closed.
    fn close_poll(&self, question_id: String) -> BoxFuture<'static, StorageResult<bool>>;
    /// Clear the closed flag only, keeping the votes.
    fn reopen_poll(&self, question_id: String) -> BoxFuture<'static, StorageResult<()>>;
    /// Whether a poll question is closed.
    fn is_poll_closed(&self, question_id: String) -> BoxFuture<'static, StorageResult<bool>>;
    /// Delete every vote of a question and reopen it; returns the number of votes removed.
    fn reset_poll(&self, question_id: String) -> BoxFuture<'static, StorageResult<u64>>;
    /// Cheap round-trip proving the backend answers.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Rebuild the backend connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;

    /// Server-side admin predicate; unknown participants are not admins.
    fn is_admin(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let lookup = self.get_participant(id);
        Box::pin(async move { Ok(lookup.await?.is_some_and(|participant| participant.is_admin)) })
    }
}
