use std::{
    collections::HashSet,
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::SystemTime,
};

use dashmap::DashSet;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::ArenaStore;
use crate::dao::{
    models::{
        ActiveChallengeEntity, ChallengeFilter, ParticipantEntity, SessionStateEntity, VoteEntity,
    },
    storage::{StorageError, StorageResult},
};
use crate::state::leaderboard::standing_order;

#[derive(Default)]
struct Inner {
    participants: IndexMap<Uuid, ParticipantEntity>,
    challenges: IndexMap<String, ActiveChallengeEntity>,
    session: Option<SessionStateEntity>,
    votes: IndexMap<(String, Uuid), VoteEntity>,
    closed_polls: HashSet<String>,
}

/// Process-local store keeping every table behind a single lock.
///
/// Each trait call takes the lock exactly once, so batches such as ending every challenge or
/// replacing a vote are observed atomically by concurrent readers.
#[derive(Clone, Default)]
pub struct MemoryArenaStore {
    inner: Arc<RwLock<Inner>>,
    offline: Arc<AtomicBool>,
    failures: Arc<DashSet<&'static str>>,
}

impl MemoryArenaStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: while offline every call fails with [`StorageError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make the next call of `operation` (an [`ArenaStore`] method name) fail as unavailable.
    pub fn fail_next(&self, operation: &'static str) {
        self.failures.insert(operation);
    }

    fn check(&self, operation: &'static str) -> StorageResult<()> {
        self.check_online()?;
        if self.failures.remove(operation).is_some() {
            return Err(StorageError::unavailable(
                format!("in-memory store failed `{operation}`"),
                io::Error::new(io::ErrorKind::Interrupted, "injected failure"),
            ));
        }
        Ok(())
    }

    fn check_online(&self) -> StorageResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(
                "in-memory store is offline".into(),
                io::Error::new(io::ErrorKind::NotConnected, "offline"),
            ));
        }
        Ok(())
    }

    async fn read<T>(&self, operation: &'static str, f: impl FnOnce(&Inner) -> T) -> StorageResult<T> {
        self.check(operation)?;
        let guard = self.inner.read().await;
        Ok(f(&guard))
    }

    async fn write<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut Inner) -> StorageResult<T>,
    ) -> StorageResult<T> {
        self.check(operation)?;
        let mut guard = self.inner.write().await;
        f(&mut guard)
    }
}

impl ArenaStore for MemoryArenaStore {
    fn get_participant(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .read("get_participant", |inner| inner.participants.get(&id).cloned())
                .await
        })
    }

    fn create_participant(
        &self,
        participant: ParticipantEntity,
    ) -> BoxFuture<'static, StorageResult<ParticipantEntity>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .write("create_participant", |inner| {
                    if inner.participants.contains_key(&participant.id) {
                        return Err(StorageError::conflict(format!(
                            "participant `{}` already exists",
                            participant.id
                        )));
                    }
                    if inner
                        .participants
                        .values()
                        .any(|p| p.display_name == participant.display_name)
                    {
                        return Err(StorageError::conflict(format!(
                            "display name `{}` is taken",
                            participant.display_name
                        )));
                    }
                    inner
                        .participants
                        .insert(participant.id, participant.clone());
                    Ok(participant)
                })
                .await
        })
    }

    fn find_participant(
        &self,
        display_name: String,
        access_code: String,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .read("find_participant", |inner| {
                    inner
                        .participants
                        .values()
                        .find(|p| p.display_name == display_name && p.access_code == access_code)
                        .cloned()
                })
                .await
        })
    }

    fn increment_score(
        &self,
        id: Uuid,
        delta: i64,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .write("increment_score", |inner| {
                    Ok(inner.participants.get_mut(&id).map(|participant| {
                        participant.score = participant.score.saturating_add(delta);
                        participant.revision += 1;
                        participant.clone()
                    }))
                })
                .await
        })
    }

    fn list_participants(
        &self,
        limit: Option<usize>,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .read("list_participants", |inner| {
                    let mut rows: Vec<_> = inner.participants.values().cloned().collect();
                    rows.sort_by(standing_order);
                    if let Some(limit) = limit {
                        rows.truncate(limit);
                    }
                    rows
                })
                .await
        })
    }

    fn upsert_active_challenge(
        &self,
        record: ActiveChallengeEntity,
    ) -> BoxFuture<'static, StorageResult<Option<ActiveChallengeEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .write("upsert_active_challenge", |inner| {
                    Ok(inner.challenges.insert(record.challenge_id.clone(), record))
                })
                .await
        })
    }

    fn update_active_challenge(
        &self,
        record: ActiveChallengeEntity,
    ) -> BoxFuture<'static, StorageResult<Option<ActiveChallengeEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .write("update_active_challenge", |inner| {
                    Ok(inner
                        .challenges
                        .get_mut(&record.challenge_id)
                        .map(|existing| std::mem::replace(existing, record)))
                })
                .await
        })
    }

    fn delete_active_challenge(&self, challenge_id: String) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .write("delete_active_challenge", |inner| {
                    Ok(inner.challenges.shift_remove(&challenge_id).is_some())
                })
                .await
        })
    }

    fn end_all_active_challenges(
        &self,
        ended_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<ActiveChallengeEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .write("end_all_active_challenges", |inner| {
                    let mut previous = Vec::new();
                    for record in inner.challenges.values_mut().filter(|r| r.is_active) {
                        previous.push(record.clone());
                        record.is_active = false;
                        record.end_time = Some(ended_at);
                    }
                    Ok(previous)
                })
                .await
        })
    }

    fn list_active_challenges(
        &self,
        filter: ChallengeFilter,
    ) -> BoxFuture<'static, StorageResult<Vec<ActiveChallengeEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .read("list_active_challenges", |inner| {
                    inner
                        .challenges
                        .values()
                        .filter(|record| filter.matches(record))
                        .cloned()
                        .collect()
                })
                .await
        })
    }

    fn load_session_state(&self) -> BoxFuture<'static, StorageResult<Option<SessionStateEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .read("load_session_state", |inner| inner.session.clone())
                .await
        })
    }

    fn save_session_state(&self, state: SessionStateEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .write("save_session_state", |inner| {
                    inner.session = Some(state);
                    Ok(())
                })
                .await
        })
    }

    fn upsert_vote(&self, vote: VoteEntity) -> BoxFuture<'static, StorageResult<Option<VoteEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .write("upsert_vote", |inner| {
                    if inner.closed_polls.contains(&vote.question_id) {
                        return Err(StorageError::rejected(format!(
                            "question `{}` is closed",
                            vote.question_id
                        )));
                    }
                    let key = (vote.question_id.clone(), vote.user_id);
                    Ok(inner.votes.insert(key, vote))
                })
                .await
        })
    }

    fn list_votes(&self, question_id: String) -> BoxFuture<'static, StorageResult<Vec<VoteEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .read("list_votes", |inner| {
                    inner
                        .votes
                        .values()
                        .filter(|vote| vote.question_id == question_id)
                        .cloned()
                        .collect()
                })
                .await
        })
    }

    fn close_poll(&self, question_id: String) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .write("close_poll", |inner| Ok(inner.closed_polls.insert(question_id)))
                .await
        })
    }

    fn reopen_poll(&self, question_id: String) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .write("reopen_poll", |inner| {
                    inner.closed_polls.remove(&question_id);
                    Ok(())
                })
                .await
        })
    }

    fn is_poll_closed(&self, question_id: String) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .read("is_poll_closed", |inner| inner.closed_polls.contains(&question_id))
                .await
        })
    }

    fn reset_poll(&self, question_id: String) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .write("reset_poll", |inner| {
                    let before = inner.votes.len();
                    inner.votes.retain(|(question, _), _| *question != question_id);
                    inner.closed_polls.remove(&question_id);
                    Ok((before - inner.votes.len()) as u64)
                })
                .await
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.check("health_check") })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.check_online() })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn participant(name: &str, joined_offset: u64) -> ParticipantEntity {
        ParticipantEntity {
            id: Uuid::new_v4(),
            display_name: name.into(),
            access_code: "1234".into(),
            score: 0,
            is_admin: false,
            joined_at: SystemTime::UNIX_EPOCH + Duration::from_secs(joined_offset),
            revision: 0,
        }
    }

    fn record(id: &str, active: bool, start: u64) -> ActiveChallengeEntity {
        ActiveChallengeEntity {
            challenge_id: id.into(),
            is_active: active,
            start_time: SystemTime::UNIX_EPOCH + Duration::from_secs(start),
            end_time: None,
        }
    }

    #[tokio::test]
    async fn concurrent_increments_sum_all_deltas() {
        let store = MemoryArenaStore::new();
        let alice = store.create_participant(participant("alice", 1)).await.unwrap();
        let alice_id = alice.id;

        let mut handles = Vec::new();
        for delta in [1_i64, 10, -3, 7, 5, 15, -2, 2] {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.increment_score(alice_id, delta).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stored = store.get_participant(alice_id).await.unwrap().unwrap();
        assert_eq!(stored.score, 35);
        assert_eq!(stored.revision, 8);
    }

    #[tokio::test]
    async fn increment_unknown_participant_returns_none() {
        let store = MemoryArenaStore::new();
        assert!(store.increment_score(Uuid::new_v4(), 5).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_orders_by_score_then_join_time() {
        let store = MemoryArenaStore::new();
        let late = store.create_participant(participant("late", 20)).await.unwrap();
        let early = store.create_participant(participant("early", 10)).await.unwrap();
        let leader = store.create_participant(participant("leader", 30)).await.unwrap();
        store.increment_score(late.id, 5).await.unwrap();
        store.increment_score(early.id, 5).await.unwrap();
        store.increment_score(leader.id, 9).await.unwrap();

        let names: Vec<_> = store
            .list_participants(None)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.display_name)
            .collect();
        assert_eq!(names, vec!["leader", "early", "late"]);

        let top = store.list_participants(Some(1)).await.unwrap();
        assert_eq!(top.len(), 1);
    }

    #[tokio::test]
    async fn revote_replaces_previous_row() {
        let store = MemoryArenaStore::new();
        let user = Uuid::new_v4();
        let first = VoteEntity {
            user_id: user,
            question_id: "platform".into(),
            option_index: 0,
        };
        assert!(store.upsert_vote(first.clone()).await.unwrap().is_none());

        let second = VoteEntity {
            option_index: 1,
            ..first.clone()
        };
        let replaced = store.upsert_vote(second).await.unwrap();
        assert_eq!(replaced, Some(first));

        let votes = store.list_votes("platform".into()).await.unwrap();
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].option_index, 1);
    }

    #[tokio::test]
    async fn upsert_challenge_keeps_single_row() {
        let store = MemoryArenaStore::new();
        store.upsert_active_challenge(record("poll", true, 1)).await.unwrap();
        let previous = store
            .upsert_active_challenge(record("poll", true, 2))
            .await
            .unwrap();
        assert_eq!(previous.map(|r| r.start_time), Some(record("poll", true, 1).start_time));

        let rows = store.list_active_challenges(ChallengeFilter::All).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].start_time, record("poll", true, 2).start_time);
    }

    #[tokio::test]
    async fn end_all_closes_every_active_row() {
        let store = MemoryArenaStore::new();
        store.upsert_active_challenge(record("poll", true, 1)).await.unwrap();
        store.upsert_active_challenge(record("shake", true, 2)).await.unwrap();
        store.upsert_active_challenge(record("emoji", false, 3)).await.unwrap();

        let ended_at = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let previous = store.end_all_active_challenges(ended_at).await.unwrap();
        assert_eq!(previous.len(), 2);

        let active = store
            .list_active_challenges(ChallengeFilter::ActiveOnly)
            .await
            .unwrap();
        assert!(active.is_empty());

        let again = store.end_all_active_challenges(ended_at).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn vote_on_closed_poll_is_rejected() {
        let store = MemoryArenaStore::new();
        let vote = VoteEntity {
            user_id: Uuid::new_v4(),
            question_id: "platform".into(),
            option_index: 0,
        };
        store.upsert_vote(vote.clone()).await.unwrap();
        assert!(store.close_poll("platform".into()).await.unwrap());

        let late = VoteEntity {
            user_id: Uuid::new_v4(),
            ..vote.clone()
        };
        match store.upsert_vote(late).await {
            Err(StorageError::Rejected { .. }) => {}
            other => panic!("unexpected vote result: {other:?}"),
        }
        assert_eq!(store.list_votes("platform".into()).await.unwrap(), vec![vote]);

        store.reopen_poll("platform".into()).await.unwrap();
        assert!(!store.is_poll_closed("platform".into()).await.unwrap());
        assert_eq!(store.list_votes("platform".into()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn display_names_are_unique() {
        let store = MemoryArenaStore::new();
        store.create_participant(participant("ana", 1)).await.unwrap();

        let results = futures::future::join_all(
            (0..4).map(|offset| store.create_participant(participant("bo", offset))),
        )
        .await;
        assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
        assert!(results.iter().any(|result| matches!(result, Err(StorageError::Conflict { .. }))));
        match store.create_participant(participant("ana", 9)).await {
            Err(StorageError::Conflict { .. }) => {}
            other => panic!("unexpected create result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn injected_failure_hits_one_call() {
        let store = MemoryArenaStore::new();
        store.fail_next("list_votes");
        assert!(store.list_votes("platform".into()).await.is_err());
        assert!(store.list_votes("platform".into()).await.unwrap().is_empty());
        store.upsert_active_challenge(record("poll", true, 1)).await.unwrap();
        assert!(store.delete_active_challenge("poll".into()).await.unwrap());
        assert!(!store.delete_active_challenge("poll".into()).await.unwrap());
    }

    #[tokio::test]
    async fn reset_poll_removes_votes_and_reopens() {
        let store = MemoryArenaStore::new();
        for option_index in 0..3 {
            store
                .upsert_vote(VoteEntity {
                    user_id: Uuid::new_v4(),
                    question_id: "backend".into(),
                    option_index,
                })
                .await
                .unwrap();
        }
        store
            .upsert_vote(VoteEntity {
                user_id: Uuid::new_v4(),
                question_id: "platform".into(),
                option_index: 0,
            })
            .await
            .unwrap();
        assert!(store.close_poll("backend".into()).await.unwrap());
        assert!(!store.close_poll("backend".into()).await.unwrap());

        assert_eq!(store.reset_poll("backend".into()).await.unwrap(), 3);
        assert!(!store.is_poll_closed("backend".into()).await.unwrap());
        assert_eq!(store.list_votes("platform".into()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = MemoryArenaStore::new();
        store.set_offline(true);
        match store.health_check().await {
            Err(StorageError::Unavailable { .. }) => {}
            other => panic!("unexpected health check result: {other:?}"),
        }
        store.set_offline(false);
        store.health_check().await.unwrap();
    }

    #[tokio::test]
    async fn is_admin_defaults_to_false_for_unknown() {
        let store = MemoryArenaStore::new();
        let mut admin = participant("host", 1);
        admin.is_admin = true;
        let admin = store.create_participant(admin).await.unwrap();

        assert!(store.is_admin(admin.id).await.unwrap());
        assert!(!store.is_admin(Uuid::new_v4()).await.unwrap());
    }
}
