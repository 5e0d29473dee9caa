use std::{sync::Arc, time::SystemTime};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, ClientSession, Collection, Database, IndexModel,
    bson::{DateTime, doc},
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{IndexOptions, ReturnDocument},
};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{
    connection::MongoConfig,
    error::{MongoDaoError, MongoResult},
    models::{
        MongoChallengeDocument, MongoParticipantDocument, MongoPollDocument, MongoSessionDocument,
        MongoVoteDocument, SESSION_DOCUMENT_ID, doc_id, vote_key,
    },
};
use crate::dao::{
    arena_store::ArenaStore,
    models::{
        ActiveChallengeEntity, ChallengeFilter, ParticipantEntity, SessionStateEntity, VoteEntity,
    },
    storage::{StorageError, StorageResult},
};

const PARTICIPANT_COLLECTION: &str = "participants";
const CHALLENGE_COLLECTION: &str = "active_challenges";
const SESSION_COLLECTION: &str = "session_state";
const VOTE_COLLECTION: &str = "votes";
const POLL_COLLECTION: &str = "polls";
const DUPLICATE_KEY_CODE: i32 = 11000;

/// MongoDB-backed [`ArenaStore`].
///
/// Challenge rows use the challenge id as `_id` and votes use `question_id:user_id`, so the
/// primary key enforces one row per challenge and one vote per participant and question.
///
/// Votes are written in a multi-document transaction, so the deployment must be a replica set.
#[derive(Clone)]
pub struct MongoArenaStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    client: RwLock<Client>,
    database: RwLock<Database>,
    config: MongoConfig,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = self.database.read().await.clone();
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) = self.config.open().await?;
        *self.client.write().await = client;
        *self.database.write().await = database;
        Ok(())
    }
}

impl MongoArenaStore {
    /// Connect to MongoDB and make sure the secondary indexes exist.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) = config.open().await?;
        let store = Self {
            inner: Arc::new(MongoInner {
                client: RwLock::new(client),
                database: RwLock::new(database),
                config,
            }),
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let participants = self.participants().await;
        participants
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "score": -1, "joined_at": 1 })
                    .options(
                        IndexOptions::builder()
                            .name(Some("participant_rank_idx".to_owned()))
                            .build(),
                    )
                    .build(),
            )
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: PARTICIPANT_COLLECTION,
                index: "score,joined_at",
                source,
            })?;

        participants
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "display_name": 1 })
                    .options(
                        IndexOptions::builder()
                            .name(Some("participant_name_idx".to_owned()))
                            .unique(Some(true))
                            .build(),
                    )
                    .build(),
            )
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: PARTICIPANT_COLLECTION,
                index: "display_name",
                source,
            })?;

        self.votes()
            .await
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "question_id": 1, "user_id": 1 })
                    .options(
                        IndexOptions::builder()
                            .name(Some("vote_question_user_idx".to_owned()))
                            .unique(Some(true))
                            .build(),
                    )
                    .build(),
            )
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: VOTE_COLLECTION,
                index: "question_id,user_id",
                source,
            })?;

        Ok(())
    }

    async fn client(&self) -> Client {
        self.inner.client.read().await.clone()
    }

    async fn database(&self) -> Database {
        self.inner.database.read().await.clone()
    }

    async fn participants(&self) -> Collection<MongoParticipantDocument> {
        self.database().await.collection(PARTICIPANT_COLLECTION)
    }

    async fn challenges(&self) -> Collection<MongoChallengeDocument> {
        self.database().await.collection(CHALLENGE_COLLECTION)
    }

    async fn sessions(&self) -> Collection<MongoSessionDocument> {
        self.database().await.collection(SESSION_COLLECTION)
    }

    async fn votes(&self) -> Collection<MongoVoteDocument> {
        self.database().await.collection(VOTE_COLLECTION)
    }

    async fn polls(&self) -> Collection<MongoPollDocument> {
        self.database().await.collection(POLL_COLLECTION)
    }

    async fn get_participant(&self, id: Uuid) -> MongoResult<Option<ParticipantEntity>> {
        self.participants()
            .await
            .find_one(doc_id(id.to_string()))
            .await
            .map_err(|source| MongoDaoError::LoadParticipants { source })?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn create_participant(&self, participant: ParticipantEntity) -> MongoResult<ParticipantEntity> {
        let id = participant.id;
        let document: MongoParticipantDocument = participant.clone().into();
        match self.participants().await.insert_one(&document).await {
            Ok(_) => Ok(participant),
            Err(err) if is_duplicate_key(&err) => Err(MongoDaoError::DuplicateParticipant {
                id,
                display_name: participant.display_name,
            }),
            Err(source) => Err(MongoDaoError::SaveParticipant { id, source }),
        }
    }

    async fn find_participant(
        &self,
        filter: mongodb::bson::Document,
    ) -> MongoResult<Option<ParticipantEntity>> {
        self.participants()
            .await
            .find_one(filter)
            .sort(doc! { "joined_at": 1 })
            .await
            .map_err(|source| MongoDaoError::LoadParticipants { source })?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn increment_score(&self, id: Uuid, delta: i64) -> MongoResult<Option<ParticipantEntity>> {
        self.participants()
            .await
            .find_one_and_update(
                doc_id(id.to_string()),
                doc! { "$inc": { "score": delta, "revision": 1_i64 } },
            )
            .return_document(ReturnDocument::After)
            .await
            .map_err(|source| MongoDaoError::SaveParticipant { id, source })?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn list_participants(&self, limit: Option<usize>) -> MongoResult<Vec<ParticipantEntity>> {
        let collection = self.participants().await;
        let mut find = collection
            .find(doc! {})
            .sort(doc! { "score": -1, "joined_at": 1, "_id": 1 });
        if let Some(limit) = limit {
            find = find.limit(limit as i64);
        }
        let documents: Vec<MongoParticipantDocument> = find
            .await
            .map_err(|source| MongoDaoError::LoadParticipants { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadParticipants { source })?;

        documents.into_iter().map(TryInto::try_into).collect()
    }

    async fn replace_challenge(
        &self,
        record: ActiveChallengeEntity,
        upsert: bool,
    ) -> MongoResult<Option<ActiveChallengeEntity>> {
        let challenge_id = record.challenge_id.clone();
        let document: MongoChallengeDocument = record.into();
        let previous = self
            .challenges()
            .await
            .find_one_and_replace(doc_id(challenge_id.clone()), document)
            .upsert(upsert)
            .return_document(ReturnDocument::Before)
            .await
            .map_err(|source| MongoDaoError::SaveChallenge {
                challenge_id,
                source,
            })?;
        Ok(previous.map(Into::into))
    }

    async fn delete_challenge(&self, challenge_id: String) -> MongoResult<bool> {
        let deleted = self
            .challenges()
            .await
            .delete_one(doc_id(challenge_id.clone()))
            .await
            .map_err(|source| MongoDaoError::SaveChallenge {
                challenge_id,
                source,
            })?;
        Ok(deleted.deleted_count > 0)
    }

    async fn end_all_active_challenges(
        &self,
        ended_at: SystemTime,
    ) -> MongoResult<Vec<ActiveChallengeEntity>> {
        let collection = self.challenges().await;
        // Every row this batch ends carries its tag until a restart replaces the row.
        let batch = Uuid::new_v4().to_string();
        collection
            .update_many(
                doc! { "is_active": true },
                doc! { "$set": {
                    "is_active": false,
                    "end_time": DateTime::from_system_time(ended_at),
                    "ended_by": batch.as_str()
                } },
            )
            .await
            .map_err(|source| MongoDaoError::SaveChallenge {
                challenge_id: "*".into(),
                source,
            })?;

        let ended: Vec<MongoChallengeDocument> = collection
            .find(doc! { "ended_by": batch.as_str() })
            .sort(doc! { "start_time": 1 })
            .await
            .map_err(|source| MongoDaoError::LoadChallenges { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadChallenges { source })?;

        Ok(ended
            .into_iter()
            .map(|document| ActiveChallengeEntity {
                is_active: true,
                end_time: None,
                ..ActiveChallengeEntity::from(document)
            })
            .collect())
    }

    async fn list_active_challenges(
        &self,
        filter: ChallengeFilter,
    ) -> MongoResult<Vec<ActiveChallengeEntity>> {
        let query = match filter {
            ChallengeFilter::ActiveOnly => doc! { "is_active": true },
            ChallengeFilter::All => doc! {},
        };
        let documents: Vec<MongoChallengeDocument> = self
            .challenges()
            .await
            .find(query)
            .sort(doc! { "start_time": 1 })
            .await
            .map_err(|source| MongoDaoError::LoadChallenges { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadChallenges { source })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn load_session_state(&self) -> MongoResult<Option<SessionStateEntity>> {
        let document = self
            .sessions()
            .await
            .find_one(doc_id(SESSION_DOCUMENT_ID))
            .await
            .map_err(|source| MongoDaoError::SessionState { source })?;
        Ok(document.map(Into::into))
    }

    async fn save_session_state(&self, state: SessionStateEntity) -> MongoResult<()> {
        let document: MongoSessionDocument = state.into();
        self.sessions()
            .await
            .replace_one(doc_id(SESSION_DOCUMENT_ID), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SessionState { source })?;
        Ok(())
    }

    async fn upsert_vote(&self, vote: VoteEntity) -> MongoResult<Option<VoteEntity>> {
        let question_id = vote.question_id.clone();
        let votes_error = |source: MongoError| MongoDaoError::Votes {
            question_id: question_id.clone(),
            source,
        };

        let client = self.client().await;
        let mut session = client.start_session().await.map_err(&votes_error)?;
        session.start_transaction().await.map_err(&votes_error)?;
        match self.upsert_vote_in(&mut session, vote).await {
            Ok(previous) => {
                session.commit_transaction().await.map_err(&votes_error)?;
                Ok(previous)
            }
            Err(err) => {
                if let Err(abort) = session.abort_transaction().await {
                    debug!(question = %question_id, error = %abort, "vote transaction abort failed");
                }
                Err(err)
            }
        }
    }

    async fn upsert_vote_in(
        &self,
        session: &mut ClientSession,
        vote: VoteEntity,
    ) -> MongoResult<Option<VoteEntity>> {
        let question_id = vote.question_id.clone();
        // Touching the poll document makes a concurrent close wait for, or conflict with, this write.
        let poll = self
            .polls()
            .await
            .find_one_and_update(
                doc_id(question_id.clone()),
                doc! { "$inc": { "vote_writes": 1_i64 } },
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .session(&mut *session)
            .await
            .map_err(|source| MongoDaoError::Votes {
                question_id: question_id.clone(),
                source,
            })?;
        if poll.is_some_and(|poll| poll.closed) {
            return Err(MongoDaoError::PollClosed { question_id });
        }

        let key = vote_key(&vote.question_id, vote.user_id);
        let document: MongoVoteDocument = vote.into();
        self.votes()
            .await
            .find_one_and_replace(doc_id(key), document)
            .upsert(true)
            .return_document(ReturnDocument::Before)
            .session(&mut *session)
            .await
            .map_err(|source| MongoDaoError::Votes {
                question_id,
                source,
            })?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn list_votes(&self, question_id: String) -> MongoResult<Vec<VoteEntity>> {
        let documents: Vec<MongoVoteDocument> = self
            .votes()
            .await
            .find(doc! { "question_id": question_id.as_str() })
            .await
            .map_err(|source| MongoDaoError::Votes {
                question_id: question_id.clone(),
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::Votes {
                question_id: question_id.clone(),
                source,
            })?;
        documents.into_iter().map(TryInto::try_into).collect()
    }

    async fn close_poll(&self, question_id: String) -> MongoResult<bool> {
        let previous = self
            .polls()
            .await
            .find_one_and_update(doc_id(question_id.clone()), doc! { "$set": { "closed": true } })
            .upsert(true)
            .return_document(ReturnDocument::Before)
            .await
            .map_err(|source| MongoDaoError::Votes {
                question_id,
                source,
            })?;
        Ok(!previous.is_some_and(|poll| poll.closed))
    }

    async fn reopen_poll(&self, question_id: String) -> MongoResult<()> {
        self.polls()
            .await
            .update_one(doc_id(question_id.clone()), doc! { "$set": { "closed": false } })
            .await
            .map_err(|source| MongoDaoError::Votes {
                question_id,
                source,
            })?;
        Ok(())
    }

    async fn is_poll_closed(&self, question_id: String) -> MongoResult<bool> {
        let poll = self
            .polls()
            .await
            .find_one(doc_id(question_id.clone()))
            .await
            .map_err(|source| MongoDaoError::Votes {
                question_id,
                source,
            })?;
        Ok(poll.is_some_and(|poll| poll.closed))
    }

    async fn reset_poll(&self, question_id: String) -> MongoResult<u64> {
        let deleted = self
            .votes()
            .await
            .delete_many(doc! { "question_id": question_id.as_str() })
            .await
            .map_err(|source| MongoDaoError::Votes {
                question_id: question_id.clone(),
                source,
            })?;
        self.polls()
            .await
            .delete_one(doc_id(question_id.clone()))
            .await
            .map_err(|source| MongoDaoError::Votes {
                question_id,
                source,
            })?;
        Ok(deleted.deleted_count)
    }
}

fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY_CODE
    )
}

fn into_storage(err: MongoDaoError) -> StorageError {
    match err {
        MongoDaoError::DuplicateParticipant { .. } => StorageError::conflict(err.to_string()),
        MongoDaoError::PollClosed { .. } => StorageError::rejected(err.to_string()),
        other => other.into(),
    }
}

impl ArenaStore for MongoArenaStore {
    fn get_participant(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.get_participant(id).await.map_err(into_storage) })
    }

    fn create_participant(
        &self,
        participant: ParticipantEntity,
    ) -> BoxFuture<'static, StorageResult<ParticipantEntity>> {
        let store = self.clone();
        Box::pin(async move { store.create_participant(participant).await.map_err(into_storage) })
    }

    fn find_participant(
        &self,
        display_name: String,
        access_code: String,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_participant(doc! { "display_name": display_name, "access_code": access_code })
                .await
                .map_err(into_storage)
        })
    }

    fn increment_score(
        &self,
        id: Uuid,
        delta: i64,
    ) -> BoxFuture<'static, StorageResult<Option<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.increment_score(id, delta).await.map_err(into_storage) })
    }

    fn list_participants(
        &self,
        limit: Option<usize>,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_participants(limit).await.map_err(into_storage) })
    }

    fn upsert_active_challenge(
        &self,
        record: ActiveChallengeEntity,
    ) -> BoxFuture<'static, StorageResult<Option<ActiveChallengeEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            match store.replace_challenge(record.clone(), true).await {
                Err(MongoDaoError::SaveChallenge { source, .. }) if is_duplicate_key(&source) => {
                    // Two upserts raced on the same `_id`; the loser retries as a plain replace.
                    store
                        .replace_challenge(record, false)
                        .await
                        .map_err(into_storage)
                }
                other => other.map_err(into_storage),
            }
        })
    }

    fn update_active_challenge(
        &self,
        record: ActiveChallengeEntity,
    ) -> BoxFuture<'static, StorageResult<Option<ActiveChallengeEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.replace_challenge(record, false).await.map_err(into_storage) })
    }

    fn delete_active_challenge(&self, challenge_id: String) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.delete_challenge(challenge_id).await.map_err(into_storage) })
    }

    fn end_all_active_challenges(
        &self,
        ended_at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<Vec<ActiveChallengeEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .end_all_active_challenges(ended_at)
                .await
                .map_err(into_storage)
        })
    }

    fn list_active_challenges(
        &self,
        filter: ChallengeFilter,
    ) -> BoxFuture<'static, StorageResult<Vec<ActiveChallengeEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_active_challenges(filter).await.map_err(into_storage) })
    }

    fn load_session_state(&self) -> BoxFuture<'static, StorageResult<Option<SessionStateEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.load_session_state().await.map_err(into_storage) })
    }

    fn save_session_state(&self, state: SessionStateEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_session_state(state).await.map_err(into_storage) })
    }

    fn upsert_vote(&self, vote: VoteEntity) -> BoxFuture<'static, StorageResult<Option<VoteEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.upsert_vote(vote).await.map_err(into_storage) })
    }

    fn list_votes(&self, question_id: String) -> BoxFuture<'static, StorageResult<Vec<VoteEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_votes(question_id).await.map_err(into_storage) })
    }

    fn close_poll(&self, question_id: String) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.close_poll(question_id).await.map_err(into_storage) })
    }

    fn reopen_poll(&self, question_id: String) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.reopen_poll(question_id).await.map_err(into_storage) })
    }

    fn is_poll_closed(&self, question_id: String) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.is_poll_closed(question_id).await.map_err(into_storage) })
    }

    fn reset_poll(&self, question_id: String) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move { store.reset_poll(question_id).await.map_err(into_storage) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(into_storage) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(into_storage) })
    }
}
