//! Calls a client makes against the arena, with the client-side error taxonomy.

use futures::future::BoxFuture;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    dto::{
        admin::{ChallengeActionResponse, PollCloseResponse},
        auth::CredentialsRequest,
        play::{ScoreDeltaRequest, ScoreDeltaResponse, VoteRequest, VoteResponse},
        public::{ParticipantSummary, SnapshotResponse, TallyResponse},
    },
    error::ServiceError,
    services::{
        identity_service, poll_service, public_service, score_service, session_service,
    },
    state::SharedState,
};

/// Result alias for client calls.
pub type ClientResult<T> = Result<T, ClientError>;

/// Failures a client surfaces to the user.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Malformed input or unknown credentials; never retried.
    #[error("{0}")]
    Validation(String),
    /// Participant, challenge or question does not exist.
    #[error("{0}")]
    NotFound(String),
    /// Caller lacks the capability for this call.
    #[error("{0}")]
    Authorization(String),
    /// Network or store unavailable; the user may retry.
    #[error("{0}")]
    Transient(String),
    /// Write collided with another one and the end state does not match the intent.
    #[error("{0}")]
    Conflict(String),
}

impl ClientError {
    /// Whether offering a retry makes sense.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transient(_))
    }
}

impl From<ServiceError> for ClientError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::InvalidInput(_) => ClientError::Validation(message),
            ServiceError::NotFound(_) => ClientError::NotFound(message),
            ServiceError::Unauthorized(_) | ServiceError::Forbidden(_) => {
                ClientError::Authorization(message)
            }
            ServiceError::Unavailable(_) | ServiceError::Degraded | ServiceError::Timeout => {
                ClientError::Transient(message)
            }
            ServiceError::Conflict(_) | ServiceError::InvalidState(_) => {
                ClientError::Conflict(message)
            }
        }
    }
}

/// Arena operations as seen from a client.
pub trait ArenaApi: Send + Sync {
    fn signup(&self, display_name: String, access_code: String)
    -> BoxFuture<'static, ClientResult<ParticipantSummary>>;
    fn login(&self, display_name: String, access_code: String)
    -> BoxFuture<'static, ClientResult<ParticipantSummary>>;
    fn participant(&self, id: Uuid) -> BoxFuture<'static, ClientResult<ParticipantSummary>>;
    /// Send a relative score change; resolves with the authoritative score.
    fn apply_delta(
        &self,
        participant_id: Uuid,
        delta: i64,
        challenge_id: Option<String>,
    ) -> BoxFuture<'static, ClientResult<ScoreDeltaResponse>>;
    fn vote(
        &self,
        participant_id: Uuid,
        question_id: String,
        option_index: u32,
    ) -> BoxFuture<'static, ClientResult<VoteResponse>>;
    fn tally(&self, question_id: String) -> BoxFuture<'static, ClientResult<TallyResponse>>;
    /// Session state, challenge records and the full leaderboard.
    fn snapshot(&self) -> BoxFuture<'static, ClientResult<SnapshotResponse>>;
    fn start_challenge(
        &self,
        actor: Uuid,
        challenge_id: String,
    ) -> BoxFuture<'static, ClientResult<ChallengeActionResponse>>;
    fn end_challenge(
        &self,
        actor: Uuid,
        challenge_id: String,
    ) -> BoxFuture<'static, ClientResult<ChallengeActionResponse>>;
    fn end_all_challenges(
        &self,
        actor: Uuid,
    ) -> BoxFuture<'static, ClientResult<ChallengeActionResponse>>;
    fn close_question(
        &self,
        actor: Uuid,
        question_id: String,
    ) -> BoxFuture<'static, ClientResult<PollCloseResponse>>;
}

/// In-process implementation calling the services directly.
#[derive(Clone)]
pub struct LocalArenaApi {
    state: SharedState,
}

impl LocalArenaApi {
    /// Wrap the shared application state.
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }
}

impl ArenaApi for LocalArenaApi {
    fn signup(
        &self,
        display_name: String,
        access_code: String,
    ) -> BoxFuture<'static, ClientResult<ParticipantSummary>> {
        let state = self.state.clone();
        Box::pin(async move {
            let request = CredentialsRequest {
                display_name,
                access_code,
            };
            Ok(identity_service::signup(&state, request).await?.participant)
        })
    }

    fn login(
        &self,
        display_name: String,
        access_code: String,
    ) -> BoxFuture<'static, ClientResult<ParticipantSummary>> {
        let state = self.state.clone();
        Box::pin(async move {
            let request = CredentialsRequest {
                display_name,
                access_code,
            };
            Ok(identity_service::login(&state, request).await?.participant)
        })
    }

    fn participant(&self, id: Uuid) -> BoxFuture<'static, ClientResult<ParticipantSummary>> {
        let state = self.state.clone();
        Box::pin(async move { Ok(identity_service::get_participant(&state, id).await?) })
    }

    fn apply_delta(
        &self,
        participant_id: Uuid,
        delta: i64,
        challenge_id: Option<String>,
    ) -> BoxFuture<'static, ClientResult<ScoreDeltaResponse>> {
        let state = self.state.clone();
        Box::pin(async move {
            let request = ScoreDeltaRequest {
                participant_id,
                delta,
                challenge_id,
            };
            Ok(score_service::submit_delta(&state, request).await?)
        })
    }

    fn vote(
        &self,
        participant_id: Uuid,
        question_id: String,
        option_index: u32,
    ) -> BoxFuture<'static, ClientResult<VoteResponse>> {
        let state = self.state.clone();
        Box::pin(async move {
            let request = VoteRequest {
                participant_id,
                option_index,
            };
            Ok(poll_service::vote(&state, &question_id, request).await?)
        })
    }

    fn tally(&self, question_id: String) -> BoxFuture<'static, ClientResult<TallyResponse>> {
        let state = self.state.clone();
        Box::pin(async move { Ok(poll_service::tally(&state, &question_id).await?) })
    }

    fn snapshot(&self) -> BoxFuture<'static, ClientResult<SnapshotResponse>> {
        let state = self.state.clone();
        Box::pin(async move { Ok(public_service::snapshot(&state).await?) })
    }

    fn start_challenge(
        &self,
        actor: Uuid,
        challenge_id: String,
    ) -> BoxFuture<'static, ClientResult<ChallengeActionResponse>> {
        let state = self.state.clone();
        Box::pin(async move {
            Ok(session_service::start_challenge(&state, actor, &challenge_id).await?)
        })
    }

    fn end_challenge(
        &self,
        actor: Uuid,
        challenge_id: String,
    ) -> BoxFuture<'static, ClientResult<ChallengeActionResponse>> {
        let state = self.state.clone();
        Box::pin(async move {
            Ok(session_service::end_challenge(&state, actor, &challenge_id).await?)
        })
    }

    fn end_all_challenges(
        &self,
        actor: Uuid,
    ) -> BoxFuture<'static, ClientResult<ChallengeActionResponse>> {
        let state = self.state.clone();
        Box::pin(async move { Ok(session_service::end_all_challenges(&state, actor).await?) })
    }

    fn close_question(
        &self,
        actor: Uuid,
        question_id: String,
    ) -> BoxFuture<'static, ClientResult<PollCloseResponse>> {
        let state = self.state.clone();
        Box::pin(async move {
            Ok(poll_service::close_question(&state, actor, &question_id).await?)
        })
    }
}
