use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use uuid::Uuid;

use crate::{
    dto::public::{
        ChallengeRecordSummary, LeaderboardQuery, LeaderboardRow, ParticipantSummary,
        SessionStateSummary, SnapshotResponse, TallyResponse,
    },
    error::AppError,
    services::{identity_service, poll_service, public_service, session_service},
    state::SharedState,
};

/// Public read-only endpoints exposing the session, leaderboard and polls.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/public/session", get(get_session))
        .route("/public/challenges", get(get_challenges))
        .route("/public/leaderboard", get(get_leaderboard))
        .route("/public/snapshot", get(get_snapshot))
        .route("/public/polls/{question_id}/tally", get(get_tally))
        .route("/public/participants/{id}", get(get_participant))
}

#[utoipa::path(
    get,
    path = "/public/session",
    tag = "public",
    responses((status = 200, description = "Current session pointer", body = SessionStateSummary))
)]
/// Return the session singleton.
pub async fn get_session(State(state): State<SharedState>) -> Json<SessionStateSummary> {
    Json(session_service::current_session(&state).await)
}

#[utoipa::path(
    get,
    path = "/public/challenges",
    tag = "public",
    responses((status = 200, description = "Challenge records", body = [ChallengeRecordSummary]))
)]
/// Return every challenge record, ended ones included.
pub async fn get_challenges(State(state): State<SharedState>) -> Json<Vec<ChallengeRecordSummary>> {
    Json(session_service::challenge_records(&state).await)
}

#[utoipa::path(
    get,
    path = "/public/leaderboard",
    tag = "public",
    params(LeaderboardQuery),
    responses(
        (status = 200, description = "Top participants", body = [LeaderboardRow]),
        (status = 503, description = "Storage unavailable")
    )
)]
/// Return the top of the leaderboard.
pub async fn get_leaderboard(
    State(state): State<SharedState>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<Vec<LeaderboardRow>>, AppError> {
    Ok(Json(public_service::leaderboard(&state, query.limit).await?))
}

#[utoipa::path(
    get,
    path = "/public/snapshot",
    tag = "public",
    responses(
        (status = 200, description = "Full state snapshot", body = SnapshotResponse),
        (status = 503, description = "Storage unavailable")
    )
)]
/// Return session, challenge records and the full leaderboard in one call.
pub async fn get_snapshot(
    State(state): State<SharedState>,
) -> Result<Json<SnapshotResponse>, AppError> {
    Ok(Json(public_service::snapshot(&state).await?))
}

#[utoipa::path(
    get,
    path = "/public/polls/{question_id}/tally",
    tag = "public",
    params(("question_id" = String, Path, description = "Poll question identifier")),
    responses(
        (status = 200, description = "Vote counts", body = TallyResponse),
        (status = 404, description = "Unknown question")
    )
)]
/// Return live vote counts for a question.
pub async fn get_tally(
    State(state): State<SharedState>,
    Path(question_id): Path<String>,
) -> Result<Json<TallyResponse>, AppError> {
    Ok(Json(poll_service::tally(&state, &question_id).await?))
}

#[utoipa::path(
    get,
    path = "/public/participants/{id}",
    tag = "public",
    params(("id" = Uuid, Path, description = "Participant identifier")),
    responses(
        (status = 200, description = "Participant", body = ParticipantSummary),
        (status = 404, description = "Unknown participant")
    )
)]
/// Return one participant.
pub async fn get_participant(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ParticipantSummary>, AppError> {
    Ok(Json(identity_service::get_participant(&state, id).await?))
}
