use axum::{
    Json, Router,
    extract::{Path, State},
    routing::post,
};

use crate::{
    dto::play::{ScoreDeltaRequest, ScoreDeltaResponse, VoteRequest, VoteResponse},
    error::AppError,
    services::{poll_service, score_service},
    state::SharedState,
};

/// Player actions: score deltas and poll votes.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/play/score", post(submit_score))
        .route("/play/polls/{question_id}/vote", post(cast_vote))
}

#[utoipa::path(
    post,
    path = "/play/score",
    tag = "play",
    request_body = ScoreDeltaRequest,
    responses(
        (status = 200, description = "Authoritative score after the delta", body = ScoreDeltaResponse),
        (status = 404, description = "Unknown participant or challenge"),
        (status = 503, description = "Storage unavailable")
    )
)]
/// Apply an end-of-round score delta.
pub async fn submit_score(
    State(state): State<SharedState>,
    Json(request): Json<ScoreDeltaRequest>,
) -> Result<Json<ScoreDeltaResponse>, AppError> {
    Ok(Json(score_service::submit_delta(&state, request).await?))
}

#[utoipa::path(
    post,
    path = "/play/polls/{question_id}/vote",
    tag = "play",
    params(("question_id" = String, Path, description = "Poll question identifier")),
    request_body = VoteRequest,
    responses(
        (status = 200, description = "Vote recorded", body = VoteResponse),
        (status = 400, description = "Option out of range"),
        (status = 404, description = "Unknown question or participant"),
        (status = 409, description = "Question closed")
    )
)]
/// Cast or replace a vote.
pub async fn cast_vote(
    State(state): State<SharedState>,
    Path(question_id): Path<String>,
    Json(request): Json<VoteRequest>,
) -> Result<Json<VoteResponse>, AppError> {
    Ok(Json(poll_service::vote(&state, &question_id, request).await?))
}
