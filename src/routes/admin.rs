use axum::{
    Extension, Json, Router,
    body::Body,
    extract::{Path, State},
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use uuid::Uuid;

use crate::{
    dto::admin::{
        AdminStatsResponse, ChallengeActionResponse, PollCloseResponse, PollResetResponse,
    },
    error::AppError,
    services::{identity_service, poll_service, public_service, session_service},
    state::SharedState,
};

/// Header carrying the caller's participant id on admin routes.
pub const PARTICIPANT_HEADER: &str = "x-participant-id";

/// Participant id that passed the admin check for this request.
#[derive(Debug, Clone, Copy)]
pub struct AdminActor(pub Uuid);

/// Admin-only endpoints driving the session and polls.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/admin/challenges/end-all", post(end_all_challenges))
        .route("/admin/challenges/{id}/start", post(start_challenge))
        .route("/admin/challenges/{id}/end", post(end_challenge))
        .route("/admin/polls/{question_id}/close", post(close_poll))
        .route("/admin/polls/{question_id}/reset", post(reset_poll))
        .route("/admin/stats", get(stats))
        .route_layer(middleware::from_fn_with_state(state, require_admin))
}

#[utoipa::path(
    post,
    path = "/admin/challenges/{id}/start",
    tag = "admin",
    params(
        ("x-participant-id" = Uuid, Header, description = "Admin participant id"),
        ("id" = String, Path, description = "Challenge identifier")
    ),
    responses(
        (status = 200, description = "Challenge started", body = ChallengeActionResponse),
        (status = 403, description = "Caller is not an admin"),
        (status = 404, description = "Unknown challenge")
    )
)]
/// Start or restart a challenge.
pub async fn start_challenge(
    State(state): State<SharedState>,
    Extension(AdminActor(actor)): Extension<AdminActor>,
    Path(id): Path<String>,
) -> Result<Json<ChallengeActionResponse>, AppError> {
    Ok(Json(session_service::start_challenge(&state, actor, &id).await?))
}

#[utoipa::path(
    post,
    path = "/admin/challenges/{id}/end",
    tag = "admin",
    params(
        ("x-participant-id" = Uuid, Header, description = "Admin participant id"),
        ("id" = String, Path, description = "Challenge identifier")
    ),
    responses(
        (status = 200, description = "Challenge ended (or was not running)", body = ChallengeActionResponse),
        (status = 403, description = "Caller is not an admin"),
        (status = 404, description = "Unknown challenge")
    )
)]
/// End a running challenge.
pub async fn end_challenge(
    State(state): State<SharedState>,
    Extension(AdminActor(actor)): Extension<AdminActor>,
    Path(id): Path<String>,
) -> Result<Json<ChallengeActionResponse>, AppError> {
    Ok(Json(session_service::end_challenge(&state, actor, &id).await?))
}

#[utoipa::path(
    post,
    path = "/admin/challenges/end-all",
    tag = "admin",
    params(("x-participant-id" = Uuid, Header, description = "Admin participant id")),
    responses(
        (status = 200, description = "Every running challenge ended", body = ChallengeActionResponse),
        (status = 403, description = "Caller is not an admin")
    )
)]
/// End every running challenge.
pub async fn end_all_challenges(
    State(state): State<SharedState>,
    Extension(AdminActor(actor)): Extension<AdminActor>,
) -> Result<Json<ChallengeActionResponse>, AppError> {
    Ok(Json(session_service::end_all_challenges(&state, actor).await?))
}

#[utoipa::path(
    post,
    path = "/admin/polls/{question_id}/close",
    tag = "admin",
    params(
        ("x-participant-id" = Uuid, Header, description = "Admin participant id"),
        ("question_id" = String, Path, description = "Poll question identifier")
    ),
    responses(
        (status = 200, description = "Question closed and awards applied", body = PollCloseResponse),
        (status = 404, description = "Unknown question"),
        (status = 409, description = "Question already closed")
    )
)]
/// Close a question and award points.
pub async fn close_poll(
    State(state): State<SharedState>,
    Extension(AdminActor(actor)): Extension<AdminActor>,
    Path(question_id): Path<String>,
) -> Result<Json<PollCloseResponse>, AppError> {
    Ok(Json(
        poll_service::close_question(&state, actor, &question_id).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/admin/polls/{question_id}/reset",
    tag = "admin",
    params(
        ("x-participant-id" = Uuid, Header, description = "Admin participant id"),
        ("question_id" = String, Path, description = "Poll question identifier")
    ),
    responses(
        (status = 200, description = "Votes deleted and question reopened", body = PollResetResponse),
        (status = 404, description = "Unknown question")
    )
)]
/// Delete every vote of a question.
pub async fn reset_poll(
    State(state): State<SharedState>,
    Extension(AdminActor(actor)): Extension<AdminActor>,
    Path(question_id): Path<String>,
) -> Result<Json<PollResetResponse>, AppError> {
    Ok(Json(
        poll_service::reset_question(&state, actor, &question_id).await?,
    ))
}

#[utoipa::path(
    get,
    path = "/admin/stats",
    tag = "admin",
    params(("x-participant-id" = Uuid, Header, description = "Admin participant id")),
    responses((status = 200, description = "Dashboard figures", body = AdminStatsResponse))
)]
/// Participant and challenge counts.
pub async fn stats(
    State(state): State<SharedState>,
    Extension(AdminActor(actor)): Extension<AdminActor>,
) -> Result<Json<AdminStatsResponse>, AppError> {
    Ok(Json(public_service::admin_stats(&state, actor).await?))
}

/// Resolve the caller from the participant header and check the admin flag in the store.
async fn require_admin(
    State(state): State<SharedState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let actor = req
        .headers()
        .get(PARTICIPANT_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            AppError::Unauthorized(format!("missing participant header `{PARTICIPANT_HEADER}`"))
        })?
        .parse::<Uuid>()
        .map_err(|_| AppError::Unauthorized("participant header is not a valid id".into()))?;

    identity_service::ensure_admin(&state, actor).await?;
    req.extensions_mut().insert(AdminActor(actor));
    Ok(next.run(req).await)
}
