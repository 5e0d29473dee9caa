use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use axum_valid::Valid;

use crate::{
    dto::auth::{AuthResponse, CredentialsRequest},
    error::AppError,
    services::identity_service,
    state::SharedState,
};

/// Sign-up and login endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
}

#[utoipa::path(
    post,
    path = "/auth/signup",
    tag = "auth",
    request_body = CredentialsRequest,
    responses(
        (status = 201, description = "Participant created", body = AuthResponse),
        (status = 400, description = "Malformed display name or access code"),
        (status = 409, description = "Display name already taken")
    )
)]
/// Register a new participant.
pub async fn signup(
    State(state): State<SharedState>,
    Valid(Json(request)): Valid<Json<CredentialsRequest>>,
) -> Result<(StatusCode, Json<AuthResponse>), AppError> {
    let created = identity_service::signup(&state, request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "auth",
    request_body = CredentialsRequest,
    responses(
        (status = 200, description = "Authenticated participant", body = AuthResponse),
        (status = 400, description = "Invalid username or access code")
    )
)]
/// Log in with display name and access code.
pub async fn login(
    State(state): State<SharedState>,
    Valid(Json(request)): Valid<Json<CredentialsRequest>>,
) -> Result<Json<AuthResponse>, AppError> {
    Ok(Json(identity_service::login(&state, request).await?))
}
