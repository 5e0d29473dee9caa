use axum::Router;

use crate::state::SharedState;

/// Admin-only session and poll routes.
pub mod admin;
/// Sign-up and login routes.
pub mod auth;
/// Swagger UI.
pub mod docs;
/// SSE change feed.
pub mod feed;
/// Health check.
pub mod health;
/// Player score and vote routes.
pub mod play;
/// Read-only session, leaderboard and poll routes.
pub mod public;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(auth::router())
        .merge(public::router())
        .merge(play::router())
        .merge(feed::router())
        .merge(admin::router(state.clone()));

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}
