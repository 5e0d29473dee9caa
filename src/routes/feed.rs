use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, Query, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;

use crate::{
    dto::feed::{FeedQuery, Resource},
    error::AppError,
    services::sse_service,
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/feed/{resource}",
    tag = "feed",
    params(
        ("resource" = String, Path, description = "users, game_state, active_challenges or votes"),
        FeedQuery
    ),
    responses(
        (status = 200, description = "Change notifications", content_type = "text/event-stream", body = String),
        (status = 400, description = "Unknown resource or malformed filter")
    )
)]
/// Stream committed row changes of one resource.
pub async fn feed_stream(
    State(state): State<SharedState>,
    Path(resource): Path<String>,
    Query(query): Query<FeedQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let resource = resource.parse::<Resource>().map_err(AppError::BadRequest)?;
    let filter = sse_service::parse_filter(query.filter.as_deref())?;
    let receiver = sse_service::subscribe(&state);
    info!(%resource, filter = ?filter.as_ref().map(ToString::to_string), "new feed subscription");
    Ok(sse_service::to_sse_stream(receiver, resource, filter))
}

/// Configure the change-feed endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/feed/{resource}", get(feed_stream))
}
