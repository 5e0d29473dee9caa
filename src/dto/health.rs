use serde::Serialize;
use utoipa::ToSchema;

/// Response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: &'static str,
    /// Number of open change-feed subscriptions.
    pub feed_subscribers: usize,
}

impl HealthResponse {
    /// Build the response for the given degraded flag.
    pub fn new(degraded: bool, feed_subscribers: usize) -> Self {
        Self {
            status: if degraded { "degraded" } else { "ok" },
            feed_subscribers,
        }
    }
}
