use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for the arena backend.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::auth::signup,
        crate::routes::auth::login,
        crate::routes::public::get_session,
        crate::routes::public::get_challenges,
        crate::routes::public::get_leaderboard,
        crate::routes::public::get_snapshot,
        crate::routes::public::get_tally,
        crate::routes::public::get_participant,
        crate::routes::play::submit_score,
        crate::routes::play::cast_vote,
        crate::routes::admin::start_challenge,
        crate::routes::admin::end_challenge,
        crate::routes::admin::end_all_challenges,
        crate::routes::admin::close_poll,
        crate::routes::admin::reset_poll,
        crate::routes::admin::stats,
        crate::routes::feed::feed_stream,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::auth::CredentialsRequest,
            crate::dto::auth::AuthResponse,
            crate::dto::public::ParticipantSummary,
            crate::dto::public::LeaderboardRow,
            crate::dto::public::SessionStateSummary,
            crate::dto::public::ChallengeRecordSummary,
            crate::dto::public::SnapshotResponse,
            crate::dto::public::TallyResponse,
            crate::dto::play::ScoreDeltaRequest,
            crate::dto::play::ScoreDeltaResponse,
            crate::dto::play::VoteRequest,
            crate::dto::play::VoteResponse,
            crate::dto::admin::ChallengeActionResponse,
            crate::dto::admin::PollAward,
            crate::dto::admin::PollCloseResponse,
            crate::dto::admin::PollResetResponse,
            crate::dto::admin::AdminStatsResponse,
            crate::dto::feed::ChangeNotification,
            crate::dto::feed::Resource,
            crate::dto::feed::EventKind,
            crate::dto::feed::VoteRow,
            crate::state::catalog::ChallengeDefinition,
            crate::state::catalog::ChallengeKind,
            crate::state::catalog::PollQuestion,
            crate::state::catalog::PollScoring,
            crate::state::catalog::CountBucket,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "auth", description = "Participant sign-up and login"),
        (name = "public", description = "Read-only session, leaderboard and poll views"),
        (name = "play", description = "Score deltas and poll votes"),
        (name = "admin", description = "Session transitions and poll administration"),
        (name = "feed", description = "Server-sent change feed"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/healthcheck",
            "/auth/signup",
            "/public/snapshot",
            "/play/score",
            "/admin/challenges/end-all",
            "/feed/{resource}",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
