//! Read-only projections served to every client: leaderboard, snapshot and dashboard stats.

use uuid::Uuid;

use crate::{
    dao::models::ChallengeFilter,
    dto::{
        admin::AdminStatsResponse,
        public::{ChallengeRecordSummary, LeaderboardRow, SessionStateSummary, SnapshotResponse},
    },
    error::ServiceError,
    services::identity_service::ensure_admin,
    state::{SharedState, leaderboard},
};

/// Rows returned by the leaderboard route when no limit is given.
pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;

/// Top-N leaderboard, projected from the full participant set.
pub async fn leaderboard(
    state: &SharedState,
    limit: Option<usize>,
) -> Result<Vec<LeaderboardRow>, ServiceError> {
    let limit = limit.unwrap_or(DEFAULT_LEADERBOARD_LIMIT);
    let mut rows = full_leaderboard(state).await?;
    rows.truncate(limit);
    Ok(rows)
}

async fn full_leaderboard(state: &SharedState) -> Result<Vec<LeaderboardRow>, ServiceError> {
    let store = state.require_store().await?;
    let participants = store.list_participants(None).await?;
    Ok(leaderboard::project(&participants)
        .into_iter()
        .map(LeaderboardRow::from)
        .collect())
}

/// Session state, challenge records and full leaderboard in one read.
pub async fn snapshot(state: &SharedState) -> Result<SnapshotResponse, ServiceError> {
    let leaderboard = full_leaderboard(state).await?;
    let view = state.session_view().await;

    Ok(SnapshotResponse {
        session: SessionStateSummary::from(&view.session),
        challenges: view
            .records
            .values()
            .map(ChallengeRecordSummary::from)
            .collect(),
        leaderboard,
        degraded: state.is_degraded(),
    })
}

/// Participant and challenge counts for the admin dashboard.
pub async fn admin_stats(
    state: &SharedState,
    actor: Uuid,
) -> Result<AdminStatsResponse, ServiceError> {
    ensure_admin(state, actor).await?;
    let store = state.require_store().await?;
    let participants = store.list_participants(None).await?;
    let active = store
        .list_active_challenges(ChallengeFilter::ActiveOnly)
        .await?;

    Ok(AdminStatsResponse {
        participants: participants.len(),
        admins: participants.iter().filter(|p| p.is_admin).count(),
        active_challenges: active.len(),
        feed_subscribers: state.feed().subscriber_count(),
    })
}
