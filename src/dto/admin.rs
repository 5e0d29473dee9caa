//! DTO definitions used by the admin REST API and documentation layer.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::public::{ChallengeRecordSummary, SessionStateSummary};

/// Session state after a challenge transition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub struct ChallengeActionResponse {
    pub session: SessionStateSummary,
    /// Records modified by the transition; empty for a no-op.
    pub changed: Vec<ChallengeRecordSummary>,
}

/// Points handed to one voter when a question closed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub struct PollAward {
    pub participant_id: Uuid,
    pub delta: i64,
    pub score: i64,
}

/// Outcome of closing a poll question.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub struct PollCloseResponse {
    pub question_id: String,
    pub winning_options: Vec<u32>,
    pub awards: Vec<PollAward>,
    /// Voters whose award could not be applied (participant vanished or store failed).
    pub failed_awards: Vec<Uuid>,
}

/// Outcome of resetting a poll question.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub struct PollResetResponse {
    pub question_id: String,
    pub removed_votes: u64,
}

/// Aggregate figures for the admin dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub struct AdminStatsResponse {
    pub participants: usize,
    pub admins: usize,
    pub active_challenges: usize,
    pub feed_subscribers: usize,
}
