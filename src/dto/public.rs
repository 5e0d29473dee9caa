//! Read models shared by the public REST API, the change feed rows and the client.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::{
    dao::models::ParticipantEntity,
    dto::{format_system_time, parse_system_time},
    state::{
        leaderboard::{LeaderboardEntry, Standing},
        session::{ChallengeRecord, SessionState},
    },
};

/// Participant as exposed to clients; the access code never leaves the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ParticipantSummary {
    pub id: Uuid,
    pub display_name: String,
    pub score: i64,
    pub is_admin: bool,
    /// RFC 3339 join timestamp.
    pub joined_at: String,
    /// Bumped by every score change; higher means newer.
    pub revision: u64,
}

impl From<ParticipantEntity> for ParticipantSummary {
    fn from(value: ParticipantEntity) -> Self {
        Self {
            id: value.id,
            display_name: value.display_name,
            score: value.score,
            is_admin: value.is_admin,
            joined_at: format_system_time(value.joined_at),
            revision: value.revision,
        }
    }
}

impl Standing for ParticipantSummary {
    fn participant_id(&self) -> Uuid {
        self.id
    }

    fn score(&self) -> i64 {
        self.score
    }

    fn joined_at(&self) -> SystemTime {
        parse_system_time(&self.joined_at).unwrap_or(SystemTime::UNIX_EPOCH)
    }
}

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LeaderboardRow {
    pub rank: usize,
    pub participant: ParticipantSummary,
}

impl<P: Into<ParticipantSummary>> From<LeaderboardEntry<P>> for LeaderboardRow {
    fn from(value: LeaderboardEntry<P>) -> Self {
        Self {
            rank: value.rank,
            participant: value.participant.into(),
        }
    }
}

/// Session pointer as exposed to clients.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SessionStateSummary {
    pub active_challenge_id: Option<String>,
    pub is_active: bool,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

impl From<&SessionState> for SessionStateSummary {
    fn from(value: &SessionState) -> Self {
        Self {
            active_challenge_id: value.active_challenge_id.clone(),
            is_active: value.is_active,
            start_time: value.start_time.map(format_system_time),
            end_time: value.end_time.map(format_system_time),
        }
    }
}

/// Live or ended challenge record.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChallengeRecordSummary {
    pub challenge_id: String,
    pub is_active: bool,
    pub start_time: String,
    pub end_time: Option<String>,
}

impl From<&ChallengeRecord> for ChallengeRecordSummary {
    fn from(value: &ChallengeRecord) -> Self {
        Self {
            challenge_id: value.challenge_id.clone(),
            is_active: value.is_active,
            start_time: format_system_time(value.start_time),
            end_time: value.end_time.map(format_system_time),
        }
    }
}

/// Query string accepted by the leaderboard route.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LeaderboardQuery {
    /// Number of rows to return (default 10).
    pub limit: Option<usize>,
}

/// Everything a client needs to rebuild its view in one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SnapshotResponse {
    pub session: SessionStateSummary,
    pub challenges: Vec<ChallengeRecordSummary>,
    /// Full projected leaderboard.
    pub leaderboard: Vec<LeaderboardRow>,
    pub degraded: bool,
}

/// Vote counts per option index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TallyResponse {
    pub question_id: String,
    /// `counts[i]` is the number of live votes for option `i`.
    pub counts: Vec<u64>,
    pub closed: bool,
}
