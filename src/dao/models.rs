use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

/// Participant row as persisted by the storage layer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantEntity {
    /// Stable identifier, never reassigned.
    pub id: Uuid,
    /// Name shown on the leaderboard.
    pub display_name: String,
    /// Four ASCII digits chosen at sign-up.
    pub access_code: String,
    /// Current score; only ever changed through deltas.
    pub score: i64,
    /// Whether this participant may drive the session.
    pub is_admin: bool,
    /// Sign-up timestamp, used as the leaderboard tie-break.
    pub joined_at: SystemTime,
    /// Bumped by every score increment so readers can order row versions.
    pub revision: u64,
}

/// One live or ended challenge instance, keyed by `challenge_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveChallengeEntity {
    /// Catalog identifier of the challenge.
    pub challenge_id: String,
    /// Whether the challenge is currently running.
    pub is_active: bool,
    /// Last time the challenge was (re)started.
    pub start_time: SystemTime,
    /// Set when the challenge was ended.
    pub end_time: Option<SystemTime>,
}

/// Singleton row describing the session pointer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionStateEntity {
    /// Challenge the session currently points at.
    pub active_challenge_id: Option<String>,
    /// Whether any challenge is running.
    pub is_active: bool,
    /// Start of the pointed challenge.
    pub start_time: Option<SystemTime>,
    /// Time the session last went inactive.
    pub end_time: Option<SystemTime>,
    /// Last write to this row.
    pub updated_at: SystemTime,
}

/// A participant's current answer to one poll question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VoteEntity {
    /// Voter.
    pub user_id: Uuid,
    /// Poll question identifier.
    pub question_id: String,
    /// Index into the question's options.
    pub option_index: u32,
}

/// Filter applied when listing active challenge records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChallengeFilter {
    /// Only records with `is_active == true`.
    #[default]
    ActiveOnly,
    /// Every record, ended ones included.
    All,
}

impl ChallengeFilter {
    /// Whether `record` passes this filter.
    pub fn matches(self, record: &ActiveChallengeEntity) -> bool {
        match self {
            ChallengeFilter::ActiveOnly => record.is_active,
            ChallengeFilter::All => true,
        }
    }
}
