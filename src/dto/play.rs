use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use utoipa::ToSchema;
use uuid::Uuid;

/// Signed score adjustment submitted at the end of a round.
#[skip_serializing_none]
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct ScoreDeltaRequest {
    pub participant_id: Uuid,
    pub delta: i64,
    /// Challenge the points were earned in, for logging.
    pub challenge_id: Option<String>,
}

/// Authoritative score after a delta was applied.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub struct ScoreDeltaResponse {
    pub participant_id: Uuid,
    pub score: i64,
    pub revision: u64,
}

/// Vote cast on a poll question.
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct VoteRequest {
    pub participant_id: Uuid,
    pub option_index: u32,
}

/// Acknowledgement of a recorded vote.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub struct VoteResponse {
    pub question_id: String,
    pub option_index: u32,
    /// Option the participant had chosen before, when this was a revote.
    pub previous_option: Option<u32>,
}
