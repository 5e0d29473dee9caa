use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{MongoDaoError, MongoResult};
use crate::dao::models::{
    ActiveChallengeEntity, ParticipantEntity, SessionStateEntity, VoteEntity,
};

/// `_id` of the session singleton.
pub const SESSION_DOCUMENT_ID: &str = "singleton";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoParticipantDocument {
    #[serde(rename = "_id")]
    id: String,
    display_name: String,
    access_code: String,
    score: i64,
    is_admin: bool,
    joined_at: DateTime,
    #[serde(default)]
    revision: i64,
}

impl From<ParticipantEntity> for MongoParticipantDocument {
    fn from(value: ParticipantEntity) -> Self {
        Self {
            id: value.id.to_string(),
            display_name: value.display_name,
            access_code: value.access_code,
            score: value.score,
            is_admin: value.is_admin,
            joined_at: DateTime::from_system_time(value.joined_at),
            revision: value.revision as i64,
        }
    }
}

impl TryFrom<MongoParticipantDocument> for ParticipantEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoParticipantDocument) -> MongoResult<Self> {
        Ok(Self {
            id: parse_uuid(&value.id)?,
            display_name: value.display_name,
            access_code: value.access_code,
            score: value.score,
            is_admin: value.is_admin,
            joined_at: value.joined_at.to_system_time(),
            revision: value.revision.max(0) as u64,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoChallengeDocument {
    #[serde(rename = "_id")]
    challenge_id: String,
    is_active: bool,
    start_time: DateTime,
    end_time: Option<DateTime>,
}

impl From<ActiveChallengeEntity> for MongoChallengeDocument {
    fn from(value: ActiveChallengeEntity) -> Self {
        Self {
            challenge_id: value.challenge_id,
            is_active: value.is_active,
            start_time: DateTime::from_system_time(value.start_time),
            end_time: value.end_time.map(DateTime::from_system_time),
        }
    }
}

impl From<MongoChallengeDocument> for ActiveChallengeEntity {
    fn from(value: MongoChallengeDocument) -> Self {
        Self {
            challenge_id: value.challenge_id,
            is_active: value.is_active,
            start_time: value.start_time.to_system_time(),
            end_time: value.end_time.map(|at| at.to_system_time()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    id: String,
    active_challenge_id: Option<String>,
    is_active: bool,
    start_time: Option<DateTime>,
    end_time: Option<DateTime>,
    updated_at: DateTime,
}

impl From<SessionStateEntity> for MongoSessionDocument {
    fn from(value: SessionStateEntity) -> Self {
        Self {
            id: SESSION_DOCUMENT_ID.to_owned(),
            active_challenge_id: value.active_challenge_id,
            is_active: value.is_active,
            start_time: value.start_time.map(DateTime::from_system_time),
            end_time: value.end_time.map(DateTime::from_system_time),
            updated_at: DateTime::from_system_time(value.updated_at),
        }
    }
}

impl From<MongoSessionDocument> for SessionStateEntity {
    fn from(value: MongoSessionDocument) -> Self {
        Self {
            active_challenge_id: value.active_challenge_id,
            is_active: value.is_active,
            start_time: value.start_time.map(|at| at.to_system_time()),
            end_time: value.end_time.map(|at| at.to_system_time()),
            updated_at: value.updated_at.to_system_time(),
        }
    }
}

/// Vote row keyed by `question_id:user_id` so a revote replaces in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoVoteDocument {
    #[serde(rename = "_id")]
    id: String,
    user_id: String,
    question_id: String,
    option_index: i64,
}

impl From<VoteEntity> for MongoVoteDocument {
    fn from(value: VoteEntity) -> Self {
        Self {
            id: vote_key(&value.question_id, value.user_id),
            user_id: value.user_id.to_string(),
            question_id: value.question_id,
            option_index: i64::from(value.option_index),
        }
    }
}

impl TryFrom<MongoVoteDocument> for VoteEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoVoteDocument) -> MongoResult<Self> {
        let option_index =
            u32::try_from(value.option_index).map_err(|_| MongoDaoError::CorruptDocument {
                id: value.id.clone(),
                reason: format!("option index {} out of range", value.option_index),
            })?;
        Ok(Self {
            user_id: parse_uuid(&value.user_id)?,
            question_id: value.question_id,
            option_index,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPollDocument {
    #[serde(rename = "_id")]
    pub question_id: String,
    #[serde(default)]
    pub closed: bool,
}

/// `_id` of the vote a participant cast on a question.
pub fn vote_key(question_id: &str, user_id: Uuid) -> String {
    format!("{question_id}:{user_id}")
}

/// Filter matching one document by `_id`.
pub fn doc_id(id: impl Into<String>) -> Document {
    doc! { "_id": id.into() }
}

fn parse_uuid(raw: &str) -> MongoResult<Uuid> {
    Uuid::parse_str(raw).map_err(|err| MongoDaoError::CorruptDocument {
        id: raw.to_owned(),
        reason: err.to_string(),
    })
}
