use mongodb::error::Error as MongoError;
use thiserror::Error;
use uuid::Uuid;

/// Result alias for MongoDB DAO calls.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("participant `{id}` or display name `{display_name}` already exists")]
    DuplicateParticipant { id: Uuid, display_name: String },
    #[error("failed to write participant `{id}`")]
    SaveParticipant {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to load participants")]
    LoadParticipants {
        #[source]
        source: MongoError,
    },
    #[error("failed to write challenge record `{challenge_id}`")]
    SaveChallenge {
        challenge_id: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to load challenge records")]
    LoadChallenges {
        #[source]
        source: MongoError,
    },
    #[error("failed to access session state")]
    SessionState {
        #[source]
        source: MongoError,
    },
    #[error("failed to access votes for question `{question_id}`")]
    Votes {
        question_id: String,
        #[source]
        source: MongoError,
    },
    #[error("question `{question_id}` is closed")]
    PollClosed { question_id: String },
    #[error("stored document `{id}` is malformed: {reason}")]
    CorruptDocument { id: String, reason: String },
}
