//! Sign-up, login and the server-side admin predicate.

use std::time::SystemTime;

use tracing::{debug, info};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::ParticipantEntity,
    dto::{
        auth::{AuthResponse, CredentialsRequest},
        public::ParticipantSummary,
    },
    error::ServiceError,
    services::feed_events,
    state::SharedState,
};

/// Register a new participant with a zero score.
///
/// The store rejects a taken display name atomically, so concurrent sign-ups under
/// one name leave exactly one participant.
pub async fn signup(
    state: &SharedState,
    request: CredentialsRequest,
) -> Result<AuthResponse, ServiceError> {
    request.validate()?;
    let store = state.require_store().await?;
    let CredentialsRequest {
        display_name,
        access_code,
    } = request;
    let display_name = display_name.trim().to_owned();

    let entity = ParticipantEntity {
        id: Uuid::new_v4(),
        is_admin: state.config().is_admin_name(&display_name),
        display_name,
        access_code,
        score: 0,
        joined_at: SystemTime::now(),
        revision: 0,
    };

    let created = store.create_participant(entity).await?;
    info!(
        participant_id = %created.id,
        display_name = %created.display_name,
        is_admin = created.is_admin,
        "participant signed up"
    );
    feed_events::publish_participant(state, None, &created);

    Ok(AuthResponse {
        participant: created.into(),
    })
}

/// Authenticate with display name and access code.
pub async fn login(
    state: &SharedState,
    request: CredentialsRequest,
) -> Result<AuthResponse, ServiceError> {
    request.validate()?;
    let store = state.require_store().await?;
    let CredentialsRequest {
        display_name,
        access_code,
    } = request;

    let Some(participant) = store
        .find_participant(display_name.trim().to_owned(), access_code)
        .await?
    else {
        debug!(display_name = %display_name, "login rejected");
        return Err(ServiceError::InvalidInput(
            "invalid username or access code".into(),
        ));
    };

    Ok(AuthResponse {
        participant: participant.into(),
    })
}

/// Fetch one participant by id.
pub async fn get_participant(
    state: &SharedState,
    id: Uuid,
) -> Result<ParticipantSummary, ServiceError> {
    let store = state.require_store().await?;
    store
        .get_participant(id)
        .await?
        .map(ParticipantSummary::from)
        .ok_or_else(|| ServiceError::NotFound(format!("participant `{id}` not found")))
}

/// Re-check the admin capability against the store; a client-supplied flag is never trusted.
pub async fn ensure_admin(state: &SharedState, actor: Uuid) -> Result<(), ServiceError> {
    let store = state.require_store().await?;
    match store.get_participant(actor).await? {
        Some(participant) if participant.is_admin => Ok(()),
        Some(_) => Err(ServiceError::Forbidden(
            "admin capability required".into(),
        )),
        None => Err(ServiceError::Unauthorized(format!(
            "unknown participant `{actor}`"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::arena_store::MemoryArenaStore,
        dto::feed::{EventKind, Resource},
        state::AppState,
    };

    async fn ready_state() -> SharedState {
        let state = AppState::new(AppConfig::default());
        state
            .set_store(Arc::new(MemoryArenaStore::new()))
            .await
            .unwrap();
        state
    }

    fn credentials(name: &str, code: &str) -> CredentialsRequest {
        CredentialsRequest {
            display_name: name.into(),
            access_code: code.into(),
        }
    }

    #[tokio::test]
    async fn signup_then_login() {
        let state = ready_state().await;
        let mut feed = state.feed().subscribe();

        let created = signup(&state, credentials("alice", "1234")).await.unwrap();
        assert_eq!(created.participant.score, 0);
        assert!(!created.participant.is_admin);

        let change = feed.recv().await.unwrap();
        assert_eq!(change.resource, Resource::Users);
        assert_eq!(change.event_kind, EventKind::Insert);

        let logged = login(&state, credentials("alice", "1234")).await.unwrap();
        assert_eq!(logged.participant.id, created.participant.id);
    }

    #[tokio::test]
    async fn duplicate_name_conflicts() {
        let state = ready_state().await;
        signup(&state, credentials("bob", "1111")).await.unwrap();
        match signup(&state, credentials("bob", "2222")).await {
            Err(ServiceError::Conflict(_)) => {}
            other => panic!("unexpected signup result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn racing_signups_keep_one_name() {
        let state = ready_state().await;
        let (first, second) = tokio::join!(
            signup(&state, credentials("dave", "1111")),
            signup(&state, credentials("dave", "2222"))
        );
        assert!(first.is_ok() ^ second.is_ok());
        assert!(matches!(
            first.err().or(second.err()),
            Some(ServiceError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn wrong_code_is_a_validation_error() {
        let state = ready_state().await;
        signup(&state, credentials("carol", "4321")).await.unwrap();
        match login(&state, credentials("carol", "0000")).await {
            Err(ServiceError::InvalidInput(message)) => {
                assert_eq!(message, "invalid username or access code")
            }
            other => panic!("unexpected login result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_code_is_rejected_before_store() {
        let state = AppState::new(AppConfig::default());
        assert!(matches!(
            signup(&state, credentials("dave", "12a4")).await,
            Err(ServiceError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn configured_name_becomes_admin() {
        let state = ready_state().await;
        let admin = signup(&state, credentials("Admin", "9999")).await.unwrap();
        assert!(admin.participant.is_admin);
        let player = signup(&state, credentials("erin", "9999")).await.unwrap();

        ensure_admin(&state, admin.participant.id).await.unwrap();
        assert!(matches!(
            ensure_admin(&state, player.participant.id).await,
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            ensure_admin(&state, Uuid::new_v4()).await,
            Err(ServiceError::Unauthorized(_))
        ));
    }
}
