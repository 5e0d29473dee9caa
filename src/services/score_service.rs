//! Score ledger: every score change is a relative delta applied atomically by the store.

use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::models::ParticipantEntity,
    dto::play::{ScoreDeltaRequest, ScoreDeltaResponse},
    error::ServiceError,
    services::feed_events,
    state::SharedState,
};

/// Apply a signed delta and return the authoritative row.
///
/// Negative results are allowed. Fails with `NotFound` for an unknown participant
/// and with `Degraded`/`Unavailable` when the store cannot be reached.
pub async fn apply_delta(
    state: &SharedState,
    participant_id: Uuid,
    delta: i64,
    challenge_id: Option<&str>,
) -> Result<ParticipantEntity, ServiceError> {
    let store = state.require_store().await?;

    let Some(updated) = store.increment_score(participant_id, delta).await? else {
        warn!(%participant_id, delta, "score delta for unknown participant");
        return Err(ServiceError::NotFound(format!(
            "participant `{participant_id}` not found"
        )));
    };

    info!(
        %participant_id,
        delta,
        score = updated.score,
        challenge = challenge_id.unwrap_or("-"),
        "score delta applied"
    );

    // Derived from the increment result; a separate read could observe other increments.
    let before = ParticipantEntity {
        score: updated.score - delta,
        revision: updated.revision.saturating_sub(1),
        ..updated.clone()
    };
    feed_events::publish_participant(state, Some(&before), &updated);

    Ok(updated)
}

/// REST entry point for [`apply_delta`].
pub async fn submit_delta(
    state: &SharedState,
    request: ScoreDeltaRequest,
) -> Result<ScoreDeltaResponse, ServiceError> {
    let ScoreDeltaRequest {
        participant_id,
        delta,
        challenge_id,
    } = request;

    if let Some(id) = challenge_id.as_deref() {
        if state.catalog().challenge(id).is_none() {
            return Err(ServiceError::NotFound(format!("challenge `{id}` not found")));
        }
    }

    let updated = apply_delta(state, participant_id, delta, challenge_id.as_deref()).await?;
    Ok(ScoreDeltaResponse {
        participant_id,
        score: updated.score,
        revision: updated.revision,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::arena_store::MemoryArenaStore,
        dto::{auth::CredentialsRequest, feed::EventKind},
        services::identity_service,
        state::AppState,
    };

    async fn state_with_player() -> (SharedState, Uuid) {
        let state = AppState::new(AppConfig::default());
        state
            .set_store(Arc::new(MemoryArenaStore::new()))
            .await
            .unwrap();
        let created = identity_service::signup(
            &state,
            CredentialsRequest {
                display_name: "pat".into(),
                access_code: "0420".into(),
            },
        )
        .await
        .unwrap();
        (state, created.participant.id)
    }

    #[tokio::test]
    async fn concurrent_deltas_commute() {
        let (state, id) = state_with_player().await;

        let emoji = {
            let state = state.clone();
            tokio::spawn(async move { apply_delta(&state, id, 1, Some("emoji")).await })
        };
        let shake = {
            let state = state.clone();
            tokio::spawn(async move { apply_delta(&state, id, 10, Some("shake")).await })
        };
        emoji.await.unwrap().unwrap();
        shake.await.unwrap().unwrap();

        let participant = identity_service::get_participant(&state, id).await.unwrap();
        assert_eq!(participant.score, 11);
        assert_eq!(participant.revision, 2);
    }

    #[tokio::test]
    async fn negative_scores_are_allowed() {
        let (state, id) = state_with_player().await;
        let updated = apply_delta(&state, id, -7, None).await.unwrap();
        assert_eq!(updated.score, -7);
    }

    #[tokio::test]
    async fn unknown_participant_is_not_found() {
        let (state, _) = state_with_player().await;
        assert!(matches!(
            apply_delta(&state, Uuid::new_v4(), 3, None).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn offline_store_is_unavailable() {
        let state = AppState::new(AppConfig::default());
        let store = MemoryArenaStore::new();
        state.set_store(Arc::new(store.clone())).await.unwrap();
        store.set_offline(true);
        assert!(matches!(
            apply_delta(&state, Uuid::new_v4(), 3, None).await,
            Err(ServiceError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn delta_publishes_update_with_before_row() {
        let (state, id) = state_with_player().await;
        let mut feed = state.feed().subscribe();

        let response = submit_delta(
            &state,
            ScoreDeltaRequest {
                participant_id: id,
                delta: 5,
                challenge_id: Some("shake".into()),
            },
        )
        .await
        .unwrap();
        assert_eq!(response.score, 5);

        let change = feed.recv().await.unwrap();
        assert_eq!(change.event_kind, EventKind::Update);
        assert_eq!(change.before.unwrap()["score"], 0);
        assert_eq!(change.after.unwrap()["score"], 5);
    }

    #[tokio::test]
    async fn unknown_challenge_tag_is_rejected() {
        let (state, id) = state_with_player().await;
        let result = submit_delta(
            &state,
            ScoreDeltaRequest {
                participant_id: id,
                delta: 5,
                challenge_id: Some("karaoke".into()),
            },
        )
        .await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }
}
