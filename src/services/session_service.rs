//! Admin-driven session transitions: start, end and end-all.
//!
//! Each call re-checks the admin capability, plans the transition on the session
//! machine, persists the touched rows and only then applies the plan.

use std::time::SystemTime;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        arena_store::ArenaStore,
        models::{ActiveChallengeEntity, ChallengeFilter},
    },
    dto::{
        admin::ChallengeActionResponse,
        public::{ChallengeRecordSummary, SessionStateSummary},
    },
    error::ServiceError,
    services::{feed_events::publish_challenge_record, identity_service::ensure_admin},
    state::{
        Plan, SharedState,
        session::{ChallengeRecord, SessionEvent, SessionView},
        transitions::run_transition_with_broadcast,
    },
};

/// Start a challenge, or refresh its start time when it is already running.
pub async fn start_challenge(
    state: &SharedState,
    actor: Uuid,
    challenge_id: &str,
) -> Result<ChallengeActionResponse, ServiceError> {
    ensure_admin(state, actor).await?;
    ensure_known(state, challenge_id)?;
    let store = state.require_store().await?;

    let event = SessionEvent::Start {
        challenge_id: challenge_id.to_owned(),
        at: SystemTime::now(),
    };
    let (_, plan, next) = run_transition_with_broadcast(state, event, move |plan| async move {
        persist_start(store.as_ref(), &plan).await
    })
    .await?;

    info!(%actor, challenge = challenge_id, "challenge started");
    Ok(action_response(&plan, &next))
}

/// End a challenge; ending one that is not running changes nothing.
pub async fn end_challenge(
    state: &SharedState,
    actor: Uuid,
    challenge_id: &str,
) -> Result<ChallengeActionResponse, ServiceError> {
    ensure_admin(state, actor).await?;
    ensure_known(state, challenge_id)?;
    let store = state.require_store().await?;

    let event = SessionEvent::End {
        challenge_id: challenge_id.to_owned(),
        at: SystemTime::now(),
    };
    let (_, plan, next) = run_transition_with_broadcast(state, event, move |plan| async move {
        if plan.is_noop() {
            return Ok(());
        }
        for record in &plan.touched {
            let entity = ActiveChallengeEntity::from(record.clone());
            if store.update_active_challenge(entity).await?.is_none() {
                warn!(
                    challenge = %record.challenge_id,
                    "ended challenge had no stored record"
                );
            }
        }
        save_session(store.as_ref(), &plan).await
    })
    .await?;

    if plan.is_noop() {
        info!(%actor, challenge = challenge_id, "challenge was not running; nothing ended");
    } else {
        info!(%actor, challenge = challenge_id, "challenge ended");
    }
    Ok(action_response(&plan, &next))
}

/// End every running challenge in one batch.
///
/// The batch always runs against the store, so rows the session view missed are
/// ended too; they are published and added to the response like planned ones.
pub async fn end_all_challenges(
    state: &SharedState,
    actor: Uuid,
) -> Result<ChallengeActionResponse, ServiceError> {
    ensure_admin(state, actor).await?;
    let store = state.require_store().await?;

    let at = SystemTime::now();
    let (ended, plan, next) =
        run_transition_with_broadcast(state, SessionEvent::EndAll { at }, move |plan| async move {
            let ended = store.end_all_active_challenges(at).await?;
            save_session(store.as_ref(), &plan).await?;
            Ok(ended)
        })
        .await?;

    let mut response = action_response(&plan, &next);
    let unplanned: Vec<ChallengeRecord> = ended
        .into_iter()
        .filter(|row| {
            !plan
                .touched
                .iter()
                .any(|record| record.challenge_id == row.challenge_id)
        })
        .map(ChallengeRecord::from)
        .collect();
    if !unplanned.is_empty() {
        warn!(
            count = unplanned.len(),
            "ended stored challenges the session view did not hold"
        );
        let committed_at = SystemTime::now();
        for before in &unplanned {
            let after = ChallengeRecord {
                is_active: false,
                end_time: Some(at),
                ..before.clone()
            };
            publish_challenge_record(state, Some(before), &after, committed_at);
            response.changed.push(ChallengeRecordSummary::from(&after));
        }
        if let Err(err) = state.resync_session().await {
            warn!(error = %err, "failed to reload session view after end-all");
        }
    }

    info!(%actor, ended = response.changed.len(), "all challenges ended");
    Ok(response)
}

/// Current session pointer.
pub async fn current_session(state: &SharedState) -> SessionStateSummary {
    SessionStateSummary::from(&state.session_view().await.session)
}

/// Every challenge record, ended ones included, in first-start order.
pub async fn challenge_records(state: &SharedState) -> Vec<ChallengeRecordSummary> {
    state
        .session_view()
        .await
        .records
        .values()
        .map(ChallengeRecordSummary::from)
        .collect()
}

fn ensure_known(state: &SharedState, challenge_id: &str) -> Result<(), ServiceError> {
    if state.catalog().challenge(challenge_id).is_some() {
        Ok(())
    } else {
        Err(ServiceError::NotFound(format!(
            "challenge `{challenge_id}` not found"
        )))
    }
}

async fn persist_start(store: &dyn ArenaStore, plan: &Plan) -> Result<(), ServiceError> {
    for record in &plan.touched {
        let entity = ActiveChallengeEntity::from(record.clone());
        match store.upsert_active_challenge(entity).await {
            Ok(_) => {}
            Err(err) => {
                let err = ServiceError::from(err);
                if !matches!(err, ServiceError::Conflict(_)) {
                    return Err(err);
                }
                // A concurrent start won the race; accept it when the row is live.
                let live = store
                    .list_active_challenges(ChallengeFilter::ActiveOnly)
                    .await?
                    .into_iter()
                    .any(|row| row.challenge_id == record.challenge_id);
                if !live {
                    return Err(err);
                }
                warn!(
                    challenge = %record.challenge_id,
                    "concurrent start resolved; challenge is active"
                );
            }
        }
    }
    if let Err(err) = save_session(store, plan).await {
        rollback_start(store, plan).await;
        return Err(err);
    }
    Ok(())
}

/// Put back the rows a failed start already wrote.
async fn rollback_start(store: &dyn ArenaStore, plan: &Plan) {
    for record in &plan.touched {
        let restored = match plan.previous(&record.challenge_id) {
            Some(previous) => store
                .upsert_active_challenge(ActiveChallengeEntity::from(previous.clone()))
                .await
                .map(|_| ()),
            None => store
                .delete_active_challenge(record.challenge_id.clone())
                .await
                .map(|_| ()),
        };
        match restored {
            Ok(()) => debug!(challenge = %record.challenge_id, "challenge start rolled back"),
            Err(err) => warn!(
                challenge = %record.challenge_id,
                error = %err,
                "failed to roll back challenge start; end-all still clears it"
            ),
        }
    }
}

async fn save_session(store: &dyn ArenaStore, plan: &Plan) -> Result<(), ServiceError> {
    store
        .save_session_state(plan.to.session.to_entity(SystemTime::now()))
        .await?;
    Ok(())
}

fn action_response(plan: &Plan, next: &SessionView) -> ChallengeActionResponse {
    ChallengeActionResponse {
        session: SessionStateSummary::from(&next.session),
        changed: plan
            .touched
            .iter()
            .map(ChallengeRecordSummary::from)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::arena_store::MemoryArenaStore,
        dto::{
            auth::CredentialsRequest,
            feed::{EventKind, Resource},
        },
        services::identity_service,
        state::AppState,
    };

    struct Fixture {
        state: SharedState,
        store: MemoryArenaStore,
        admin: Uuid,
        player: Uuid,
    }

    async fn fixture() -> Fixture {
        let state = AppState::new(AppConfig::default());
        let store = MemoryArenaStore::new();
        state.set_store(Arc::new(store.clone())).await.unwrap();
        let signup = |name: &'static str| {
            let state = state.clone();
            async move {
                identity_service::signup(
                    &state,
                    CredentialsRequest {
                        display_name: name.into(),
                        access_code: "1234".into(),
                    },
                )
                .await
                .unwrap()
                .participant
                .id
            }
        };
        let admin = signup("admin").await;
        let player = signup("player").await;
        Fixture {
            state,
            store,
            admin,
            player,
        }
    }

    #[tokio::test]
    async fn restart_keeps_single_active_record() {
        let fx = fixture().await;
        start_challenge(&fx.state, fx.admin, "poll").await.unwrap();
        let first = fx.state.session_view().await.records["poll"].start_time;
        start_challenge(&fx.state, fx.admin, "poll").await.unwrap();

        let rows = fx
            .store
            .list_active_challenges(ChallengeFilter::ActiveOnly)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].start_time >= first);

        let session = current_session(&fx.state).await;
        assert!(session.is_active);
        assert_eq!(session.active_challenge_id.as_deref(), Some("poll"));
    }

    #[tokio::test]
    async fn non_admin_cannot_start() {
        let fx = fixture().await;
        assert!(matches!(
            start_challenge(&fx.state, fx.player, "poll").await,
            Err(ServiceError::Forbidden(_))
        ));
        assert!(fx.state.session_view().await.records.is_empty());
    }

    #[tokio::test]
    async fn unknown_challenge_is_not_found() {
        let fx = fixture().await;
        assert!(matches!(
            start_challenge(&fx.state, fx.admin, "karaoke").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn ending_idle_challenge_is_noop() {
        let fx = fixture().await;
        let mut feed = fx.state.feed().subscribe();
        let response = end_challenge(&fx.state, fx.admin, "shake").await.unwrap();
        assert!(response.changed.is_empty());
        assert!(!response.session.is_active);
        assert!(feed.try_recv().is_err());
    }

    #[tokio::test]
    async fn end_all_clears_every_active_record() {
        let fx = fixture().await;
        for id in ["poll", "shake", "emoji"] {
            start_challenge(&fx.state, fx.admin, id).await.unwrap();
        }

        let response = end_all_challenges(&fx.state, fx.admin).await.unwrap();
        assert_eq!(response.changed.len(), 3);
        assert!(!response.session.is_active);
        assert!(
            fx.store
                .list_active_challenges(ChallengeFilter::ActiveOnly)
                .await
                .unwrap()
                .is_empty()
        );

        let again = end_all_challenges(&fx.state, fx.admin).await.unwrap();
        assert!(again.changed.is_empty());
    }

    #[tokio::test]
    async fn start_publishes_record_and_session() {
        let fx = fixture().await;
        let mut feed = fx.state.feed().subscribe();
        start_challenge(&fx.state, fx.admin, "lucky-tap").await.unwrap();

        let record = feed.recv().await.unwrap();
        assert_eq!(record.resource, Resource::ActiveChallenges);
        assert_eq!(record.event_kind, EventKind::Insert);

        let session = feed.recv().await.unwrap();
        assert_eq!(session.resource, Resource::GameState);
        assert_eq!(session.event_kind, EventKind::Update);
        assert_eq!(session.after.unwrap()["active_challenge_id"], "lucky-tap");
    }

    #[tokio::test]
    async fn store_failure_leaves_view_untouched() {
        let fx = fixture().await;
        fx.store.set_offline(true);
        // Admin lookup fails first, with the store offline.
        assert!(matches!(
            start_challenge(&fx.state, fx.admin, "poll").await,
            Err(ServiceError::Unavailable(_))
        ));
        assert!(fx.state.session_view().await.records.is_empty());
        assert!(fx.state.snapshot().await.pending.is_none());
    }

    #[tokio::test]
    async fn failed_session_save_rolls_back_start() {
        let fx = fixture().await;
        fx.store.fail_next("save_session_state");
        assert!(matches!(
            start_challenge(&fx.state, fx.admin, "poll").await,
            Err(ServiceError::Unavailable(_))
        ));
        assert!(fx.state.session_view().await.records.is_empty());
        assert!(
            fx.store
                .list_active_challenges(ChallengeFilter::All)
                .await
                .unwrap()
                .is_empty()
        );

        start_challenge(&fx.state, fx.admin, "shake").await.unwrap();
        fx.store.fail_next("save_session_state");
        assert!(start_challenge(&fx.state, fx.admin, "shake").await.is_err());
        let rows = fx
            .store
            .list_active_challenges(ChallengeFilter::ActiveOnly)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(
            rows[0].start_time,
            fx.state.session_view().await.records["shake"].start_time
        );
    }

    #[tokio::test]
    async fn end_all_ends_rows_the_view_missed() {
        let fx = fixture().await;
        fx.store
            .upsert_active_challenge(ActiveChallengeEntity {
                challenge_id: "poll".into(),
                is_active: true,
                start_time: SystemTime::now(),
                end_time: None,
            })
            .await
            .unwrap();
        assert!(fx.state.session_view().await.records.is_empty());
        let mut feed = fx.state.feed().subscribe();

        let response = end_all_challenges(&fx.state, fx.admin).await.unwrap();
        assert_eq!(response.changed.len(), 1);
        assert!(!response.changed[0].is_active);
        assert!(
            fx.store
                .list_active_challenges(ChallengeFilter::ActiveOnly)
                .await
                .unwrap()
                .is_empty()
        );
        let record = feed.recv().await.unwrap();
        assert_eq!(record.resource, Resource::ActiveChallenges);
        assert_eq!(record.event_kind, EventKind::Update);

        let view = fx.state.session_view().await;
        assert!(!view.records["poll"].is_active);
        assert!(!view.session.is_active);

        let fresh = AppState::new(AppConfig::default());
        fresh.set_store(Arc::new(fx.store.clone())).await.unwrap();
        assert!(challenge_records(&fresh).await.iter().all(|r| !r.is_active));
    }

    #[tokio::test]
    async fn session_survives_store_reinstall() {
        let fx = fixture().await;
        start_challenge(&fx.state, fx.admin, "emoji").await.unwrap();

        let fresh = AppState::new(AppConfig::default());
        fresh.set_store(Arc::new(fx.store.clone())).await.unwrap();
        let session = current_session(&fresh).await;
        assert_eq!(session.active_challenge_id.as_deref(), Some("emoji"));
        assert_eq!(challenge_records(&fresh).await.len(), 1);
    }
}
