pub mod catalog;
mod feed;
pub mod leaderboard;
pub mod scoring;
/// Session state machine.
pub mod session;
/// Transition execution with change-feed publication.
pub mod transitions;

use std::{future::Future, sync::Arc, time::Duration};

use tokio::sync::{Mutex, RwLock, watch};
use tokio::time::timeout;
use tracing::warn;

use crate::{
    config::AppConfig,
    dao::{arena_store::ArenaStore, models::ChallengeFilter, storage::StorageError},
    error::ServiceError,
    state::catalog::ChallengeCatalog,
};

pub use self::feed::FeedHub;
pub use self::session::{AbortError, ApplyError, Plan, PlanError, PlanId, Snapshot};
use self::session::{SessionEvent, SessionStateMachine, SessionView};

/// Application state shared across handlers and tasks.
pub type SharedState = Arc<AppState>;
/// Upper bound on the persistence work of one transition.
pub const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(5);

/// Central application state: storage handle, session machine and change-feed hub.
pub struct AppState {
    store: RwLock<Option<Arc<dyn ArenaStore>>>,
    config: Arc<AppConfig>,
    feed: FeedHub,
    session: RwLock<SessionStateMachine>,
    degraded: watch::Sender<bool>,
    transition_gate: Mutex<()>,
    transition_timeout: Option<Duration>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        Self::with_transition_timeout(config, Some(DEFAULT_TRANSITION_TIMEOUT))
    }

    /// Same as [`AppState::new`] with a custom bound on transition work.
    pub fn with_transition_timeout(config: AppConfig, limit: Option<Duration>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        let known = config.catalog().challenges().map(|c| c.id.clone());
        let session = SessionStateMachine::new(known);
        Arc::new(Self {
            store: RwLock::new(None),
            feed: FeedHub::new(config.feed_capacity()),
            session: RwLock::new(session),
            config: Arc::new(config),
            degraded: degraded_tx,
            transition_gate: Mutex::new(()),
            transition_timeout: limit,
        })
    }

    /// Obtain a handle to the current store, if one is installed.
    pub async fn store(&self) -> Option<Arc<dyn ArenaStore>> {
        let guard = self.store.read().await;
        guard.as_ref().cloned()
    }

    /// Store handle for operations that need one; fails while degraded.
    pub async fn require_store(&self) -> Result<Arc<dyn ArenaStore>, ServiceError> {
        if self.is_degraded() {
            return Err(ServiceError::Degraded);
        }
        self.store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a store, load the persisted session into the state machine and leave degraded mode.
    pub async fn set_store(&self, store: Arc<dyn ArenaStore>) -> Result<(), StorageError> {
        self.hydrate_from(store.as_ref()).await?;
        {
            let mut guard = self.store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
        Ok(())
    }

    /// Reload the session view from the installed store.
    ///
    /// Used when the store turns out to hold rows the view never saw.
    pub async fn resync_session(&self) -> Result<(), ServiceError> {
        let store = self.require_store().await?;
        self.hydrate_from(store.as_ref()).await?;
        Ok(())
    }

    async fn hydrate_from(&self, store: &dyn ArenaStore) -> Result<(), StorageError> {
        let _gate = self.transition_gate.lock().await;
        let session = store.load_session_state().await?;
        let records = store.list_active_challenges(ChallengeFilter::All).await?;
        self.session.write().await.hydrate(session, records);
        Ok(())
    }

    /// Remove the current store and enter degraded mode.
    pub async fn clear_store(&self) {
        {
            let mut guard = self.store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub(crate) fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Challenge and poll catalog.
    pub fn catalog(&self) -> &ChallengeCatalog {
        self.config.catalog()
    }

    /// Hub carrying every committed row change.
    pub fn feed(&self) -> &FeedHub {
        &self.feed
    }

    /// Current session view of this process.
    pub async fn session_view(&self) -> SessionView {
        self.session.read().await.view().clone()
    }

    /// Snapshot of the session machine, including any pending event.
    pub async fn snapshot(&self) -> Snapshot {
        self.session.read().await.snapshot()
    }

    async fn plan_transition(&self, event: SessionEvent) -> Result<Plan, PlanError> {
        let mut sm = self.session.write().await;
        sm.plan(event)
    }

    async fn apply_planned_transition(&self, plan_id: PlanId) -> Result<SessionView, ApplyError> {
        let mut sm = self.session.write().await;
        sm.apply(plan_id)
    }

    async fn abort_transition(&self, plan_id: PlanId) -> Result<(), AbortError> {
        let mut sm = self.session.write().await;
        sm.abort(plan_id)
    }

    /// Plan `event`, run `work` (which persists the plan), then apply or abort.
    ///
    /// Transitions are serialized by a gate; `work` is bounded by the transition timeout.
    pub async fn run_transition<F, Fut, T>(
        &self,
        event: SessionEvent,
        work: F,
    ) -> Result<(T, Plan, SessionView), ServiceError>
    where
        F: FnOnce(Plan) -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let gate = self.transition_gate.lock().await;
        let plan = self.plan_transition(event.clone()).await?;
        let plan_id = plan.id;

        let work_future = work(plan.clone());
        let outcome = if let Some(limit) = self.transition_timeout {
            match timeout(limit, work_future).await {
                Ok(result) => result,
                Err(_) => {
                    if let Err(abort_err) = self.abort_transition(plan_id).await {
                        warn!(
                            event = ?event,
                            plan_id = %plan_id,
                            error = ?abort_err,
                            "failed to abort transition after timeout"
                        );
                    }
                    drop(gate);
                    return Err(ServiceError::Timeout);
                }
            }
        } else {
            work_future.await
        };

        match outcome {
            Ok(value) => {
                let next = self.apply_planned_transition(plan_id).await?;
                drop(gate);
                Ok((value, plan, next))
            }
            Err(err) => {
                if let Err(abort_err) = self.abort_transition(plan_id).await {
                    warn!(
                        event = ?event,
                        plan_id = %plan_id,
                        error = ?abort_err,
                        "failed to abort transition after work error"
                    );
                }
                drop(gate);
                Err(err)
            }
        }
    }
}
