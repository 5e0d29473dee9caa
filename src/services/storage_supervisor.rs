use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{arena_store::ArenaStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Connect to the storage backend, watch its health and keep the shared state
/// degraded while it is unreachable.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn ArenaStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        let store = match connect().await {
            Ok(store) => store,
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
                continue;
            }
        };

        if let Err(err) = state.set_store(store.clone()).await {
            warn!(error = %err, "failed to load session from storage; retrying");
            sleep(delay).await;
            delay = (delay * 2).min(MAX_DELAY);
            continue;
        }
        info!("storage connection established; leaving degraded mode");
        delay = INITIAL_DELAY;

        watch_health(&state, store.as_ref()).await;

        state.clear_store().await;
        sleep(delay).await;
        delay = (delay * 2).min(MAX_DELAY);
    }
}

/// Poll the store until it fails and cannot be reconnected in place.
async fn watch_health(state: &SharedState, store: &dyn ArenaStore) {
    loop {
        if store.health_check().await.is_ok() {
            if state.is_degraded() {
                info!("storage healthy again; leaving degraded mode");
                state.update_degraded(false);
            }
            sleep(HEALTH_POLL_INTERVAL).await;
            continue;
        }

        let mut reconnect_delay = INITIAL_DELAY;
        let mut reconnected = false;
        for attempt in 0..MAX_RECONNECT_ATTEMPTS {
            match store.try_reconnect().await {
                Ok(()) => {
                    info!(attempt, "storage reconnection succeeded after health check failure");
                    reconnected = true;
                    break;
                }
                Err(err) => {
                    if attempt == 0 {
                        warn!(
                            attempt, error = %err,
                            "storage reconnect first attempt failed; entering degraded mode"
                        );
                        state.update_degraded(true);
                    } else {
                        warn!(attempt, error = %err, "storage reconnect attempt failed");
                    }
                    sleep(reconnect_delay).await;
                    reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
                }
            }
        }

        if !reconnected {
            warn!("exhausted storage reconnect attempts; staying in degraded mode");
            return;
        }
        state.update_degraded(false);
        sleep(HEALTH_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, dao::arena_store::MemoryArenaStore, state::AppState};

    #[tokio::test]
    async fn installs_store_and_leaves_degraded_mode() {
        let state = AppState::new(AppConfig::default());
        let store = MemoryArenaStore::new();
        let mut watcher = state.degraded_watcher();

        let supervised = store.clone();
        let task = tokio::spawn(run(state.clone(), move || {
            let store = supervised.clone();
            async move { Ok(Arc::new(store) as Arc<dyn ArenaStore>) }
        }));

        watcher.changed().await.unwrap();
        assert!(!state.is_degraded());
        assert!(state.store().await.is_some());
        task.abort();
    }

    #[tokio::test]
    async fn failed_health_checks_enter_degraded_mode() {
        let state = AppState::new(AppConfig::default());
        let store = MemoryArenaStore::new();
        let mut watcher = state.degraded_watcher();

        let supervised = store.clone();
        let task = tokio::spawn(run(state.clone(), move || {
            let store = supervised.clone();
            async move { Ok(Arc::new(store) as Arc<dyn ArenaStore>) }
        }));

        watcher.changed().await.unwrap();
        assert!(!*watcher.borrow_and_update());

        store.set_offline(true);
        tokio::time::timeout(HEALTH_POLL_INTERVAL * 2, watcher.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(*watcher.borrow_and_update());
        task.abort();
    }
}
