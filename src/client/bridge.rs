//! Change-feed bridge: keeps a client's view in sync with committed changes.
//!
//! The bridge subscribes to every resource, fetches one authoritative snapshot as
//! soon as the subscriptions are live, then forwards each notification as a typed
//! [`ArenaEvent`]. A dropped transport is followed by a fixed delay, fresh
//! subscriptions and a fresh snapshot; there is no cursor replay.

use std::{sync::Arc, time::Duration};

use futures::{StreamExt, stream::select_all};
use serde::de::DeserializeOwned;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, info, warn};

use crate::{
    client::{
        api::ArenaApi,
        feed::{ChangeFeed, FeedError, Subscription, SubscriptionHandle},
    },
    dto::{
        feed::{ChangeNotification, EventKind, Resource},
        public::{ParticipantSummary, SnapshotResponse},
    },
};

const LOG_TARGET: &str = "client::bridge";
const UPDATE_BUFFER: usize = 64;

/// Connection state of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Disconnected,
    Subscribing,
    Live,
    Error,
    Reconnecting,
}

/// Typed change derived from exactly one feed notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArenaEvent {
    /// Session singleton or a challenge record changed.
    SessionStateChanged,
    /// A participant's score changed.
    LeaderboardChanged(ParticipantSummary),
    /// A vote on the given question was cast, replaced or removed.
    VotesChanged(String),
    /// A participant joined or left.
    UsersChanged(ParticipantSummary),
}

/// Everything the bridge hands to its consumer, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeUpdate {
    State(BridgeState),
    /// Authoritative full fetch taken right after (re)subscribing.
    Snapshot(SnapshotResponse),
    Event(ArenaEvent),
}

/// Translate a raw notification into the event consumers see.
pub fn translate(change: &ChangeNotification) -> Result<ArenaEvent, FeedError> {
    match change.resource {
        Resource::GameState | Resource::ActiveChallenges => Ok(ArenaEvent::SessionStateChanged),
        Resource::Users => {
            let participant: ParticipantSummary = decode_row(change)?;
            Ok(match change.event_kind {
                EventKind::Update => ArenaEvent::LeaderboardChanged(participant),
                EventKind::Insert | EventKind::Delete => ArenaEvent::UsersChanged(participant),
            })
        }
        Resource::Votes => change
            .row()
            .and_then(|row| row.get("question_id"))
            .and_then(|value| value.as_str())
            .map(|question_id| ArenaEvent::VotesChanged(question_id.to_owned()))
            .ok_or_else(|| FeedError::Decode("vote row without question_id".into())),
    }
}

fn decode_row<T: DeserializeOwned>(change: &ChangeNotification) -> Result<T, FeedError> {
    let row = change
        .row()
        .cloned()
        .ok_or_else(|| FeedError::Decode(format!("{} change without row", change.resource)))?;
    serde_json::from_value(row).map_err(|err| FeedError::Decode(err.to_string()))
}

/// Control handle of a running bridge. Dropping it stops the bridge.
pub struct BridgeHandle {
    stop: watch::Sender<bool>,
    state: watch::Receiver<BridgeState>,
    task: JoinHandle<()>,
}

impl BridgeHandle {
    /// Current connection state.
    pub fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn state_watcher(&self) -> watch::Receiver<BridgeState> {
        self.state.clone()
    }

    /// Stop the bridge and wait for it to release its subscriptions.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(err) = self.task.await {
            warn!(target: LOG_TARGET, error = %err, "bridge task did not finish cleanly");
        }
    }
}

enum PumpEnd {
    Stopped,
    Failed(String),
}

/// Bridge between a change feed and a consumer channel.
pub struct FeedBridge {
    feed: Arc<dyn ChangeFeed>,
    api: Arc<dyn ArenaApi>,
    reconnect_delay: Duration,
    updates: mpsc::Sender<BridgeUpdate>,
    state: watch::Sender<BridgeState>,
    stop: watch::Receiver<bool>,
}

impl FeedBridge {
    /// Start a bridge on the current runtime.
    pub fn spawn(
        feed: Arc<dyn ChangeFeed>,
        api: Arc<dyn ArenaApi>,
        reconnect_delay: Duration,
    ) -> (BridgeHandle, mpsc::Receiver<BridgeUpdate>) {
        let (updates, rx) = mpsc::channel(UPDATE_BUFFER);
        let (state, state_rx) = watch::channel(BridgeState::Disconnected);
        let (stop_tx, stop) = watch::channel(false);

        let bridge = Self {
            feed,
            api,
            reconnect_delay,
            updates,
            state,
            stop,
        };
        let task = tokio::spawn(bridge.run());

        (
            BridgeHandle {
                stop: stop_tx,
                state: state_rx,
                task,
            },
            rx,
        )
    }

    async fn run(mut self) {
        info!(target: LOG_TARGET, "starting change-feed bridge");
        let mut next_state = BridgeState::Subscribing;

        loop {
            if !self.set_state(next_state).await {
                break;
            }

            match self.subscribe_all().await {
                Ok(subscriptions) => {
                    let handles: Vec<SubscriptionHandle> =
                        subscriptions.iter().map(|sub| sub.handle).collect();
                    let end = self.pump(subscriptions).await;
                    for handle in handles {
                        self.feed.unsubscribe(handle);
                    }
                    match end {
                        PumpEnd::Stopped => break,
                        PumpEnd::Failed(reason) => {
                            warn!(target: LOG_TARGET, %reason, "change feed dropped");
                        }
                    }
                }
                Err(err) => {
                    warn!(target: LOG_TARGET, error = %err, "failed to subscribe to change feed");
                }
            }

            if self.stopped() || !self.set_state(BridgeState::Error).await {
                break;
            }

            debug!(
                target: LOG_TARGET,
                delay_ms = self.reconnect_delay.as_millis() as u64,
                "waiting before reconnect attempt"
            );
            tokio::select! {
                _ = self.stop.changed() => break,
                _ = sleep(self.reconnect_delay) => {}
            }
            next_state = BridgeState::Reconnecting;
        }

        self.state.send_replace(BridgeState::Disconnected);
        let _ = self
            .updates
            .try_send(BridgeUpdate::State(BridgeState::Disconnected));
        info!(target: LOG_TARGET, "change-feed bridge stopped");
    }

    async fn subscribe_all(&self) -> Result<Vec<Subscription>, FeedError> {
        let mut subscriptions = Vec::with_capacity(Resource::ALL.len());
        for resource in Resource::ALL {
            match self.feed.subscribe(resource, None).await {
                Ok(subscription) => subscriptions.push(subscription),
                Err(err) => {
                    for opened in &subscriptions {
                        self.feed.unsubscribe(opened.handle);
                    }
                    return Err(err);
                }
            }
        }
        Ok(subscriptions)
    }

    async fn pump(&mut self, subscriptions: Vec<Subscription>) -> PumpEnd {
        let mut merged = select_all(subscriptions.into_iter().map(|sub| sub.stream));

        if !self.set_state(BridgeState::Live).await {
            return PumpEnd::Stopped;
        }
        match self.api.snapshot().await {
            Ok(snapshot) => {
                debug!(
                    target: LOG_TARGET,
                    participants = snapshot.leaderboard.len(),
                    "full fetch after subscribing"
                );
                if !self.emit(BridgeUpdate::Snapshot(snapshot)).await {
                    return PumpEnd::Stopped;
                }
            }
            Err(err) => return PumpEnd::Failed(format!("full fetch failed: {err}")),
        }

        loop {
            tokio::select! {
                _ = self.stop.changed() => {
                    debug!(target: LOG_TARGET, "shutdown signal received");
                    return PumpEnd::Stopped;
                }
                next = merged.next() => match next {
                    Some(Ok(change)) => match translate(&change) {
                        Ok(event) => {
                            if !self.emit(BridgeUpdate::Event(event)).await {
                                return PumpEnd::Stopped;
                            }
                        }
                        Err(err) => {
                            debug!(target: LOG_TARGET, error = %err, "ignoring undecodable notification");
                        }
                    },
                    Some(Err(err)) => return PumpEnd::Failed(err.to_string()),
                    None => return PumpEnd::Failed("feed ended".into()),
                }
            }
        }
    }

    fn stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Record and announce a state; false once the consumer is gone.
    async fn set_state(&self, state: BridgeState) -> bool {
        self.state.send_replace(state);
        debug!(target: LOG_TARGET, ?state, "bridge state changed");
        self.emit(BridgeUpdate::State(state)).await
    }

    async fn emit(&self, update: BridgeUpdate) -> bool {
        self.updates.send(update).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tokio::time::timeout;

    use super::*;
    use crate::{
        client::{api::LocalArenaApi, feed::LocalChangeFeed},
        config::AppConfig,
        dao::arena_store::MemoryArenaStore,
        state::{AppState, SharedState},
    };

    const WAIT: Duration = Duration::from_secs(2);

    async fn ready_state() -> SharedState {
        let state = AppState::new(AppConfig::default());
        state
            .set_store(Arc::new(MemoryArenaStore::new()))
            .await
            .unwrap();
        state
    }

    async fn next_update(rx: &mut mpsc::Receiver<BridgeUpdate>) -> BridgeUpdate {
        timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    async fn wait_for_snapshot(rx: &mut mpsc::Receiver<BridgeUpdate>) -> SnapshotResponse {
        loop {
            if let BridgeUpdate::Snapshot(snapshot) = next_update(rx).await {
                return snapshot;
            }
        }
    }

    async fn next_event(rx: &mut mpsc::Receiver<BridgeUpdate>) -> ArenaEvent {
        loop {
            if let BridgeUpdate::Event(event) = next_update(rx).await {
                return event;
            }
        }
    }

    #[test]
    fn translates_each_resource() {
        let participant = json!({
            "id": uuid::Uuid::nil(), "display_name": "ana", "score": 3,
            "is_admin": false, "joined_at": "2025-11-22T10:00:00Z", "revision": 1
        });
        let users = ChangeNotification {
            resource: Resource::Users,
            event_kind: EventKind::Update,
            before: None,
            after: Some(participant),
            committed_at: "2025-11-22T10:00:00Z".into(),
        };
        assert!(matches!(
            translate(&users),
            Ok(ArenaEvent::LeaderboardChanged(p)) if p.score == 3
        ));

        let vote = ChangeNotification {
            resource: Resource::Votes,
            event_kind: EventKind::Delete,
            before: Some(json!({ "question_id": "backend" })),
            after: None,
            committed_at: "2025-11-22T10:00:00Z".into(),
        };
        assert_eq!(
            translate(&vote),
            Ok(ArenaEvent::VotesChanged("backend".into()))
        );

        let broken = ChangeNotification {
            resource: Resource::Users,
            after: Some(json!({ "id": 1 })),
            ..vote
        };
        assert!(matches!(translate(&broken), Err(FeedError::Decode(_))));
    }

    #[tokio::test]
    async fn fetches_snapshot_then_forwards_events() {
        let state = ready_state().await;
        let api = LocalArenaApi::new(state.clone());
        let (handle, mut rx) = FeedBridge::spawn(
            Arc::new(LocalChangeFeed::new(state.clone())),
            Arc::new(api.clone()),
            Duration::from_millis(20),
        );

        assert_eq!(
            next_update(&mut rx).await,
            BridgeUpdate::State(BridgeState::Subscribing)
        );
        assert_eq!(
            next_update(&mut rx).await,
            BridgeUpdate::State(BridgeState::Live)
        );
        let snapshot = wait_for_snapshot(&mut rx).await;
        assert!(snapshot.leaderboard.is_empty());

        let ana = api.signup("ana".into(), "1234".into()).await.unwrap();
        assert!(matches!(
            next_event(&mut rx).await,
            ArenaEvent::UsersChanged(p) if p.id == ana.id
        ));

        api.apply_delta(ana.id, 4, None).await.unwrap();
        assert!(matches!(
            next_event(&mut rx).await,
            ArenaEvent::LeaderboardChanged(p) if p.score == 4
        ));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn resubscribes_with_fresh_fetch_after_drop() {
        let state = ready_state().await;
        let feed = LocalChangeFeed::new(state.clone());
        let api = LocalArenaApi::new(state.clone());
        let (handle, mut rx) = FeedBridge::spawn(
            Arc::new(feed.clone()),
            Arc::new(api.clone()),
            Duration::from_millis(20),
        );
        wait_for_snapshot(&mut rx).await;
        assert_eq!(feed.open_subscriptions(), Resource::ALL.len());

        let ana = api.signup("ana".into(), "1234".into()).await.unwrap();
        next_event(&mut rx).await;
        feed.interrupt_all("network down");

        let mut seen = Vec::new();
        let snapshot = loop {
            match next_update(&mut rx).await {
                BridgeUpdate::State(bridge_state) => seen.push(bridge_state),
                BridgeUpdate::Snapshot(snapshot) => break snapshot,
                BridgeUpdate::Event(_) => {}
            }
        };
        assert_eq!(
            seen,
            [
                BridgeState::Error,
                BridgeState::Reconnecting,
                BridgeState::Live
            ]
        );
        assert_eq!(snapshot.leaderboard[0].participant.id, ana.id);
        assert_eq!(handle.state(), BridgeState::Live);

        handle.shutdown().await;
        assert_eq!(feed.open_subscriptions(), 0);
    }
}
