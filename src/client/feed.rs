//! Change-feed transport consumed by the bridge.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;
use futures::{future::BoxFuture, stream::BoxStream};
use thiserror::Error;
use tokio::sync::{broadcast::error::RecvError, oneshot};
use tracing::debug;

use crate::{
    dto::feed::{ChangeNotification, FeedFilter, Resource},
    services::sse_service,
    state::SharedState,
};

/// Failures of a change-feed subscription.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// The subscription could not be established.
    #[error("feed connect failed: {0}")]
    Connect(String),
    /// The transport dropped mid-stream.
    #[error("feed transport dropped: {0}")]
    Transport(String),
    /// The subscriber fell behind and missed notifications.
    #[error("feed subscriber lagged by {0} notifications")]
    Lagged(u64),
    /// A notification could not be decoded.
    #[error("feed payload undecodable: {0}")]
    Decode(String),
}

/// Opaque identifier of one subscription.
pub type SubscriptionHandle = u64;

/// A live subscription: its handle and the notifications it yields.
///
/// The stream ends without an error after [`ChangeFeed::unsubscribe`].
pub struct Subscription {
    /// Handle to pass to [`ChangeFeed::unsubscribe`].
    pub handle: SubscriptionHandle,
    /// Matching notifications in commit order.
    pub stream: BoxStream<'static, Result<ChangeNotification, FeedError>>,
}

/// Publish/subscribe source of committed row changes.
pub trait ChangeFeed: Send + Sync {
    fn subscribe(
        &self,
        resource: Resource,
        filter: Option<FeedFilter>,
    ) -> BoxFuture<'static, Result<Subscription, FeedError>>;
    fn unsubscribe(&self, handle: SubscriptionHandle);
}

/// Feed reading straight from the in-process hub.
#[derive(Clone)]
pub struct LocalChangeFeed {
    state: SharedState,
    open: Arc<DashMap<SubscriptionHandle, oneshot::Sender<FeedError>>>,
    next_handle: Arc<AtomicU64>,
}

impl LocalChangeFeed {
    /// Feed over the hub owned by `state`.
    pub fn new(state: SharedState) -> Self {
        Self {
            state,
            open: Arc::new(DashMap::new()),
            next_handle: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Number of subscriptions not yet closed.
    pub fn open_subscriptions(&self) -> usize {
        self.open.len()
    }

    /// Fail every open subscription as if the transport had dropped.
    pub fn interrupt_all(&self, reason: &str) {
        let handles: Vec<_> = self.open.iter().map(|entry| *entry.key()).collect();
        for handle in handles {
            if let Some((_, cancel)) = self.open.remove(&handle) {
                let _ = cancel.send(FeedError::Transport(reason.to_owned()));
            }
        }
    }
}

impl ChangeFeed for LocalChangeFeed {
    fn subscribe(
        &self,
        resource: Resource,
        filter: Option<FeedFilter>,
    ) -> BoxFuture<'static, Result<Subscription, FeedError>> {
        let feed = self.clone();
        Box::pin(async move {
            let mut receiver = sse_service::subscribe(&feed.state);
            let handle = feed.next_handle.fetch_add(1, Ordering::Relaxed);
            let (cancel_tx, mut cancel_rx) = oneshot::channel();
            feed.open.insert(handle, cancel_tx);
            let open = feed.open.clone();

            let stream = async_stream::stream! {
                loop {
                    let next = tokio::select! {
                        cancelled = &mut cancel_rx => cancelled.ok().map(Err),
                        received = receiver.recv() => match received {
                            Ok(change) => {
                                if !sse_service::accepts(resource, filter.as_ref(), &change) {
                                    continue;
                                }
                                Some(Ok(change))
                            }
                            Err(RecvError::Lagged(skipped)) => Some(Err(FeedError::Lagged(skipped))),
                            Err(RecvError::Closed) => {
                                Some(Err(FeedError::Transport("hub closed".into())))
                            }
                        }
                    };
                    match next {
                        Some(Ok(change)) => yield Ok(change),
                        Some(Err(err)) => {
                            yield Err(err);
                            break;
                        }
                        None => break,
                    }
                }
                open.remove(&handle);
                debug!(handle, %resource, "local feed subscription closed");
            };

            Ok(Subscription {
                handle,
                stream: Box::pin(stream),
            })
        })
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        // Dropping the sender ends the stream quietly.
        self.open.remove(&handle);
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use futures::StreamExt;
    use uuid::Uuid;

    use super::*;
    use crate::{
        config::AppConfig, dao::models::VoteEntity, services::feed_events, state::AppState,
    };

    fn vote(question_id: &str) -> VoteEntity {
        VoteEntity {
            user_id: Uuid::new_v4(),
            question_id: question_id.into(),
            option_index: 0,
        }
    }

    #[tokio::test]
    async fn delivers_only_matching_rows() {
        let state = AppState::new(AppConfig::default());
        let feed = LocalChangeFeed::new(state.clone());
        let mut sub = feed
            .subscribe(
                Resource::Votes,
                Some(FeedFilter::eq("question_id", "platform")),
            )
            .await
            .unwrap();

        feed_events::publish_vote(&state, None, vote("backend"));
        feed_events::publish_session_state(
            &state,
            &Default::default(),
            &Default::default(),
            SystemTime::now(),
        );
        feed_events::publish_vote(&state, None, vote("platform"));

        let change = sub.stream.next().await.unwrap().unwrap();
        assert_eq!(change.row().unwrap()["question_id"], "platform");
    }

    #[tokio::test]
    async fn unsubscribe_ends_stream_quietly() {
        let state = AppState::new(AppConfig::default());
        let feed = LocalChangeFeed::new(state);
        let mut sub = feed.subscribe(Resource::Users, None).await.unwrap();
        assert_eq!(feed.open_subscriptions(), 1);

        feed.unsubscribe(sub.handle);
        assert!(sub.stream.next().await.is_none());
        assert_eq!(feed.open_subscriptions(), 0);
    }

    #[tokio::test]
    async fn interrupt_surfaces_transport_error() {
        let state = AppState::new(AppConfig::default());
        let feed = LocalChangeFeed::new(state);
        let mut sub = feed.subscribe(Resource::GameState, None).await.unwrap();

        feed.interrupt_all("test");
        assert!(matches!(
            sub.stream.next().await,
            Some(Err(FeedError::Transport(_)))
        ));
        assert!(sub.stream.next().await.is_none());
    }
}
