use tokio::sync::broadcast;

use crate::dto::feed::ChangeNotification;

/// Broadcast hub every committed row change is published to.
pub struct FeedHub {
    sender: broadcast::Sender<ChangeNotification>,
}

impl FeedHub {
    /// Construct a hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Register a subscriber that receives every subsequent change.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotification> {
        self.sender.subscribe()
    }

    /// Send a change to all current subscribers; having none is not an error.
    pub fn publish(&self, change: ChangeNotification) {
        let _ = self.sender.send(change);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
