//! Client-side sync core: API access, change-feed bridge and score reconciliation.

/// Arena calls and the client error taxonomy.
pub mod api;
/// Change-feed bridge state machine.
pub mod bridge;
/// Change-feed transport.
pub mod feed;
/// Persisted client state.
pub mod local_state;
/// Optimistic score reconciliation and the signed-in session.
pub mod reconcile;
/// HTTP and SSE implementations of the client traits.
#[cfg(feature = "remote-client")]
pub mod remote;
/// Cancel-safe timed rounds.
pub mod round;

pub use api::{ArenaApi, ClientError, ClientResult, LocalArenaApi};
pub use bridge::{ArenaEvent, BridgeHandle, BridgeState, BridgeUpdate, FeedBridge};
pub use feed::{ChangeFeed, FeedError, LocalChangeFeed, Subscription};
pub use local_state::{JsonFileStateStore, LocalState, LocalStateStore, MemoryStateStore, ViewMode};
pub use reconcile::{ClientSession, Notice, ScoreView};
#[cfg(feature = "remote-client")]
pub use remote::{RemoteArenaApi, SseChangeFeed};
pub use round::{RoundHandle, RoundOutcome, start_round, start_timed_round};
