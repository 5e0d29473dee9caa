use std::{sync::Arc, time::Duration};

use arena_back::{
    client::{
        ArenaApi, BridgeState, BridgeUpdate, ClientSession, FeedBridge, LocalArenaApi,
        LocalChangeFeed, MemoryStateStore, ViewMode,
    },
    config::AppConfig,
    dao::arena_store::MemoryArenaStore,
    state::{AppState, SharedState},
};
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(3);

async fn ready_state() -> SharedState {
    let state = AppState::new(AppConfig::default());
    state
        .set_store(Arc::new(MemoryArenaStore::new()))
        .await
        .unwrap();
    state
}

fn client(api: &LocalArenaApi) -> Arc<ClientSession> {
    Arc::new(ClientSession::restore(
        Arc::new(api.clone()),
        Arc::new(MemoryStateStore::default()),
    ))
}

async fn wait_for_score(session: &ClientSession, expected: i64) {
    timeout(WAIT, async {
        while session.display_score().await != expected {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn poll_round_reaches_every_client() {
    let state = ready_state().await;
    let api = LocalArenaApi::new(state.clone());

    let host = client(&api);
    host.signup("admin", "0000").await.unwrap();
    assert_eq!(host.view_mode().await, ViewMode::Admin);

    let ana = client(&api);
    let bob = client(&api);
    let cara = client(&api);
    let ana_id = ana.signup("ana", "1111").await.unwrap().id;
    let bob_id = bob.signup("bob", "2222").await.unwrap().id;
    let cara_id = cara.signup("cara", "3333").await.unwrap().id;

    let (bridge, mut updates) = FeedBridge::spawn(
        Arc::new(LocalChangeFeed::new(state.clone())),
        Arc::new(api.clone()),
        Duration::from_millis(20),
    );
    let follower = ana.clone();
    let pump = tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            follower.apply_update(update).await;
        }
    });
    let mut bridge_state = bridge.state_watcher();
    timeout(WAIT, bridge_state.wait_for(|s| *s == BridgeState::Live))
        .await
        .unwrap()
        .unwrap();

    host.start_challenge("poll").await.unwrap();
    api.vote(ana_id, "platform".into(), 0).await.unwrap();
    api.vote(bob_id, "platform".into(), 1).await.unwrap();
    api.vote(bob_id, "platform".into(), 0).await.unwrap();
    api.vote(cara_id, "platform".into(), 1).await.unwrap();

    let tally = api.tally("platform".into()).await.unwrap();
    assert_eq!(tally.counts, vec![2, 1]);

    let closed = host.close_question("platform").await.unwrap();
    assert_eq!(closed.winning_options, vec![0]);
    assert!(closed.failed_awards.is_empty());

    wait_for_score(&ana, 5).await;
    let board = timeout(WAIT, async {
        loop {
            let board = ana.leaderboard(None).await;
            if board.iter().map(|row| row.participant.score).sum::<i64>() == 11 {
                break board;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    let mut leaders: Vec<_> = board[..2].iter().map(|row| row.participant.id).collect();
    leaders.sort();
    let mut expected = vec![ana_id, bob_id];
    expected.sort();
    assert_eq!(leaders, expected);
    assert!(board[..2].iter().all(|row| row.participant.score == 5));
    assert_eq!(board[2].participant.id, cara_id);
    assert_eq!(board[2].participant.score, 1);

    host.end_all_challenges().await.unwrap();
    let snapshot = api.snapshot().await.unwrap();
    assert!(!snapshot.session.is_active);
    assert!(snapshot.challenges.iter().all(|record| !record.is_active));

    bridge.shutdown().await;
    pump.await.unwrap();
}

#[tokio::test]
async fn concurrent_round_submissions_commute() {
    let state = ready_state().await;
    let api = LocalArenaApi::new(state.clone());
    let player = client(&api);
    player.signup("dana", "4444").await.unwrap();

    let (emoji, shake) = tokio::join!(
        player.award(1, Some("emoji")),
        player.award(10, Some("shake"))
    );
    emoji.unwrap();
    shake.unwrap();

    let id = player.current_user().await.unwrap().id;
    let stored = api.participant(id).await.unwrap();
    assert_eq!(stored.score, 11);
    assert_eq!(player.display_score().await, 11);
}

#[tokio::test]
async fn bridge_updates_carry_a_fresh_snapshot_first() {
    let state = ready_state().await;
    let api = LocalArenaApi::new(state.clone());
    api.signup("erin".into(), "5555".into()).await.unwrap();

    let (bridge, mut updates) = FeedBridge::spawn(
        Arc::new(LocalChangeFeed::new(state.clone())),
        Arc::new(api.clone()),
        Duration::from_millis(20),
    );
    let snapshot = loop {
        match timeout(WAIT, updates.recv()).await.unwrap().unwrap() {
            BridgeUpdate::Snapshot(snapshot) => break snapshot,
            BridgeUpdate::Event(event) => panic!("event {event:?} before snapshot"),
            BridgeUpdate::State(_) => {}
        }
    };
    assert_eq!(snapshot.leaderboard.len(), 1);
    bridge.shutdown().await;
}
