//! Timed challenge rounds.
//!
//! A round accumulates points locally and sends a single delta when its timer
//! runs out or the player finishes early. Cancelling or dropping the handle
//! before that sends nothing.

use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, task::JoinHandle, time::sleep};
use tracing::{debug, info};

use crate::{
    client::{api::ClientError, reconcile::ClientSession},
    state::catalog::ChallengeDefinition,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundControl {
    Running,
    Finish,
    Cancel,
}

/// How a round ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundOutcome {
    /// The delta was accepted; `display_score` is the reconciled total.
    Submitted { points: i64, display_score: i64 },
    /// The round ended with zero points, so nothing was sent.
    NothingToSubmit,
    /// Cancelled before the timer fired.
    Cancelled,
    /// The delta was rejected and rolled back.
    Failed(ClientError),
}

/// Player-side handle of a running round. Dropping it cancels the round.
pub struct RoundHandle {
    points: watch::Sender<i64>,
    control: watch::Sender<RoundControl>,
}

impl RoundHandle {
    /// Add points earned during the round.
    pub fn add_points(&self, points: i64) {
        self.points.send_modify(|total| *total += points);
    }

    /// Points accumulated so far.
    pub fn points(&self) -> i64 {
        *self.points.borrow()
    }

    /// End the round now and submit what was earned.
    pub fn finish(&self) {
        self.control.send_replace(RoundControl::Finish);
    }

    /// Abandon the round without submitting.
    pub fn cancel(&self) {
        self.control.send_replace(RoundControl::Cancel);
    }
}

/// Start a round lasting the challenge's suggested duration.
pub fn start_round(
    session: Arc<ClientSession>,
    challenge: &ChallengeDefinition,
) -> (RoundHandle, JoinHandle<RoundOutcome>) {
    start_timed_round(
        session,
        challenge.id.clone(),
        Duration::from_secs(u64::from(challenge.duration_secs)),
    )
}

/// Start a round with an explicit duration.
pub fn start_timed_round(
    session: Arc<ClientSession>,
    challenge_id: String,
    duration: Duration,
) -> (RoundHandle, JoinHandle<RoundOutcome>) {
    let (points, points_rx) = watch::channel(0);
    let (control, control_rx) = watch::channel(RoundControl::Running);
    let task = tokio::spawn(run_round(
        session,
        challenge_id,
        duration,
        points_rx,
        control_rx,
    ));
    (RoundHandle { points, control }, task)
}

async fn run_round(
    session: Arc<ClientSession>,
    challenge_id: String,
    duration: Duration,
    points: watch::Receiver<i64>,
    mut control: watch::Receiver<RoundControl>,
) -> RoundOutcome {
    let deadline = sleep(duration);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            changed = control.changed() => {
                if changed.is_err() {
                    debug!(%challenge_id, "round handle dropped; nothing submitted");
                    return RoundOutcome::Cancelled;
                }
                match *control.borrow_and_update() {
                    RoundControl::Running => {}
                    RoundControl::Finish => break,
                    RoundControl::Cancel => {
                        debug!(%challenge_id, "round cancelled; nothing submitted");
                        return RoundOutcome::Cancelled;
                    }
                }
            }
        }
    }

    let earned = *points.borrow();
    if earned == 0 {
        return RoundOutcome::NothingToSubmit;
    }
    match session.award(earned, Some(&challenge_id)).await {
        Ok(display_score) => {
            info!(%challenge_id, points = earned, "round submitted");
            RoundOutcome::Submitted {
                points: earned,
                display_score,
            }
        }
        Err(err) => RoundOutcome::Failed(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        client::{api::LocalArenaApi, local_state::MemoryStateStore},
        config::AppConfig,
        dao::arena_store::MemoryArenaStore,
        state::{AppState, SharedState, scoring},
    };

    const SHORT: Duration = Duration::from_millis(30);

    async fn signed_in() -> (SharedState, Arc<ClientSession>) {
        let state = AppState::new(AppConfig::default());
        state
            .set_store(Arc::new(MemoryArenaStore::new()))
            .await
            .unwrap();
        let session = Arc::new(ClientSession::restore(
            Arc::new(LocalArenaApi::new(state.clone())),
            Arc::new(MemoryStateStore::default()),
        ));
        session.signup("ana", "1234").await.unwrap();
        (state, session)
    }

    #[tokio::test]
    async fn expiry_submits_one_delta() {
        let (_state, session) = signed_in().await;
        let (round, task) = start_timed_round(session.clone(), "shake".into(), SHORT);
        round.add_points(scoring::shake_points(4));
        round.add_points(scoring::shake_points(3));

        let outcome = task.await.unwrap();
        assert_eq!(
            outcome,
            RoundOutcome::Submitted {
                points: 7,
                display_score: 7
            }
        );
        assert_eq!(session.current_user().await.unwrap().revision, 1);
    }

    #[tokio::test]
    async fn finish_submits_before_timer() {
        let (_state, session) = signed_in().await;
        let (round, task) =
            start_timed_round(session.clone(), "emoji".into(), Duration::from_secs(60));
        round.add_points(scoring::emoji_points(Duration::from_millis(300)));
        round.finish();

        assert!(matches!(
            task.await.unwrap(),
            RoundOutcome::Submitted { points: 15, .. }
        ));
    }

    #[tokio::test]
    async fn cancelled_or_dropped_rounds_send_nothing() {
        let (_state, session) = signed_in().await;

        let (round, task) = start_timed_round(session.clone(), "shake".into(), SHORT);
        round.add_points(5);
        round.cancel();
        assert_eq!(task.await.unwrap(), RoundOutcome::Cancelled);

        let (round, task) = start_timed_round(session.clone(), "shake".into(), SHORT);
        round.add_points(5);
        drop(round);
        assert_eq!(task.await.unwrap(), RoundOutcome::Cancelled);

        assert_eq!(session.authoritative_score().await, 0);
        assert_eq!(session.current_user().await.unwrap().revision, 0);
    }

    #[tokio::test]
    async fn zero_point_round_sends_nothing() {
        let (_state, session) = signed_in().await;
        let (round, task) = start_timed_round(session.clone(), "lucky-tap".into(), SHORT);
        round.add_points(scoring::lucky_tap_points(1, 2));
        assert_eq!(task.await.unwrap(), RoundOutcome::NothingToSubmit);
        drop(round);
    }

    #[tokio::test]
    async fn rejected_round_reports_failure() {
        let (state, session) = signed_in().await;
        let (round, task) = start_timed_round(session.clone(), "shake".into(), SHORT);
        round.add_points(3);
        state.clear_store().await;

        assert!(matches!(
            task.await.unwrap(),
            RoundOutcome::Failed(ClientError::Transient(_))
        ));
        assert_eq!(session.display_score().await, 0);
        drop(round);
    }
}
