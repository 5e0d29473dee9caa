use std::time::SystemTime;

use serde::Serialize;
use tracing::warn;

use crate::{
    dao::models::{ParticipantEntity, VoteEntity},
    dto::{
        feed::{ChangeNotification, EventKind, Resource, VoteRow},
        format_system_time,
        public::{ChallengeRecordSummary, ParticipantSummary, SessionStateSummary},
    },
    state::{
        SharedState,
        session::{ChallengeRecord, SessionState},
    },
};

/// Publish a participant row change (sign-up or score update).
pub fn publish_participant(
    state: &SharedState,
    before: Option<&ParticipantEntity>,
    after: &ParticipantEntity,
) {
    let before = before.cloned().map(ParticipantSummary::from);
    let after = ParticipantSummary::from(after.clone());
    publish_row(
        state,
        Resource::Users,
        before.as_ref(),
        Some(&after),
        SystemTime::now(),
    );
}

/// Publish a challenge record change produced by a session transition.
pub fn publish_challenge_record(
    state: &SharedState,
    before: Option<&ChallengeRecord>,
    after: &ChallengeRecord,
    committed_at: SystemTime,
) {
    let before = before.map(ChallengeRecordSummary::from);
    let after = ChallengeRecordSummary::from(after);
    publish_row(
        state,
        Resource::ActiveChallenges,
        before.as_ref(),
        Some(&after),
        committed_at,
    );
}

/// Publish the session singleton after a transition.
pub fn publish_session_state(
    state: &SharedState,
    before: &SessionState,
    after: &SessionState,
    committed_at: SystemTime,
) {
    let before = SessionStateSummary::from(before);
    let after = SessionStateSummary::from(after);
    publish_row(
        state,
        Resource::GameState,
        Some(&before),
        Some(&after),
        committed_at,
    );
}

/// Publish a vote insert or replacement.
pub fn publish_vote(state: &SharedState, before: Option<VoteEntity>, after: VoteEntity) {
    let before = before.map(VoteRow::from);
    let after = VoteRow::from(after);
    publish_row(
        state,
        Resource::Votes,
        before.as_ref(),
        Some(&after),
        SystemTime::now(),
    );
}

/// Publish the deletion of every vote removed by a poll reset.
pub fn publish_votes_deleted(state: &SharedState, removed: Vec<VoteEntity>) {
    let committed_at = SystemTime::now();
    for vote in removed {
        let before = VoteRow::from(vote);
        publish_row::<VoteRow>(state, Resource::Votes, Some(&before), None, committed_at);
    }
}

fn publish_row<T: Serialize>(
    state: &SharedState,
    resource: Resource,
    before: Option<&T>,
    after: Option<&T>,
    committed_at: SystemTime,
) {
    let event_kind = match (before.is_some(), after.is_some()) {
        (false, _) => EventKind::Insert,
        (true, true) => EventKind::Update,
        (true, false) => EventKind::Delete,
    };

    let before = match before.map(serde_json::to_value).transpose() {
        Ok(value) => value,
        Err(err) => {
            warn!(%resource, error = %err, "failed to serialize feed row");
            return;
        }
    };
    let after = match after.map(serde_json::to_value).transpose() {
        Ok(value) => value,
        Err(err) => {
            warn!(%resource, error = %err, "failed to serialize feed row");
            return;
        }
    };

    state.feed().publish(ChangeNotification {
        resource,
        event_kind,
        before,
        after,
        committed_at: format_system_time(committed_at),
    });
}
