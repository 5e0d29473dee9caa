//! Client reconciliation layer.
//!
//! A client holds the last authoritative score it saw plus any optimistic deltas
//! still in flight. Authoritative values, from a resolved call or a feed event,
//! replace the optimistic layer outright; a failed call removes its delta.

use std::{collections::HashMap, sync::Arc};

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    client::{
        api::{ArenaApi, ClientError, ClientResult},
        bridge::{ArenaEvent, BridgeUpdate},
        local_state::{LocalState, LocalStateStore, ViewMode},
    },
    dto::{
        admin::{ChallengeActionResponse, PollCloseResponse},
        public::{
            ChallengeRecordSummary, LeaderboardRow, ParticipantSummary, SessionStateSummary,
            SnapshotResponse,
        },
    },
    state::leaderboard,
};

/// Identifies one optimistic delta until it is confirmed or reverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

/// Two-layer score: authoritative value plus pending optimistic deltas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoreView {
    authoritative: i64,
    revision: u64,
    pending: Vec<(Ticket, i64)>,
    next_ticket: u64,
}

impl ScoreView {
    /// Start from a confirmed score at `revision`.
    pub fn new(score: i64, revision: u64) -> Self {
        Self {
            authoritative: score,
            revision,
            ..Self::default()
        }
    }

    /// Last confirmed score.
    pub fn authoritative(&self) -> i64 {
        self.authoritative
    }

    /// Revision of the last confirmed score.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Sum of deltas sent but not yet settled.
    pub fn pending_delta(&self) -> i64 {
        self.pending.iter().map(|(_, delta)| delta).sum()
    }

    /// Value to render.
    pub fn display(&self) -> i64 {
        self.authoritative + self.pending_delta()
    }

    /// Apply `delta` optimistically.
    pub fn begin(&mut self, delta: i64) -> Ticket {
        self.next_ticket += 1;
        let ticket = Ticket(self.next_ticket);
        self.pending.push((ticket, delta));
        ticket
    }

    /// Settle `ticket` with the score the ledger returned for it.
    pub fn confirm(&mut self, ticket: Ticket, score: i64, revision: u64) {
        self.pending.retain(|(pending, _)| *pending != ticket);
        self.observe(score, revision);
    }

    /// Drop `ticket` after its call failed. Returns whether it was still displayed.
    pub fn revert(&mut self, ticket: Ticket) -> bool {
        let before = self.pending.len();
        self.pending.retain(|(pending, _)| *pending != ticket);
        self.pending.len() != before
    }

    /// Take an authoritative value. Values older than the current revision are
    /// ignored; anything else replaces the optimistic layer.
    pub fn observe(&mut self, score: i64, revision: u64) -> bool {
        if revision < self.revision {
            return false;
        }
        self.authoritative = score;
        self.revision = revision;
        self.pending.clear();
        true
    }
}

/// Human-readable message for a failed action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub message: String,
    /// The user may retry the same action.
    pub retryable: bool,
}

impl From<&ClientError> for Notice {
    fn from(err: &ClientError) -> Self {
        let message = match err {
            ClientError::Transient(reason) => format!("{reason}; please try again"),
            other => other.to_string(),
        };
        Self {
            message,
            retryable: err.is_transient(),
        }
    }
}

#[derive(Debug, Default)]
struct ClientView {
    participant: Option<ParticipantSummary>,
    score: ScoreView,
    is_admin: bool,
    view_preference: Option<ViewMode>,
    participants: HashMap<Uuid, ParticipantSummary>,
    session: SessionStateSummary,
    challenges: Vec<ChallengeRecordSummary>,
    notices: Vec<Notice>,
}

impl ClientView {
    fn seeded(local: LocalState) -> Self {
        let score = local
            .current_user
            .as_ref()
            .map(|user| ScoreView::new(user.score, user.revision))
            .unwrap_or_default();
        Self {
            is_admin: local.current_user.is_some() && local.is_admin_cached,
            participant: local.current_user,
            score,
            view_preference: local.admin_view_preference,
            ..Self::default()
        }
    }

    fn to_local(&self) -> LocalState {
        LocalState {
            current_user: self.participant.clone(),
            is_admin_cached: self.is_admin,
            admin_view_preference: self.view_preference,
        }
    }

    fn own_id(&self) -> Option<Uuid> {
        self.participant.as_ref().map(|participant| participant.id)
    }

    /// Adopt an authoritative row for the signed-in participant.
    fn adopt(&mut self, participant: ParticipantSummary) {
        self.score.observe(participant.score, participant.revision);
        if self.is_admin && !participant.is_admin {
            info!(participant_id = %participant.id, "admin capability revoked; switching to player view");
            self.demote();
        }
        self.is_admin = participant.is_admin;
        self.remember(participant.clone());
        self.participant = Some(participant);
        self.sync_own_row();
    }

    /// Keep the newest revision of a row for the leaderboard.
    fn remember(&mut self, participant: ParticipantSummary) {
        match self.participants.get(&participant.id) {
            Some(known) if known.revision > participant.revision => {}
            _ => {
                self.participants.insert(participant.id, participant);
            }
        }
    }

    /// Copy the settled score back into the cached rows.
    fn sync_own_row(&mut self) {
        let (score, revision) = (self.score.authoritative(), self.score.revision());
        if let Some(participant) = self.participant.as_mut() {
            if participant.revision <= revision {
                participant.score = score;
                participant.revision = revision;
                let row = participant.clone();
                self.remember(row);
            }
        }
    }

    fn demote(&mut self) {
        self.is_admin = false;
        self.view_preference = None;
    }

    fn apply_snapshot(&mut self, snapshot: SnapshotResponse) {
        self.session = snapshot.session;
        self.challenges = snapshot.challenges;
        self.participants = snapshot
            .leaderboard
            .into_iter()
            .map(|row| (row.participant.id, row.participant))
            .collect();
        if let Some(own) = self.own_id().and_then(|id| self.participants.get(&id).cloned()) {
            self.adopt(own);
        }
    }
}

/// One signed-in client: identity, score reconciliation, leaderboard and view mode.
pub struct ClientSession {
    api: Arc<dyn ArenaApi>,
    local: Arc<dyn LocalStateStore>,
    view: Mutex<ClientView>,
}

impl ClientSession {
    /// Seed a session from local state; nothing here is authoritative until
    /// [`ClientSession::refresh_identity`] or the first snapshot lands.
    pub fn restore(api: Arc<dyn ArenaApi>, local: Arc<dyn LocalStateStore>) -> Self {
        let seed = local.load().unwrap_or_else(|err| {
            warn!(error = %err, "ignoring unreadable local state");
            LocalState::default()
        });
        Self {
            api,
            local,
            view: Mutex::new(ClientView::seeded(seed)),
        }
    }

    /// Create an account and adopt it as the current user.
    pub async fn signup(
        &self,
        display_name: &str,
        access_code: &str,
    ) -> ClientResult<ParticipantSummary> {
        let result = self
            .api
            .signup(display_name.to_owned(), access_code.to_owned())
            .await;
        self.sign_in(result).await
    }

    /// Sign in and adopt the account as the current user.
    pub async fn login(
        &self,
        display_name: &str,
        access_code: &str,
    ) -> ClientResult<ParticipantSummary> {
        let result = self
            .api
            .login(display_name.to_owned(), access_code.to_owned())
            .await;
        self.sign_in(result).await
    }

    async fn sign_in(
        &self,
        result: ClientResult<ParticipantSummary>,
    ) -> ClientResult<ParticipantSummary> {
        let mut view = self.view.lock().await;
        match result {
            Ok(participant) => {
                view.score = ScoreView::new(participant.score, participant.revision);
                view.is_admin = participant.is_admin;
                view.participant = None;
                view.adopt(participant.clone());
                self.persist(&view);
                Ok(participant)
            }
            Err(err) => Err(Self::fail(&mut view, err)),
        }
    }

    /// Forget the signed-in participant locally.
    pub async fn logout(&self) {
        let mut view = self.view.lock().await;
        *view = ClientView::default();
        self.persist(&view);
    }

    /// Re-read the signed-in participant, which also re-checks the admin flag.
    pub async fn refresh_identity(&self) -> ClientResult<()> {
        let Some(id) = self.view.lock().await.own_id() else {
            return Ok(());
        };
        let result = self.api.participant(id).await;
        let mut view = self.view.lock().await;
        match result {
            Ok(participant) => {
                view.adopt(participant);
                self.persist(&view);
                Ok(())
            }
            Err(err @ ClientError::NotFound(_)) => {
                *view = ClientView::default();
                self.persist(&view);
                Err(Self::fail(&mut view, err))
            }
            Err(err) => Err(Self::fail(&mut view, err)),
        }
    }

    /// Award points for the signed-in participant. The display moves at once and
    /// settles on the ledger's answer; on failure the delta is taken back.
    pub async fn award(&self, delta: i64, challenge_id: Option<&str>) -> ClientResult<i64> {
        let (participant_id, ticket) = {
            let mut view = self.view.lock().await;
            let Some(id) = view.own_id() else {
                let err = ClientError::Validation("sign in before playing".into());
                return Err(Self::fail(&mut view, err));
            };
            if delta == 0 {
                return Ok(view.score.display());
            }
            (id, view.score.begin(delta))
        };

        let result = self
            .api
            .apply_delta(participant_id, delta, challenge_id.map(str::to_owned))
            .await;

        let mut view = self.view.lock().await;
        match result {
            Ok(response) => {
                view.score.confirm(ticket, response.score, response.revision);
                view.sync_own_row();
                self.persist(&view);
                Ok(view.score.display())
            }
            Err(err) => {
                view.score.revert(ticket);
                warn!(%participant_id, delta, error = %err, "score delta rejected; optimistic award reverted");
                Err(Self::fail(&mut view, err))
            }
        }
    }

    /// Fold one bridge update into the view.
    pub async fn apply_update(&self, update: BridgeUpdate) {
        match update {
            BridgeUpdate::State(_) => {}
            BridgeUpdate::Snapshot(snapshot) => {
                let mut view = self.view.lock().await;
                view.apply_snapshot(snapshot);
                self.persist(&view);
            }
            BridgeUpdate::Event(ArenaEvent::SessionStateChanged) => {
                // Re-read the whole snapshot; the event carries no payload.
                match self.api.snapshot().await {
                    Ok(snapshot) => self.view.lock().await.apply_snapshot(snapshot),
                    Err(err) => warn!(error = %err, "session refresh after change failed"),
                }
            }
            BridgeUpdate::Event(
                ArenaEvent::LeaderboardChanged(participant) | ArenaEvent::UsersChanged(participant),
            ) => {
                let mut view = self.view.lock().await;
                if view.own_id() == Some(participant.id) {
                    view.adopt(participant);
                    self.persist(&view);
                } else {
                    view.remember(participant);
                }
            }
            BridgeUpdate::Event(ArenaEvent::VotesChanged(_)) => {}
        }
    }

    /// Signed-in participant, if any.
    pub async fn current_user(&self) -> Option<ParticipantSummary> {
        self.view.lock().await.participant.clone()
    }

    /// Whether the current user holds the admin capability.
    pub async fn is_admin(&self) -> bool {
        self.view.lock().await.is_admin
    }

    /// Score to render, pending deltas included.
    pub async fn display_score(&self) -> i64 {
        self.view.lock().await.score.display()
    }

    /// Last score confirmed by the server.
    pub async fn authoritative_score(&self) -> i64 {
        self.view.lock().await.score.authoritative()
    }

    /// Session pointer and challenge records from the last snapshot.
    pub async fn session(&self) -> (SessionStateSummary, Vec<ChallengeRecordSummary>) {
        let view = self.view.lock().await;
        (view.session.clone(), view.challenges.clone())
    }

    /// Leaderboard recomputed from the newest known rows.
    pub async fn leaderboard(&self, limit: Option<usize>) -> Vec<LeaderboardRow> {
        let participants: Vec<ParticipantSummary> =
            self.view.lock().await.participants.values().cloned().collect();
        leaderboard::project(&participants)
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(LeaderboardRow::from)
            .collect()
    }

    /// View to render for the current user.
    pub async fn view_mode(&self) -> ViewMode {
        let view = self.view.lock().await;
        ViewMode::resolve(view.is_admin, view.view_preference)
    }

    /// Switch the admin dashboard; players always stay in player view.
    pub async fn set_view_mode(&self, mode: ViewMode) -> ViewMode {
        let mut view = self.view.lock().await;
        if view.is_admin {
            view.view_preference = Some(mode);
            self.persist(&view);
        }
        ViewMode::resolve(view.is_admin, view.view_preference)
    }

    /// Drain notices raised since the last call.
    pub async fn take_notices(&self) -> Vec<Notice> {
        std::mem::take(&mut self.view.lock().await.notices)
    }

    /// Start a challenge (admin only).
    pub async fn start_challenge(&self, challenge_id: &str) -> ClientResult<ChallengeActionResponse> {
        let challenge_id = challenge_id.to_owned();
        self.admin_action(move |api, actor| api.start_challenge(actor, challenge_id))
            .await
    }

    /// End a challenge (admin only).
    pub async fn end_challenge(&self, challenge_id: &str) -> ClientResult<ChallengeActionResponse> {
        let challenge_id = challenge_id.to_owned();
        self.admin_action(move |api, actor| api.end_challenge(actor, challenge_id))
            .await
    }

    /// End every running challenge (admin only).
    pub async fn end_all_challenges(&self) -> ClientResult<ChallengeActionResponse> {
        self.admin_action(|api, actor| api.end_all_challenges(actor))
            .await
    }

    /// Close a poll question and hand out awards (admin only).
    pub async fn close_question(&self, question_id: &str) -> ClientResult<PollCloseResponse> {
        let question_id = question_id.to_owned();
        self.admin_action(move |api, actor| api.close_question(actor, question_id))
            .await
    }

    async fn admin_action<T, F>(&self, action: F) -> ClientResult<T>
    where
        F: FnOnce(&dyn ArenaApi, Uuid) -> BoxFuture<'static, ClientResult<T>>,
    {
        let actor = {
            let mut view = self.view.lock().await;
            match view.own_id() {
                Some(id) if view.is_admin => id,
                _ => {
                    let err = ClientError::Authorization("admin capability required".into());
                    return Err(Self::fail(&mut view, err));
                }
            }
        };

        match action(self.api.as_ref(), actor).await {
            Ok(value) => Ok(value),
            Err(err) => {
                let mut view = self.view.lock().await;
                if matches!(err, ClientError::Authorization(_)) {
                    info!(%actor, "server refused admin action; dropping cached admin flag");
                    view.demote();
                    self.persist(&view);
                }
                Err(Self::fail(&mut view, err))
            }
        }
    }

    fn fail(view: &mut ClientView, err: ClientError) -> ClientError {
        view.notices.push(Notice::from(&err));
        err
    }

    fn persist(&self, view: &ClientView) {
        if let Err(err) = self.local.save(&view.to_local()) {
            warn!(error = %err, "failed to persist local client state");
        }
    }
}
