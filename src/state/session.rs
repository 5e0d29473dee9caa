use std::{
    collections::HashSet,
    time::{Instant, SystemTime},
};

use indexmap::IndexMap;
use thiserror::Error;
use uuid::Uuid;

use crate::dao::models::{ActiveChallengeEntity, SessionStateEntity};
use crate::state::catalog::ChallengeId;

/// Singleton session pointer observed by every client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Challenge the session points at; set whenever `is_active` is.
    pub active_challenge_id: Option<ChallengeId>,
    /// Whether at least one challenge is running.
    pub is_active: bool,
    /// Start of the pointed challenge.
    pub start_time: Option<SystemTime>,
    /// Time the last running challenge ended.
    pub end_time: Option<SystemTime>,
}

/// Live or ended state of one challenge instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRecord {
    /// Catalog identifier.
    pub challenge_id: ChallengeId,
    /// Whether the challenge is running.
    pub is_active: bool,
    /// Last (re)start time.
    pub start_time: SystemTime,
    /// End time, cleared on restart.
    pub end_time: Option<SystemTime>,
}

/// Session pointer plus every challenge record, as one consistent view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionView {
    /// Singleton pointer.
    pub session: SessionState,
    /// Records keyed by challenge id, in first-start order.
    pub records: IndexMap<ChallengeId, ChallengeRecord>,
}

impl SessionView {
    /// Records currently running.
    pub fn active_records(&self) -> impl Iterator<Item = &ChallengeRecord> {
        self.records.values().filter(|record| record.is_active)
    }

    fn repoint(&mut self, at: SystemTime) {
        let latest = self
            .active_records()
            .max_by_key(|record| record.start_time)
            .cloned();
        self.session = match latest {
            Some(record) => SessionState {
                active_challenge_id: Some(record.challenge_id),
                is_active: true,
                start_time: Some(record.start_time),
                end_time: None,
            },
            None => SessionState {
                active_challenge_id: None,
                is_active: false,
                start_time: None,
                end_time: Some(at),
            },
        };
    }
}

/// Admin-issued transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Start or restart a challenge.
    Start {
        /// Target challenge.
        challenge_id: ChallengeId,
        /// Start timestamp.
        at: SystemTime,
    },
    /// End a challenge if it is running.
    End {
        /// Target challenge.
        challenge_id: ChallengeId,
        /// End timestamp.
        at: SystemTime,
    },
    /// End every running challenge in one batch.
    EndAll {
        /// End timestamp.
        at: SystemTime,
    },
}

/// Error returned when an event names a challenge outside the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown challenge `{challenge_id}`")]
pub struct UnknownChallenge {
    /// The rejected identifier.
    pub challenge_id: ChallengeId,
}

/// Errors that can occur when planning a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// A transition is already pending and must be applied or aborted.
    AlreadyPending,
    /// The event references a challenge the catalog does not define.
    UnknownChallenge(UnknownChallenge),
}

/// Errors that can occur when applying a planned transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
    /// Session view changed since the plan was created.
    ViewMismatch,
    /// Version changed since the plan was created.
    VersionMismatch {
        /// Version when plan was created.
        expected: usize,
        /// Current version.
        actual: usize,
    },
}

/// Errors that can occur when aborting a planned transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortError {
    /// No transition is currently pending.
    NoPending,
    /// Plan ID does not match the pending plan.
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// Unique identifier for a planned transition.
pub type PlanId = Uuid;

/// A validated transition waiting to be persisted and applied.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// View before the transition.
    pub from: SessionView,
    /// View after the transition.
    pub to: SessionView,
    /// Records whose state changes, in their new form.
    pub touched: Vec<ChallengeRecord>,
    /// Event that triggered this transition.
    pub event: SessionEvent,
    /// Version number after applying this transition.
    pub version_next: usize,
    /// Timestamp when this plan was created.
    pub pending_since: Instant,
}

impl Plan {
    /// Whether applying this plan changes nothing.
    pub fn is_noop(&self) -> bool {
        self.touched.is_empty() && self.from.session == self.to.session
    }

    /// Previous form of a touched record, `None` when it is new.
    pub fn previous(&self, challenge_id: &str) -> Option<&ChallengeRecord> {
        self.from.records.get(challenge_id)
    }
}

/// Snapshot of the current machine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Current view.
    pub view: SessionView,
    /// Incremented by every applied transition.
    pub version: usize,
    /// Event of the pending plan, if any.
    pub pending: Option<SessionEvent>,
}

/// Plan/apply/abort machine owning the authoritative session view of this process.
#[derive(Debug, Clone, Default)]
pub struct SessionStateMachine {
    known: HashSet<ChallengeId>,
    view: SessionView,
    version: usize,
    pending: Option<Plan>,
}

impl SessionStateMachine {
    /// Create an idle machine accepting the given challenge ids.
    pub fn new<I>(known: I) -> Self
    where
        I: IntoIterator<Item = ChallengeId>,
    {
        Self {
            known: known.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Current view.
    pub fn view(&self) -> &SessionView {
        &self.view
    }

    /// Create a snapshot of the current state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            view: self.view.clone(),
            version: self.version,
            pending: self.pending.as_ref().map(|plan| plan.event.clone()),
        }
    }

    /// Replace the view with what the store holds, dropping any pending plan.
    pub fn hydrate(
        &mut self,
        session: Option<SessionStateEntity>,
        records: Vec<ActiveChallengeEntity>,
    ) {
        let records = records
            .into_iter()
            .map(ChallengeRecord::from)
            .map(|record| (record.challenge_id.clone(), record))
            .collect();
        self.view = SessionView {
            session: session.map(SessionState::from).unwrap_or_default(),
            records,
        };
        self.version += 1;
        self.pending = None;
    }

    /// Validate `event` against the current view and reserve it as the pending plan.
    pub fn plan(&mut self, event: SessionEvent) -> Result<Plan, PlanError> {
        if self.pending.is_some() {
            return Err(PlanError::AlreadyPending);
        }

        let (to, touched) = self
            .compute_transition(&event)
            .map_err(PlanError::UnknownChallenge)?;

        let plan = Plan {
            id: Uuid::new_v4(),
            from: self.view.clone(),
            to,
            touched,
            event,
            version_next: self.version + 1,
            pending_since: Instant::now(),
        };

        self.pending = Some(plan.clone());
        Ok(plan)
    }

    /// Apply the pending plan and return the new view.
    pub fn apply(&mut self, plan_id: PlanId) -> Result<SessionView, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected,
                got: plan_id,
            });
        }

        if self.view != plan.from {
            return Err(ApplyError::ViewMismatch);
        }

        if self.version + 1 != plan.version_next {
            return Err(ApplyError::VersionMismatch {
                expected: plan.version_next,
                actual: self.version + 1,
            });
        }

        self.view = plan.to;
        self.version = plan.version_next;
        Ok(self.view.clone())
    }

    /// Drop the pending plan without applying it.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    fn ensure_known(&self, challenge_id: &str) -> Result<(), UnknownChallenge> {
        if self.known.contains(challenge_id) {
            Ok(())
        } else {
            Err(UnknownChallenge {
                challenge_id: challenge_id.to_owned(),
            })
        }
    }

    fn compute_transition(
        &self,
        event: &SessionEvent,
    ) -> Result<(SessionView, Vec<ChallengeRecord>), UnknownChallenge> {
        let mut next = self.view.clone();
        let mut touched = Vec::new();

        match event {
            SessionEvent::Start { challenge_id, at } => {
                self.ensure_known(challenge_id)?;
                let record = ChallengeRecord {
                    challenge_id: challenge_id.clone(),
                    is_active: true,
                    start_time: *at,
                    end_time: None,
                };
                next.records.insert(challenge_id.clone(), record.clone());
                touched.push(record);
                next.session = SessionState {
                    active_challenge_id: Some(challenge_id.clone()),
                    is_active: true,
                    start_time: Some(*at),
                    end_time: None,
                };
            }
            SessionEvent::End { challenge_id, at } => {
                self.ensure_known(challenge_id)?;
                if let Some(record) = next
                    .records
                    .get_mut(challenge_id)
                    .filter(|record| record.is_active)
                {
                    record.is_active = false;
                    record.end_time = Some(*at);
                    touched.push(record.clone());
                    next.repoint(*at);
                }
            }
            SessionEvent::EndAll { at } => {
                for record in next.records.values_mut().filter(|record| record.is_active) {
                    record.is_active = false;
                    record.end_time = Some(*at);
                    touched.push(record.clone());
                }
                if !touched.is_empty() {
                    next.repoint(*at);
                }
            }
        }

        Ok((next, touched))
    }
}

impl From<ActiveChallengeEntity> for ChallengeRecord {
    fn from(value: ActiveChallengeEntity) -> Self {
        Self {
            challenge_id: value.challenge_id,
            is_active: value.is_active,
            start_time: value.start_time,
            end_time: value.end_time,
        }
    }
}

impl From<ChallengeRecord> for ActiveChallengeEntity {
    fn from(value: ChallengeRecord) -> Self {
        Self {
            challenge_id: value.challenge_id,
            is_active: value.is_active,
            start_time: value.start_time,
            end_time: value.end_time,
        }
    }
}

impl From<SessionStateEntity> for SessionState {
    fn from(value: SessionStateEntity) -> Self {
        Self {
            active_challenge_id: value.active_challenge_id,
            is_active: value.is_active,
            start_time: value.start_time,
            end_time: value.end_time,
        }
    }
}

impl SessionState {
    /// Persistable form stamped with `updated_at`.
    pub fn to_entity(&self, updated_at: SystemTime) -> SessionStateEntity {
        SessionStateEntity {
            active_challenge_id: self.active_challenge_id.clone(),
            is_active: self.is_active,
            start_time: self.start_time,
            end_time: self.end_time,
            updated_at,
        }
    }
}
