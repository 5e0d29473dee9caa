//! Change-feed payloads: one notification per committed row change.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::dao::models::VoteEntity;

/// Tables a client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    /// Participant rows (scores, sign-ups).
    Users,
    /// The session singleton.
    GameState,
    /// Challenge records.
    ActiveChallenges,
    /// Poll votes.
    Votes,
}

impl Resource {
    /// Every resource, in subscription order.
    pub const ALL: [Resource; 4] = [
        Resource::Users,
        Resource::GameState,
        Resource::ActiveChallenges,
        Resource::Votes,
    ];

    /// Wire name used in URLs and SSE event names.
    pub fn as_str(self) -> &'static str {
        match self {
            Resource::Users => "users",
            Resource::GameState => "game_state",
            Resource::ActiveChallenges => "active_challenges",
            Resource::Votes => "votes",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resource::ALL
            .into_iter()
            .find(|resource| resource.as_str() == s)
            .ok_or_else(|| format!("unknown feed resource `{s}`"))
    }
}

/// Kind of row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Insert,
    Update,
    Delete,
}

/// A committed row change as delivered to subscribers.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChangeNotification {
    pub resource: Resource,
    pub event_kind: EventKind,
    /// Row before the change (updates and deletes).
    #[schema(value_type = Option<Object>)]
    pub before: Option<Value>,
    /// Row after the change (inserts and updates).
    #[schema(value_type = Option<Object>)]
    pub after: Option<Value>,
    /// RFC 3339 commit timestamp.
    pub committed_at: String,
}

impl ChangeNotification {
    /// The most recent form of the row: `after` when present, otherwise `before`.
    pub fn row(&self) -> Option<&Value> {
        self.after.as_ref().or(self.before.as_ref())
    }
}

/// Equality filter in `column=eq.value` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedFilter {
    column: String,
    value: String,
}

impl FeedFilter {
    /// Build a filter matching rows whose `column` equals `value`.
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Whether the notification's row carries the expected column value.
    pub fn matches(&self, notification: &ChangeNotification) -> bool {
        [notification.after.as_ref(), notification.before.as_ref()]
            .into_iter()
            .flatten()
            .any(|row| match row.get(&self.column) {
                Some(Value::String(found)) => *found == self.value,
                Some(Value::Null) | None => false,
                Some(other) => other.to_string() == self.value,
            })
    }
}

impl fmt::Display for FeedFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

impl FromStr for FeedFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (column, rest) = s
            .split_once('=')
            .ok_or_else(|| format!("filter `{s}` must look like column=eq.value"))?;
        let value = rest
            .strip_prefix("eq.")
            .ok_or_else(|| format!("filter `{s}` only supports the eq operator"))?;
        if column.is_empty() {
            return Err(format!("filter `{s}` names no column"));
        }
        Ok(Self::eq(column, value))
    }
}

/// Query string accepted by the feed route.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FeedQuery {
    /// Optional `column=eq.value` filter.
    pub filter: Option<String>,
}

/// Vote row as published on the `votes` resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct VoteRow {
    pub user_id: Uuid,
    pub question_id: String,
    pub option_index: u32,
}

impl From<VoteEntity> for VoteRow {
    fn from(value: VoteEntity) -> Self {
        Self {
            user_id: value.user_id,
            question_id: value.question_id,
            option_index: value.option_index,
        }
    }
}
