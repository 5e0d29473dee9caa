use std::time::SystemTime;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub mod admin;
/// Sign-up and login payloads.
pub mod auth;
pub mod feed;
/// Health check payload.
pub mod health;
/// Player score and vote payloads.
pub mod play;
pub mod public;
pub mod validation;

pub(crate) fn format_system_time(time: SystemTime) -> String {
    OffsetDateTime::from(time)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}

/// Parse an RFC 3339 timestamp produced by [`format_system_time`].
pub(crate) fn parse_system_time(raw: &str) -> Option<SystemTime> {
    OffsetDateTime::parse(raw, &Rfc3339).ok().map(SystemTime::from)
}
