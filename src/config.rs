//! Application-level configuration loading: challenge catalog, poll rewards and admin roster.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::catalog::{
    ChallengeCatalog, ChallengeDefinition, PollQuestion, PollScoring, default_challenges,
    default_questions,
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "ARENA_BACK_CONFIG_PATH";
const DEFAULT_WINNER_BONUS: i64 = 5;
const DEFAULT_PARTICIPATION_POINTS: i64 = 1;
const DEFAULT_FEED_CAPACITY: usize = 256;
const DEFAULT_FEED_RECONNECT_MS: u64 = 2_000;

/// Points handed out when a poll question closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollRewards {
    /// Delta for voters of a winning option.
    pub winner_bonus: i64,
    /// Delta for every other voter.
    pub participation: i64,
}

impl Default for PollRewards {
    fn default() -> Self {
        Self {
            winner_bonus: DEFAULT_WINNER_BONUS,
            participation: DEFAULT_PARTICIPATION_POINTS,
        }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    catalog: ChallengeCatalog,
    poll_rewards: PollRewards,
    admin_names: Vec<String>,
    feed_capacity: usize,
    feed_reconnect_delay: Duration,
}

impl AppConfig {
    /// Load the configuration from disk, falling back to the built-in catalog.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        challenges = app_config.catalog.challenges().count(),
                        questions = app_config.catalog.questions().count(),
                        "loaded arena config"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Challenge and poll catalog.
    pub fn catalog(&self) -> &ChallengeCatalog {
        &self.catalog
    }

    /// Poll close rewards.
    pub fn poll_rewards(&self) -> PollRewards {
        self.poll_rewards
    }

    /// Whether a participant signing up with `display_name` becomes an admin.
    pub fn is_admin_name(&self, display_name: &str) -> bool {
        self.admin_names
            .iter()
            .any(|name| name.eq_ignore_ascii_case(display_name.trim()))
    }

    /// Buffer size of the change-feed broadcast channel.
    pub fn feed_capacity(&self) -> usize {
        self.feed_capacity
    }

    /// Fixed delay the change-feed bridge waits before resubscribing.
    pub fn feed_reconnect_delay(&self) -> Duration {
        self.feed_reconnect_delay
    }

    /// Replace the admin roster.
    pub fn with_admin_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.admin_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the poll rewards.
    pub fn with_poll_rewards(mut self, rewards: PollRewards) -> Self {
        self.poll_rewards = rewards;
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            catalog: ChallengeCatalog::new(default_challenges(), default_questions()),
            poll_rewards: PollRewards::default(),
            admin_names: vec!["admin".into()],
            feed_capacity: DEFAULT_FEED_CAPACITY,
            feed_reconnect_delay: Duration::from_millis(DEFAULT_FEED_RECONNECT_MS),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    challenges: Option<Vec<ChallengeDefinition>>,
    questions: Option<Vec<PollQuestion>>,
    winner_bonus: Option<i64>,
    participation_points: Option<i64>,
    admin_names: Option<Vec<String>>,
    feed_capacity: Option<usize>,
    feed_reconnect_ms: Option<u64>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = AppConfig::default();
        let questions = value
            .questions
            .unwrap_or_else(default_questions)
            .into_iter()
            .filter(|question| match &question.scoring {
                PollScoring::ClosestBucket { buckets } if buckets.len() != question.options.len() => {
                    warn!(
                        question = %question.id,
                        "bucket count does not match option count; question skipped"
                    );
                    false
                }
                _ => true,
            })
            .collect();

        Self {
            catalog: ChallengeCatalog::new(
                value.challenges.unwrap_or_else(default_challenges),
                questions,
            ),
            poll_rewards: PollRewards {
                winner_bonus: value
                    .winner_bonus
                    .unwrap_or(defaults.poll_rewards.winner_bonus),
                participation: value
                    .participation_points
                    .unwrap_or(defaults.poll_rewards.participation),
            },
            admin_names: value.admin_names.unwrap_or(defaults.admin_names),
            feed_capacity: value
                .feed_capacity
                .filter(|capacity| *capacity > 0)
                .unwrap_or(defaults.feed_capacity),
            feed_reconnect_delay: value
                .feed_reconnect_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.feed_reconnect_delay),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_ship_full_catalog() {
        let config = AppConfig::default();
        assert_eq!(config.catalog().challenges().count(), 5);
        assert_eq!(config.catalog().questions().count(), 4);
        assert_eq!(config.poll_rewards(), PollRewards::default());
        assert!(config.is_admin_name(" Admin "));
        assert!(!config.is_admin_name("alice"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let raw: RawConfig = serde_json::from_str(
            r#"{ "winner_bonus": 8, "admin_names": ["host"], "feed_reconnect_ms": 50 }"#,
        )
        .unwrap();
        let config: AppConfig = raw.into();

        assert_eq!(config.poll_rewards().winner_bonus, 8);
        assert_eq!(config.poll_rewards().participation, 1);
        assert!(config.is_admin_name("host"));
        assert!(!config.is_admin_name("admin"));
        assert_eq!(config.feed_reconnect_delay(), Duration::from_millis(50));
        assert_eq!(config.catalog().challenges().count(), 5);
    }

    #[test]
    fn mismatched_buckets_are_dropped() {
        let raw: RawConfig = serde_json::from_str(
            r#"{ "questions": [
                { "id": "guess", "prompt": "?", "options": ["a", "b"],
                  "scoring": { "rule": "closest_bucket", "buckets": [ { "min": 0, "max": null } ] } },
                { "id": "ok", "prompt": "?", "options": ["a"], "scoring": { "rule": "plurality" } }
            ] }"#,
        )
        .unwrap();
        let config: AppConfig = raw.into();

        assert!(config.catalog().question("guess").is_none());
        assert!(config.catalog().question("ok").is_some());
    }
}
