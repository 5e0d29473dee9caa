//! Small persisted client state used to seed a session before the first fetch.

use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::dto::public::ParticipantSummary;

/// Which dashboard an admin is looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    Admin,
    Player,
}

impl ViewMode {
    /// Admins get their saved preference, admin view on first login; everyone else plays.
    pub fn resolve(is_admin: bool, saved: Option<ViewMode>) -> ViewMode {
        if is_admin {
            saved.unwrap_or(ViewMode::Admin)
        } else {
            ViewMode::Player
        }
    }
}

/// Values kept between client runs. Never authoritative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LocalState {
    pub current_user: Option<ParticipantSummary>,
    pub is_admin_cached: bool,
    pub admin_view_preference: Option<ViewMode>,
}

#[derive(Debug, Error)]
pub enum LocalStateError {
    #[error("local state i/o failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("local state file {path} is malformed: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Key/value persistence for [`LocalState`].
pub trait LocalStateStore: Send + Sync {
    fn load(&self) -> Result<LocalState, LocalStateError>;
    fn save(&self, state: &LocalState) -> Result<(), LocalStateError>;
}

/// State kept in a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileStateStore {
    path: PathBuf,
}

impl JsonFileStateStore {
    /// Store persisting to the JSON file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> LocalStateError {
        LocalStateError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl LocalStateStore for JsonFileStateStore {
    fn load(&self) -> Result<LocalState, LocalStateError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                serde_json::from_str(&contents).map_err(|source| LocalStateError::Format {
                    path: self.path.clone(),
                    source,
                })
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no local state yet");
                Ok(LocalState::default())
            }
            Err(err) => Err(self.io_error(err)),
        }
    }

    fn save(&self, state: &LocalState) -> Result<(), LocalStateError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| self.io_error(err))?;
        }
        let contents = serde_json::to_vec_pretty(state).map_err(|source| LocalStateError::Format {
            path: self.path.clone(),
            source,
        })?;
        // Replace atomically.
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, contents).map_err(|err| self.io_error(err))?;
        fs::rename(&staging, &self.path).map_err(|err| self.io_error(err))
    }
}

/// State kept in memory only.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<LocalState>,
}

impl MemoryStateStore {
    /// Store seeded with `initial`.
    pub fn new(initial: LocalState) -> Self {
        Self {
            state: Mutex::new(initial),
        }
    }
}

impl LocalStateStore for MemoryStateStore {
    fn load(&self) -> Result<LocalState, LocalStateError> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn save(&self, state: &LocalState) -> Result<(), LocalStateError> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state.clone();
        Ok(())
    }
}
