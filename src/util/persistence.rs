use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde_json::Error as SerdeError;
use tracing::{debug, warn};

use crate::domain::Session;

const APP_QUALIFIER: &str = "com";
const APP_ORG: &str = "Herrera";
const APP_NAME: &str = "OrderCosting";

pub fn session_file() -> Option<PathBuf> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .map(|dirs| dirs.config_dir().join("session.json"))
}

/// Session saved by the last login, if any. A corrupt file counts as logged out.
pub fn load_session() -> Option<Session> {
    load_session_from(&session_file()?)
}

pub fn load_session_from(path: &Path) -> Option<Session> {
    let data = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&data) {
        Ok(session) => Some(session),
        Err(err) => {
            warn!(path = %path.display(), %err, "ignoring unreadable session file");
            None
        }
    }
}

pub fn save_session(session: &Session) -> Result<(), PersistSaveError> {
    let path = session_file().ok_or(PersistSaveError::StorageUnavailable)?;
    save_session_to(&path, session)
}

pub fn save_session_to(path: &Path, session: &Session) -> Result<(), PersistSaveError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(session)?;
    fs::write(path, json)?;
    debug!(path = %path.display(), "session saved");
    Ok(())
}

pub fn clear_session() -> Result<(), PersistSaveError> {
    let path = session_file().ok_or(PersistSaveError::StorageUnavailable)?;
    clear_session_at(&path)
}

pub fn clear_session_at(path: &Path) -> Result<(), PersistSaveError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersistSaveError {
    #[error("storage directory unavailable")]
    StorageUnavailable,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serde(#[from] SerdeError),
}
