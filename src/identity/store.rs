use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{AppError, AppResult};

/// What survives a restart: enough to ask the auth service who we are.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedSession {
    pub access_token: String,
    pub saved_at: DateTime<Utc>,
}

impl PersistedSession {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self { access_token: access_token.into(), saved_at: Utc::now() }
    }
}

pub trait SessionStore: Send + Sync {
    fn load(&self) -> Option<PersistedSession>;
    fn save(&self, session: &PersistedSession) -> AppResult<()>;
    fn clear(&self) -> AppResult<()>;
}

/// JSON file on local disk.
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }

    pub fn path(&self) -> &Path { &self.path }
}

fn io_error(path: &Path, e: std::io::Error) -> AppError {
    AppError::internal("session_store_io".to_string(), format!("{}: {}", path.display(), e))
}

/// The file holds a bearer token: owner read/write only on unix.
#[cfg(unix)]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    let mut f = std::fs::OpenOptions::new().write(true).create(true).truncate(true).mode(0o600).open(path)?;
    // mode() only applies on create; tighten a file left by an older run
    f.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    f.write_all(bytes)
}

#[cfg(not(unix))]
fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, bytes)
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> Option<PersistedSession> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&text) {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(target: "session", "ignoring unreadable session file {:?}: {}", self.path, e);
                None
            }
        }
    }

    fn save(&self, session: &PersistedSession) -> AppResult<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
            }
        }
        let text = serde_json::to_string_pretty(session)
            .map_err(|e| AppError::internal("session_store_encode".to_string(), e.to_string()))?;
        write_private(&self.path, text.as_bytes()).map_err(|e| io_error(&self.path, e))
    }

    fn clear(&self) -> AppResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&self.path, e)),
        }
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    slot: Mutex<Option<PersistedSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self { Self::default() }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Option<PersistedSession> { self.slot.lock().clone() }

    fn save(&self, session: &PersistedSession) -> AppResult<()> {
        *self.slot.lock() = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> AppResult<()> {
        *self.slot.lock() = None;
        Ok(())
    }
}
