//! Session register
//!
//! Tracks the current session id, its last activity and the deepest scroll
//! position reached. The register owns an injectable [`SessionStore`] so a
//! session survives a reload while it is still inside its TTL.

use crate::types::{DeviceInfo, Session};
use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum SessionStoreError {
    #[error("session file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("session file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Persistence for the single active session of a browsing context
pub trait SessionStore: Send + Sync {
    fn load(&self) -> Result<Option<Session>, SessionStoreError>;

    fn save(&self, session: &Session) -> Result<(), SessionStoreError>;

    fn clear(&self) -> Result<(), SessionStoreError>;
}

/// Session kept only for the lifetime of the process
#[derive(Default)]
pub struct MemorySessionStore {
    slot: Mutex<Option<Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<Option<Session>, SessionStoreError> {
        Ok(self.slot.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionStoreError> {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

/// Session persisted as a JSON document
pub struct JsonFileSessionStore {
    path: PathBuf,
}

impl JsonFileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SessionStore for JsonFileSessionStore {
    fn load(&self) -> Result<Option<Session>, SessionStoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, session: &Session) -> Result<(), SessionStoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Write-then-rename so a crash never leaves a half-written file
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec(session)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), SessionStoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Result of registering activity
#[derive(Debug, Clone, PartialEq)]
pub struct SessionTouch {
    pub session_id: String,
    /// A new session began with this activity
    pub started: bool,
    /// The session that timed out, when one did
    pub expired: Option<Session>,
}

/// Owner of the active session
pub struct SessionRegister {
    store: Box<dyn SessionStore>,
    ttl: Duration,
    current: Option<Session>,
    restored: bool,
}

impl SessionRegister {
    /// Create new register backed by `store`
    pub fn new(store: Box<dyn SessionStore>, ttl: std::time::Duration) -> Self {
        Self {
            store,
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::minutes(30)),
            current: None,
            restored: false,
        }
    }

    /// Register activity at `now`, starting or rotating the session as needed
    pub fn touch(&mut self, now: DateTime<Utc>, device: &DeviceInfo) -> SessionTouch {
        if !self.restored {
            self.restored = true;
            self.current = match self.store.load() {
                Ok(session) => session,
                Err(e) => {
                    warn!("Discarding persisted session: {}", e);
                    None
                }
            };
        }

        let mut expired = None;
        if let Some(session) = self.current.take() {
            if session.is_expired(now, self.ttl) {
                debug!("Session {} expired after inactivity", session.id);
                expired = Some(session);
            } else {
                self.current = Some(session);
            }
        }

        let started = self.current.is_none();
        let session = self.current.get_or_insert_with(|| Session {
            id: Uuid::new_v4().to_string(),
            started_at: now,
            last_activity_at: now,
            max_scroll_depth_percent: 0,
            device_info: device.clone(),
        });
        if now > session.last_activity_at {
            session.last_activity_at = now;
        }
        let session_id = session.id.clone();
        self.persist();

        SessionTouch {
            session_id,
            started,
            expired,
        }
    }

    /// Raise the recorded scroll maximum, returning the previous value
    pub fn record_scroll(&mut self, percent: u8) -> u8 {
        let Some(session) = self.current.as_mut() else {
            return 0;
        };
        let previous = session.max_scroll_depth_percent;
        if percent > previous {
            session.max_scroll_depth_percent = percent.min(100);
            self.persist();
        }
        previous
    }

    pub fn max_scroll_depth(&self) -> u8 {
        self.current
            .as_ref()
            .map_or(0, |s| s.max_scroll_depth_percent)
    }

    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    /// Explicit exit; the next activity starts a fresh session
    pub fn end(&mut self) -> Option<Session> {
        let ended = self.current.take();
        if let Err(e) = self.store.clear() {
            warn!("Failed to clear persisted session: {}", e);
        }
        ended
    }

    fn persist(&self) {
        if let Some(session) = &self.current {
            if let Err(e) = self.store.save(session) {
                warn!("Failed to persist session {}: {}", session.id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(store: Box<dyn SessionStore>) -> SessionRegister {
        SessionRegister::new(store, std::time::Duration::from_secs(30 * 60))
    }

    #[test]
    fn test_first_touch_starts_session() {
        let mut reg = register(Box::new(MemorySessionStore::new()));
        let now = Utc::now();
        let first = reg.touch(now, &DeviceInfo::default());
        assert!(first.started);
        assert!(first.expired.is_none());

        let second = reg.touch(now + Duration::minutes(5), &DeviceInfo::default());
        assert!(!second.started);
        assert_eq!(first.session_id, second.session_id);
    }

    #[test]
    fn test_inactivity_rotates_session() {
        let mut reg = register(Box::new(MemorySessionStore::new()));
        let now = Utc::now();
        let first = reg.touch(now, &DeviceInfo::default());
        let later = reg.touch(now + Duration::minutes(31), &DeviceInfo::default());
        assert!(later.started);
        assert_ne!(first.session_id, later.session_id);
        assert_eq!(later.expired.map(|s| s.id), Some(first.session_id));
    }

    #[test]
    fn test_scroll_maximum_only_rises() {
        let mut reg = register(Box::new(MemorySessionStore::new()));
        reg.touch(Utc::now(), &DeviceInfo::default());
        assert_eq!(reg.record_scroll(40), 0);
        assert_eq!(reg.record_scroll(20), 40);
        assert_eq!(reg.max_scroll_depth(), 40);
    }

    #[test]
    fn test_restore_from_file_within_ttl() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        let now = Utc::now();

        let mut reg = register(Box::new(JsonFileSessionStore::new(&path)));
        let first = reg.touch(now, &DeviceInfo::default());
        reg.record_scroll(60);

        let mut reloaded = register(Box::new(JsonFileSessionStore::new(&path)));
        let touch = reloaded.touch(now + Duration::minutes(10), &DeviceInfo::default());
        assert!(!touch.started);
        assert_eq!(touch.session_id, first.session_id);
        assert_eq!(reloaded.max_scroll_depth(), 60);

        let mut stale = register(Box::new(JsonFileSessionStore::new(&path)));
        let touch = stale.touch(now + Duration::hours(2), &DeviceInfo::default());
        assert!(touch.started);
    }

    #[test]
    fn test_corrupt_file_starts_fresh() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();

        let mut reg = register(Box::new(JsonFileSessionStore::new(&path)));
        assert!(reg.touch(Utc::now(), &DeviceInfo::default()).started);
    }
}
