//! Persisted session state — the `/sessions` control surface and its
//! on-disk JSON file, written atomically (temp file + rename).

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

/// A session transitions from `active` to `idle` after this much time with
/// no activity. The data model names `idle` without specifying the
/// transition; this is the fixed threshold this crate uses.
pub const IDLE_AFTER: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Idle,
    Terminated,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Session {
    pub id: String,
    pub created_at: i64,
    pub last_activity: i64,
    pub user: String,
    pub channel: String,
    pub message_count: u64,
    pub status: SessionStatus,
}

impl Session {
    /// Effective status as of `now_ms`: `terminated` is sticky; otherwise
    /// `idle` once `now - last_activity > IDLE_AFTER`, else `active`.
    pub fn effective_status(&self, now_ms: i64) -> SessionStatus {
        if self.status == SessionStatus::Terminated {
            return SessionStatus::Terminated;
        }
        let idle_after_ms = IDLE_AFTER.as_millis() as i64;
        if now_ms - self.last_activity > idle_after_ms {
            SessionStatus::Idle
        } else {
            SessionStatus::Active
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedFile {
    sessions: Vec<Session>,
}

/// In-memory session store, periodically flushed to `path`.
pub struct SessionStore {
    path: PathBuf,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    /// Load an existing state file if present, otherwise start empty.
    pub fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let sessions = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let parsed: PersistedFile = serde_json::from_str(&raw)?;
            parsed.sessions.into_iter().map(|s| (s.id.clone(), s)).collect()
        } else {
            HashMap::new()
        };
        Ok(Self { path, sessions: Mutex::new(sessions) })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn create(&self, id: impl Into<String>, user: impl Into<String>, channel: impl Into<String>) -> Session {
        let now = now_ms();
        let session = Session {
            id: id.into(),
            created_at: now,
            last_activity: now,
            user: user.into(),
            channel: channel.into(),
            message_count: 0,
            status: SessionStatus::Active,
        };
        self.lock().insert(session.id.clone(), session.clone());
        session
    }

    pub fn touch(&self, id: &str) {
        let mut sessions = self.lock();
        if let Some(session) = sessions.get_mut(id) {
            session.last_activity = now_ms();
            session.message_count += 1;
        }
    }

    /// Mark a session terminated. Returns `false` if no such session exists.
    pub fn terminate(&self, id: &str) -> bool {
        let mut sessions = self.lock();
        match sessions.get_mut(id) {
            Some(session) => {
                session.status = SessionStatus::Terminated;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.lock().get(id).cloned()
    }

    pub fn list(&self) -> Vec<Session> {
        self.lock().values().cloned().collect()
    }

    /// Count of sessions whose effective status is `active` as of now.
    pub fn active_count(&self) -> usize {
        let now = now_ms();
        self.lock().values().filter(|s| s.effective_status(now) == SessionStatus::Active).count()
    }

    /// Drop terminated sessions older than 24 hours.
    pub fn sweep_terminated(&self) {
        let now = now_ms();
        let mut sessions = self.lock();
        sessions.retain(|_, s| {
            !(s.status == SessionStatus::Terminated && now - s.last_activity > 24 * 60 * 60 * 1000)
        });
    }

    /// Write the current state to disk via a temp file + rename.
    pub fn flush(&self) -> anyhow::Result<()> {
        let snapshot = PersistedFile { sessions: self.list() };
        let body = serde_json::to_string_pretty(&snapshot)?;

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let tmp = tempfile_path(dir);
        std::fs::write(&tmp, body)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn tempfile_path(dir: &Path) -> PathBuf {
    dir.join(format!(".sessions-{}.tmp", std::process::id()))
}

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}
