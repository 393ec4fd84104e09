use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::data_models::{HistoryMessage, Session};
use crate::error::HistoryError;

/// Where completed turns go. The pipeline only ever appends and reads back the
/// recent window for the next prompt.
pub trait HistoryStore: Send {
    fn append(&mut self, message: HistoryMessage) -> Result<(), HistoryError>;

    /// The last `limit` messages of the current session, oldest first.
    fn recent(&self, limit: usize) -> Vec<HistoryMessage>;

    fn current_session(&self) -> &Session;
}

/// In-memory store, used when persistence is unavailable and in tests.
#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    session: Session,
}

impl MemoryHistoryStore {
    pub fn new() -> MemoryHistoryStore {
        MemoryHistoryStore::default()
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn append(&mut self, message: HistoryMessage) -> Result<(), HistoryError> {
        self.session.messages.push(message);
        self.session.updated_at = Utc::now();
        Ok(())
    }

    fn recent(&self, limit: usize) -> Vec<HistoryMessage> {
        tail(&self.session.messages, limit)
    }

    fn current_session(&self) -> &Session {
        &self.session
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct HistoryFile {
    #[serde(default)]
    sessions: Vec<Session>,
}

/// JSON file of sessions. Every run opens a new session; the file keeps at most
/// `max_sessions`, dropping the oldest on save.
#[derive(Debug)]
pub struct JsonHistoryStore {
    path: PathBuf,
    max_sessions: usize,
    past: Vec<Session>,
    current: Session,
}

impl JsonHistoryStore {
    /// Loads `path` (creating its directory if needed) and starts a new session.
    /// A corrupt file is moved aside to `<path>.backup` and history starts empty.
    pub fn open(path: impl Into<PathBuf>, max_sessions: usize) -> Result<JsonHistoryStore, HistoryError> {
        let path = path.into();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir).map_err(|source| io_err(dir, source))?;
            }
        }

        let past = match std::fs::read(&path) {
            Ok(data) => match serde_json::from_slice::<HistoryFile>(&data) {
                Ok(file) => file.sessions,
                Err(e) => {
                    let backup = backup_path(&path);
                    log::warn!(
                        "history file {} is corrupt ({e}), moving it to {}",
                        path.display(),
                        backup.display()
                    );
                    std::fs::rename(&path, &backup).map_err(|source| io_err(&path, source))?;
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(io_err(&path, source)),
        };

        Ok(JsonHistoryStore {
            path,
            max_sessions: max_sessions.max(1),
            past,
            current: Session::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.past.iter().chain(std::iter::once(&self.current))
    }

    /// Writes to a temp file and renames it over the real one.
    pub fn save(&self) -> Result<(), HistoryError> {
        let mut sessions: Vec<&Session> = self.sessions().collect();
        if sessions.len() > self.max_sessions {
            sessions.drain(..sessions.len() - self.max_sessions);
        }

        #[derive(Serialize)]
        struct Out<'a> {
            sessions: Vec<&'a Session>,
        }
        let data = serde_json::to_vec_pretty(&Out { sessions })?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data).map_err(|source| io_err(&tmp, source))?;
        std::fs::rename(&tmp, &self.path).map_err(|source| io_err(&self.path, source))?;
        Ok(())
    }
}

impl HistoryStore for JsonHistoryStore {
    fn append(&mut self, message: HistoryMessage) -> Result<(), HistoryError> {
        self.current.messages.push(message);
        self.current.updated_at = Utc::now();
        self.save()
    }

    fn recent(&self, limit: usize) -> Vec<HistoryMessage> {
        tail(&self.current.messages, limit)
    }

    fn current_session(&self) -> &Session {
        &self.current
    }
}

fn tail(messages: &[HistoryMessage], limit: usize) -> Vec<HistoryMessage> {
    let start = messages.len().saturating_sub(limit);
    messages[start..].to_vec()
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".backup");
    PathBuf::from(name)
}

fn io_err(path: &Path, source: std::io::Error) -> HistoryError {
    HistoryError::Io {
        path: path.display().to_string(),
        source,
    }
}
