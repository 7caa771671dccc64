//! JSON file store.
//!
//! Layout under the data directory:
//!
//! ```text
//! sessions/<session-id>.json   one SessionRecord per live duel
//! queue/<token>.json           one QueueRecord per waiting entry
//! archive.json                 bounded list of ArchivedDuel
//! ```
//!
//! Writes go to a uniquely named temporary file first and are renamed into
//! place, so a crash mid-write leaves the previous version intact. The
//! archive is a read-modify-write of one file and is serialized by a lock
//! shared between clones.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use super::store::{
    ArchivedDuel, DuelStore, QueueRecord, SessionRecord, StoreError, StoredState,
};

const SESSIONS_DIR: &str = "sessions";
const QUEUE_DIR: &str = "queue";
const ARCHIVE_FILE: &str = "archive.json";

/// Directory-backed [`DuelStore`].
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
    archive_lock: Arc<Mutex<()>>,
}

impl JsonFileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join(SESSIONS_DIR))?;
        fs::create_dir_all(root.join(QUEUE_DIR))?;
        Ok(Self {
            root,
            archive_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_path(&self, session_id: &str) -> Result<PathBuf, StoreError> {
        Ok(self.root.join(SESSIONS_DIR).join(file_name(session_id)?))
    }

    fn queue_path(&self, token: &str) -> Result<PathBuf, StoreError> {
        Ok(self.root.join(QUEUE_DIR).join(file_name(token)?))
    }

    fn read_archive(&self) -> Result<Vec<ArchivedDuel>, StoreError> {
        match fs::read(self.root.join(ARCHIVE_FILE)) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Keys become file names; anything that could escape the directory is refused.
fn file_name(key: &str) -> Result<String, StoreError> {
    let safe = !key.is_empty()
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if safe {
        Ok(format!("{}.json", key))
    } else {
        Err(StoreError::Unavailable(format!("refusing unsafe key '{}'", key)))
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Records read from one directory, keyed by file stem.
struct DirContents<T> {
    records: Vec<(String, T)>,
    /// Stems of files that failed to parse.
    unreadable: Vec<String>,
}

/// Read every `*.json` in a directory. Files that fail to parse are
/// skipped but their stems are reported.
fn read_dir_json<T: DeserializeOwned>(dir: &Path) -> Result<DirContents<T>, StoreError> {
    let mut records = Vec::new();
    let mut unreadable = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };
        let bytes = fs::read(&path)?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => records.push((stem, value)),
            Err(e) => {
                warn!("Skipping unreadable record {}: {}", path.display(), e);
                unreadable.push(stem);
            }
        }
    }
    records.sort_by(|a, b| a.0.cmp(&b.0));
    unreadable.sort();
    Ok(DirContents { records, unreadable })
}

impl DuelStore for JsonFileStore {
    fn upsert_session(&self, record: &SessionRecord) -> Result<(), StoreError> {
        write_json(&self.session_path(&record.state.id)?, record)
    }

    fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        remove_if_present(&self.session_path(session_id)?)
    }

    fn upsert_queue_entry(&self, token: &str, record: &QueueRecord) -> Result<(), StoreError> {
        write_json(&self.queue_path(token)?, record)
    }

    fn delete_queue_entry(&self, token: &str) -> Result<(), StoreError> {
        remove_if_present(&self.queue_path(token)?)
    }

    fn append_archive(&self, summary: &ArchivedDuel, limit: usize) -> Result<(), StoreError> {
        let _guard = self.archive_lock.lock();
        let mut archive = self.read_archive()?;
        archive.push(summary.clone());
        let excess = archive.len().saturating_sub(limit);
        archive.drain(..excess);
        write_json(&self.root.join(ARCHIVE_FILE), &archive)
    }

    fn load_all(&self) -> Result<StoredState, StoreError> {
        let sessions = read_dir_json::<SessionRecord>(&self.root.join(SESSIONS_DIR))?;
        let queue = read_dir_json::<QueueRecord>(&self.root.join(QUEUE_DIR))?;
        let archive = {
            let _guard = self.archive_lock.lock();
            self.read_archive()?
        };

        Ok(StoredState {
            sessions: sessions.records.into_iter().map(|(_, record)| record).collect(),
            queue: queue.records,
            archive,
            unreadable_sessions: sessions.unreadable,
        })
    }
}
