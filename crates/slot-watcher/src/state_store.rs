//! Durable slot state that survives restarts.
//!
//! The production store is a single JSON document replaced atomically on
//! every commit: the new document is written to a temp file next to the
//! target, fsynced and renamed over it. A crash at any point leaves either
//! the previous or the new document on disk.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use shared_types::{SlotKey, SlotStatus, StateMap, StateRecord};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{WatchError, WatchResult};

const DOCUMENT_VERSION: u32 = 1;

/// Load/commit contract for the slot state
pub trait StateStore: Send + Sync {
    /// Previously committed state, `None` when nothing was ever committed
    fn load(&self) -> WatchResult<Option<StateMap>>;

    /// Atomically replace the persisted state
    fn commit(&self, state: &StateMap) -> WatchResult<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct StateDocument {
    version: u32,
    records: BTreeMap<SlotKey, RecordBody>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordBody {
    last_status: SlotStatus,
    #[serde(default)]
    last_notified_at: Option<DateTime<Utc>>,
}

impl StateDocument {
    fn from_map(state: &StateMap) -> Self {
        let records = state
            .iter()
            .map(|(key, record)| {
                (
                    key.clone(),
                    RecordBody {
                        last_status: record.last_status,
                        last_notified_at: record.last_notified_at,
                    },
                )
            })
            .collect();
        Self {
            version: DOCUMENT_VERSION,
            records,
        }
    }

    fn into_map(self) -> StateMap {
        self.records
            .into_iter()
            .map(|(key, body)| {
                let record = StateRecord {
                    key: key.clone(),
                    last_status: body.last_status,
                    last_notified_at: body.last_notified_at,
                };
                (key, record)
            })
            .collect()
    }
}

/// State kept in one JSON file
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Open the store at `path`, removing temp files left by an interrupted commit
    pub fn open(path: impl Into<PathBuf>) -> WatchResult<Self> {
        let store = Self { path: path.into() };
        store.remove_stale_temp_files()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_prefix(&self) -> String {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state".to_string());
        format!(".{}.tmp.", file_name)
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn remove_stale_temp_files(&self) -> WatchResult<()> {
        let dir = self.parent_dir();
        if !dir.exists() {
            return Ok(());
        }

        let prefix = self.temp_prefix();
        let entries = fs::read_dir(&dir).map_err(|e| WatchError::persistence(&dir, e))?;
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(&prefix) {
                tracing::warn!("Removing leftover temp file {}", entry.path().display());
                if let Err(e) = fs::remove_file(entry.path()) {
                    tracing::warn!("Failed to remove {}: {}", entry.path().display(), e);
                }
            }
        }
        Ok(())
    }

    fn write_temp(&self, temp_path: &Path, state: &StateMap) -> WatchResult<()> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(temp_path)
            .map_err(|e| WatchError::persistence(temp_path, e))?;

        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &StateDocument::from_map(state))
            .map_err(|e| WatchError::persistence(temp_path, e))?;
        writer
            .flush()
            .map_err(|e| WatchError::persistence(temp_path, e))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| WatchError::persistence(temp_path, e))?;
        Ok(())
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> WatchResult<Option<StateMap>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content =
            fs::read_to_string(&self.path).map_err(|e| WatchError::persistence(&self.path, e))?;
        let document: StateDocument = serde_json::from_str(&content)
            .map_err(|e| WatchError::persistence(&self.path, format!("unreadable state: {}", e)))?;

        if document.version != DOCUMENT_VERSION {
            return Err(WatchError::persistence(
                &self.path,
                format!("unsupported state version {}", document.version),
            ));
        }

        Ok(Some(document.into_map()))
    }

    fn commit(&self, state: &StateMap) -> WatchResult<()> {
        let dir = self.parent_dir();
        fs::create_dir_all(&dir).map_err(|e| WatchError::persistence(&dir, e))?;

        let temp_path = dir.join(format!("{}{}", self.temp_prefix(), Uuid::new_v4()));

        if let Err(e) = self.write_temp(&temp_path, state) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_path, &self.path) {
            let _ = fs::remove_file(&temp_path);
            return Err(WatchError::persistence(&self.path, e));
        }

        // Make the rename itself durable where the platform allows it
        if let Ok(dir_handle) = File::open(&dir) {
            let _ = dir_handle.sync_all();
        }

        tracing::debug!("Committed {} records to {}", state.len(), self.path.display());
        Ok(())
    }
}

/// In-process store for tests and one-shot runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<Option<StateMap>>,
    fail_commits: AtomicBool,
    commits: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: StateMap) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            ..Self::default()
        }
    }

    /// Make every following commit fail with a persistence error
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Option<StateMap> {
        self.state.lock().ok().and_then(|s| s.clone())
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> WatchResult<Option<StateMap>> {
        let state = self
            .state
            .lock()
            .map_err(|_| WatchError::persistence(Path::new("<memory>"), "lock poisoned"))?;
        Ok(state.clone())
    }

    fn commit(&self, new_state: &StateMap) -> WatchResult<()> {
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(WatchError::persistence(Path::new("<memory>"), "commit refused"));
        }
        let mut state = self
            .state
            .lock()
            .map_err(|_| WatchError::persistence(Path::new("<memory>"), "lock poisoned"))?;
        *state = Some(new_state.clone());
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Remove records for dates strictly before `cutoff`, returning how many went
pub fn prune_before(state: &mut StateMap, cutoff: NaiveDate) -> usize {
    let before = state.len();
    state.retain(|key, _| key.date >= cutoff);
    before - state.len()
}
