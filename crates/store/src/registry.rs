use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use chunkline_protocol::SessionId;

/// Extension of temp artifacts.
const PART_EXTENSION: &str = "part";

/// Number of finalized sessions remembered for close replays.
const FINALIZED_HISTORY: usize = 256;

/// Maps `(target name, session id)` to its temp artifact and append lock.
///
/// The temp path is a pure function of the pair, so a session survives a
/// server restart: the registry rebuilds its entry on first use and the
/// temp file on disk is what decides whether the session exists. The
/// per-entry mutex serializes all operations on one session; different
/// sessions never share a lock.
///
/// The most recently finalized sessions are kept with their final size, so
/// a close repeated after a lost reply can be answered again.
pub struct SessionRegistry {
    temp_dir: PathBuf,
    live: Mutex<HashMap<(SessionId, String), Arc<SessionEntry>>>,
    finalized: Mutex<VecDeque<((SessionId, String), u64)>>,
}

/// One live session.
pub struct SessionEntry {
    session_id: SessionId,
    target_name: String,
    temp_path: PathBuf,
    lock: Mutex<()>,
}

impl SessionEntry {
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Acquires exclusive access to the session.
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Returns `true` if the temp artifact is present on disk.
    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.temp_path)
            .await
            .unwrap_or(false)
    }
}

impl SessionRegistry {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
            live: Mutex::new(HashMap::new()),
            finalized: Mutex::new(VecDeque::with_capacity(FINALIZED_HISTORY)),
        }
    }

    /// Deterministic temp path for a session.
    ///
    /// Separators in the target name are flattened so every artifact lives
    /// directly in the temp directory.
    pub fn temp_path(&self, target_name: &str, session_id: SessionId) -> PathBuf {
        let flat: String = target_name
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.temp_dir.join(format!(
            "{flat}.{}.{PART_EXTENSION}",
            session_id.to_file_stem()
        ))
    }

    /// Returns the entry for a session, creating it if needed.
    pub async fn entry(&self, target_name: &str, session_id: SessionId) -> Arc<SessionEntry> {
        let mut live = self.live.lock().await;
        live.entry((session_id, target_name.to_string()))
            .or_insert_with(|| {
                Arc::new(SessionEntry {
                    session_id,
                    target_name: target_name.to_string(),
                    temp_path: self.temp_path(target_name, session_id),
                    lock: Mutex::new(()),
                })
            })
            .clone()
    }

    /// Drops the in-memory entry of a finished or invalid session.
    pub async fn forget(&self, target_name: &str, session_id: SessionId) {
        self.live
            .lock()
            .await
            .remove(&(session_id, target_name.to_string()));
    }

    /// Records the final size of a finalized session.
    ///
    /// Only the last [`FINALIZED_HISTORY`] sessions are kept.
    pub async fn record_finalized(&self, target_name: &str, session_id: SessionId, size: u64) {
        let mut finalized = self.finalized.lock().await;
        if finalized.len() == FINALIZED_HISTORY {
            finalized.pop_front();
        }
        finalized.push_back(((session_id, target_name.to_string()), size));
    }

    /// Final size of a recently finalized session.
    pub async fn finalized_size(&self, target_name: &str, session_id: SessionId) -> Option<u64> {
        self.finalized
            .lock()
            .await
            .iter()
            .rev()
            .find(|((id, name), _)| *id == session_id && name == target_name)
            .map(|(_, size)| *size)
    }

    /// Returns `true` if the session's temp artifact is present on disk.
    pub async fn session_exists(&self, target_name: &str, session_id: SessionId) -> bool {
        tokio::fs::try_exists(self.temp_path(target_name, session_id))
            .await
            .unwrap_or(false)
    }

    /// Number of sessions with an in-memory entry.
    pub async fn live_count(&self) -> usize {
        self.live.lock().await.len()
    }
}
