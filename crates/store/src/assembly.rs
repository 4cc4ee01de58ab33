use std::io::ErrorKind as IoErrorKind;
use std::path::{Component, Path};

use filetime::FileTime;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use chunkline_protocol::{SessionId, checksum_bytes};

use crate::registry::SessionRegistry;
use crate::{StoreConfig, StoreError, validate_target_name};

/// Owns temp-file creation, append, finalize and deletion for all sessions.
pub struct AssemblyStore {
    config: StoreConfig,
    registry: SessionRegistry,
}

impl AssemblyStore {
    /// Creates the store, making sure both directories exist.
    pub async fn new(config: StoreConfig) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(config.storage_dir()).await?;
        tokio::fs::create_dir_all(config.temp_dir()).await?;
        let registry = SessionRegistry::new(config.temp_dir());
        Ok(Self { config, registry })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Opens a new session for `target_name`.
    ///
    /// Fails with [`StoreError::AlreadyExists`] if the final file exists and
    /// overwrite is not both requested and allowed by the config. Otherwise
    /// creates an empty temp artifact and returns its session id.
    pub async fn open(&self, target_name: &str, overwrite: bool) -> Result<SessionId, StoreError> {
        self.check_name(target_name)?;
        self.check_overwrite(target_name, overwrite).await?;

        let session_id = SessionId::generate();
        let entry = self.registry.entry(target_name, session_id).await;
        let _guard = entry.lock().await;

        let created = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(entry.temp_path())
            .await;
        if let Err(e) = created {
            self.registry.forget(target_name, session_id).await;
            return Err(e.into());
        }

        info!(session = %session_id, name = %target_name, "session opened");
        Ok(session_id)
    }

    /// Appends `payload` to the session's temp artifact.
    ///
    /// Returns the authoritative size after the call. When `claimed_offset`
    /// differs from the current size the request is a duplicate or an
    /// out-of-order retry: nothing is written and the current size is
    /// returned, which is what makes client retries safe.
    ///
    /// The size ceiling is checked before offset reconciliation, so a call
    /// that fails with [`StoreError::SizeExceeded`] never writes.
    pub async fn append(
        &self,
        target_name: &str,
        session_id: SessionId,
        payload: &[u8],
        claimed_offset: u64,
        checksum: Option<&str>,
    ) -> Result<u64, StoreError> {
        self.check_name(target_name)?;
        let entry = self.registry.entry(target_name, session_id).await;
        let _guard = entry.lock().await;

        let current = match tokio::fs::metadata(entry.temp_path()).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                self.registry.forget(target_name, session_id).await;
                return Err(StoreError::UnknownSession(session_id));
            }
            Err(e) => return Err(e.into()),
        };

        let incoming = payload.len() as u64;
        if let Some(limit) = self.config.size_limit()
            && current + incoming > limit
        {
            warn!(session = %session_id, current, incoming, limit, "size limit exceeded");
            return Err(StoreError::SizeExceeded {
                current,
                incoming,
                limit,
            });
        }

        if current != claimed_offset {
            debug!(
                session = %session_id,
                current,
                claimed_offset,
                "offset mismatch, skipping write"
            );
            return Ok(current);
        }

        if let Some(expected) = checksum.filter(|c| !c.is_empty())
            && checksum_bytes(payload) != expected
        {
            warn!(session = %session_id, offset = current, "chunk checksum mismatch");
            return Err(StoreError::ChecksumMismatch);
        }

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(entry.temp_path())
            .await?;
        file.write_all(payload).await?;
        file.sync_data().await?;

        let size = current + incoming;
        debug!(session = %session_id, offset = current, size, "chunk appended");
        Ok(size)
    }

    /// Finalizes a session: renames the temp artifact to its final name.
    ///
    /// Re-checks the overwrite rule, since time has passed since `open`.
    /// When `mtime_millis` is given the final file's modification time is
    /// set to it, rounded to whole seconds. Returns the final size.
    ///
    /// Closing a recently finalized session again returns the same size
    /// without touching the file, so a close retried after a lost reply
    /// succeeds.
    pub async fn close(
        &self,
        target_name: &str,
        session_id: SessionId,
        mtime_millis: Option<i64>,
        overwrite: bool,
    ) -> Result<u64, StoreError> {
        self.check_name(target_name)?;
        let entry = self.registry.entry(target_name, session_id).await;
        let _guard = entry.lock().await;

        if !entry.exists().await {
            self.registry.forget(target_name, session_id).await;
            if let Some(size) = self.registry.finalized_size(target_name, session_id).await {
                debug!(session = %session_id, size, "close replayed for finalized session");
                return Ok(size);
            }
            return Err(StoreError::UnknownSession(session_id));
        }
        self.check_overwrite(target_name, overwrite).await?;

        let final_path = self.config.storage_dir().join(target_name);
        if let Some(parent) = final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(entry.temp_path(), &final_path).await?;

        if let Some(millis) = mtime_millis
            && let Err(e) = stamp_mtime(&final_path, millis).await
        {
            warn!(session = %session_id, name = %target_name, "could not set mtime: {e}");
        }

        let size = tokio::fs::metadata(&final_path).await.map(|m| m.len());
        if let Ok(size) = size {
            self.registry
                .record_finalized(target_name, session_id, size)
                .await;
        }
        self.registry.forget(target_name, session_id).await;
        let size = size?;

        info!(session = %session_id, name = %target_name, size, "session finalized");
        Ok(size)
    }

    /// Aborts a session, deleting its temp artifact if present.
    ///
    /// Never fails because the artifact is already gone.
    pub async fn remove(&self, target_name: &str, session_id: SessionId) -> Result<(), StoreError> {
        self.check_name(target_name)?;
        let entry = self.registry.entry(target_name, session_id).await;
        let _guard = entry.lock().await;

        match tokio::fs::remove_file(entry.temp_path()).await {
            Ok(()) => info!(session = %session_id, name = %target_name, "session removed"),
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                debug!(session = %session_id, "remove: temp artifact already absent");
            }
            Err(e) => return Err(e.into()),
        }

        self.registry.forget(target_name, session_id).await;
        Ok(())
    }

    /// Returns `true` if the session's temp artifact exists.
    pub async fn session_exists(&self, target_name: &str, session_id: SessionId) -> bool {
        self.registry.session_exists(target_name, session_id).await
    }

    /// Validates a target name and keeps it out of a temp directory nested
    /// in the storage directory.
    fn check_name(&self, target_name: &str) -> Result<(), StoreError> {
        validate_target_name(target_name)?;
        if let Some(reserved) = self.config.reserved_name() {
            let first = Path::new(target_name)
                .components()
                .find(|c| !matches!(c, Component::CurDir));
            if first == Some(Component::Normal(reserved)) {
                return Err(StoreError::InvalidName(format!(
                    "{target_name} is inside the temp directory"
                )));
            }
        }
        Ok(())
    }

    async fn check_overwrite(&self, target_name: &str, overwrite: bool) -> Result<(), StoreError> {
        let final_path = self.config.storage_dir().join(target_name);
        let exists = tokio::fs::try_exists(&final_path).await?;
        if exists && !(overwrite && self.config.overwrite_allowed()) {
            return Err(StoreError::AlreadyExists(target_name.to_string()));
        }
        Ok(())
    }
}

/// Sets the modification time of `path` to `millis`, rounded to seconds.
async fn stamp_mtime(path: &Path, millis: i64) -> Result<(), StoreError> {
    let secs = (millis as f64 / 1000.0).round() as i64;
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        filetime::set_file_mtime(&path, FileTime::from_unix_time(secs, 0))
    })
    .await
    .map_err(|e| StoreError::Io(std::io::Error::other(e)))??;
    Ok(())
}
