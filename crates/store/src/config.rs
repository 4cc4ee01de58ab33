use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use crate::StoreError;

/// Immutable, validated configuration of an [`AssemblyStore`](crate::AssemblyStore).
///
/// `temp_dir` must live on the same filesystem as `storage_dir`: finalize is
/// a `rename`, which cannot cross devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    storage_dir: PathBuf,
    temp_dir: PathBuf,
    size_limit: u64,
    overwrite_allowed: bool,
}

impl StoreConfig {
    /// Creates a config with no size limit and overwrites disallowed.
    pub fn new(
        storage_dir: impl Into<PathBuf>,
        temp_dir: impl Into<PathBuf>,
    ) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.into();
        let temp_dir = temp_dir.into();

        if storage_dir.as_os_str().is_empty() {
            return Err(StoreError::InvalidConfig("storage_dir is empty".into()));
        }
        if temp_dir.as_os_str().is_empty() {
            return Err(StoreError::InvalidConfig("temp_dir is empty".into()));
        }

        Ok(Self {
            storage_dir,
            temp_dir,
            size_limit: 0,
            overwrite_allowed: false,
        })
    }

    /// Sets the per-file size ceiling in bytes (0 = unlimited).
    pub fn with_size_limit(mut self, size_limit: u64) -> Self {
        self.size_limit = size_limit;
        self
    }

    /// Allows clients that ask for it to replace existing final files.
    pub fn with_overwrite_allowed(mut self, allowed: bool) -> Self {
        self.overwrite_allowed = allowed;
        self
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// First path component of `temp_dir` below `storage_dir`, when the
    /// temp directory is nested inside storage.
    ///
    /// Target names starting with it are refused.
    pub fn reserved_name(&self) -> Option<&OsStr> {
        let nested = self.temp_dir.strip_prefix(&self.storage_dir).ok()?;
        nested.components().find_map(|c| match c {
            Component::Normal(name) => Some(name),
            _ => None,
        })
    }

    /// Size ceiling in bytes, `None` when unlimited.
    pub fn size_limit(&self) -> Option<u64> {
        (self.size_limit > 0).then_some(self.size_limit)
    }

    pub fn overwrite_allowed(&self) -> bool {
        self.overwrite_allowed
    }
}
