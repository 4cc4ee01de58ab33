use std::path::{Component, Path};

use crate::StoreError;

/// Validates that a target name stays inside the storage directory.
///
/// Rejects:
/// - Empty names
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Parent directory traversal (`..`)
/// - Windows prefix components (`C:`, `\\server`)
/// - Names with no file component (`.`, `./`)
pub fn validate_target_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() {
        return Err(StoreError::InvalidName("empty name".into()));
    }

    let path = Path::new(name);

    if path.is_absolute() {
        return Err(StoreError::InvalidName(format!(
            "absolute path not allowed: {name}"
        )));
    }

    let mut has_file = false;
    for component in path.components() {
        match component {
            Component::ParentDir => {
                return Err(StoreError::InvalidName(format!(
                    "parent directory traversal not allowed: {name}"
                )));
            }
            Component::Prefix(_) => {
                return Err(StoreError::InvalidName(format!(
                    "path prefix not allowed: {name}"
                )));
            }
            Component::RootDir => {
                return Err(StoreError::InvalidName(format!(
                    "absolute path not allowed: {name}"
                )));
            }
            Component::Normal(_) => has_file = true,
            Component::CurDir => {}
        }
    }

    if !has_file {
        return Err(StoreError::InvalidName(format!("no file name in: {name}")));
    }

    Ok(())
}
