//! Desired-state YAML file.
//!
//! The state file is the input a caller edits (or a discovery component
//! generates) to describe what the proxy should serve. Saves are atomic:
//! serialize → `<file>.tmp` sibling → `chmod 0600` → `rename`.

use std::path::{Path, PathBuf};

use crate::error::StateError;
use crate::types::DesiredState;

/// Load a desired state from `path`.
///
/// Returns `StateError::NotFound` if absent,
/// `StateError::Parse` (with path + line context) if malformed YAML.
pub fn load_state_at(path: &Path) -> Result<DesiredState, StateError> {
    if !path.exists() {
        return Err(StateError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&contents).map_err(|e| StateError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Atomically save `state` to `path`, creating the parent directory.
pub fn save_state_at(path: &Path, state: &DesiredState) -> Result<(), StateError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp_path = tmp_path_for(path);
    let yaml = serde_yaml::to_string(state)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    if let Err(err) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StateError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StateError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
