use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Directory holding `state_file`; a bare file name lives in `.`.
pub fn state_dir(state_file: &Path) -> PathBuf {
    match state_file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
