//! Resolution and creation of the process temp dir that holds the
//! listening socket and the status fifo.

use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use crate::errors::StartupError;

/// `$PASSENGER_TMPDIR` when set and non-empty (the parent points every
/// process of one instance at the same dir), else a pid-suffixed dir under
/// the system temp dir.
pub fn passenger_temp_dir() -> PathBuf {
    if let Ok(dir) = env::var("PASSENGER_TMPDIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    let base = env::var("TMPDIR")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "/tmp".to_string());
    PathBuf::from(base).join(format!("passenger.{}", std::process::id()))
}

/// Create the temp dir if absent (mode 0700) and return its path.
pub fn create_passenger_temp_dir() -> Result<PathBuf, StartupError> {
    let dir = passenger_temp_dir();
    if !dir.is_dir() {
        fs::create_dir_all(&dir).map_err(|e| StartupError::TempDir {
            path: dir.clone(),
            source: e,
        })?;
        let _ = fs::set_permissions(&dir, fs::Permissions::from_mode(0o700));
    }
    Ok(dir)
}
