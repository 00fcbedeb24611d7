//! Error mapping guide:
//! - Per-connection failures never leave the proxy; they are logged there
//!   and the connection dies.
//! - `StartupError` covers everything before the workers are launched and
//!   always maps to exit code 1; exit code 0 is reserved for a clean
//!   shutdown via the admin pipe.

use std::fmt;
use std::io;
use std::path::PathBuf;

#[derive(Debug)]
pub enum StartupError {
    /// The admin pipe failed before or during the password handshake.
    AdminPipe(io::Error),
    TempDir { path: PathBuf, source: io::Error },
    Socket { path: PathBuf, source: io::Error },
    WorkerSpawn(io::Error),
}

impl fmt::Display for StartupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupError::AdminPipe(e) => {
                write!(f, "could not read the password from the admin pipe: {e}")
            }
            StartupError::TempDir { path, source } => {
                write!(
                    f,
                    "cannot create temp directory '{}': {source}",
                    path.display()
                )
            }
            StartupError::Socket { path, source } => {
                write!(
                    f,
                    "cannot listen on Unix socket '{}': {source}",
                    path.display()
                )
            }
            StartupError::WorkerSpawn(e) => write!(f, "cannot spawn worker thread: {e}"),
        }
    }
}

impl std::error::Error for StartupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StartupError::AdminPipe(e)
            | StartupError::TempDir { source: e, .. }
            | StartupError::Socket { source: e, .. }
            | StartupError::WorkerSpawn(e) => Some(e),
        }
    }
}

/// Startup failures are indistinguishable to the parent; it only restarts
/// on a non-zero exit.
pub fn exit_code_for_startup_error(_e: &StartupError) -> u8 {
    1
}
