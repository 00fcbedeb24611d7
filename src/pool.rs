/*!
The application-pool interface the broker consumes.

The pool itself (spawning, caching, idle eviction, per-app limits) is an
external collaborator; the broker only checks out one session per request
and streams through it. [`crate::process_pool`] provides a minimal concrete
implementation so the binary runs stand-alone.
*/

use std::io::{self, Read};
use std::path::PathBuf;

/// Options resolved from the request frame, handed to `checkout`.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Application root, derived by canonicalizing `DOCUMENT_ROOT/..`.
    pub app_root: PathBuf,
    /// Whether a capacity wait joins the shared queue (`PASSENGER_USE_GLOBAL_QUEUE == "true"`).
    pub use_global_queue: bool,
    /// `PASSENGER_ENVIRONMENT`; `None` leaves the pool default.
    pub environment: Option<String>,
    /// `PASSENGER_SPAWN_METHOD`; `None` leaves the pool default.
    pub spawn_method: Option<String>,
}

impl PoolOptions {
    pub fn new(app_root: PathBuf) -> Self {
        PoolOptions {
            app_root,
            use_global_queue: false,
            environment: None,
            spawn_method: None,
        }
    }
}

/// Structured error raised when the pool cannot produce a usable worker.
/// Carries a human-readable message and optionally a pre-rendered HTML
/// diagnostic page.
#[derive(Debug, Clone)]
pub struct SpawnFailure {
    message: String,
    error_page: Option<String>,
}

impl SpawnFailure {
    pub fn new(message: impl Into<String>) -> Self {
        SpawnFailure {
            message: message.into(),
            error_page: None,
        }
    }

    pub fn with_error_page(mut self, page: impl Into<String>) -> Self {
        self.error_page = Some(page.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn error_page(&self) -> Option<&str> {
        self.error_page.as_deref()
    }
}

#[derive(Debug)]
pub enum CheckoutError {
    /// The pool could not spawn or hand out a worker; answered to the
    /// client as a 500 with the failure payload.
    SpawnFailed(SpawnFailure),
    /// Any other pool-side failure; the connection is dropped.
    Io(io::Error),
}

/// Aggregate counters for the status reporter.
#[derive(Debug, Clone, Default)]
pub struct PoolStatus {
    pub active: usize,
    pub capacity: usize,
    pub global_queue_size: usize,
}

/// A checked-out conversation with one backend worker, valid for one
/// request: write the header blob and body, half-close, then read the
/// response stream.
pub trait AppSession: Send {
    fn send_headers(&mut self, data: &[u8]) -> io::Result<()>;
    fn send_body_block(&mut self, data: &[u8]) -> io::Result<()>;
    /// Signal end-of-request on the write side. The backend sees EOF and
    /// starts (or finishes) producing the response.
    fn shutdown_writer(&mut self) -> io::Result<()>;
    /// The response stream, read until EOF.
    fn stream(&mut self) -> &mut dyn Read;
}

/// The pool operations the broker and the status reporter use. Must be
/// internally thread-safe: every worker thread calls `checkout`
/// concurrently.
pub trait AppPool: Send + Sync {
    fn checkout(&self, options: &PoolOptions) -> Result<Box<dyn AppSession>, CheckoutError>;
    fn status(&self) -> PoolStatus;
}
