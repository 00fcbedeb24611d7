/*!
helper-broker: the process that sits between a front-end HTTP server and a
pool of backend application workers.

The front end connects over a Unix domain socket, authenticates with a
64-byte shared secret, and sends one length-prefixed key/value frame plus
the request body. A worker thread checks a session out of the application
pool, streams the request through it, and rewrites the backend's raw
response into an HTTP/1.1 response. The inherited admin pipe delivers the
secret at startup and signals shutdown when it closes.
*/

pub mod admin;
pub mod broker;
pub mod errors;
pub mod fd;
pub mod pool;
pub mod process_pool;
pub mod proxy;
mod reporter;
pub mod scgi;
pub mod status;
pub mod tempdir;
#[cfg(feature = "otel")]
pub mod telemetry;
mod worker;

pub use admin::PASSWORD_LEN;
pub use broker::Broker;
pub use errors::{exit_code_for_startup_error, StartupError};
pub use fd::OwnedFd;
pub use pool::{AppPool, AppSession, CheckoutError, PoolOptions, PoolStatus, SpawnFailure};
pub use process_pool::{ProcessPool, ProcessPoolConfig};
pub use proxy::{ProxyOutcome, RequestProxy};
pub use scgi::{FrameParser, ParseState, MAX_HEADER_SIZE};
pub use status::StatusExtractor;
