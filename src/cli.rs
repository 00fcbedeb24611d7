use clap::Parser;
use std::path::PathBuf;

/// Helper broker between the front-end HTTP server and backend application
/// workers. All arguments are positional and supplied by the parent
/// process; the admin pipe descriptor is inherited.
#[derive(Parser, Debug)]
#[command(name = "helper-broker", version)]
pub(crate) struct Cli {
    /// Root directory of the owning product (locates the spawn helper)
    pub passenger_root: PathBuf,
    /// Interpreter used to run spawned application workers
    pub ruby: PathBuf,
    /// File descriptor number of the inherited admin pipe
    pub admin_pipe_fd: i32,
    /// Log level: 0=error, 1=warn, 2=info, 3=debug, 4+=trace
    pub log_level: u32,
    /// Maximum number of concurrently active backend sessions
    pub max_pool_size: usize,
    /// Maximum concurrent sessions per application
    pub max_instances_per_app: usize,
    /// Seconds an idle application worker may linger before eviction
    pub pool_idle_time: u64,
}
