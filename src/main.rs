use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;

mod cli;

use helper_broker::{
    admin, exit_code_for_startup_error, tempdir, Broker, OwnedFd, ProcessPool, ProcessPoolConfig,
    StartupError,
};

fn main() -> ExitCode {
    let cli = cli::Cli::parse();

    ignore_sigpipe();
    // When telemetry is enabled it installs its own subscriber and the
    // plain stderr fallback below becomes a no-op. The guard must live for
    // the whole process so spans flush on exit.
    #[cfg(feature = "otel")]
    let _telemetry = helper_broker::telemetry::telemetry_init();
    init_logging(cli.log_level);
    install_abort_on_panic();

    match run(cli) {
        Ok(()) => {
            tracing::trace!("helper broker exited");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::from(exit_code_for_startup_error(&e))
        }
    }
}

fn run(cli: cli::Cli) -> Result<(), StartupError> {
    let admin_pipe = OwnedFd::new(cli.admin_pipe_fd);
    let secret = admin::receive_password(&admin_pipe)?;
    tracing::trace!("password received");

    let temp_dir = tempdir::create_passenger_temp_dir()?;
    let pool = Arc::new(ProcessPool::new(ProcessPoolConfig {
        passenger_root: cli.passenger_root,
        ruby: cli.ruby,
        max_pool_size: cli.max_pool_size,
        max_instances_per_app: cli.max_instances_per_app,
        pool_idle_time: cli.pool_idle_time,
    }));

    let mut broker = Broker::new(secret, admin_pipe, pool, &temp_dir, cli.max_pool_size)?;
    tracing::debug!(pid = std::process::id(), "helper broker started");
    broker.run()
}

/// Broken pipes must surface as write errors on the affected connection,
/// not kill the process. Set once, before any socket exists.
fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}

/// A panic in any thread is a broker bug: log it and abort the process.
fn install_abort_on_panic() {
    std::panic::set_hook(Box::new(|info| {
        tracing::error!("fatal: {info}");
        std::process::abort();
    }));
}

fn init_logging(log_level: u32) {
    let default = match log_level {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
