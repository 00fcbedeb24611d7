//! Status-reporter sidecar: a FIFO in the process temp dir that renders the
//! pool's counters to whoever reads it (`cat <tempdir>/status.fifo`).

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use tracing::warn;

use crate::fd::OwnedFd;
use crate::pool::{AppPool, PoolStatus};

const FIFO_FILE_NAME: &str = "status.fifo";
/// How often the reporter polls for a reader on the FIFO.
const READER_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub(crate) struct Reporter {
    handle: Option<JoinHandle<()>>,
}

impl Reporter {
    pub fn start(temp_dir: &Path, pool: Arc<dyn AppPool>, running: Arc<AtomicBool>) -> Self {
        let fifo_path = temp_dir.join(FIFO_FILE_NAME);
        let handle = thread::Builder::new()
            .name("status-reporter".to_string())
            .spawn(move || serve(&fifo_path, pool, running))
            .map_err(|e| warn!(error = %e, "could not start the status reporter"))
            .ok();
        Reporter { handle }
    }

    pub fn join(self) {
        if let Some(handle) = self.handle {
            let _ = handle.join();
        }
    }
}

fn serve(fifo_path: &Path, pool: Arc<dyn AppPool>, running: Arc<AtomicBool>) {
    let _ = std::fs::remove_file(fifo_path);
    if let Err(e) = nix::unistd::mkfifo(fifo_path, Mode::from_bits_truncate(0o600)) {
        warn!(path = %fifo_path.display(), error = %e, "could not create the status fifo");
        return;
    }

    while running.load(Ordering::SeqCst) {
        // Opening write-only nonblocking fails with ENXIO until a reader
        // attaches; that is the rendezvous.
        match nix::fcntl::open(
            fifo_path,
            OFlag::O_WRONLY | OFlag::O_NONBLOCK,
            Mode::empty(),
        ) {
            Ok(fd) => {
                let fd = OwnedFd::new(fd);
                let report = render_report(&pool.status());
                if let Err(e) = nix::unistd::write(fd.raw(), report.as_bytes()) {
                    warn!(error = %e, "could not write the status report");
                }
                // Closing gives the reader EOF; pause before offering the
                // next report so one slow reader is not served twice.
                thread::sleep(READER_POLL_INTERVAL);
            }
            Err(Errno::ENXIO) => thread::sleep(READER_POLL_INTERVAL),
            Err(e) => {
                warn!(path = %fifo_path.display(), error = %e, "could not open the status fifo");
                thread::sleep(Duration::from_secs(1));
            }
        }
    }

    let _ = std::fs::remove_file(fifo_path);
}

fn render_report(status: &PoolStatus) -> String {
    format!(
        "---------- application pool status ----------\n\
         active       = {}\n\
         capacity     = {}\n\
         global queue = {}\n",
        status.active, status.capacity, status.global_queue_size
    )
}
