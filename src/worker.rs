//! Worker threads: each one loops accept → proxy on the shared listening
//! socket. The kernel arbitrates which worker wakes for a connection; there
//! is no dispatcher and no per-worker queue.

use std::os::unix::io::FromRawFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use nix::errno::Errno;
use tracing::{error, trace};

use crate::fd::OwnedFd;
use crate::proxy::{ProxyOutcome, RequestProxy};

/// Per-worker stack. Request handling allocates its buffers on the stack,
/// so this must cover the 16 KiB and 32 KiB read buffers with headroom.
const WORKER_STACK_SIZE: usize = 128 * 1024;
/// How often an idle worker re-checks the running flag while polling accept.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Socket timeouts on accepted connections; bounds how long a shutdown can
/// be stalled by a blocking read or write.
const CONN_IO_TIMEOUT: Duration = Duration::from_millis(500);

pub(crate) struct Worker {
    pub id: usize,
    pub listen: OwnedFd,
    pub proxy: Arc<RequestProxy>,
    pub running: Arc<AtomicBool>,
}

impl Worker {
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("worker-{}", self.id))
            .stack_size(WORKER_STACK_SIZE)
            .spawn(move || self.run())
    }

    fn run(self) {
        while self.running.load(Ordering::SeqCst) {
            let fd = match nix::sys::socket::accept(self.listen.raw()) {
                Ok(fd) => fd,
                Err(Errno::EAGAIN) => {
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                    continue;
                }
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    // Accept failing for any other reason means the listen
                    // socket is gone or the process is out of resources;
                    // neither is survivable.
                    error!(worker = self.id, error = %e, "accept failed on the listening socket");
                    std::process::abort();
                }
            };

            let mut conn = unsafe { UnixStream::from_raw_fd(fd) };
            let _ = conn.set_read_timeout(Some(CONN_IO_TIMEOUT));
            let _ = conn.set_write_timeout(Some(CONN_IO_TIMEOUT));

            match self.proxy.handle(&mut conn) {
                ProxyOutcome::Completed => {}
                ProxyOutcome::Cancelled => break,
            }
            // `conn` drops here: the client descriptor is closed no matter
            // how the request ended.
        }
        trace!(worker = self.id, "worker thread exiting");
    }
}
