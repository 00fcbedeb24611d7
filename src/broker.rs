/*!
The connection broker: owns the listening socket, the worker-thread set and
the shared state, and drives startup and shutdown.

Startup order matters: temp dir and pool exist before the socket is bound,
the socket before the workers, the workers before the status reporter, and
only then does the main thread block on the admin pipe. Any failure before
the workers launch aborts startup (exit code 1).
*/

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::socket::{bind, listen, socket, AddressFamily, SockFlag, SockType, UnixAddr};
use nix::sys::stat::{fchmodat, FchmodatFlags, Mode};
use tracing::{debug, trace};

use crate::admin::{self, PASSWORD_LEN};
use crate::errors::StartupError;
use crate::fd::OwnedFd;
use crate::pool::AppPool;
use crate::proxy::RequestProxy;
use crate::reporter::Reporter;
use crate::worker::Worker;

/// Pending-connection backlog on the listening socket.
const LISTEN_BACKLOG: usize = 50;
/// Socket file name inside the process temp dir.
const SOCKET_FILE_NAME: &str = "helper_server.sock";

pub struct Broker {
    secret: Vec<u8>,
    listen: OwnedFd,
    admin_pipe: OwnedFd,
    socket_path: PathBuf,
    temp_dir: PathBuf,
    pool: Arc<dyn AppPool>,
    worker_count: usize,
    running: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    reporter: Option<Reporter>,
}

impl Broker {
    /// Bind the listening socket and assemble the broker. `temp_dir` must
    /// already exist; the socket lands at `<temp_dir>/helper_server.sock`
    /// with mode `0777` plus the sticky bit.
    pub fn new(
        secret: Vec<u8>,
        admin_pipe: OwnedFd,
        pool: Arc<dyn AppPool>,
        temp_dir: &Path,
        max_pool_size: usize,
    ) -> Result<Self, StartupError> {
        debug_assert_eq!(secret.len(), PASSWORD_LEN);
        let socket_path = temp_dir.join(SOCKET_FILE_NAME);
        let listen = bind_unix_listener(&socket_path)?;
        Ok(Broker {
            secret,
            listen,
            admin_pipe,
            socket_path,
            temp_dir: temp_dir.to_path_buf(),
            pool,
            // Oversubscribe so workers blocked on slow backends do not
            // starve accept.
            worker_count: 4 * max_pool_size,
            running: Arc::new(AtomicBool::new(true)),
            workers: Vec::new(),
            reporter: None,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Launch the workers and the status reporter, then block until the
    /// admin pipe signals shutdown. Returns after every worker has joined.
    pub fn run(&mut self) -> Result<(), StartupError> {
        self.spawn_workers()?;
        self.reporter = Some(Reporter::start(
            &self.temp_dir,
            self.pool.clone(),
            self.running.clone(),
        ));
        debug!(
            socket = %self.socket_path.display(),
            workers = self.worker_count,
            "broker accepting connections"
        );

        admin::wait_for_shutdown(&self.admin_pipe);
        debug!("shutdown requested via admin pipe");
        self.shutdown();
        Ok(())
    }

    fn spawn_workers(&mut self) -> Result<(), StartupError> {
        let proxy = Arc::new(RequestProxy::new(
            self.secret.clone(),
            self.pool.clone(),
            self.running.clone(),
        ));
        for id in 1..=self.worker_count {
            let worker = Worker {
                id,
                listen: self.listen.clone(),
                proxy: proxy.clone(),
                running: self.running.clone(),
            };
            self.workers
                .push(worker.spawn().map_err(StartupError::WorkerSpawn)?);
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        if let Some(reporter) = self.reporter.take() {
            reporter.join();
        }
        let _ = fs::remove_file(&self.socket_path);
        trace!("all workers joined; broker stopped");
    }
}

impl Drop for Broker {
    /// Tolerates being reached at any point after construction: `shutdown`
    /// is idempotent and joining an empty worker set is a no-op. The listen
    /// socket and admin pipe close with their `OwnedFd`s.
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Create, bind and listen on a Unix stream socket, world-accessible with
/// the sticky bit like a shared tmp directory. The socket is nonblocking so
/// worker accept loops can observe shutdown. A stale socket file from a
/// previous run is removed first.
fn bind_unix_listener(path: &Path) -> Result<OwnedFd, StartupError> {
    let socket_error = |source: nix::errno::Errno| StartupError::Socket {
        path: path.to_path_buf(),
        source: std::io::Error::from_raw_os_error(source as i32),
    };

    let _ = fs::remove_file(path);

    let fd = socket(
        AddressFamily::Unix,
        SockType::Stream,
        SockFlag::empty(),
        None,
    )
    .map_err(socket_error)?;
    // From here on the fd closes itself on every error path.
    let fd = OwnedFd::new(fd);

    let addr = UnixAddr::new(path).map_err(socket_error)?;
    bind(fd.raw(), &addr).map_err(socket_error)?;
    listen(fd.raw(), LISTEN_BACKLOG).map_err(socket_error)?;
    fchmodat(
        None,
        path,
        Mode::from_bits_truncate(0o1777),
        FchmodatFlags::FollowSymlink,
    )
    .map_err(socket_error)?;
    fcntl(fd.raw(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK)).map_err(socket_error)?;

    Ok(fd)
}
