/*!
A minimal concrete [`AppPool`]: one backend process per checkout.

The production pool (caching, idle eviction, load balancing) lives outside
this crate; this implementation keeps the binary self-contained. It
enforces the configured concurrency caps, spawns the helper per request,
and speaks to it over stdin/stdout: the raw header blob and body go to the
child's stdin, `shutdown_writer` closes it, and the response is the child's
stdout.
*/

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::{Arc, Condvar, Mutex};

use tracing::{debug, trace};

use crate::pool::{AppPool, AppSession, CheckoutError, PoolOptions, PoolStatus, SpawnFailure};

pub struct ProcessPoolConfig {
    /// Root directory of the owning product; only used to locate the spawn
    /// helper.
    pub passenger_root: PathBuf,
    /// Interpreter that runs the spawn helper.
    pub ruby: PathBuf,
    pub max_pool_size: usize,
    pub max_instances_per_app: usize,
    /// Accepted for interface parity with the production pool. This pool
    /// caches nothing, so there is nothing to evict.
    pub pool_idle_time: u64,
}

pub struct ProcessPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    config: ProcessPoolConfig,
    spawn_helper: PathBuf,
    state: Mutex<PoolState>,
    capacity: Condvar,
}

#[derive(Default)]
struct PoolState {
    active: usize,
    per_app: HashMap<PathBuf, usize>,
    global_queue_size: usize,
}

impl ProcessPool {
    pub fn new(config: ProcessPoolConfig) -> Self {
        let spawn_helper = find_spawn_helper(&config.passenger_root);
        debug!(helper = %spawn_helper.display(), "application pool ready");
        ProcessPool {
            inner: Arc::new(PoolInner {
                config,
                spawn_helper,
                state: Mutex::new(PoolState::default()),
                capacity: Condvar::new(),
            }),
        }
    }
}

/// `<root>/bin/passenger-spawn-server` when present, else the library
/// location.
fn find_spawn_helper(root: &Path) -> PathBuf {
    let bin = root.join("bin/passenger-spawn-server");
    if bin.is_file() {
        bin
    } else {
        root.join("lib/phusion_passenger/passenger-spawn-server")
    }
}

impl AppPool for ProcessPool {
    fn checkout(&self, options: &PoolOptions) -> Result<Box<dyn AppSession>, CheckoutError> {
        self.inner.reserve_slot(options);

        let mut cmd = Command::new(&self.inner.config.ruby);
        cmd.arg(&self.inner.spawn_helper)
            .arg(&options.app_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(environment) = &options.environment {
            cmd.env("PASSENGER_ENVIRONMENT", environment);
        }
        if let Some(method) = &options.spawn_method {
            cmd.env("PASSENGER_SPAWN_METHOD", method);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.inner.release_slot(&options.app_root);
                return Err(CheckoutError::SpawnFailed(SpawnFailure::new(format!(
                    "could not spawn an application worker for {}: {}",
                    options.app_root.display(),
                    e
                ))));
            }
        };

        let stdin = child.stdin.take();
        let stdout = match child.stdout.take() {
            Some(out) => out,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                self.inner.release_slot(&options.app_root);
                return Err(CheckoutError::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "spawned worker has no stdout",
                )));
            }
        };
        trace!(app_root = %options.app_root.display(), "application worker spawned");

        Ok(Box::new(ProcessSession {
            inner: self.inner.clone(),
            app_root: options.app_root.clone(),
            child,
            stdin,
            stdout,
        }))
    }

    fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock().expect("pool state poisoned");
        PoolStatus {
            active: state.active,
            capacity: self.inner.config.max_pool_size,
            global_queue_size: state.global_queue_size,
        }
    }
}

impl PoolInner {
    /// Block until both the total and the per-app caps admit one more
    /// session, then claim the slot. Waits with `use_global_queue` count
    /// against the shared queue statistic.
    fn reserve_slot(&self, options: &PoolOptions) {
        let mut state = self.state.lock().expect("pool state poisoned");
        let mut queued = false;
        loop {
            let app_active = state
                .per_app
                .get(&options.app_root)
                .copied()
                .unwrap_or(0);
            let has_capacity = state.active < self.config.max_pool_size
                && app_active < self.config.max_instances_per_app;
            if has_capacity {
                break;
            }
            if options.use_global_queue && !queued {
                state.global_queue_size += 1;
                queued = true;
            }
            state = self.capacity.wait(state).expect("pool state poisoned");
        }
        if queued {
            state.global_queue_size -= 1;
        }
        state.active += 1;
        *state.per_app.entry(options.app_root.clone()).or_insert(0) += 1;
    }

    fn release_slot(&self, app_root: &Path) {
        let mut state = self.state.lock().expect("pool state poisoned");
        state.active = state.active.saturating_sub(1);
        if let Some(count) = state.per_app.get_mut(app_root) {
            *count -= 1;
            if *count == 0 {
                state.per_app.remove(app_root);
            }
        }
        drop(state);
        self.capacity.notify_all();
    }
}

struct ProcessSession {
    inner: Arc<PoolInner>,
    app_root: PathBuf,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: ChildStdout,
}

impl ProcessSession {
    fn writer(&mut self) -> io::Result<&mut ChildStdin> {
        self.stdin.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "request writer already closed")
        })
    }
}

impl AppSession for ProcessSession {
    fn send_headers(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer()?.write_all(data)
    }

    fn send_body_block(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer()?.write_all(data)
    }

    fn shutdown_writer(&mut self) -> io::Result<()> {
        // Dropping the handle closes the pipe; the child sees EOF.
        self.stdin.take();
        Ok(())
    }

    fn stream(&mut self) -> &mut dyn Read {
        &mut self.stdout
    }
}

impl Drop for ProcessSession {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.inner.release_slot(&self.app_root);
    }
}
