//! Reference-counted file descriptor ownership.

use std::os::unix::io::RawFd;
use std::sync::Arc;

/// A kernel handle with shared ownership. Clones share the handle; the
/// underlying descriptor is closed exactly once, when the last clone is
/// dropped. Pass `raw()` to read/write primitives as if it were the
/// descriptor itself.
#[derive(Clone, Debug)]
pub struct OwnedFd {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    fd: RawFd,
}

impl OwnedFd {
    /// Take ownership of a raw handle, e.g. an `accept` result or an
    /// inherited descriptor. The handle must be valid and not owned
    /// elsewhere.
    pub fn new(fd: RawFd) -> Self {
        OwnedFd {
            inner: Arc::new(Inner { fd }),
        }
    }

    pub fn raw(&self) -> RawFd {
        self.inner.fd
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Close is best-effort; there is no caller left to propagate to.
        if let Err(e) = nix::unistd::close(self.fd) {
            tracing::warn!(fd = self.fd, error = %e, "failed to close file descriptor");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::OwnedFd;
    use nix::fcntl::{fcntl, FcntlArg};

    fn fd_is_open(fd: i32) -> bool {
        fcntl(fd, FcntlArg::F_GETFD).is_ok()
    }

    #[test]
    fn closes_once_on_last_drop() {
        let (r, w) = nix::unistd::pipe().expect("pipe");
        let owned = OwnedFd::new(r);
        let clone = owned.clone();
        assert_eq!(owned.raw(), clone.raw());

        drop(owned);
        assert!(fd_is_open(clone.raw()), "fd closed while a clone is alive");

        let raw = clone.raw();
        drop(clone);
        assert!(!fd_is_open(raw), "fd still open after the last clone dropped");

        let _ = nix::unistd::close(w);
    }

    #[test]
    fn raw_is_usable_for_io() {
        let (r, w) = nix::unistd::pipe().expect("pipe");
        let read_end = OwnedFd::new(r);
        let write_end = OwnedFd::new(w);

        nix::unistd::write(write_end.raw(), b"ping").expect("write");
        let mut buf = [0u8; 4];
        let n = nix::unistd::read(read_end.raw(), &mut buf).expect("read");
        assert_eq!(&buf[..n], b"ping");
    }
}
