/*!
The admin channel: a one-directional pipe inherited from the parent. Its
first use delivers the shared secret; afterwards it doubles as the shutdown
signaler — any byte, or the parent closing its end, means "shut down".
*/

use nix::errno::Errno;

use crate::errors::StartupError;
use crate::fd::OwnedFd;

/// Length of the shared secret, in bytes. Clients prefix every connection
/// with it, and the parent writes it to the admin pipe on startup.
pub const PASSWORD_LEN: usize = 64;

/// Read exactly [`PASSWORD_LEN`] bytes from the admin pipe. A short read is
/// fatal: without the secret no connection can ever be authenticated.
pub fn receive_password(pipe: &OwnedFd) -> Result<Vec<u8>, StartupError> {
    let mut buf = [0u8; PASSWORD_LEN];
    let mut filled = 0;
    while filled < buf.len() {
        match nix::unistd::read(pipe.raw(), &mut buf[filled..]) {
            Ok(0) => {
                return Err(StartupError::AdminPipe(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "admin pipe closed before the full password arrived",
                )))
            }
            Ok(n) => filled += n,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                return Err(StartupError::AdminPipe(std::io::Error::from_raw_os_error(
                    e as i32,
                )))
            }
        }
    }
    Ok(buf.to_vec())
}

/// Block until the parent requests shutdown: one byte arriving or the pipe
/// reaching EOF. Read errors other than `EINTR` are treated as a shutdown
/// request too — a broken admin channel leaves no way to control the
/// process.
pub fn wait_for_shutdown(pipe: &OwnedFd) {
    let mut buf = [0u8; 1];
    loop {
        match nix::unistd::read(pipe.raw(), &mut buf) {
            Ok(_) => return,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "admin pipe read failed; shutting down");
                return;
            }
        }
    }
}
