/*!
The per-connection request pipeline: authenticate, parse the request frame,
check out a backend session, stream the body through, and rewrite the
backend's raw response into an HTTP/1.1 response.

Every per-connection failure is consumed here: it is logged with context and
the connection dies, but the worker thread carries on. Only a shutdown
cancellation escapes, as [`ProxyOutcome::Cancelled`].
*/

use std::fs;
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use subtle::ConstantTimeEq;
use tracing::{debug, error, warn};

use crate::admin::PASSWORD_LEN;
use crate::pool::{AppPool, AppSession, CheckoutError, PoolOptions, SpawnFailure};
use crate::scgi::{FrameParser, ParseState};
use crate::status::StatusExtractor;

/// Read size for request headers and body.
const REQUEST_BUF_SIZE: usize = 16 * 1024;
/// Read size for the backend response stream.
const RESPONSE_BUF_SIZE: usize = 32 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyOutcome {
    /// The connection is finished (successfully or not); accept the next one.
    Completed,
    /// Shutdown was requested mid-request; the worker must exit.
    Cancelled,
}

enum ConnError {
    Cancelled,
    /// The client violated the wire protocol; logged and dropped.
    Protocol(String),
    /// I/O failed mid-request on either side.
    Io {
        context: &'static str,
        source: io::Error,
    },
}

impl ConnError {
    fn io(context: &'static str) -> impl FnOnce(io::Error) -> ConnError {
        move |source| ConnError::Io { context, source }
    }
}

pub struct RequestProxy {
    secret: Vec<u8>,
    pool: Arc<dyn AppPool>,
    running: Arc<AtomicBool>,
}

impl RequestProxy {
    pub fn new(secret: Vec<u8>, pool: Arc<dyn AppPool>, running: Arc<AtomicBool>) -> Self {
        debug_assert_eq!(secret.len(), PASSWORD_LEN);
        RequestProxy {
            secret,
            pool,
            running,
        }
    }

    /// Serve one accepted connection to completion. The stream should carry
    /// read/write timeouts so that a shutdown interrupts blocking I/O
    /// within a bounded time.
    pub fn handle(&self, conn: &mut UnixStream) -> ProxyOutcome {
        match self.run(conn) {
            Ok(()) => ProxyOutcome::Completed,
            Err(ConnError::Cancelled) => ProxyOutcome::Cancelled,
            Err(ConnError::Protocol(msg)) => {
                error!("{msg}; dropping connection");
                ProxyOutcome::Completed
            }
            Err(ConnError::Io { context, source }) => {
                error!(error = %source, "cannot {context}; dropping connection");
                ProxyOutcome::Completed
            }
        }
    }

    fn run(&self, conn: &mut UnixStream) -> Result<(), ConnError> {
        if !self.authenticate(conn)? {
            return Err(ConnError::Protocol(
                "client did not send a correct password".to_string(),
            ));
        }

        let (parser, partial_body) = self.read_request_frame(conn)?;
        if !parser.has_header("DOCUMENT_ROOT") {
            return Err(ConnError::Protocol(
                "DOCUMENT_ROOT header is missing".to_string(),
            ));
        }
        let options = self.build_pool_options(&parser)?;

        let mut session = match self.pool.checkout(&options) {
            Ok(session) => session,
            Err(CheckoutError::SpawnFailed(failure)) => {
                warn!(
                    app_root = %options.app_root.display(),
                    "could not spawn application worker: {}",
                    failure.message()
                );
                return self.write_spawn_failure(conn, &failure);
            }
            Err(CheckoutError::Io(e)) => {
                return Err(ConnError::Io {
                    context: "check out an application session",
                    source: e,
                })
            }
        };

        session
            .send_headers(parser.header_data())
            .map_err(ConnError::io("forward request headers to the backend"))?;

        let content_length = self.content_length(&parser);
        self.send_request_body(conn, session.as_mut(), &partial_body, content_length)?;

        session
            .shutdown_writer()
            .map_err(ConnError::io("half-close the backend session"))?;

        self.forward_response(conn, session.as_mut())
    }

    /// Read exactly `PASSWORD_LEN` bytes and compare against the shared
    /// secret in constant time. EOF or a mismatch closes the connection
    /// without reading anything further.
    fn authenticate(&self, conn: &mut UnixStream) -> Result<bool, ConnError> {
        let mut buf = [0u8; PASSWORD_LEN];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_some(conn, &mut buf[filled..], "read the password")?;
            if n == 0 {
                return Ok(false);
            }
            filled += n;
        }
        Ok(bool::from(self.secret.ct_eq(&buf)))
    }

    /// Pump client bytes into the frame parser until the header frame is
    /// complete. Returns the parser and the partial body: whatever followed
    /// the frame in the final read.
    fn read_request_frame(
        &self,
        conn: &mut UnixStream,
    ) -> Result<(FrameParser, Vec<u8>), ConnError> {
        let mut parser = FrameParser::new();
        let mut partial_body = Vec::new();
        let mut buf = [0u8; REQUEST_BUF_SIZE];

        while parser.accepting_input() {
            let n = self.read_some(conn, &mut buf, "read request headers")?;
            if n == 0 {
                break;
            }
            let consumed = parser.feed(&buf[..n]);
            if parser.state() == ParseState::Done {
                partial_body.extend_from_slice(&buf[consumed..n]);
            }
        }

        if parser.state() != ParseState::Done {
            return Err(ConnError::Protocol(
                "invalid request frame received".to_string(),
            ));
        }
        Ok((parser, partial_body))
    }

    fn build_pool_options(&self, parser: &FrameParser) -> Result<PoolOptions, ConnError> {
        let document_root = parser.header("DOCUMENT_ROOT");
        let app_root = fs::canonicalize(Path::new(document_root).join(".."))
            .map_err(ConnError::io("resolve the application root"))?;

        let mut options = PoolOptions::new(app_root);
        options.use_global_queue = parser.header("PASSENGER_USE_GLOBAL_QUEUE") == "true";
        if parser.has_header("PASSENGER_ENVIRONMENT") {
            options.environment = Some(parser.header("PASSENGER_ENVIRONMENT").to_string());
        }
        if parser.has_header("PASSENGER_SPAWN_METHOD") {
            options.spawn_method = Some(parser.header("PASSENGER_SPAWN_METHOD").to_string());
        }
        Ok(options)
    }

    /// `CONTENT_LENGTH` parsed leniently: absent or non-numeric counts as
    /// zero, the latter with a warning.
    fn content_length(&self, parser: &FrameParser) -> u64 {
        let raw = parser.header("CONTENT_LENGTH");
        if raw.is_empty() {
            return 0;
        }
        match raw.trim().parse() {
            Ok(n) => n,
            Err(_) => {
                warn!(
                    value = raw,
                    "non-numeric CONTENT_LENGTH; assuming an empty body"
                );
                0
            }
        }
    }

    /// Forward the request body: first the pre-buffered partial body
    /// (clamped to the declared length), then client reads until
    /// `content_length` bytes have been sent or the client hits EOF.
    fn send_request_body(
        &self,
        conn: &mut UnixStream,
        session: &mut dyn AppSession,
        partial_body: &[u8],
        content_length: u64,
    ) -> Result<(), ConnError> {
        let head = partial_body.len().min(content_length as usize);
        if head > 0 {
            session
                .send_body_block(&partial_body[..head])
                .map_err(ConnError::io("forward the request body to the backend"))?;
        }
        let mut sent = head as u64;

        let mut buf = [0u8; REQUEST_BUF_SIZE];
        while sent < content_length {
            let want = (content_length - sent).min(buf.len() as u64) as usize;
            let n = self.read_some(conn, &mut buf[..want], "read the request body")?;
            if n == 0 {
                // The client gave up early; the backend gets what arrived.
                break;
            }
            session
                .send_body_block(&buf[..n])
                .map_err(ConnError::io("forward the request body to the backend"))?;
            sent += n as u64;
        }
        Ok(())
    }

    /// Read the backend stream until the status line is known, answer with
    /// a synthesized HTTP/1.1 status line plus everything buffered so far,
    /// then pump the rest verbatim.
    fn forward_response(
        &self,
        conn: &mut UnixStream,
        session: &mut dyn AppSession,
    ) -> Result<(), ConnError> {
        let mut extractor = StatusExtractor::new();
        let mut buf = [0u8; RESPONSE_BUF_SIZE];

        while !extractor.is_done() {
            self.check_cancelled()?;
            let n = session
                .stream()
                .read(&mut buf)
                .map_err(ConnError::io("read the response from the backend"))?;
            if n == 0 {
                debug!("backend closed the stream before emitting a status line");
                return Ok(());
            }
            if extractor.feed(&buf[..n]) {
                let status = extractor.status_line().unwrap_or("200 OK");
                let status_line = format!("HTTP/1.1 {status}\r\n");
                self.write_all(conn, status_line.as_bytes(), "write the response status")?;
                self.write_all(conn, extractor.buffered_bytes(), "write the response")?;
            }
        }

        loop {
            self.check_cancelled()?;
            let n = session
                .stream()
                .read(&mut buf)
                .map_err(ConnError::io("read the response from the backend"))?;
            if n == 0 {
                return Ok(());
            }
            self.write_all(conn, &buf[..n], "write the response")?;
        }
    }

    /// Answer a pool spawn failure with a 500 carrying the failure payload,
    /// then finish the connection normally.
    fn write_spawn_failure(
        &self,
        conn: &mut UnixStream,
        failure: &SpawnFailure,
    ) -> Result<(), ConnError> {
        let body = failure.error_page().unwrap_or(failure.message());
        let response = format!(
            "HTTP/1.1 500 Internal Server Error\r\n\
             Status: 500 Internal Server Error\r\n\
             Connection: close\r\n\
             Content-Type: text/html; charset=utf-8\r\n\
             Content-Length: {}\r\n\
             \r\n\
             {}",
            body.len(),
            body
        );
        self.write_all(conn, response.as_bytes(), "write the spawn-failure response")
    }

    fn check_cancelled(&self) -> Result<(), ConnError> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ConnError::Cancelled)
        }
    }

    /// One read from the client, retrying on timeout while the broker is
    /// still running so a shutdown breaks the wait within one timeout
    /// interval.
    fn read_some(
        &self,
        conn: &mut UnixStream,
        buf: &mut [u8],
        context: &'static str,
    ) -> Result<usize, ConnError> {
        loop {
            self.check_cancelled()?;
            match conn.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if is_retryable(&e) => continue,
                Err(e) => {
                    return Err(ConnError::Io {
                        context,
                        source: e,
                    })
                }
            }
        }
    }

    fn write_all(
        &self,
        conn: &mut UnixStream,
        mut buf: &[u8],
        context: &'static str,
    ) -> Result<(), ConnError> {
        while !buf.is_empty() {
            self.check_cancelled()?;
            match conn.write(buf) {
                Ok(0) => {
                    return Err(ConnError::Io {
                        context,
                        source: io::Error::new(
                            io::ErrorKind::WriteZero,
                            "client closed the connection",
                        ),
                    })
                }
                Ok(n) => buf = &buf[n..],
                Err(e) if is_retryable(&e) => continue,
                Err(e) => {
                    return Err(ConnError::Io {
                        context,
                        source: e,
                    })
                }
            }
        }
        Ok(())
    }
}

fn is_retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}
