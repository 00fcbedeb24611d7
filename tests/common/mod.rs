#![allow(dead_code)]

use std::io::{self, Cursor, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use helper_broker::{
    AppPool, AppSession, CheckoutError, PoolOptions, PoolStatus, ProxyOutcome, RequestProxy,
    SpawnFailure, PASSWORD_LEN,
};

pub const SECRET: [u8; PASSWORD_LEN] = [b'A'; PASSWORD_LEN];

/// Build the length-prefixed request frame for the given headers.
pub fn frame(headers: &[(&str, &str)]) -> Vec<u8> {
    let mut blob = Vec::new();
    for (k, v) in headers {
        blob.extend_from_slice(k.as_bytes());
        blob.push(0);
        blob.extend_from_slice(v.as_bytes());
        blob.push(0);
    }
    let mut out = format!("{}:", blob.len()).into_bytes();
    out.extend_from_slice(&blob);
    out.push(b',');
    out
}

/// What the mock session observed, for assertions after the exchange.
#[derive(Default, Clone)]
pub struct SessionRecord {
    pub headers: Vec<u8>,
    pub body: Vec<u8>,
    pub writer_shutdown: bool,
    pub body_after_shutdown: bool,
    pub last_options: Option<PoolOptions>,
}

pub struct MockPool {
    response: Vec<u8>,
    failure: Option<SpawnFailure>,
    checkouts: Mutex<usize>,
    record: Arc<Mutex<SessionRecord>>,
}

impl MockPool {
    pub fn with_response(response: &[u8]) -> Arc<Self> {
        Arc::new(MockPool {
            response: response.to_vec(),
            failure: None,
            checkouts: Mutex::new(0),
            record: Arc::new(Mutex::new(SessionRecord::default())),
        })
    }

    pub fn failing(failure: SpawnFailure) -> Arc<Self> {
        Arc::new(MockPool {
            response: Vec::new(),
            failure: Some(failure),
            checkouts: Mutex::new(0),
            record: Arc::new(Mutex::new(SessionRecord::default())),
        })
    }

    pub fn checkout_count(&self) -> usize {
        *self.checkouts.lock().unwrap()
    }

    pub fn record(&self) -> SessionRecord {
        self.record.lock().unwrap().clone()
    }
}

impl AppPool for MockPool {
    fn checkout(&self, options: &PoolOptions) -> Result<Box<dyn AppSession>, CheckoutError> {
        *self.checkouts.lock().unwrap() += 1;
        if let Some(failure) = &self.failure {
            return Err(CheckoutError::SpawnFailed(failure.clone()));
        }
        self.record.lock().unwrap().last_options = Some(options.clone());
        Ok(Box::new(MockSession {
            record: self.record.clone(),
            response: Cursor::new(self.response.clone()),
        }))
    }

    fn status(&self) -> PoolStatus {
        PoolStatus::default()
    }
}

struct MockSession {
    record: Arc<Mutex<SessionRecord>>,
    response: Cursor<Vec<u8>>,
}

impl AppSession for MockSession {
    fn send_headers(&mut self, data: &[u8]) -> io::Result<()> {
        self.record.lock().unwrap().headers.extend_from_slice(data);
        Ok(())
    }

    fn send_body_block(&mut self, data: &[u8]) -> io::Result<()> {
        let mut record = self.record.lock().unwrap();
        if record.writer_shutdown {
            record.body_after_shutdown = true;
        }
        record.body.extend_from_slice(data);
        Ok(())
    }

    fn shutdown_writer(&mut self) -> io::Result<()> {
        self.record.lock().unwrap().writer_shutdown = true;
        Ok(())
    }

    fn stream(&mut self) -> &mut dyn Read {
        &mut self.response
    }
}

/// Run one connection through the proxy: write `parts` from the client side
/// (with a short pause between parts so they arrive as separate reads),
/// half-close, and return everything the client received.
pub fn drive_proxy(pool: Arc<dyn AppPool>, parts: &[&[u8]]) -> Vec<u8> {
    let (mut client, mut server) = UnixStream::pair().expect("socketpair");
    let running = Arc::new(AtomicBool::new(true));
    let proxy = RequestProxy::new(SECRET.to_vec(), pool, running);

    let server_thread = std::thread::spawn(move || proxy.handle(&mut server));

    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            std::thread::sleep(Duration::from_millis(50));
        }
        client.write_all(part).expect("client write");
    }
    client.shutdown(Shutdown::Write).expect("client half-close");

    let mut received = Vec::new();
    client.read_to_end(&mut received).expect("client read");

    let outcome = server_thread.join().expect("proxy thread");
    assert_eq!(outcome, ProxyOutcome::Completed);
    received
}
