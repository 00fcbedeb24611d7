mod common;

use common::{drive_proxy, frame, MockPool, SECRET};
use helper_broker::SpawnFailure;

/// GET with no body: the backend's Status header becomes the HTTP/1.1
/// status line and the raw response is forwarded byte-exact after it.
#[test]
fn happy_get() {
    let dir = tempfile::tempdir().expect("tempdir");
    let doc_root = dir.path().join("public");
    std::fs::create_dir(&doc_root).expect("create doc root");

    let pool = MockPool::with_response(b"Status: 200 OK\r\n\r\nhi");
    let mut request = SECRET.to_vec();
    let header_frame = frame(&[("DOCUMENT_ROOT", doc_root.to_str().unwrap())]);
    request.extend_from_slice(&header_frame);

    let received = drive_proxy(pool.clone(), &[&request]);

    assert_eq!(received, b"HTTP/1.1 200 OK\r\nStatus: 200 OK\r\n\r\nhi");
    assert_eq!(pool.checkout_count(), 1);

    let record = pool.record();
    // The backend gets the header blob exactly as it came off the wire.
    let colon = header_frame.iter().position(|&b| b == b':').unwrap();
    assert_eq!(
        record.headers,
        &header_frame[colon + 1..header_frame.len() - 1]
    );
    assert!(record.writer_shutdown);
    assert_eq!(record.body, b"");

    let options = record.last_options.expect("options recorded");
    assert_eq!(
        options.app_root,
        dir.path().canonicalize().expect("canonical tempdir")
    );
    assert!(!options.use_global_queue);
    assert!(options.environment.is_none());
    assert!(options.spawn_method.is_none());
}

/// POST whose first body bytes arrive in the same read as the end of the
/// header frame: the session sees exactly CONTENT_LENGTH bytes in order,
/// then the half-close.
#[test]
fn post_with_split_body() {
    let dir = tempfile::tempdir().expect("tempdir");
    let doc_root = dir.path().join("public");
    std::fs::create_dir(&doc_root).expect("create doc root");

    let pool = MockPool::with_response(b"Status: 200 OK\r\n\r\n");
    let mut first = SECRET.to_vec();
    first.extend_from_slice(&frame(&[
        ("DOCUMENT_ROOT", doc_root.to_str().unwrap()),
        ("CONTENT_LENGTH", "11"),
    ]));
    first.extend_from_slice(b"hello");

    drive_proxy(pool.clone(), &[&first, b" world"]);

    let record = pool.record();
    assert_eq!(record.body, b"hello world");
    assert!(record.writer_shutdown);
    assert!(!record.body_after_shutdown);
}

/// A backend response without a Status header defaults to 200 OK.
#[test]
fn default_status() {
    let dir = tempfile::tempdir().expect("tempdir");
    let doc_root = dir.path().join("public");
    std::fs::create_dir(&doc_root).expect("create doc root");

    let pool = MockPool::with_response(b"Content-Type: text/plain\r\n\r\nbody");
    let mut request = SECRET.to_vec();
    request.extend_from_slice(&frame(&[("DOCUMENT_ROOT", doc_root.to_str().unwrap())]));

    let received = drive_proxy(pool, &[&request]);
    assert_eq!(
        received,
        b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nbody"
    );
}

/// A wrong password closes the connection silently; the pool is never
/// consulted.
#[test]
fn bad_password() {
    let pool = MockPool::with_response(b"Status: 200 OK\r\n\r\n");
    let received = drive_proxy(pool.clone(), &[&[0u8; 64]]);
    assert_eq!(received, b"");
    assert_eq!(pool.checkout_count(), 0);
}

/// A frame without DOCUMENT_ROOT is rejected before any pool contact.
#[test]
fn missing_document_root() {
    let pool = MockPool::with_response(b"Status: 200 OK\r\n\r\n");
    let mut request = SECRET.to_vec();
    request.extend_from_slice(&frame(&[("CONTENT_LENGTH", "0")]));

    let received = drive_proxy(pool.clone(), &[&request]);
    assert_eq!(received, b"");
    assert_eq!(pool.checkout_count(), 0);
}

/// A spawn failure turns into the 500 template carrying the pool's error
/// page.
#[test]
fn spawn_failure_becomes_500() {
    let dir = tempfile::tempdir().expect("tempdir");
    let doc_root = dir.path().join("public");
    std::fs::create_dir(&doc_root).expect("create doc root");

    let pool = MockPool::failing(
        SpawnFailure::new("the spawn helper crashed").with_error_page("<h1>oops</h1>"),
    );
    let mut request = SECRET.to_vec();
    request.extend_from_slice(&frame(&[("DOCUMENT_ROOT", doc_root.to_str().unwrap())]));

    let received = drive_proxy(pool, &[&request]);
    let expected = "HTTP/1.1 500 Internal Server Error\r\n\
                    Status: 500 Internal Server Error\r\n\
                    Connection: close\r\n\
                    Content-Type: text/html; charset=utf-8\r\n\
                    Content-Length: 13\r\n\
                    \r\n\
                    <h1>oops</h1>";
    assert_eq!(String::from_utf8_lossy(&received), expected);
}

/// Without an error page the failure message itself is the 500 body.
#[test]
fn spawn_failure_without_page_uses_message() {
    let dir = tempfile::tempdir().expect("tempdir");
    let doc_root = dir.path().join("public");
    std::fs::create_dir(&doc_root).expect("create doc root");

    let pool = MockPool::failing(SpawnFailure::new("no worker"));
    let mut request = SECRET.to_vec();
    request.extend_from_slice(&frame(&[("DOCUMENT_ROOT", doc_root.to_str().unwrap())]));

    let received = drive_proxy(pool, &[&request]);
    let text = String::from_utf8_lossy(&received);
    assert!(text.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
    assert!(text.contains("Content-Length: 9\r\n"));
    assert!(text.ends_with("\r\n\r\nno worker"));
}

/// Body bytes past CONTENT_LENGTH never reach the backend, even when they
/// arrive glued to the header frame.
#[test]
fn body_is_clamped_to_content_length() {
    let dir = tempfile::tempdir().expect("tempdir");
    let doc_root = dir.path().join("public");
    std::fs::create_dir(&doc_root).expect("create doc root");

    let pool = MockPool::with_response(b"Status: 200 OK\r\n\r\n");
    let mut request = SECRET.to_vec();
    request.extend_from_slice(&frame(&[
        ("DOCUMENT_ROOT", doc_root.to_str().unwrap()),
        ("CONTENT_LENGTH", "3"),
    ]));
    request.extend_from_slice(b"abcdef");

    drive_proxy(pool.clone(), &[&request]);
    assert_eq!(pool.record().body, b"abc");
}

/// Optional pool headers are forwarded into the checkout options.
#[test]
fn optional_headers_reach_the_pool() {
    let dir = tempfile::tempdir().expect("tempdir");
    let doc_root = dir.path().join("public");
    std::fs::create_dir(&doc_root).expect("create doc root");

    let pool = MockPool::with_response(b"Status: 200 OK\r\n\r\n");
    let mut request = SECRET.to_vec();
    request.extend_from_slice(&frame(&[
        ("DOCUMENT_ROOT", doc_root.to_str().unwrap()),
        ("PASSENGER_USE_GLOBAL_QUEUE", "true"),
        ("PASSENGER_ENVIRONMENT", "production"),
        ("PASSENGER_SPAWN_METHOD", "smart"),
    ]));

    drive_proxy(pool.clone(), &[&request]);
    let options = pool.record().last_options.expect("options recorded");
    assert!(options.use_global_queue);
    assert_eq!(options.environment.as_deref(), Some("production"));
    assert_eq!(options.spawn_method.as_deref(), Some("smart"));
}

/// A backend that dies before emitting a status line produces no response
/// bytes at all.
#[test]
fn backend_eof_before_status_sends_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let doc_root = dir.path().join("public");
    std::fs::create_dir(&doc_root).expect("create doc root");

    let pool = MockPool::with_response(b"Content-Type: text/pla");
    let mut request = SECRET.to_vec();
    request.extend_from_slice(&frame(&[("DOCUMENT_ROOT", doc_root.to_str().unwrap())]));

    let received = drive_proxy(pool, &[&request]);
    assert_eq!(received, b"");
}

/// A malformed frame (bad length prefix) drops the connection without a
/// checkout.
#[test]
fn malformed_frame_is_rejected() {
    let pool = MockPool::with_response(b"Status: 200 OK\r\n\r\n");
    let mut request = SECRET.to_vec();
    request.extend_from_slice(b"xx:broken,");

    let received = drive_proxy(pool.clone(), &[&request]);
    assert_eq!(received, b"");
    assert_eq!(pool.checkout_count(), 0);
}
