//! End-to-end tests against a canned localhost HTTP responder.
//!
//! The stub accepts real TCP connections, answers `Expect: 100-continue`
//! handshakes, reads chunked request bodies to their terminator, and
//! replies with either a fixed body or an echo of the raw request bytes.

use std::cell::RefCell;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use anyhow::Result;

use couchwire::{BlockingClient, Exchange, ExchangeState, ExchangeStatus, Multiplexer, couch};

/// Enables `RUST_LOG`-driven log output for test debugging.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

// ============================================================================
// Stub Server
// ============================================================================

#[derive(Clone, Copy)]
enum Reply {
    /// Respond with this fixed body.
    Fixed(&'static [u8]),
    /// Respond with the raw request bytes.
    Echo,
}

/// Serves `connections` requests, each on its own thread, then exits.
fn spawn_stub(reply: Reply, connections: usize) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind stub");
    let addr = listener.local_addr().expect("stub addr");

    thread::spawn(move || {
        for _ in 0..connections {
            let Ok((stream, _)) = listener.accept() else {
                return;
            };
            thread::spawn(move || handle_connection(stream, reply));
        }
    });

    addr
}

fn handle_connection(mut stream: TcpStream, reply: Reply) {
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");

    let request = read_request(&mut stream);

    let body: &[u8] = match reply {
        Reply::Fixed(body) => body,
        Reply::Echo => &request,
    };
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(body);
    let _ = stream.flush();
}

/// Reads one request, including any chunked body, answering the
/// 100-continue handshake along the way.
fn read_request(stream: &mut TcpStream) -> Vec<u8> {
    let mut request = Vec::new();
    let mut chunk = [0u8; 1024];
    let mut continued = false;

    loop {
        let Ok(n) = stream.read(&mut chunk) else {
            break;
        };
        if n == 0 {
            break;
        }
        request.extend_from_slice(&chunk[..n]);

        let Some(header_end) = find(&request, b"\r\n\r\n") else {
            continue;
        };
        let head = &request[..header_end];

        if !continued && contains(head, b"Expect: 100-continue") {
            continued = true;
            let _ = stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n");
            let _ = stream.flush();
        }

        let has_body = head.starts_with(b"PUT") || head.starts_with(b"POST");
        if !has_body || request.ends_with(b"0\r\n\r\n") {
            break;
        }
    }

    request
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle).is_some()
}

fn server_url(addr: SocketAddr) -> String {
    format!("http://{addr}")
}

// ============================================================================
// Blocking Mode
// ============================================================================

#[test]
fn blocking_get_retrieves_body() -> Result<()> {
    init_tracing();
    let addr = spawn_stub(Reply::Fixed(b"{\"ok\":true}"), 1);
    let client = BlockingClient::new();

    let exchange = couch::database_info(Exchange::new(), &server_url(addr), "db")?;
    let exchange = client.execute(exchange);

    assert_eq!(*exchange.status(), ExchangeStatus::Success);
    assert_eq!(exchange.state(), ExchangeState::Completed);
    assert_eq!(exchange.response_code(), 200);
    assert_eq!(exchange.response_bytes(), b"{\"ok\":true}");
    Ok(())
}

#[test]
fn blocking_post_streams_body_to_exhaustion() -> Result<()> {
    let addr = spawn_stub(Reply::Echo, 1);
    let client = BlockingClient::new();

    let exchange = couch::document_create_auto(Exchange::new(), &server_url(addr), "db", b"{\"a\":1}")?;
    let exchange = client.execute(exchange);

    assert_eq!(*exchange.status(), ExchangeStatus::Success);
    assert_eq!(exchange.response_code(), 200);

    // The outbound buffer was fully consumed by the upload.
    assert_eq!(exchange.outbound().cursor(), exchange.outbound().len());
    assert_eq!(exchange.outbound().remaining(), 0);

    // The stub echoed the wire bytes back: the payload actually went out,
    // with the JSON content type applied.
    assert!(contains(exchange.response_bytes(), b"POST /db"));
    assert!(contains(
        exchange.response_bytes(),
        b"Content-Type: application/json"
    ));
    assert!(contains(exchange.response_bytes(), b"{\"a\":1}"));
    Ok(())
}

#[test]
fn blocking_put_marks_upload() -> Result<()> {
    let addr = spawn_stub(Reply::Echo, 1);
    let client = BlockingClient::new();

    let exchange = couch::document_create(
        Exchange::new(),
        &server_url(addr),
        "db",
        "doc-1",
        b"{\"v\":42}",
    )?;
    let exchange = client.execute(exchange);

    assert_eq!(*exchange.status(), ExchangeStatus::Success);
    assert!(contains(exchange.response_bytes(), b"PUT /db/doc-1"));
    assert!(contains(exchange.response_bytes(), b"{\"v\":42}"));
    assert_eq!(exchange.outbound().remaining(), 0);
    Ok(())
}

#[test]
fn blocking_reuse_clears_previous_response() -> Result<()> {
    let first = spawn_stub(Reply::Fixed(b"first response body"), 1);
    let second = spawn_stub(Reply::Fixed(b"second"), 1);
    let client = BlockingClient::new();

    let exchange = couch::database_info(Exchange::new(), &server_url(first), "db")?;
    let exchange = client.execute(exchange);
    assert_eq!(exchange.response_bytes(), b"first response body");

    // Reconfigure the same exchange and run it again: no residue.
    let exchange = couch::database_info(exchange, &server_url(second), "db")?;
    let exchange = client.execute(exchange);
    assert_eq!(exchange.response_bytes(), b"second");
    Ok(())
}

#[test]
fn blocking_capped_inbound_fails_without_corruption() -> Result<()> {
    let addr = spawn_stub(Reply::Fixed(b"this response is far too long"), 1);
    let client = BlockingClient::new();

    let mut exchange = couch::database_info(Exchange::new(), &server_url(addr), "db")?;
    exchange.limit_inbound(4);
    let exchange = client.execute(exchange);

    assert_eq!(*exchange.status(), ExchangeStatus::AllocationFailed);
    assert_eq!(exchange.response_code(), 500);
    // Whatever accumulated before the failed growth is intact, never
    // truncated mid-append.
    assert!(exchange.inbound().len() <= 4);
    Ok(())
}

// ============================================================================
// Multiplexed Mode
// ============================================================================

#[tokio::test]
async fn multiplex_completes_three_exchanges() -> Result<()> {
    init_tracing();
    let addr = spawn_stub(Reply::Fixed(b"{\"ok\":true}"), 3);
    let mut mux = Multiplexer::new()?;

    for id in ["alpha", "beta", "gamma"] {
        let exchange = couch::document_get(Exchange::new(), &server_url(addr), "db", id)?;
        mux.submit(exchange).expect("submit");
    }
    assert_eq!(mux.in_flight(), 3);

    let completed = mux.drive_to_completion().await?;

    assert_eq!(mux.in_flight(), 0);
    assert_eq!(completed.len(), 3);
    for exchange in &completed {
        assert_eq!(exchange.state(), ExchangeState::Completed);
        assert_eq!(*exchange.status(), ExchangeStatus::Success);
        assert_eq!(exchange.response_code(), 200);
        assert_eq!(exchange.response_bytes(), b"{\"ok\":true}");
    }
    Ok(())
}

#[tokio::test]
async fn multiplex_completion_callback_fires_exactly_once_each() -> Result<()> {
    let addr = spawn_stub(Reply::Fixed(b"done"), 3);

    let seen: Rc<RefCell<Vec<Exchange>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let mut mux = Multiplexer::builder()
        .on_completion(move |exchange| sink.borrow_mut().push(exchange))
        .build()?;

    for id in ["a", "b", "c"] {
        let exchange = couch::document_get(Exchange::new(), &server_url(addr), "db", id)?;
        mux.submit(exchange).expect("submit");
    }

    // With a callback registered the drain result is empty; the callback
    // owns the exchanges.
    let returned = mux.drive_to_completion().await?;
    assert!(returned.is_empty());

    // No ordering is guaranteed between completions; compare as a set.
    let seen = seen.borrow();
    assert_eq!(seen.len(), 3);
    let mut targets: Vec<&str> = seen.iter().map(|ex| ex.target()).collect();
    targets.sort_unstable();
    let base = server_url(addr);
    let expected: Vec<String> = ["a", "b", "c"]
        .iter()
        .map(|id| format!("{base}/db/{id}"))
        .collect();
    assert_eq!(targets, expected);
    for exchange in seen.iter() {
        assert_eq!(*exchange.status(), ExchangeStatus::Success);
        assert_eq!(exchange.response_bytes(), b"done");
    }
    Ok(())
}

#[tokio::test]
async fn multiplex_upload_streams_outbound() -> Result<()> {
    let addr = spawn_stub(Reply::Echo, 1);
    let mut mux = Multiplexer::new()?;

    let exchange = couch::document_create(
        Exchange::new(),
        &server_url(addr),
        "db",
        "doc",
        b"{\"multi\":true}",
    )?;
    mux.submit(exchange).expect("submit");

    let completed = mux.drive_to_completion().await?;
    assert_eq!(completed.len(), 1);

    let exchange = &completed[0];
    assert_eq!(*exchange.status(), ExchangeStatus::Success);
    assert_eq!(exchange.outbound().remaining(), 0);
    assert!(contains(exchange.response_bytes(), b"{\"multi\":true}"));
    Ok(())
}

#[tokio::test]
async fn multiplex_mixed_outcomes_stay_independent() -> Result<()> {
    let addr = spawn_stub(Reply::Fixed(b"ok"), 1);
    let mut mux = Multiplexer::new()?;

    let good = couch::document_get(Exchange::new(), &server_url(addr), "db", "doc")?;
    // Port 1 on loopback refuses immediately.
    let bad = couch::document_get(Exchange::new(), "http://127.0.0.1:1", "db", "doc")?;

    mux.submit(good).expect("submit");
    mux.submit(bad).expect("submit");

    let completed = mux.drive_to_completion().await?;
    assert_eq!(completed.len(), 2);

    let succeeded = completed
        .iter()
        .filter(|ex| ex.status().is_success())
        .count();
    let failed = completed
        .iter()
        .filter(|ex| matches!(ex.status(), ExchangeStatus::TransportFailed { .. }))
        .count();

    // One failing exchange never aborts the other.
    assert_eq!(succeeded, 1);
    assert_eq!(failed, 1);
    Ok(())
}

#[tokio::test]
async fn multiplex_withdraw_before_completion() -> Result<()> {
    // A stub that never gets driven: submit then withdraw immediately.
    let addr = spawn_stub(Reply::Fixed(b"unused"), 1);
    let mut mux = Multiplexer::new()?;

    let mut exchange = couch::document_get(Exchange::new(), &server_url(addr), "db", "doc")?;
    exchange.set_body(b"keep me")?;
    let id = mux.submit(exchange).expect("submit");

    let exchange = mux.withdraw(id).expect("withdraw");
    assert_eq!(mux.in_flight(), 0);
    assert_eq!(exchange.state(), ExchangeState::Pending);
    assert_eq!(exchange.outbound().as_slice(), b"keep me");

    // Idempotent: a second withdrawal is a no-op.
    assert!(mux.withdraw(id).is_none());

    // Nothing in flight, so driving returns immediately.
    let completed = mux.drive().await?;
    assert!(completed.is_empty());
    Ok(())
}
