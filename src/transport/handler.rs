//! Per-attempt transfer handler.
//!
//! [`TransferHandler`] binds one exchange's buffer pair to a libcurl
//! transfer: the engine's read callback streams the outbound buffer out in
//! chunks, the write callback accumulates response bytes into the inbound
//! buffer. Both execution modes build one handler per attempt.
//!
//! [`configure`] applies the per-attempt engine options shared by the
//! blocking and multiplexed executors, including the method-specific rules.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use curl::easy::{Easy2, Handler, List, ReadError, WriteError};
use tracing::{trace, warn};

use crate::buffer::Buffer;
use crate::error::Error;
use crate::exchange::{Exchange, Method};

// ============================================================================
// Constants
// ============================================================================

/// User-agent sent with every attempt.
pub(crate) const USER_AGENT: &str = concat!("couchwire/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// TransferHandler
// ============================================================================

/// Binds an exchange's buffers to one transfer attempt.
///
/// Owns the buffers for the duration of the attempt; they are recovered
/// with [`take_parts`](TransferHandler::take_parts) when the attempt
/// finishes, is withdrawn, or fails.
pub(crate) struct TransferHandler {
    /// Request body, drained via the read callback.
    outbound: Buffer,
    /// Response accumulator, grown via the write callback.
    inbound: Buffer,
    /// First buffer failure observed mid-transfer, if any.
    failure: Option<Error>,
}

impl TransferHandler {
    /// Creates a handler around an exchange's buffer pair.
    pub(crate) fn new(outbound: Buffer, inbound: Buffer) -> Self {
        Self {
            outbound,
            inbound,
            failure: None,
        }
    }

    /// Recovers the buffers and any recorded failure.
    ///
    /// The handler is left empty; callers move the buffers back into their
    /// exchange on every exit path.
    pub(crate) fn take_parts(&mut self) -> (Buffer, Buffer, Option<Error>) {
        (
            std::mem::take(&mut self.outbound),
            std::mem::take(&mut self.inbound),
            self.failure.take(),
        )
    }
}

impl Handler for TransferHandler {
    /// Accumulates response bytes.
    ///
    /// Returning a short count aborts the transfer; the inbound buffer
    /// keeps everything accumulated so far, nothing is silently dropped.
    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        match self.inbound.append(data) {
            Ok(()) => Ok(data.len()),
            Err(err) => {
                warn!(len = data.len(), error = %err, "inbound append failed, aborting transfer");
                self.failure = Some(err);
                Ok(0)
            }
        }
    }

    /// Streams the next outbound chunk.
    fn read(&mut self, into: &mut [u8]) -> Result<usize, ReadError> {
        let chunk = self.outbound.take_up_to(into.len());
        let len = chunk.len();
        into[..len].copy_from_slice(chunk);
        Ok(len)
    }
}

// ============================================================================
// Option Configuration
// ============================================================================

/// Applies the per-attempt options for `exchange` to a fresh engine handle.
///
/// Mirrors the same rules in both execution modes:
///
/// - body-carrying create/replace marks an upload with the outbound buffer
///   as the data source;
/// - create-with-server-id posts and carries a JSON content type;
/// - probe requests headers only, echoed into the body output;
/// - every other verb is set as a custom request string.
///
/// The per-attempt header list is owned by the handle and released with it
/// on every exit path.
pub(crate) fn configure(
    easy: &mut Easy2<TransferHandler>,
    exchange: &Exchange,
    connect_timeout: Duration,
    request_timeout: Duration,
) -> Result<(), curl::Error> {
    easy.useragent(USER_AGENT)?;
    easy.url(exchange.target())?;
    easy.connect_timeout(connect_timeout)?;
    easy.timeout(request_timeout)?;
    easy.signal(false)?;

    if let Some(credential) = exchange.credential() {
        apply_credential(easy, credential)?;
    }

    match exchange.method() {
        Method::Put => {
            easy.upload(true)?;
        }
        Method::Post => {
            easy.post(true)?;
        }
        Method::Head => {
            easy.nobody(true)?;
            // Echo headers into the body output so probe consumers can
            // scrape revision ETags.
            easy.show_header(true)?;
        }
        other => {
            easy.custom_request(other.verb())?;
        }
    }

    let mut headers = List::new();
    for line in exchange.headers() {
        headers.append(line)?;
    }
    if exchange.method() == Method::Post {
        headers.append("Content-Type: application/json")?;
    }
    headers.append("Transfer-Encoding: chunked")?;
    easy.http_headers(headers)?;

    trace!(
        method = exchange.method().verb(),
        url = exchange.target(),
        body_len = exchange.outbound().len(),
        "attempt configured"
    );
    Ok(())
}

/// Splits an opaque `user:password` blob and applies it.
///
/// A blob with no separator is treated as a bare username.
fn apply_credential(
    easy: &mut Easy2<TransferHandler>,
    credential: &[u8],
) -> Result<(), curl::Error> {
    let text = String::from_utf8_lossy(credential);
    match text.split_once(':') {
        Some((user, password)) => {
            easy.username(user)?;
            easy.password(password)?;
        }
        None => easy.username(&text)?,
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
