//! Blocking execution mode.
//!
//! [`BlockingClient`] performs exactly one exchange synchronously per call,
//! blocking the calling thread until the transport completes or a timeout
//! elapses. Intended for dedicated threads and single-exchange tools; the
//! multiplexed mode lives in [`crate::multiplex`].

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use curl::easy::Easy2;
use tracing::{debug, warn};

use crate::exchange::{Exchange, ExchangeState, ExchangeStatus};
use crate::transport::handler::{self, TransferHandler};

// ============================================================================
// Constants
// ============================================================================

/// Default maximum time to establish a connection.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Default maximum time for a whole exchange.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Protocol status recorded when the transport produced no real one.
const STATUS_SERVER_ERROR: u32 = 500;

// ============================================================================
// BlockingClient
// ============================================================================

/// Runs one exchange to completion before returning control.
///
/// Attempt failures are recorded on the returned exchange
/// ([`Exchange::status`] / [`Exchange::response_code`]), never raised, so
/// callers inspect the exchange after the call returns.
///
/// # Example
///
/// ```no_run
/// use couchwire::{BlockingClient, Exchange, couch};
///
/// let client = BlockingClient::new();
/// let exchange = couch::document_get(Exchange::new(), "http://127.0.0.1:5984", "db", "doc-1")?;
/// let exchange = client.execute(exchange);
/// println!("{}", exchange.response_code());
/// # Ok::<(), couchwire::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct BlockingClient {
    /// Maximum time to establish a connection.
    connect_timeout: Duration,
    /// Maximum time for the whole exchange.
    request_timeout: Duration,
}

impl Default for BlockingClient {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl BlockingClient {
    /// Creates a client with default timeouts.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connect timeout.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the overall exchange timeout.
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Performs the exchange synchronously.
    ///
    /// The inbound buffer is cleared before the attempt, so reusing an
    /// exchange never leaves residue from a previous run. On return the
    /// exchange carries its status, protocol response code, and response
    /// bytes.
    pub fn execute(&self, mut exchange: Exchange) -> Exchange {
        exchange.reset_for_attempt();

        let (outbound, inbound) = exchange.take_buffers();
        let mut easy = Easy2::new(TransferHandler::new(outbound, inbound));

        if let Err(err) = handler::configure(
            &mut easy,
            &exchange,
            self.connect_timeout,
            self.request_timeout,
        ) {
            // Setup failed before any network contact was made.
            warn!(url = exchange.target(), error = %err, "engine setup failed");
            let (outbound, inbound, _) = easy.get_mut().take_parts();
            exchange.restore_buffers(outbound, inbound);
            exchange.set_status(ExchangeStatus::EngineUnavailable);
            return exchange;
        }

        debug!(
            method = exchange.method().verb(),
            url = exchange.target(),
            "performing exchange"
        );
        let result = easy.perform();

        // Buffers come back on every exit path.
        let (outbound, inbound, buffer_failure) = easy.get_mut().take_parts();
        let response_code = easy.response_code();
        exchange.restore_buffers(outbound, inbound);

        match result {
            Ok(()) => {
                exchange.set_response_code(response_code.unwrap_or(STATUS_SERVER_ERROR));
                exchange.set_status(ExchangeStatus::Success);
                debug!(
                    code = exchange.response_code(),
                    bytes = exchange.inbound().len(),
                    "exchange complete"
                );
            }
            Err(err) => {
                exchange.set_response_code(STATUS_SERVER_ERROR);
                if buffer_failure.is_some() {
                    warn!(url = exchange.target(), "inbound buffer growth failed");
                    exchange.set_status(ExchangeStatus::AllocationFailed);
                } else {
                    warn!(url = exchange.target(), error = %err, "exchange failed");
                    exchange.set_status(ExchangeStatus::TransportFailed {
                        message: err.to_string(),
                    });
                }
            }
        }

        exchange.set_state(ExchangeState::Completed);
        exchange
    }
}

// ============================================================================
// Tests
// ============================================================================
