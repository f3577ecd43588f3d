//! couchwire - Multiplexed CouchDB wire client.
//!
//! This library issues HTTP request/response exchanges against a CouchDB
//! server in two execution modes:
//!
//! - **Blocking**: [`BlockingClient`] runs exactly one [`Exchange`] to
//!   completion before returning control to the caller.
//! - **Multiplexed**: [`Multiplexer`] keeps many exchanges in flight
//!   concurrently inside a single-threaded event loop, bridging the
//!   transport engine's socket-interest and timeout callbacks into the
//!   tokio reactor.
//!
//! # Architecture
//!
//! An [`Exchange`] owns a streaming outbound buffer, a growable inbound
//! buffer, and its completion bookkeeping. Both modes bind the buffer pair
//! to a fresh libcurl transfer per attempt; the multiplexed mode
//! additionally tracks per-socket watch state across the engine's
//! registration/modification/removal requests and manages one shared
//! deadline timer.
//!
//! Exchanges are configured by hand or through the [`couch`] path builders,
//! then executed explicitly. Failures of an individual attempt are recorded
//! on that exchange — one failing exchange never aborts others in flight.
//!
//! # Quick Start
//!
//! ```no_run
//! use couchwire::{Exchange, Multiplexer, Result, couch};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<()> {
//!     let mut mux = Multiplexer::new()?;
//!
//!     for id in ["alpha", "beta", "gamma"] {
//!         let ex = couch::document_get(Exchange::new(), "http://127.0.0.1:5984", "db", id)?;
//!         if let Err(refused) = mux.submit(ex) {
//!             eprintln!("refused: {refused}");
//!         }
//!     }
//!
//!     for done in mux.drive_to_completion().await? {
//!         println!("{} -> {}", done.target(), done.response_code());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`buffer`] | Streaming send / growable receive byte buffers |
//! | [`couch`] | CouchDB REST path builders |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`exchange`] | The [`Exchange`] data model |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`multiplex`] | Multiplexed execution mode (internal machinery) |
//! | [`transport`] | Transfer binding and the blocking executor |

// ============================================================================
// Modules
// ============================================================================

/// Byte buffers shared by both execution modes.
pub mod buffer;

/// CouchDB REST path builders.
///
/// Each builder configures an [`Exchange`] and returns it unexecuted.
pub mod couch;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Multiplexed execution mode.
///
/// The multiplexing context, socket watch table, and completion draining.
pub mod multiplex;

/// Transport layer.
///
/// The per-attempt transfer handler and the blocking executor.
pub mod transport;

/// The exchange data model.
pub mod exchange;

// ============================================================================
// Re-exports
// ============================================================================

// Data model
pub use buffer::Buffer;
pub use exchange::{Exchange, ExchangeState, ExchangeStatus, Method};

// Executors
pub use multiplex::{CompletionHandler, Multiplexer, MultiplexerBuilder, Refused};
pub use transport::BlockingClient;

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::AttemptId;
