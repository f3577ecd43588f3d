//! Multiplexed execution mode.
//!
//! Keeps many exchanges in flight concurrently inside a single-threaded
//! event loop: [`Multiplexer`] owns the engine's multiplexing handle, the
//! socket watch table, and the shared deadline timer, and bridges the
//! engine's readiness/timeout callbacks into the tokio reactor.

mod context;
pub(crate) mod watch;

pub use context::{CompletionHandler, Multiplexer, MultiplexerBuilder, Refused};
