//! Transport layer.
//!
//! The per-attempt transfer handler shared by both execution modes, and
//! the blocking executor. The multiplexed executor lives in
//! [`crate::multiplex`] and builds on the same handler.

pub(crate) mod handler;

mod blocking;

pub use blocking::BlockingClient;
