//! Socket watch table.
//!
//! The transport engine announces which readiness conditions it wants
//! monitored per socket; this module keeps one persistent reactor
//! registration per descriptor and reports which conditions fired. Entries
//! are created, updated, and removed only in response to the engine's
//! explicit interest requests, never speculatively.

// ============================================================================
// Imports
// ============================================================================

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::task::{Context, Poll};

use curl::multi::Socket;
use rustc_hash::FxHashMap;
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;
use tracing::{debug, trace};

// ============================================================================
// WatchInterest
// ============================================================================

/// Readiness conditions being watched on one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct WatchInterest {
    /// Watch for readability.
    pub read: bool,
    /// Watch for writability.
    pub write: bool,
}

impl WatchInterest {
    /// Reactor interest for the registration.
    ///
    /// The engine may register a socket before it cares about readiness;
    /// such entries keep a readable registration that is never polled.
    fn to_reactor(self) -> Interest {
        match (self.read, self.write) {
            (_, false) => Interest::READABLE,
            (false, true) => Interest::WRITABLE,
            (true, true) => Interest::READABLE.add(Interest::WRITABLE),
        }
    }
}

// ============================================================================
// WatchedSocket
// ============================================================================

/// Non-owning descriptor wrapper for reactor registration.
///
/// The engine owns the socket; dropping the registration must never close
/// it.
#[derive(Debug)]
struct WatchedSocket(Socket);

impl AsRawFd for WatchedSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

// ============================================================================
// WatchTable
// ============================================================================

/// One watch entry: the live reactor registration plus the conditions the
/// engine asked for.
struct SocketWatch {
    registration: AsyncFd<WatchedSocket>,
    interest: WatchInterest,
}

/// Per-descriptor record of event-loop registrations.
///
/// At most one entry — and one reactor registration — exists per
/// descriptor. Updating interest replaces the registration; removal tears
/// it down.
#[derive(Default)]
pub(crate) struct WatchTable {
    entries: FxHashMap<Socket, SocketWatch>,
}

impl WatchTable {
    /// Applies one engine interest request.
    ///
    /// `None` is the removal sentinel: the registration is torn down and
    /// the entry discarded. Otherwise the entry is created or updated to
    /// watch exactly the requested conditions, persistently.
    pub(crate) fn apply(&mut self, socket: Socket, interest: Option<WatchInterest>) -> io::Result<()> {
        // The old registration must be gone before a new one is installed
        // on the same descriptor.
        let previous = self.entries.remove(&socket);
        drop(previous);

        let Some(interest) = interest else {
            debug!(socket, "watch removed");
            return Ok(());
        };

        let registration = AsyncFd::with_interest(WatchedSocket(socket), interest.to_reactor())?;
        trace!(socket, read = interest.read, write = interest.write, "watch installed");
        self.entries.insert(
            socket,
            SocketWatch {
                registration,
                interest,
            },
        );
        Ok(())
    }

    /// Polls every watched descriptor for the conditions the engine asked
    /// for.
    ///
    /// Readiness is cleared before reporting so the edge re-arms once the
    /// engine has drained the socket.
    pub(crate) fn poll_ready(
        &mut self,
        cx: &mut Context<'_>,
    ) -> Poll<io::Result<(Socket, WatchInterest)>> {
        for (socket, watch) in &self.entries {
            let mut fired = WatchInterest::default();

            if watch.interest.read {
                match watch.registration.poll_read_ready(cx) {
                    Poll::Ready(Ok(mut guard)) => {
                        guard.clear_ready();
                        fired.read = true;
                    }
                    Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
                    Poll::Pending => {}
                }
            }

            if watch.interest.write {
                match watch.registration.poll_write_ready(cx) {
                    Poll::Ready(Ok(mut guard)) => {
                        guard.clear_ready();
                        fired.write = true;
                    }
                    Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
                    Poll::Pending => {}
                }
            }

            if fired.read || fired.write {
                return Poll::Ready(Ok((*socket, fired)));
            }
        }

        Poll::Pending
    }

    /// Number of watched descriptors.
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when nothing is being watched.
    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Conditions currently watched on `socket`, if registered.
    #[cfg(test)]
    pub(crate) fn interest_of(&self, socket: Socket) -> Option<WatchInterest> {
        self.entries.get(&socket).map(|watch| watch.interest)
    }
}

// ============================================================================
// Tests
// ============================================================================
