//! Multiplexed execution mode.
//!
//! [`Multiplexer`] owns the transport engine's multiplexing handle and its
//! event-loop bindings: the socket watch table, the single shared deadline
//! timer, the in-flight exchange table, and an optional completion
//! callback.
//!
//! # Event Loop
//!
//! The engine never blocks. Its socket-interest and timeout callbacks run
//! synchronously inside engine calls and only enqueue requests; the bridge
//! applies them between engine calls, on the event-loop thread. Each
//! [`drive`](Multiplexer::drive) call:
//!
//! 1. applies pending interest/deadline requests,
//! 2. awaits one wake — a watched socket became ready, or the shared
//!    deadline elapsed,
//! 3. advances the engine for that wake,
//! 4. drains every newly completed exchange.
//!
//! No ordering is guaranteed between completions of concurrently in-flight
//! exchanges; within one exchange, the outbound buffer is exhausted before
//! the exchange is considered complete.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;
use std::time::Duration;

use curl::easy::Easy2;
use curl::multi::{Easy2Handle, Events, Multi, Socket};
use futures_util::future::poll_fn;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::time::Sleep;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::exchange::{Exchange, ExchangeState, ExchangeStatus};
use crate::identifiers::AttemptId;
use crate::multiplex::watch::{WatchInterest, WatchTable};
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
// Types
// ============================================================================

/// Callback invoked with each completed exchange.
///
/// When registered, the callback assumes ownership of the exchange's
/// disposal; completed exchanges are no longer returned from
/// [`Multiplexer::drive`].
pub type CompletionHandler = Box<dyn FnMut(Exchange)>;

/// One admitted exchange: the owning record plus its live engine
/// sub-handle.
struct InFlight {
    exchange: Exchange,
    handle: Easy2Handle<TransferHandler>,
}

/// What woke the event loop.
#[derive(Debug, Clone, Copy)]
enum Wake {
    /// A watched socket reported readiness.
    Socket {
        socket: Socket,
        read: bool,
        write: bool,
    },
    /// The shared deadline elapsed.
    Deadline,
}

// ============================================================================
// Engine Requests
// ============================================================================

/// Requests the engine's callbacks enqueue for the bridge to apply.
///
/// The callbacks run synchronously inside engine calls on the event-loop
/// thread; the queue only exists because the engine requires its callbacks
/// to stand alone from the context that drives it.
#[derive(Default)]
struct EngineRequests {
    /// Interest changes, in arrival order. `None` interest is removal.
    sockets: Vec<(Socket, Option<WatchInterest>)>,
    /// Most recent deadline request; a new one supersedes any previous.
    timer: Option<TimerRequest>,
}

/// A deadline request from the engine.
enum TimerRequest {
    /// Cancel any pending deadline, then schedule one after this delay.
    Schedule(Duration),
    /// Cancel without rescheduling; no deadline needed.
    Cancel,
}

// ============================================================================
// Refused
// ============================================================================

/// Admission was refused; the exchange never went in flight.
///
/// The exchange comes back with [`ExchangeStatus::Refused`] recorded and
/// its state still [`Pending`](ExchangeState::Pending).
#[derive(Debug)]
pub struct Refused {
    /// The refused exchange.
    pub exchange: Exchange,
    /// Why the engine refused it.
    pub error: Error,
}

impl fmt::Display for Refused {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "admission refused: {}", self.error)
    }
}

impl std::error::Error for Refused {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

// ============================================================================
// MultiplexerBuilder
// ============================================================================

/// Builder for configuring a [`Multiplexer`].
///
/// Use [`Multiplexer::builder()`] to create a new builder.
#[derive(Default)]
pub struct MultiplexerBuilder {
    connect_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    on_complete: Option<CompletionHandler>,
}

impl MultiplexerBuilder {
    /// Creates a builder with default configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-exchange connect timeout.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the per-exchange overall timeout.
    #[inline]
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Registers a completion callback.
    ///
    /// The callback receives each completed exchange and owns its disposal.
    /// Without one, completed exchanges are returned from
    /// [`Multiplexer::drive`] and the caller owns them.
    #[must_use]
    pub fn on_completion(mut self, callback: impl FnMut(Exchange) + 'static) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }

    /// Builds the multiplexer, installing the engine's socket-interest and
    /// timeout callbacks.
    ///
    /// # Errors
    ///
    /// [`Error::Multi`] if the engine rejects a callback installation.
    pub fn build(self) -> Result<Multiplexer> {
        let mut multi = Multi::new();
        let requests = Arc::new(Mutex::new(EngineRequests::default()));

        let socket_requests = Arc::clone(&requests);
        multi.socket_function(move |socket, events, _token| {
            let interest = if events.remove() {
                None
            } else {
                Some(WatchInterest {
                    read: events.input(),
                    write: events.output(),
                })
            };
            socket_requests.lock().sockets.push((socket, interest));
        })?;

        let timer_requests = Arc::clone(&requests);
        multi.timer_function(move |delay| {
            timer_requests.lock().timer = Some(match delay {
                Some(delay) => TimerRequest::Schedule(delay),
                None => TimerRequest::Cancel,
            });
            true
        })?;

        Ok(Multiplexer {
            multi,
            requests,
            watches: WatchTable::default(),
            deadline: None,
            in_flight: FxHashMap::default(),
            running: 0,
            next_attempt: 1,
            on_complete: self.on_complete,
            connect_timeout: self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
            request_timeout: self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
        })
    }
}

// ============================================================================
// Multiplexer
// ============================================================================

/// Keeps many exchanges in flight concurrently inside a single-threaded
/// event loop.
///
/// Exchanges move in at [`submit`](Multiplexer::submit) and come back out
/// through [`drive`](Multiplexer::drive) (or the completion callback), or
/// through [`withdraw`](Multiplexer::withdraw). Multiple independent
/// multiplexers may coexist; nothing here is process-global.
///
/// # Example
///
/// ```no_run
/// use couchwire::{Exchange, Multiplexer, couch};
///
/// # async fn example() -> couchwire::Result<()> {
/// let mut mux = Multiplexer::new()?;
/// for id in ["a", "b", "c"] {
///     let ex = couch::document_get(Exchange::new(), "http://127.0.0.1:5984", "db", id)?;
///     if let Err(refused) = mux.submit(ex) {
///         eprintln!("{refused}");
///     }
/// }
/// while mux.in_flight() > 0 {
///     for done in mux.drive().await? {
///         println!("{} -> {}", done.target(), done.response_code());
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct Multiplexer {
    /// The engine's multiplexing handle.
    multi: Multi,
    /// Queue the engine callbacks write into.
    requests: Arc<Mutex<EngineRequests>>,
    /// Per-descriptor event-loop registrations.
    watches: WatchTable,
    /// The single shared deadline timer; at most one pending.
    deadline: Option<Pin<Box<Sleep>>>,
    /// Admitted exchanges by attempt id.
    in_flight: FxHashMap<AttemptId, InFlight>,
    /// The engine's count of transfers still running.
    running: u32,
    /// Next attempt id to hand out.
    next_attempt: u64,
    /// Optional completion callback.
    on_complete: Option<CompletionHandler>,
    /// Per-exchange connect timeout.
    connect_timeout: Duration,
    /// Per-exchange overall timeout.
    request_timeout: Duration,
}

impl Multiplexer {
    /// Creates a multiplexer with default configuration.
    ///
    /// # Errors
    ///
    /// [`Error::Multi`] if engine callback installation fails.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Returns a builder for custom configuration.
    #[inline]
    #[must_use]
    pub fn builder() -> MultiplexerBuilder {
        MultiplexerBuilder::new()
    }

    /// Number of exchanges currently admitted.
    #[inline]
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    // ========================================================================
    // Admission
    // ========================================================================

    /// Admits an exchange: binds its buffers and headers to a fresh engine
    /// sub-handle and registers it with the multiplexing handle.
    ///
    /// The inbound buffer is cleared first. If the exchange still carries a
    /// live sub-handle from an earlier admission, that one is withdrawn
    /// before the new one is created — an exchange is never a member of
    /// the engine twice.
    ///
    /// # Errors
    ///
    /// [`Refused`] when the engine rejects the attempt (for example a
    /// malformed target); the exchange is handed back with its status
    /// recorded and its state still `Pending`.
    pub fn submit(&mut self, mut exchange: Exchange) -> std::result::Result<AttemptId, Refused> {
        if let Some(stale) = exchange.attempt.take()
            && self.in_flight.contains_key(&stale)
        {
            warn!(id = %stale, "resubmission with live sub-handle, withdrawing old one");
            drop(self.withdraw(stale));
        }

        exchange.reset_for_attempt();

        let (outbound, inbound) = exchange.take_buffers();
        let mut easy = Easy2::new(TransferHandler::new(outbound, inbound));

        if let Err(err) = handler::configure(
            &mut easy,
            &exchange,
            self.connect_timeout,
            self.request_timeout,
        ) {
            let (outbound, inbound, _) = easy.get_mut().take_parts();
            exchange.restore_buffers(outbound, inbound);
            exchange.set_status(ExchangeStatus::Refused);
            return Err(Refused {
                exchange,
                error: Error::Engine(err),
            });
        }

        match self.multi.add2(easy) {
            Ok(handle) => {
                let id = AttemptId::new(self.next_attempt);
                self.next_attempt += 1;
                exchange.attempt = Some(id);
                exchange.set_state(ExchangeState::InFlight);
                debug!(%id, url = exchange.target(), "exchange admitted");
                self.in_flight.insert(id, InFlight { exchange, handle });
                Ok(id)
            }
            Err(err) => {
                // The engine consumed the sub-handle on refusal; the
                // buffers went with it.
                warn!(url = exchange.target(), error = %err, "admission refused");
                exchange.set_status(ExchangeStatus::Refused);
                Err(Refused {
                    exchange,
                    error: Error::Multi(err),
                })
            }
        }
    }

    /// Withdraws an admitted exchange before completion.
    ///
    /// Removes its sub-handle from the engine and hands the exchange back,
    /// state reset to `Pending`. Withdrawing an unknown or already
    /// withdrawn attempt is a no-op returning `None` — the in-flight count
    /// never underflows.
    pub fn withdraw(&mut self, id: AttemptId) -> Option<Exchange> {
        let InFlight {
            mut exchange,
            handle,
        } = self.in_flight.remove(&id)?;

        match self.multi.remove2(handle) {
            Ok(mut easy) => {
                let (outbound, inbound, _) = easy.get_mut().take_parts();
                exchange.restore_buffers(outbound, inbound);
            }
            Err(err) => {
                warn!(%id, error = %err, "engine refused sub-handle removal");
            }
        }

        exchange.attempt = None;
        exchange.set_state(ExchangeState::Pending);
        debug!(%id, "exchange withdrawn");
        Some(exchange)
    }

    // ========================================================================
    // Driving
    // ========================================================================

    /// Waits for one event-loop wake, advances the engine, and drains
    /// completed exchanges.
    ///
    /// Returns immediately with an empty vec when nothing is in flight.
    /// With a completion callback registered, completed exchanges are fed
    /// to it instead of being returned.
    ///
    /// # Errors
    ///
    /// Engine or reactor failures. Per-exchange failures are recorded on
    /// the affected exchange, never raised here.
    pub async fn drive(&mut self) -> Result<Vec<Exchange>> {
        if self.in_flight.is_empty() {
            return Ok(Vec::new());
        }

        self.apply_engine_requests()?;

        // A fresh admission may not have produced a deadline or any watch
        // yet; kick the engine instead of parking forever.
        let wake = if self.deadline.is_none() && self.watches.is_empty() {
            Wake::Deadline
        } else {
            self.next_wake().await?
        };

        self.running = match wake {
            Wake::Socket {
                socket,
                read,
                write,
            } => {
                trace!(socket, read, write, "socket wake");
                let mut events = Events::new();
                events.input(read);
                events.output(write);
                self.multi.action(socket, &events)?
            }
            Wake::Deadline => {
                trace!("deadline wake");
                self.multi.timeout()?
            }
        };

        // The engine adjusts interests and deadlines while advancing.
        self.apply_engine_requests()?;
        let completed = self.drain()?;

        // Last transfer done: nothing left for the shared timer to drive.
        if matches!(wake, Wake::Socket { .. }) && self.running == 0 {
            self.deadline = None;
        }

        Ok(completed)
    }

    /// Drives until nothing is left in flight, collecting completions.
    ///
    /// With a completion callback registered the returned vec is empty.
    pub async fn drive_to_completion(&mut self) -> Result<Vec<Exchange>> {
        let mut completed = Vec::new();
        while !self.in_flight.is_empty() {
            completed.extend(self.drive().await?);
        }
        Ok(completed)
    }

    /// Awaits the next socket readiness or deadline wake.
    async fn next_wake(&mut self) -> Result<Wake> {
        let deadline = &mut self.deadline;
        let watches = &mut self.watches;

        poll_fn(move |cx| {
            if let Some(sleep) = deadline.as_mut() {
                if sleep.as_mut().poll(cx).is_ready() {
                    *deadline = None;
                    return Poll::Ready(Ok(Wake::Deadline));
                }
            }

            match watches.poll_ready(cx) {
                Poll::Ready(Ok((socket, fired))) => Poll::Ready(Ok(Wake::Socket {
                    socket,
                    read: fired.read,
                    write: fired.write,
                })),
                Poll::Ready(Err(err)) => Poll::Ready(Err(Error::Io(err))),
                Poll::Pending => Poll::Pending,
            }
        })
        .await
    }

    /// Applies interest and deadline requests the engine queued.
    fn apply_engine_requests(&mut self) -> Result<()> {
        let drained = std::mem::take(&mut *self.requests.lock());

        for (socket, interest) in drained.sockets {
            self.watches.apply(socket, interest)?;
        }

        match drained.timer {
            Some(TimerRequest::Schedule(delay)) => {
                trace!(?delay, "deadline rescheduled");
                self.deadline = Some(Box::pin(tokio::time::sleep(delay)));
            }
            Some(TimerRequest::Cancel) => {
                trace!("deadline cancelled");
                self.deadline = None;
            }
            None => {}
        }

        Ok(())
    }

    // ========================================================================
    // Draining
    // ========================================================================

    /// Polls the engine for completed sub-handles and resolves each back
    /// to its exchange.
    fn drain(&mut self) -> Result<Vec<Exchange>> {
        let mut finished: Vec<(AttemptId, std::result::Result<(), curl::Error>)> = Vec::new();
        {
            let in_flight = &self.in_flight;
            self.multi.messages(|message| {
                for (id, entry) in in_flight {
                    if let Some(result) = message.result_for2(&entry.handle) {
                        finished.push((*id, result));
                        break;
                    }
                }
            });
        }

        let mut completed = Vec::with_capacity(finished.len());
        for (id, result) in finished {
            let Some(InFlight {
                mut exchange,
                handle,
            }) = self.in_flight.remove(&id)
            else {
                continue;
            };

            match self.multi.remove2(handle) {
                Ok(mut easy) => {
                    let (outbound, inbound, buffer_failure) = easy.get_mut().take_parts();
                    let response_code = easy.response_code();
                    exchange.restore_buffers(outbound, inbound);

                    match result {
                        Ok(()) => {
                            exchange
                                .set_response_code(response_code.unwrap_or(STATUS_SERVER_ERROR));
                            exchange.set_status(ExchangeStatus::Success);
                        }
                        Err(err) => {
                            exchange.set_response_code(STATUS_SERVER_ERROR);
                            if buffer_failure.is_some() {
                                exchange.set_status(ExchangeStatus::AllocationFailed);
                            } else {
                                exchange.set_status(ExchangeStatus::TransportFailed {
                                    message: err.to_string(),
                                });
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(%id, error = %err, "engine refused sub-handle removal");
                    exchange.set_response_code(STATUS_SERVER_ERROR);
                    exchange.set_status(ExchangeStatus::TransportFailed {
                        message: err.to_string(),
                    });
                }
            }

            exchange.attempt = None;
            exchange.set_state(ExchangeState::Completed);
            debug!(%id, code = exchange.response_code(), "exchange completed");
            completed.push(exchange);
        }

        if let Some(callback) = self.on_complete.as_mut() {
            for exchange in completed.drain(..) {
                callback(exchange);
            }
        }

        Ok(completed)
    }
}

impl Drop for Multiplexer {
    /// Forcibly withdraws everything still admitted before the engine
    /// handle and event-loop registrations are released.
    fn drop(&mut self) {
        for (id, entry) in self.in_flight.drain() {
            if self.multi.remove2(entry.handle).is_err() {
                warn!(%id, "sub-handle removal failed during teardown");
            }
        }
    }
}

impl fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplexer")
            .field("in_flight", &self.in_flight.len())
            .field("watches", &self.watches.len())
            .field("running", &self.running)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
