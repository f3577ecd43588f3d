//! The exchange data model.
//!
//! An [`Exchange`] is one logical request/response pair against the document
//! database: method, target address, custom headers, optional credential,
//! the outbound/inbound buffer pair, and the completion bookkeeping both
//! execution modes fill in.
//!
//! Exchanges are configured with setters, executed through either
//! [`BlockingClient`](crate::BlockingClient) or
//! [`Multiplexer`](crate::Multiplexer), and may be reused any number of
//! times; the inbound buffer is cleared at the start of every attempt so a
//! reused exchange never carries residue from a previous run.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use url::Url;

use crate::buffer::Buffer;
use crate::error::Result;
use crate::identifiers::AttemptId;

// ============================================================================
// Method
// ============================================================================

/// HTTP verb of an exchange.
///
/// The fixed set the document database speaks: document retrieval,
/// create-or-replace, create with a server-assigned id, removal,
/// server-side copy, and the headers-only probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    /// `GET` — retrieve a document or database resource.
    #[default]
    Get,
    /// `PUT` — create or replace at a caller-chosen location.
    Put,
    /// `POST` — create with a server-generated id.
    Post,
    /// `DELETE` — remove a document or database.
    Delete,
    /// `COPY` — server-side copy to a new id.
    Copy,
    /// `HEAD` — probe: headers only, no body expected.
    Head,
}

impl Method {
    /// The verb string sent on the wire.
    #[inline]
    #[must_use]
    pub fn verb(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Delete => "DELETE",
            Self::Copy => "COPY",
            Self::Head => "HEAD",
        }
    }

    /// Returns `true` for the body-carrying create/replace verb.
    ///
    /// These attempts mark an upload with the outbound buffer as the data
    /// source.
    #[inline]
    #[must_use]
    pub fn is_upload(self) -> bool {
        matches!(self, Self::Put)
    }

    /// Returns `true` for the headers-only probe verb.
    #[inline]
    #[must_use]
    pub fn is_probe(self) -> bool {
        matches!(self, Self::Head)
    }
}

// ============================================================================
// ExchangeState
// ============================================================================

/// Admission lifecycle of an exchange within a multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExchangeState {
    /// Not admitted, or admission was refused.
    #[default]
    Pending,
    /// Admitted; a live sub-handle exists in the engine.
    InFlight,
    /// The engine reported the attempt finished and it was drained.
    Completed,
}

// ============================================================================
// ExchangeStatus
// ============================================================================

/// Engine-level completion code of the most recent attempt.
///
/// Attempt failures are recorded here rather than raised, so one failing
/// exchange never aborts others in flight.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExchangeStatus {
    /// No attempt has run since the exchange was created or reconfigured.
    #[default]
    Idle,
    /// The attempt ran to completion and a protocol status was captured.
    Success,
    /// The transport engine could not be initialized; no network contact
    /// was made.
    EngineUnavailable,
    /// The multiplexing engine refused admission; the exchange never went
    /// in flight.
    Refused,
    /// The attempt ran but did not complete successfully.
    TransportFailed {
        /// Engine description of the failure.
        message: String,
    },
    /// Inbound buffer growth failed mid-transfer; accumulated bytes were
    /// kept intact and the transfer was aborted.
    AllocationFailed,
}

impl ExchangeStatus {
    /// Returns `true` if the last attempt completed successfully.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns `true` if the last attempt ended in any failure.
    #[inline]
    #[must_use]
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Idle | Self::Success)
    }
}

// ============================================================================
// Exchange
// ============================================================================

/// One request/response exchange against the document database.
///
/// Owns its outbound and inbound [`Buffer`]s and its header list
/// exclusively. While admitted to a [`Multiplexer`](crate::Multiplexer) the
/// multiplexer owns the whole exchange; it comes back through the drain
/// result, the completion callback, or `withdraw`.
#[derive(Debug, Default)]
pub struct Exchange {
    /// HTTP verb.
    method: Method,
    /// Full target address, e.g. `http://127.0.0.1:5984/db/doc`.
    target: String,
    /// Custom header lines, ordered, duplicates allowed.
    headers: Vec<String>,
    /// Opaque `user:password` credential blob.
    credential: Option<Vec<u8>>,
    /// Request body, streamed out in chunks.
    outbound: Buffer,
    /// Response accumulator.
    inbound: Buffer,
    /// Admission lifecycle.
    state: ExchangeState,
    /// Completion code of the last attempt.
    status: ExchangeStatus,
    /// Protocol-level status of the last attempt (0 before any attempt).
    response_code: u32,
    /// Live sub-handle marker while admitted to a multiplexer.
    pub(crate) attempt: Option<AttemptId>,
}

impl Exchange {
    /// Creates an empty exchange (`GET`, no target, no body).
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Sets the HTTP verb.
    #[inline]
    pub fn set_method(&mut self, method: Method) -> &mut Self {
        self.method = method;
        self
    }

    /// Sets the full target address.
    #[inline]
    pub fn set_target(&mut self, target: impl Into<String>) -> &mut Self {
        self.target = target.into();
        self
    }

    /// Appends a custom header line (`Key: value`).
    ///
    /// Duplicates are allowed and sent in insertion order.
    #[inline]
    pub fn add_header(&mut self, line: impl Into<String>) -> &mut Self {
        self.headers.push(line.into());
        self
    }

    /// Sets the `user:password` credential blob.
    #[inline]
    pub fn set_credential(&mut self, credential: impl Into<Vec<u8>>) -> &mut Self {
        self.credential = Some(credential.into());
        self
    }

    /// Removes any credential.
    #[inline]
    pub fn clear_credential(&mut self) -> &mut Self {
        self.credential = None;
        self
    }

    /// Replaces the outbound body.
    ///
    /// # Errors
    ///
    /// Buffer growth failures; prior body kept intact.
    pub fn set_body(&mut self, body: &[u8]) -> Result<&mut Self> {
        self.outbound.set(body)?;
        Ok(self)
    }

    /// Serializes `value` as JSON into the outbound body.
    ///
    /// # Errors
    ///
    /// JSON serialization or buffer growth failures.
    pub fn set_json<T: Serialize>(&mut self, value: &T) -> Result<&mut Self> {
        let bytes = serde_json::to_vec(value)?;
        self.outbound.set(&bytes)?;
        Ok(self)
    }

    /// Caps the inbound accumulator at `limit` bytes.
    ///
    /// A response longer than the limit aborts the transfer with
    /// [`ExchangeStatus::AllocationFailed`]; accumulated bytes are kept.
    #[inline]
    pub fn limit_inbound(&mut self, limit: usize) -> &mut Self {
        self.inbound.set_limit(Some(limit));
        self
    }

    /// Appends a `key=value` query parameter to the target.
    ///
    /// Works whether or not other parameters already exist.
    ///
    /// # Errors
    ///
    /// [`Error::Url`](crate::Error::Url) if the target is not an absolute
    /// URL.
    pub fn append_param(&mut self, key: &str, value: &str) -> Result<&mut Self> {
        let mut url = Url::parse(&self.target)?;
        url.query_pairs_mut().append_pair(key, value);
        self.target = url.into();
        Ok(self)
    }

    /// Strips all query parameters from the target, if any.
    ///
    /// # Errors
    ///
    /// [`Error::Url`](crate::Error::Url) if the target is not an absolute
    /// URL.
    pub fn clear_params(&mut self) -> Result<&mut Self> {
        let mut url = Url::parse(&self.target)?;
        url.set_query(None);
        self.target = url.into();
        Ok(self)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// HTTP verb.
    #[inline]
    #[must_use]
    pub fn method(&self) -> Method {
        self.method
    }

    /// Full target address.
    #[inline]
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Custom header lines in insertion order.
    #[inline]
    #[must_use]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Credential blob, if set.
    #[inline]
    #[must_use]
    pub fn credential(&self) -> Option<&[u8]> {
        self.credential.as_deref()
    }

    /// Outbound buffer.
    #[inline]
    #[must_use]
    pub fn outbound(&self) -> &Buffer {
        &self.outbound
    }

    /// Inbound buffer.
    #[inline]
    #[must_use]
    pub fn inbound(&self) -> &Buffer {
        &self.inbound
    }

    /// Response bytes accumulated by the last attempt.
    #[inline]
    #[must_use]
    pub fn response_bytes(&self) -> &[u8] {
        self.inbound.as_slice()
    }

    /// Admission lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ExchangeState {
        self.state
    }

    /// Completion code of the last attempt.
    #[inline]
    #[must_use]
    pub fn status(&self) -> &ExchangeStatus {
        &self.status
    }

    /// Protocol status of the last attempt (0 before any attempt).
    #[inline]
    #[must_use]
    pub fn response_code(&self) -> u32 {
        self.response_code
    }

    // ========================================================================
    // Crate-internal bookkeeping
    // ========================================================================

    /// Prepares the exchange for a fresh attempt.
    ///
    /// Clears the inbound accumulator so a reused exchange carries no
    /// residue, and resets the completion bookkeeping.
    pub(crate) fn reset_for_attempt(&mut self) {
        self.inbound.clear();
        self.status = ExchangeStatus::Idle;
        self.response_code = 0;
        self.state = ExchangeState::Pending;
    }

    /// Moves both buffers out for binding to a transfer attempt.
    ///
    /// The exchange is left with empty placeholders until
    /// [`restore_buffers`](Self::restore_buffers).
    pub(crate) fn take_buffers(&mut self) -> (Buffer, Buffer) {
        (
            std::mem::take(&mut self.outbound),
            std::mem::take(&mut self.inbound),
        )
    }

    /// Moves the buffers back after an attempt, preserving cursor position
    /// and any inbound limit.
    pub(crate) fn restore_buffers(&mut self, outbound: Buffer, inbound: Buffer) {
        self.outbound = outbound;
        self.inbound = inbound;
    }

    pub(crate) fn set_state(&mut self, state: ExchangeState) {
        self.state = state;
    }

    pub(crate) fn set_status(&mut self, status: ExchangeStatus) {
        self.status = status;
    }

    pub(crate) fn set_response_code(&mut self, code: u32) {
        self.response_code = code;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verb_strings() {
        assert_eq!(Method::Get.verb(), "GET");
        assert_eq!(Method::Copy.verb(), "COPY");
        assert!(Method::Put.is_upload());
        assert!(!Method::Post.is_upload());
        assert!(Method::Head.is_probe());
    }

    #[test]
    fn test_set_body_resets_cursor() {
        let mut ex = Exchange::new();
        ex.set_body(b"{\"a\":1}").expect("body");
        assert_eq!(ex.outbound().len(), 7);
        assert_eq!(ex.outbound().cursor(), 0);
    }

    #[test]
    fn test_set_json() {
        let mut ex = Exchange::new();
        ex.set_json(&serde_json::json!({"a": 1})).expect("json");
        assert_eq!(ex.outbound().as_slice(), b"{\"a\":1}");
    }

    #[test]
    fn test_headers_keep_order_and_duplicates() {
        let mut ex = Exchange::new();
        ex.add_header("X-One: 1")
            .add_header("X-Two: 2")
            .add_header("X-One: 1");
        assert_eq!(ex.headers(), ["X-One: 1", "X-Two: 2", "X-One: 1"]);
    }

    #[test]
    fn test_append_param() {
        let mut ex = Exchange::new();
        ex.set_target("http://127.0.0.1:5984/db/doc");
        ex.append_param("rev", "1-abc").expect("param");
        assert_eq!(ex.target(), "http://127.0.0.1:5984/db/doc?rev=1-abc");

        ex.append_param("revs", "true").expect("param");
        assert_eq!(
            ex.target(),
            "http://127.0.0.1:5984/db/doc?rev=1-abc&revs=true"
        );
    }

    #[test]
    fn test_clear_params() {
        let mut ex = Exchange::new();
        ex.set_target("http://127.0.0.1:5984/db/doc?rev=1-abc&revs=true");
        ex.clear_params().expect("clear");
        assert_eq!(ex.target(), "http://127.0.0.1:5984/db/doc");

        // No-op when there are none.
        ex.clear_params().expect("clear again");
        assert_eq!(ex.target(), "http://127.0.0.1:5984/db/doc");
    }

    #[test]
    fn test_append_param_requires_absolute_target() {
        let mut ex = Exchange::new();
        ex.set_target("not a url");
        assert!(ex.append_param("k", "v").is_err());
    }

    #[test]
    fn test_reset_for_attempt_clears_inbound_only() {
        let mut ex = Exchange::new();
        ex.set_body(b"payload").expect("body");
        ex.inbound.append(b"stale response").expect("append");
        ex.set_status(ExchangeStatus::Success);
        ex.set_response_code(200);

        ex.reset_for_attempt();

        assert!(ex.inbound().is_empty());
        assert_eq!(ex.outbound().as_slice(), b"payload");
        assert_eq!(*ex.status(), ExchangeStatus::Idle);
        assert_eq!(ex.response_code(), 0);
        assert_eq!(ex.state(), ExchangeState::Pending);
    }

    #[test]
    fn test_take_restore_buffers_keeps_limit() {
        let mut ex = Exchange::new();
        ex.limit_inbound(16);
        let (out, inb) = ex.take_buffers();
        assert_eq!(inb.limit(), Some(16));
        ex.restore_buffers(out, inb);
        assert_eq!(ex.inbound().limit(), Some(16));
    }

    #[test]
    fn test_status_predicates() {
        assert!(ExchangeStatus::Success.is_success());
        assert!(!ExchangeStatus::Idle.is_failure());
        assert!(ExchangeStatus::AllocationFailed.is_failure());
        assert!(
            ExchangeStatus::TransportFailed {
                message: "refused".into()
            }
            .is_failure()
        );
    }
}
