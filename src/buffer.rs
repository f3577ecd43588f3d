//! Byte buffers shared by both execution modes.
//!
//! An exchange carries two [`Buffer`]s: an outbound buffer streamed to the
//! transport in chunks via [`Buffer::take_up_to`], and an inbound buffer the
//! response accumulates into via [`Buffer::append`].
//!
//! Growth never corrupts: when storage cannot be obtained (allocation
//! pressure, or a configured capacity limit), the buffer keeps its prior
//! contents untouched and the failure is reported to the caller.

// ============================================================================
// Imports
// ============================================================================

use crate::error::{Error, Result};

// ============================================================================
// Buffer
// ============================================================================

/// Owned byte storage with a read cursor.
///
/// # Invariants
///
/// - `cursor <= len` always
/// - storage is never read past `len`
///
/// # Roles
///
/// - **Outbound**: filled once with [`set`](Buffer::set), then drained by
///   repeated [`take_up_to`](Buffer::take_up_to) calls until exhausted.
/// - **Inbound**: grown by [`append`](Buffer::append) as response bytes
///   arrive; the cursor is unused.
#[derive(Debug, Default, Clone)]
pub struct Buffer {
    /// Owned storage. `data.len()` is the buffer length.
    data: Vec<u8>,
    /// Read offset: how many bytes have already been consumed.
    cursor: usize,
    /// Optional hard cap on the buffer length.
    limit: Option<usize>,
}

impl Buffer {
    /// Creates an empty buffer with no capacity limit.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty buffer that refuses to grow past `limit` bytes.
    #[inline]
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            cursor: 0,
            limit: Some(limit),
        }
    }

    /// Replaces the contents, resetting the cursor to the start.
    ///
    /// On failure the previous contents are left intact.
    ///
    /// # Errors
    ///
    /// - [`Error::Capacity`] if `bytes` exceeds the configured limit
    /// - [`Error::Allocation`] if storage could not be reserved
    pub fn set(&mut self, bytes: &[u8]) -> Result<()> {
        if let Some(limit) = self.limit
            && bytes.len() > limit
        {
            return Err(Error::capacity(limit, bytes.len()));
        }

        // Build the replacement aside so the old contents survive a failure.
        let mut fresh = Vec::new();
        fresh
            .try_reserve_exact(bytes.len())
            .map_err(|_| Error::allocation(bytes.len()))?;
        fresh.extend_from_slice(bytes);

        self.data = fresh;
        self.cursor = 0;
        Ok(())
    }

    /// Appends bytes at the end, extending the length.
    ///
    /// On failure the previous contents are left intact — nothing is
    /// silently truncated.
    ///
    /// # Errors
    ///
    /// - [`Error::Capacity`] if the append would exceed the configured limit
    /// - [`Error::Allocation`] if storage could not be reserved
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if let Some(limit) = self.limit
            && self.data.len().saturating_add(bytes.len()) > limit
        {
            return Err(Error::capacity(limit, bytes.len()));
        }

        self.data
            .try_reserve(bytes.len())
            .map_err(|_| Error::allocation(bytes.len()))?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Returns up to `max` unread bytes and advances the cursor past them.
    ///
    /// Repeated calls drain the buffer; once exhausted an empty slice is
    /// returned.
    pub fn take_up_to(&mut self, max: usize) -> &[u8] {
        let start = self.cursor;
        let end = start.saturating_add(max).min(self.data.len());
        self.cursor = end;
        &self.data[start..end]
    }

    /// Releases the storage and resets length and cursor to zero.
    ///
    /// Safe to call on an already empty buffer. The capacity limit is kept.
    pub fn clear(&mut self) {
        self.data = Vec::new();
        self.cursor = 0;
    }

    /// Number of bytes currently held.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if no bytes are held.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current read offset.
    #[inline]
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of bytes not yet consumed by [`take_up_to`](Buffer::take_up_to).
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }

    /// The full contents, ignoring the cursor.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Configured capacity limit, if any.
    #[inline]
    #[must_use]
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Sets or clears the capacity limit for future growth.
    ///
    /// Contents already held are not affected, even if they exceed the new
    /// limit.
    #[inline]
    pub fn set_limit(&mut self, limit: Option<usize>) {
        self.limit = limit;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_set_resets_cursor() {
        let mut buf = Buffer::new();
        buf.set(b"hello world").expect("set");
        let _ = buf.take_up_to(5);
        assert_eq!(buf.cursor(), 5);

        buf.set(b"again").expect("set");
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.cursor(), 0);
    }

    #[test]
    fn test_take_up_to_exhausts() {
        let mut buf = Buffer::new();
        buf.set(b"abcdefgh").expect("set");

        assert_eq!(buf.take_up_to(3), b"abc");
        assert_eq!(buf.take_up_to(3), b"def");
        assert_eq!(buf.take_up_to(3), b"gh");
        assert_eq!(buf.take_up_to(3), b"");
        assert_eq!(buf.remaining(), 0);
        assert_eq!(buf.cursor(), buf.len());
    }

    #[test]
    fn test_take_up_to_zero() {
        let mut buf = Buffer::new();
        buf.set(b"abc").expect("set");
        assert_eq!(buf.take_up_to(0), b"");
        assert_eq!(buf.cursor(), 0);
    }

    #[test]
    fn test_append_extends() {
        let mut buf = Buffer::new();
        buf.append(b"foo").expect("append");
        buf.append(b"bar").expect("append");
        assert_eq!(buf.as_slice(), b"foobar");
        assert_eq!(buf.len(), 6);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut buf = Buffer::new();
        buf.set(b"data").expect("set");
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.cursor(), 0);

        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.cursor(), 0);
    }

    #[test]
    fn test_limit_rejects_without_truncation() {
        let mut buf = Buffer::with_limit(8);
        buf.append(b"12345").expect("within limit");

        let err = buf.append(b"6789").expect_err("over limit");
        assert!(err.is_buffer_full());

        // Prior contents intact after the failed append.
        assert_eq!(buf.as_slice(), b"12345");
        assert_eq!(buf.len(), 5);

        // A smaller append still fits.
        buf.append(b"678").expect("exactly at limit");
        assert_eq!(buf.as_slice(), b"12345678");
    }

    #[test]
    fn test_set_respects_limit() {
        let mut buf = Buffer::with_limit(4);
        buf.set(b"abcd").expect("at limit");
        assert!(buf.set(b"abcde").is_err());
        assert_eq!(buf.as_slice(), b"abcd");
    }

    #[test]
    fn test_clear_keeps_limit() {
        let mut buf = Buffer::with_limit(2);
        buf.clear();
        assert!(buf.append(b"abc").is_err());
    }

    proptest! {
        /// Repeated take_up_to calls return exactly the original contents.
        #[test]
        fn prop_take_up_to_exhausts_fully(
            data in proptest::collection::vec(any::<u8>(), 0..512),
            chunk in 1usize..64,
        ) {
            let mut buf = Buffer::new();
            buf.set(&data).expect("set");

            let mut drained = Vec::new();
            loop {
                let taken = buf.take_up_to(chunk);
                if taken.is_empty() {
                    break;
                }
                drained.extend_from_slice(taken);
            }

            prop_assert_eq!(drained, data);
            prop_assert_eq!(buf.remaining(), 0);
        }
    }
}
