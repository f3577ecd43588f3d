//! Error types for couchwire.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use couchwire::{Result, Multiplexer};
//!
//! async fn example(mux: &mut Multiplexer) -> Result<()> {
//!     let completed = mux.drive().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Engine | [`Error::Engine`], [`Error::Multi`] |
//! | Buffer | [`Error::Allocation`], [`Error::Capacity`] |
//! | Target | [`Error::InvalidTarget`], [`Error::Url`] |
//! | External | [`Error::Io`], [`Error::Json`] |
//!
//! Failures of an individual exchange attempt (transport failure, refused
//! admission) are not raised through this type: they are recorded on the
//! exchange itself as an [`ExchangeStatus`](crate::ExchangeStatus), so one
//! failing exchange never aborts others in flight.

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Engine Errors
    // ========================================================================
    /// Transport engine error on a single transfer handle.
    ///
    /// Returned when libcurl rejects an option or cannot service a handle.
    #[error("Engine error: {0}")]
    Engine(#[from] curl::Error),

    /// Transport engine error on the multiplexing handle.
    ///
    /// Returned when the multi interface rejects an operation.
    #[error("Multi engine error: {0}")]
    Multi(#[from] curl::MultiError),

    // ========================================================================
    // Buffer Errors
    // ========================================================================
    /// Buffer growth could not obtain storage.
    ///
    /// The buffer retains its prior contents; nothing was dropped.
    #[error("Allocation of {requested} additional bytes failed")]
    Allocation {
        /// Number of additional bytes that could not be reserved.
        requested: usize,
    },

    /// Buffer growth would exceed its configured capacity limit.
    ///
    /// The buffer retains its prior contents; nothing was truncated.
    #[error("Buffer limit of {limit} bytes exceeded by append of {requested}")]
    Capacity {
        /// Configured capacity limit in bytes.
        limit: usize,
        /// Size of the rejected append in bytes.
        requested: usize,
    },

    // ========================================================================
    // Target Errors
    // ========================================================================
    /// Exchange target is not a usable address.
    #[error("Invalid target: {message}")]
    InvalidTarget {
        /// Description of what is wrong with the target.
        message: String,
    },

    /// URL parse error while building or editing a target.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates an allocation failure error.
    #[inline]
    pub fn allocation(requested: usize) -> Self {
        Self::Allocation { requested }
    }

    /// Creates a capacity limit error.
    #[inline]
    pub fn capacity(limit: usize, requested: usize) -> Self {
        Self::Capacity { limit, requested }
    }

    /// Creates an invalid target error.
    #[inline]
    pub fn invalid_target(message: impl Into<String>) -> Self {
        Self::InvalidTarget {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a buffer growth failure.
    ///
    /// Covers both true allocation pressure and configured capacity limits.
    #[inline]
    #[must_use]
    pub fn is_buffer_full(&self) -> bool {
        matches!(self, Self::Allocation { .. } | Self::Capacity { .. })
    }

    /// Returns `true` if this error came from the transport engine.
    #[inline]
    #[must_use]
    pub fn is_engine_error(&self) -> bool {
        matches!(self, Self::Engine(_) | Self::Multi(_))
    }
}

// ============================================================================
// Tests
// ============================================================================
