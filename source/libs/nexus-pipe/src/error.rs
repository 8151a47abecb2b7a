// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error types surfaced by pipe operations and configuration loading.

use std::io;

use thiserror::Error;

/// Result type returned by pipe operations.
pub type Result<T> = core::result::Result<T, PipeError>;

/// Errors produced by pipe operations.
///
/// A call that already moved bytes never reports one of these; it returns the
/// short count instead so the caller can tell "nothing happened" apart from
/// "partially happened".
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum PipeError {
    /// Operation could not progress without blocking.
    #[error("operation would block")]
    WouldBlock,
    /// A blocked call was cancelled through an [`crate::Interrupter`].
    #[error("operation interrupted")]
    Interrupted,
    /// The caller exceeded the requested timeout.
    #[error("operation timed out")]
    Timeout,
    /// The read end is gone; nothing will ever consume the written bytes.
    #[error("broken pipe")]
    BrokenPipe,
    /// The handle used for the call has been closed.
    #[error("endpoint closed")]
    Closed,
    /// A ring buffer could not be allocated.
    #[error("out of memory")]
    OutOfMemory,
}

impl PipeError {
    /// Returns `true` for conditions the caller is expected to retry.
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::WouldBlock | Self::Interrupted | Self::Timeout)
    }
}

impl From<PipeError> for io::Error {
    fn from(err: PipeError) -> Self {
        let kind = match err {
            PipeError::WouldBlock => io::ErrorKind::WouldBlock,
            PipeError::Interrupted => io::ErrorKind::Interrupted,
            PipeError::Timeout => io::ErrorKind::TimedOut,
            PipeError::BrokenPipe => io::ErrorKind::BrokenPipe,
            PipeError::Closed => io::ErrorKind::NotConnected,
            PipeError::OutOfMemory => io::ErrorKind::OutOfMemory,
        };
        io::Error::new(kind, err)
    }
}

/// Errors produced while loading or validating a [`crate::PipeConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML document could not be parsed.
    #[error("failed to parse pipe config: {source}")]
    Parse {
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },
    /// A field holds a value the channel cannot operate with.
    #[error("invalid pipe config: {field} {reason}")]
    Invalid {
        /// Offending field name.
        field: &'static str,
        /// Human readable constraint that was violated.
        reason: &'static str,
    },
}
