// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Byte-stream pipe pairs for local interprocess communication
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: Unit tests per module + integration tests in `tests/`
//!
//! PUBLIC API:
//!   - create() / PipeFactory::create(): allocate a connected (ReadEnd, WriteEnd) pair
//!   - ReadEnd / WriteEnd: read, write, poll, stat, close and control operations
//!   - PipeConfig: injected tunables (TOML loadable)
//!   - ResourceBudget: shared budget for oversized rings and loan windows
//!   - DirectTransfer / HeapLoan: capability behind the large-write fast path
//!   - EventSink: readiness and signal delivery
//!
//! SEMANTICS:
//!   - Bytes arrive in write order whether they went through the ring or a direct chunk
//!   - Writes of at most PIPE_BUF bytes are never split or interleaved
//!   - A closed write end reads as EOF (`Ok(0)`) after buffered data drains
//!   - A closed read end makes writes fail with `PipeError::BrokenPipe`
//!
//! DEPENDENCIES:
//!   - parking_lot: shared lock and condition variables
//!   - thiserror: error types
//!   - log: diagnostics
//!   - serde/toml: configuration
//!   - bitflags: poll events

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

use core::time::Duration;

pub mod budget;
pub mod config;
pub mod direct;
mod endpoint;
pub mod error;
mod factory;
mod lifecycle;
pub mod notify;
mod ring;
mod state;
mod transfer;

pub use budget::ResourceBudget;
pub use config::PipeConfig;
pub use direct::{DirectTransfer, HeapLoan, LoanError, LoanWindow};
pub use endpoint::{Interrupter, PipeStat, ReadEnd, WriteEnd};
pub use error::{ConfigError, PipeError, Result};
pub use factory::PipeFactory;
pub use notify::{EventSink, NullSink, Owner, PollEvents, SignalReason};
pub use state::PipeId;

/// Largest write guaranteed to reach the reader in one piece.
pub const PIPE_BUF: usize = 512;

/// Direction of an endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    /// Consuming end.
    Read,
    /// Producing end.
    Write,
}

impl Side {
    /// The opposite endpoint.
    pub const fn peer(self) -> Self {
        match self {
            Self::Read => Self::Write,
            Self::Write => Self::Read,
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Read => 0,
            Self::Write => 1,
        }
    }
}

/// Behaviour of a blocking call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Wait {
    /// Block until the operation completes.
    Blocking,
    /// Return [`PipeError::WouldBlock`] if no progress can be made.
    NonBlocking,
    /// Block until either the operation completes or the timeout expires.
    Timeout(Duration),
}

impl Wait {
    /// Returns `true` when the caller requested a non-blocking attempt.
    pub const fn is_non_blocking(self) -> bool {
        matches!(self, Self::NonBlocking)
    }

    /// Converts a [`Wait::Timeout`] variant into its [`Duration`].
    pub const fn timeout(self) -> Option<Duration> {
        match self {
            Self::Timeout(duration) => Some(duration),
            Self::Blocking | Self::NonBlocking => None,
        }
    }
}

/// Allocates a pair with default tunables on the process-wide budget.
pub fn create() -> Result<(ReadEnd, WriteEnd)> {
    PipeFactory::default().create()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_then_would_block() {
        let (reader, writer) = create().unwrap();
        assert_eq!(writer.write(b"hello").unwrap(), 5);
        let mut buf = [0u8; 5];
        assert_eq!(reader.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(reader.read_with(&mut buf, Wait::NonBlocking), Err(PipeError::WouldBlock));
    }

    #[test]
    fn side_peers() {
        assert_eq!(Side::Read.peer(), Side::Write);
        assert_eq!(Side::Write.peer(), Side::Read);
    }
}
