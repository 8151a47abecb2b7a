// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Public pipe handles (read end / write end) and their control surface
//!
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//!
//! PUBLIC API:
//!   - ReadEnd::{read, read_with, bytes_readable}: consume the stream
//!   - WriteEnd::{write, write_with, bytes_unread, space_available}: produce the stream
//!   - poll(), stat(), close(): shared by both handles
//!   - set/get non-blocking mode, asynchronous notification and owner
//!   - interrupter(): cancel calls blocked on the endpoint
//!
//! ERROR CONDITIONS:
//!   - PipeError::WouldBlock: non-blocking call could not progress
//!   - PipeError::BrokenPipe: write with the read end gone
//!   - PipeError::Closed: call through a closed handle
//!   - PipeError::Interrupted / PipeError::Timeout: wait cancelled before any byte moved

use std::io;
use std::sync::Arc;
use std::time::SystemTime;

use crate::direct::DirectState;
use crate::error::{PipeError, Result};
use crate::notify::{Owner, PollEvents};
use crate::state::{EndState, EndpointCore, Guard, PipeId, SharedLock, Shutdown};
use crate::{Side, Wait, PIPE_BUF};

/// Snapshot returned by `stat`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PipeStat {
    /// Ring buffer capacity in bytes.
    pub size: usize,
    /// Bytes written and not yet read (ring plus unconsumed direct chunk).
    pub queued: usize,
    /// Last read.
    pub atime: SystemTime,
    /// Last write.
    pub mtime: SystemTime,
    /// Creation.
    pub ctime: SystemTime,
}

/// One endpoint of a pair: the shared lock plus this side's storage.
pub(crate) struct Endpoint {
    pub(crate) shared: Arc<SharedLock>,
    pub(crate) core: Arc<EndpointCore>,
}

impl Endpoint {
    pub(crate) fn new(shared: Arc<SharedLock>, core: Arc<EndpointCore>) -> Self {
        Self { shared, core }
    }

    pub(crate) fn side(&self) -> Side {
        self.core.side
    }

    /// Ends a call started through this endpoint.
    pub(crate) fn finish(&self, st: &mut Guard<'_>) {
        let end = &mut st[self.side()];
        end.busy -= 1;
        if end.shutdown == Shutdown::Closing && end.busy == 0 {
            self.core.wake.notify_all();
        }
    }

    fn open_state(&self) -> Result<Guard<'_>> {
        let st = self.shared.state.lock();
        if !st[self.side()].is_open() {
            return Err(PipeError::Closed);
        }
        Ok(st)
    }

    /// Bytes the reader can still obtain, or `None` when the pair is split.
    fn pending(st: &Guard<'_>, side: Side) -> Option<usize> {
        st[side].peer.as_ref()?;
        let reader = &st[Side::Read];
        Some(reader.queued + reader.direct_pending)
    }

    pub(crate) fn poll(&self, interest: PollEvents) -> Result<PollEvents> {
        let mut st = self.open_state()?;
        let mut ready = PollEvents::empty();
        match self.side() {
            Side::Read => {
                let reader = &st[Side::Read];
                let gone = reader.eof || reader.peer.is_none();
                if reader.queued > 0 || reader.direct == DirectState::Ready || gone {
                    ready |= PollEvents::READABLE;
                }
                if gone {
                    ready |= PollEvents::HANGUP;
                }
            }
            Side::Write => {
                let gone = st[Side::Write].peer.is_none() || !st[Side::Read].is_open();
                if gone {
                    ready |= PollEvents::WRITABLE | PollEvents::ERROR | PollEvents::HANGUP;
                } else if st[Side::Read].free() >= PIPE_BUF && st[Side::Read].direct.is_idle() {
                    ready |= PollEvents::WRITABLE;
                } else if interest.contains(PollEvents::WRITABLE) {
                    // Re-arm: the next read that makes room fires a writable event.
                    st[Side::Read].signal_next_reader = true;
                }
            }
        }
        Ok(ready & (interest | PollEvents::HANGUP | PollEvents::ERROR))
    }

    pub(crate) fn stat(&self) -> Result<PipeStat> {
        let st = self.open_state()?;
        let own = &st[self.side()];
        let attached = own.peer.is_some();
        let reader = &st[Side::Read];
        let (size, queued) = match self.side() {
            Side::Read => (reader.size, reader.queued + reader.direct_pending),
            Side::Write if attached => (reader.size, reader.queued + reader.direct_pending),
            Side::Write => (0, 0),
        };
        Ok(PipeStat {
            size,
            queued,
            atime: own.times.atime,
            mtime: own.times.mtime,
            ctime: own.times.ctime,
        })
    }

    fn update<T>(&self, f: impl FnOnce(&mut EndState) -> T) -> Result<T> {
        let mut st = self.open_state()?;
        Ok(f(&mut st[self.side()]))
    }

    fn query<T>(&self, f: impl FnOnce(&EndState) -> T) -> Result<T> {
        let st = self.open_state()?;
        Ok(f(&st[self.side()]))
    }

    pub(crate) fn interrupter(&self) -> Interrupter {
        Interrupter { shared: Arc::clone(&self.shared), core: Arc::clone(&self.core) }
    }
}

/// Cancels calls blocked on one endpoint.
///
/// Every call in progress on the endpoint when [`Interrupter::interrupt`]
/// runs returns [`PipeError::Interrupted`] (or its short count) at its next
/// suspension point. Later calls are unaffected.
#[derive(Clone)]
pub struct Interrupter {
    shared: Arc<SharedLock>,
    core: Arc<EndpointCore>,
}

impl Interrupter {
    /// Interrupts the calls currently in progress on the endpoint.
    pub fn interrupt(&self) {
        let mut st = self.shared.state.lock();
        let end = &mut st[self.core.side];
        end.interrupts += 1;
        // Writers also queue on the reader's gate and wait queues.
        self.core.wake_all();
        if let Some(peer) = end.peer.as_ref() {
            peer.wake_all();
        }
    }
}

macro_rules! shared_controls {
    ($handle:ident) => {
        impl $handle {
            /// Identifier of the pair this handle belongs to.
            pub fn id(&self) -> PipeId {
                self.0.shared.id
            }

            /// Reports which of `interest` is ready; hang-up and error are always reported.
            pub fn poll(&self, interest: PollEvents) -> Result<PollEvents> {
                self.0.poll(interest)
            }

            /// Returns size, queue depth and timestamps.
            pub fn stat(&self) -> Result<PipeStat> {
                self.0.stat()
            }

            /// Switches calls without an explicit [`Wait`] between blocking and non-blocking.
            pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
                self.0.update(|end| end.nonblocking = nonblocking)
            }

            /// Returns `true` when calls default to [`Wait::NonBlocking`].
            pub fn is_nonblocking(&self) -> Result<bool> {
                self.0.query(|end| end.nonblocking)
            }

            /// Enables or disables signal delivery to the owner on readiness changes.
            pub fn set_async(&self, enabled: bool) -> Result<()> {
                self.0.update(|end| end.async_notify = enabled)
            }

            /// Returns `true` when asynchronous notification is enabled.
            pub fn is_async(&self) -> Result<bool> {
                self.0.query(|end| end.async_notify)
            }

            /// Registers (or clears) the owner that receives signals for this endpoint.
            pub fn set_owner(&self, owner: Option<Owner>) -> Result<()> {
                self.0.update(|end| end.owner = owner)
            }

            /// Returns the registered owner.
            pub fn owner(&self) -> Result<Option<Owner>> {
                self.0.query(|end| end.owner)
            }

            /// Returns a handle that cancels calls blocked on this endpoint.
            pub fn interrupter(&self) -> Interrupter {
                self.0.interrupter()
            }

            /// Closes the endpoint. Idempotent; also runs on drop.
            pub fn close(&self) {
                self.0.close();
            }
        }

        impl Drop for $handle {
            fn drop(&mut self) {
                self.0.close();
            }
        }
    };
}

/// Consuming end of a pipe.
pub struct ReadEnd(pub(crate) Endpoint);

/// Producing end of a pipe.
pub struct WriteEnd(pub(crate) Endpoint);

shared_controls!(ReadEnd);
shared_controls!(WriteEnd);

impl ReadEnd {
    /// Reads into `buf` using the handle's blocking mode. `Ok(0)` is end-of-file.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.0.read(buf, None)
    }

    /// Reads into `buf` with an explicit wait policy.
    pub fn read_with(&self, buf: &mut [u8], wait: Wait) -> Result<usize> {
        self.0.read(buf, Some(wait))
    }

    /// Bytes available to read without blocking.
    pub fn bytes_readable(&self) -> Result<usize> {
        let st = self.0.open_state()?;
        let reader = &st[Side::Read];
        Ok(reader.queued + reader.direct_pending)
    }
}

impl WriteEnd {
    /// Writes from `buf` using the handle's blocking mode; may return a short count.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        self.0.write(buf, None)
    }

    /// Writes from `buf` with an explicit wait policy.
    pub fn write_with(&self, buf: &[u8], wait: Wait) -> Result<usize> {
        self.0.write(buf, Some(wait))
    }

    /// Bytes written through this end and not yet read; 0 once the reader is gone.
    pub fn bytes_unread(&self) -> Result<usize> {
        let st = self.0.open_state()?;
        Ok(Endpoint::pending(&st, Side::Write).unwrap_or(0))
    }

    /// Free ring space; 0 once the reader is gone.
    pub fn space_available(&self) -> Result<usize> {
        let st = self.0.open_state()?;
        if st[Side::Write].peer.is_none() || !st[Side::Read].is_open() {
            return Ok(0);
        }
        Ok(st[Side::Read].free())
    }
}

impl io::Read for ReadEnd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf, None).map_err(Into::into)
    }
}

impl io::Read for &ReadEnd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf, None).map_err(Into::into)
    }
}

impl io::Write for WriteEnd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf, None).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Write for &WriteEnd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf, None).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
