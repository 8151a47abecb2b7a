// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Shared lock, per-endpoint state and per-endpoint I/O data
//!
//! OWNERS: @runtime
//!
//! LOCKING:
//!   - `SharedLock::state` guards everything in [`PairState`]: peer links, shutdown and
//!     EOF, busy counters, gate ownership, direct-transfer phase and the size/fill mirrors
//!     that `poll`/`stat` read.
//!   - `EndpointCore::io` guards the ring and loan window. It is only locked by the
//!     holder of that endpoint's I/O gate (or by the direct writer while the handshake
//!     keeps everyone else out), so it is never contended for long.
//!   - Order: `state` may be held while taking `io`, never the other way round.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Index, IndexMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::budget::ResourceBudget;
use crate::config::PipeConfig;
use crate::direct::{DirectState, DirectTransfer, LoanDescriptor, LoanWindow};
use crate::notify::{Bridge, Owner};
use crate::ring::RingBuffer;
use crate::Side;

static NEXT_PIPE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a pipe pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PipeId(u64);

impl PipeId {
    pub(crate) fn next() -> Self {
        Self(NEXT_PIPE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pipe#{}", self.0)
    }
}

pub(crate) type Guard<'a> = MutexGuard<'a, PairState>;

/// Shutdown phase of one endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Shutdown {
    Open,
    /// Close started; waiting for in-flight calls to drain.
    Closing,
    Closed,
}

/// FIFO admission to an endpoint's buffer state.
#[derive(Debug, Default)]
pub(crate) struct IoGate {
    held: bool,
    queue: VecDeque<u64>,
    next_ticket: u64,
}

impl IoGate {
    pub(crate) fn is_held(&self) -> bool {
        self.held
    }

    pub(crate) fn enqueue(&mut self) -> u64 {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.queue.push_back(ticket);
        ticket
    }

    pub(crate) fn try_admit(&mut self, ticket: u64) -> bool {
        if self.held || self.queue.front() != Some(&ticket) {
            return false;
        }
        self.queue.pop_front();
        self.held = true;
        true
    }

    pub(crate) fn abandon(&mut self, ticket: u64) {
        self.queue.retain(|t| *t != ticket);
    }

    pub(crate) fn release(&mut self) {
        debug_assert!(self.held, "io gate released while free");
        self.held = false;
    }
}

/// Access, modification and creation stamps reported by `stat`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Timestamps {
    pub(crate) atime: SystemTime,
    pub(crate) mtime: SystemTime,
    pub(crate) ctime: SystemTime,
}

impl Timestamps {
    fn now() -> Self {
        let now = SystemTime::now();
        Self { atime: now, mtime: now, ctime: now }
    }
}

/// Metadata of one endpoint, guarded by the shared lock.
pub(crate) struct EndState {
    /// Cross link to the other endpoint; `None` once either side detached.
    pub(crate) peer: Option<Arc<EndpointCore>>,
    pub(crate) shutdown: Shutdown,
    pub(crate) eof: bool,
    /// Calls currently executing through this endpoint.
    pub(crate) busy: usize,
    pub(crate) nonblocking: bool,
    pub(crate) async_notify: bool,
    pub(crate) owner: Option<Owner>,
    pub(crate) gate: IoGate,
    pub(crate) direct: DirectState,
    /// Ring capacity and fill, mirrored after every mutation.
    pub(crate) size: usize,
    pub(crate) queued: usize,
    /// Bytes of the mapped direct chunk the reader has not consumed yet.
    pub(crate) direct_pending: usize,
    pub(crate) readers_blocked: usize,
    pub(crate) writers_blocked: usize,
    /// Fire a writable notification on the next read that leaves room.
    pub(crate) signal_next_reader: bool,
    /// Bumped by every interrupt; calls sample it on entry.
    pub(crate) interrupts: u64,
    pub(crate) times: Timestamps,
}

impl EndState {
    fn new(peer: Arc<EndpointCore>, size: usize) -> Self {
        Self {
            peer: Some(peer),
            shutdown: Shutdown::Open,
            eof: false,
            busy: 0,
            nonblocking: false,
            async_notify: false,
            owner: None,
            gate: IoGate::default(),
            direct: DirectState::Idle,
            size,
            queued: 0,
            direct_pending: 0,
            readers_blocked: 0,
            writers_blocked: 0,
            signal_next_reader: false,
            interrupts: 0,
            times: Timestamps::now(),
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.shutdown == Shutdown::Open
    }

    /// Owner to signal when this endpoint opted into asynchronous notification.
    pub(crate) fn async_owner(&self) -> Option<Owner> {
        self.owner.filter(|_| self.async_notify)
    }

    pub(crate) fn free(&self) -> usize {
        self.size - self.queued
    }
}

/// Both endpoints of a pair, indexed by [`Side`].
pub(crate) struct PairState {
    ends: [EndState; 2],
}

impl PairState {
    pub(crate) fn new(reader: &Arc<EndpointCore>, writer: &Arc<EndpointCore>, size: usize) -> Self {
        Self {
            ends: [EndState::new(Arc::clone(writer), size), EndState::new(Arc::clone(reader), 0)],
        }
    }
}

impl Index<Side> for PairState {
    type Output = EndState;

    fn index(&self, side: Side) -> &EndState {
        &self.ends[side.index()]
    }
}

impl IndexMut<Side> for PairState {
    fn index_mut(&mut self, side: Side) -> &mut EndState {
        &mut self.ends[side.index()]
    }
}

/// Buffer state of one endpoint, mutated only under its I/O gate.
#[derive(Debug, Default)]
pub(crate) struct IoData {
    pub(crate) ring: RingBuffer,
    /// The ring currently holds one of the budget's oversized slots.
    pub(crate) big: bool,
    pub(crate) window: LoanWindow,
    /// Bytes of the window reservation charged to the budget.
    pub(crate) window_charge: usize,
    pub(crate) descriptor: Option<LoanDescriptor>,
}

impl IoData {
    pub(crate) fn with_ring(ring: RingBuffer) -> Self {
        Self { ring, ..Self::default() }
    }
}

/// Per-endpoint storage and wait queues.
pub(crate) struct EndpointCore {
    pub(crate) side: Side,
    pub(crate) io: Mutex<IoData>,
    /// Data, space, direct-transfer and close waits of calls on this endpoint.
    pub(crate) wake: Condvar,
    /// Admission to this endpoint's I/O gate.
    pub(crate) gate_cv: Condvar,
}

impl EndpointCore {
    pub(crate) fn new(side: Side, io: IoData) -> Self {
        Self { side, io: Mutex::new(io), wake: Condvar::new(), gate_cv: Condvar::new() }
    }

    pub(crate) fn wake_all(&self) {
        self.wake.notify_all();
        self.gate_cv.notify_all();
    }
}

/// Tunables and collaborators shared by both endpoints.
pub(crate) struct PairContext {
    pub(crate) config: PipeConfig,
    pub(crate) budget: Arc<ResourceBudget>,
    pub(crate) transfer: Option<Arc<dyn DirectTransfer>>,
    pub(crate) bridge: Bridge,
}

/// The lock both endpoints of a pair share. Dropped with its last handle.
pub(crate) struct SharedLock {
    pub(crate) id: PipeId,
    pub(crate) state: Mutex<PairState>,
    pub(crate) ctx: PairContext,
}

impl SharedLock {
    pub(crate) fn new(id: PipeId, state: PairState, ctx: PairContext) -> Self {
        Self { id, state: Mutex::new(state), ctx }
    }
}
