// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Close protocol for one endpoint of a pair
//!
//! OWNERS: @runtime
//!
//! SEQUENCE:
//!   1. mark the endpoint closing + EOF, wake everything blocked on it
//!   2. wait until no call runs through it; the read end additionally waits
//!      for its I/O gate to be free and the direct handshake to be idle
//!   3. mark the peer EOF, wake it, detach both cross links
//!   4. release the ring and loan window, hand budget back
//!
//! A concurrent call on the other endpoint observes EOF (reader) or broken
//! pipe (writer), never a dangling buffer.

use log::debug;
use parking_lot::MutexGuard;

use crate::endpoint::Endpoint;
use crate::notify::{PollEvents, SignalReason};
use crate::state::{Guard, IoData, PairState, Shutdown};
use crate::Side;

impl Endpoint {
    fn quiescent(&self, st: &PairState) -> bool {
        let own = &st[self.side()];
        own.busy == 0 && !own.gate.is_held() && own.direct.is_idle()
    }

    fn wake_pair(&self, st: &Guard<'_>) {
        self.core.wake_all();
        if let Some(peer) = st[self.side()].peer.as_ref() {
            peer.wake_all();
        }
    }

    pub(crate) fn close(&self) {
        let side = self.side();
        let mut st = self.shared.state.lock();
        match st[side].shutdown {
            Shutdown::Closed => return,
            Shutdown::Closing => {
                while st[side].shutdown != Shutdown::Closed {
                    self.core.wake.wait(&mut st);
                }
                return;
            }
            Shutdown::Open => {}
        }
        st[side].shutdown = Shutdown::Closing;
        st[side].eof = true;
        debug!("{}: closing {:?} end", self.shared.id, side);

        self.wake_pair(&st);
        while !self.quiescent(&st) {
            self.core.wake.wait(&mut st);
            self.wake_pair(&st);
        }

        if let Some(peer) = st[side].peer.take() {
            let other = side.peer();
            st[other].eof = true;
            st[other].peer = None;
            peer.wake_all();
            // A writer left without a reader is in error: its next write fails.
            let (events, reason) = match other {
                Side::Read => (PollEvents::READABLE | PollEvents::HANGUP, SignalReason::Hangup),
                Side::Write => (
                    PollEvents::WRITABLE | PollEvents::ERROR | PollEvents::HANGUP,
                    SignalReason::Error,
                ),
            };
            let owner = st[other].async_owner();
            self.shared.ctx.bridge.post(other, events, reason, owner);
        }

        let released = MutexGuard::unlocked(&mut st, || {
            let mut io = self.core.io.lock();
            self.release_storage(&mut io)
        });
        let own = &mut st[side];
        own.size = 0;
        own.queued = 0;
        own.direct_pending = 0;
        own.shutdown = Shutdown::Closed;
        self.core.wake.notify_all();
        debug!("{}: {:?} end closed, {} bytes released", self.shared.id, side, released);
    }

    /// Frees the ring and the cached loan window, returning their budget.
    fn release_storage(&self, io: &mut IoData) -> usize {
        let budget = &self.shared.ctx.budget;
        let ring = io.ring.release();
        budget.release(ring);
        if io.big {
            budget.release_big();
            io.big = false;
        }
        debug_assert!(io.descriptor.is_none(), "loan released while mapped");
        if let Some(transfer) = self.shared.ctx.transfer.as_ref() {
            transfer.unmap(&mut io.window);
        }
        let window = io.window.release();
        budget.release(io.window_charge);
        io.window_charge = 0;
        ring + window
    }
}
