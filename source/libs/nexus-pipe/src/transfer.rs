// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Read and write paths (ring buffer + direct-transfer handshake)
//!
//! OWNERS: @runtime
//!
//! Data always lives on the read end: writers copy into the reader's ring or
//! map a chunk into the reader's loan window. Both directions therefore queue
//! on the read end's I/O gate, and copies run with the shared lock released.
//!
//! ORDERING: a direct chunk only becomes readable once the ring drained, and no
//! other writer may touch the ring until the handshake is back to idle.

use std::time::{Instant, SystemTime};

use log::{debug, trace, warn};
use parking_lot::{Condvar, MutexGuard};

use crate::direct::{DirectState, LoanDescriptor};
use crate::error::{PipeError, Result};
use crate::notify::{PollEvents, SignalReason};
use crate::endpoint::Endpoint;
use crate::state::{EndpointCore, Guard, IoData, PairState, Shutdown};
use crate::{Side, Wait, PIPE_BUF};

/// Per-call wait policy and cancellation snapshot.
pub(crate) struct OpContext {
    side: Side,
    wait: Wait,
    deadline: Option<Instant>,
    epoch: u64,
}

impl OpContext {
    pub(crate) fn new(st: &PairState, side: Side, wait: Option<Wait>) -> Self {
        let wait = wait.unwrap_or(if st[side].nonblocking { Wait::NonBlocking } else { Wait::Blocking });
        Self {
            side,
            wait,
            deadline: wait.timeout().map(|timeout| Instant::now() + timeout),
            epoch: st[side].interrupts,
        }
    }

    /// Fails once the calling endpoint closes or is interrupted.
    pub(crate) fn check(&self, st: &PairState) -> Result<()> {
        if !st[self.side].is_open() {
            return Err(PipeError::Closed);
        }
        if st[self.side].interrupts != self.epoch {
            return Err(PipeError::Interrupted);
        }
        Ok(())
    }

    fn sleep(&self, st: &mut Guard<'_>, cv: &Condvar) -> Result<()> {
        match self.deadline {
            None => cv.wait(st),
            Some(deadline) => {
                if cv.wait_until(st, deadline).timed_out() {
                    self.check(st)?;
                    return Err(PipeError::Timeout);
                }
            }
        }
        self.check(st)
    }

    /// Suspends until `cv` is notified; callers re-evaluate their condition after.
    pub(crate) fn block(&self, st: &mut Guard<'_>, cv: &Condvar) -> Result<()> {
        if self.wait.is_non_blocking() {
            return Err(PipeError::WouldBlock);
        }
        self.check(st)?;
        self.sleep(st, cv)
    }
}

/// A writer may only proceed while the read end is attached and open.
fn reader_alive(st: &PairState) -> Result<()> {
    if st[Side::Write].peer.is_none() || !st[Side::Read].is_open() {
        return Err(PipeError::BrokenPipe);
    }
    Ok(())
}

impl Endpoint {
    /// Waits for FIFO admission to `owner`'s I/O gate.
    ///
    /// Gate waits are short and happen even for non-blocking calls.
    fn acquire_gate(
        &self,
        st: &mut Guard<'_>,
        owner: &EndpointCore,
        ctx: &OpContext,
        validate: fn(&PairState) -> Result<()>,
    ) -> Result<()> {
        ctx.check(st)?;
        validate(st)?;
        let ticket = st[owner.side].gate.enqueue();
        loop {
            if st[owner.side].gate.try_admit(ticket) {
                return Ok(());
            }
            let res = match ctx.sleep(st, &owner.gate_cv) {
                Ok(()) => validate(st),
                Err(err) => Err(err),
            };
            if let Err(err) = res {
                st[owner.side].gate.abandon(ticket);
                owner.gate_cv.notify_all();
                return Err(err);
            }
        }
    }

    pub(crate) fn release_gate(&self, st: &mut Guard<'_>, owner: &EndpointCore) {
        st[owner.side].gate.release();
        owner.gate_cv.notify_all();
        if st[owner.side].shutdown != Shutdown::Open {
            owner.wake.notify_all();
        }
    }

    /// Reads from the ring or the mapped direct chunk; `Ok(0)` means EOF.
    pub(crate) fn read(&self, dst: &mut [u8], wait: Option<Wait>) -> Result<usize> {
        let mut st = self.shared.state.lock();
        let ctx = OpContext::new(&st, Side::Read, wait);
        ctx.check(&st)?;
        if dst.is_empty() {
            return Ok(0);
        }
        st[Side::Read].busy += 1;
        let res = self.read_locked(&mut st, &ctx, dst);
        self.finish(&mut st);
        res
    }

    fn read_locked(&self, st: &mut Guard<'_>, ctx: &OpContext, dst: &mut [u8]) -> Result<usize> {
        let core = &self.core;
        loop {
            self.acquire_gate(st, core, ctx, |_| Ok(()))?;
            if st[Side::Read].queued > 0 {
                return Ok(self.read_ring(st, dst));
            }
            if st[Side::Read].direct == DirectState::Ready {
                let n = self.read_direct(st, dst);
                if n > 0 {
                    return Ok(n);
                }
                // The writer revoked the chunk between our check and the copy.
                continue;
            }
            self.release_gate(st, core);
            if st[Side::Read].eof || st[Side::Read].peer.is_none() {
                return Ok(0);
            }
            st[Side::Read].readers_blocked += 1;
            let res = ctx.block(st, &core.wake);
            st[Side::Read].readers_blocked -= 1;
            res?;
        }
    }

    fn read_ring(&self, st: &mut Guard<'_>, dst: &mut [u8]) -> usize {
        let core = &self.core;
        let prev_free = st[Side::Read].free();
        let (n, queued, size) = MutexGuard::unlocked(st, || {
            let mut io = core.io.lock();
            let n = io.ring.read(dst);
            if io.ring.is_empty() {
                self.shrink_if_pressured(&mut io);
            }
            (n, io.ring.len(), io.ring.size())
        });
        let reader = &mut st[Side::Read];
        reader.queued = queued;
        reader.size = size;
        reader.times.atime = SystemTime::now();
        self.release_gate(st, core);
        self.space_freed(st, prev_free);
        n
    }

    fn read_direct(&self, st: &mut Guard<'_>, dst: &mut [u8]) -> usize {
        let core = &self.core;
        let (n, remaining) = MutexGuard::unlocked(st, || {
            let mut io = core.io.lock();
            let IoData { window, descriptor, .. } = &mut *io;
            match descriptor.as_mut() {
                Some(desc) => (desc.copy_out(window, dst), desc.remaining),
                None => (0, 0),
            }
        });
        if st[Side::Read].direct == DirectState::Ready {
            st[Side::Read].direct_pending = remaining;
            if n > 0 {
                st[Side::Read].times.atime = SystemTime::now();
            }
            if remaining == 0 {
                st[Side::Read].direct = DirectState::Consumed;
                trace!("{}: direct chunk consumed", self.shared.id);
                if let Some(writer) = st[Side::Read].peer.as_ref() {
                    writer.wake.notify_all();
                }
            }
        }
        self.release_gate(st, core);
        n
    }

    /// Wakes blocked writers once at least `PIPE_BUF` bytes are free again.
    fn space_freed(&self, st: &mut Guard<'_>, prev_free: usize) {
        let free = st[Side::Read].free();
        if free < PIPE_BUF {
            return;
        }
        let Some(writer) = st[Side::Read].peer.clone() else {
            return;
        };
        if st[Side::Write].writers_blocked > 0 {
            writer.wake.notify_all();
        }
        if prev_free < PIPE_BUF || st[Side::Read].signal_next_reader {
            st[Side::Read].signal_next_reader = false;
            let owner = st[Side::Write].async_owner();
            self.shared.ctx.bridge.post(Side::Write, PollEvents::WRITABLE, SignalReason::Writable, owner);
        }
    }

    fn shrink_if_pressured(&self, io: &mut IoData) {
        let ctx = &self.shared.ctx;
        if !io.big || !ctx.budget.under_pressure() {
            return;
        }
        let old = io.ring.size();
        let target = ctx.config.initial_size;
        if io.ring.resize(target).is_ok() {
            ctx.budget.release(old - target);
            ctx.budget.release_big();
            io.big = false;
            debug!("{}: ring shrunk {} -> {} bytes", self.shared.id, old, target);
        }
    }

    /// Writes `src`, blocking per `wait`; returns a short count if interrupted
    /// after some bytes were delivered.
    pub(crate) fn write(&self, src: &[u8], wait: Option<Wait>) -> Result<usize> {
        let mut st = self.shared.state.lock();
        let ctx = OpContext::new(&st, Side::Write, wait);
        ctx.check(&st)?;
        st[Side::Write].busy += 1;
        let res = if src.is_empty() {
            reader_alive(&st).map(|()| 0)
        } else {
            self.write_locked(&mut st, &ctx, src)
        };
        if res == Err(PipeError::BrokenPipe) {
            if let Some(owner) = st[Side::Write].owner {
                self.shared.ctx.bridge.signal(owner, SignalReason::BrokenPipe);
            }
        }
        self.finish(&mut st);
        res
    }

    fn write_locked(&self, st: &mut Guard<'_>, ctx: &OpContext, src: &[u8]) -> Result<usize> {
        let mut written = 0;
        while written < src.len() {
            match self.write_step(st, ctx, &src[written..]) {
                Ok(n) => written += n,
                Err(err) if written == 0 => return Err(err),
                Err(_) => break,
            }
        }
        Ok(written)
    }

    /// Moves at least one byte of `rest` or fails.
    fn write_step(&self, st: &mut Guard<'_>, ctx: &OpContext, rest: &[u8]) -> Result<usize> {
        loop {
            ctx.check(st)?;
            reader_alive(st)?;
            let reader = st[Side::Write].peer.clone().ok_or(PipeError::BrokenPipe)?;
            self.acquire_gate(st, &reader, ctx, reader_alive)?;

            if !st[Side::Read].direct.is_idle() {
                // Another writer's chunk is in flight; nothing may be queued behind it.
                self.release_gate(st, &reader);
                self.wait_for_space(st, ctx)?;
                continue;
            }

            if self.direct_eligible(ctx, rest.len()) {
                if let Some(res) = self.write_direct(st, ctx, &reader, rest) {
                    return res;
                }
            }

            let prev_queued = st[Side::Read].queued;
            let (n, queued, size) = MutexGuard::unlocked(st, || {
                let mut io = reader.io.lock();
                self.grow_if_useful(&mut io, rest.len());
                let take = io.ring.space_for(rest.len());
                let n = io.ring.write(&rest[..take]);
                (n, io.ring.len(), io.ring.size())
            });
            st[Side::Read].queued = queued;
            st[Side::Read].size = size;
            self.release_gate(st, &reader);

            if n == 0 {
                st[Side::Read].signal_next_reader = true;
                self.wait_for_space(st, ctx)?;
                continue;
            }

            let now = SystemTime::now();
            st[Side::Write].times.mtime = now;
            st[Side::Read].times.mtime = now;
            if st[Side::Read].readers_blocked > 0 {
                reader.wake.notify_all();
            }
            if prev_queued == 0 {
                let owner = st[Side::Read].async_owner();
                self.shared.ctx.bridge.post(Side::Read, PollEvents::READABLE, SignalReason::Readable, owner);
            }
            return Ok(n);
        }
    }

    fn wait_for_space(&self, st: &mut Guard<'_>, ctx: &OpContext) -> Result<()> {
        st[Side::Write].writers_blocked += 1;
        let res = ctx.block(st, &self.core.wake);
        st[Side::Write].writers_blocked -= 1;
        res
    }

    fn direct_eligible(&self, ctx: &OpContext, len: usize) -> bool {
        let pair = &self.shared.ctx;
        pair.transfer.is_some()
            && !ctx.wait.is_non_blocking()
            && len > PIPE_BUF
            && len >= pair.config.direct_threshold
    }

    /// Grows an empty ring to `big_size` for writes longer than the initial size.
    fn grow_if_useful(&self, io: &mut IoData, len: usize) {
        let ctx = &self.shared.ctx;
        let old = io.ring.size();
        let big = ctx.config.big_size;
        if !io.ring.is_empty() || io.big || len <= ctx.config.initial_size || big <= old {
            return;
        }
        if !ctx.budget.try_acquire_big() {
            return;
        }
        let delta = big - old;
        let mut charged = ctx.budget.try_charge(delta);
        if !charged && io.window_charge > 0 && io.descriptor.is_none() {
            // Hand the cached loan window back and retry.
            io.window.release();
            ctx.budget.release(io.window_charge);
            io.window_charge = 0;
            charged = ctx.budget.try_charge(delta);
        }
        if !charged {
            ctx.budget.release_big();
            return;
        }
        match io.ring.resize(big) {
            Ok(()) => {
                io.big = true;
                debug!("{}: ring grown {} -> {} bytes", self.shared.id, old, big);
            }
            Err(_) => {
                warn!("{}: could not grow ring to {} bytes", self.shared.id, big);
                ctx.budget.release(delta);
                ctx.budget.release_big();
            }
        }
    }

    /// Runs one direct-transfer handshake. Entered holding the reader's gate;
    /// returns `None` (gate still held, nothing changed) when the chunk could
    /// not be mapped and the ring path should be used instead.
    fn write_direct(
        &self,
        st: &mut Guard<'_>,
        ctx: &OpContext,
        reader: &EndpointCore,
        rest: &[u8],
    ) -> Option<Result<usize>> {
        let pair = &self.shared.ctx;
        let transfer = pair.transfer.as_ref()?;
        let chunk = rest.len().min(pair.config.direct_chunk);
        let mapped = MutexGuard::unlocked(st, || {
            let mut io = reader.io.lock();
            let needed = chunk.saturating_sub(io.window.capacity());
            if needed > 0 && !pair.budget.try_charge(needed) {
                return false;
            }
            io.window_charge += needed;
            let res = transfer.map(&mut io.window, &rest[..chunk]);
            let capacity = io.window.capacity();
            if capacity > io.window_charge {
                pair.budget.force_charge(capacity - io.window_charge);
            } else {
                pair.budget.release(io.window_charge - capacity);
            }
            io.window_charge = capacity;
            match res {
                Ok(()) if io.window.mapped_len() == chunk => {
                    io.descriptor = Some(LoanDescriptor::new(chunk));
                    true
                }
                Ok(()) => {
                    warn!(
                        "{}: direct mapping covered {} of {} bytes, using ring",
                        self.shared.id,
                        io.window.mapped_len(),
                        chunk
                    );
                    transfer.unmap(&mut io.window);
                    false
                }
                Err(err) => {
                    warn!("{}: direct mapping failed ({err}), using ring", self.shared.id);
                    false
                }
            }
        });
        if !mapped {
            return None;
        }

        st[Side::Read].direct = DirectState::Draining;
        st[Side::Read].direct_pending = chunk;
        trace!("{}: direct chunk of {} bytes mapped, draining ring", self.shared.id, chunk);
        self.release_gate(st, reader);

        let outcome = loop {
            if let Err(err) = ctx.check(st) {
                break Err(err);
            }
            if let Err(err) = reader_alive(st) {
                break Err(err);
            }
            match st[Side::Read].direct {
                DirectState::Draining if st[Side::Read].queued == 0 => {
                    st[Side::Read].direct = DirectState::Ready;
                    trace!("{}: direct chunk ready", self.shared.id);
                    reader.wake.notify_all();
                    let owner = st[Side::Read].async_owner();
                    pair.bridge.post(Side::Read, PollEvents::READABLE, SignalReason::Readable, owner);
                }
                DirectState::Consumed => break Ok(()),
                DirectState::Draining | DirectState::Ready => {
                    if let Err(err) = self.wait_for_space(st, ctx) {
                        break Err(err);
                    }
                }
                DirectState::Idle => {
                    debug_assert!(false, "direct handshake reset under an active writer");
                    break Err(PipeError::BrokenPipe);
                }
            }
        };

        // Revoke the reader's view before unmapping so no new copy starts.
        st[Side::Read].direct = DirectState::Consumed;
        let consumed = MutexGuard::unlocked(st, || {
            let mut io = reader.io.lock();
            let consumed = io.descriptor.take().map_or(0, |desc| desc.consumed());
            transfer.unmap(&mut io.window);
            consumed
        });
        st[Side::Read].direct = DirectState::Idle;
        st[Side::Read].direct_pending = 0;
        trace!("{}: direct chunk done, {}/{} bytes consumed", self.shared.id, consumed, chunk);
        self.core.wake.notify_all();
        reader.wake.notify_all();
        if st[Side::Read].signal_next_reader && st[Side::Read].free() >= PIPE_BUF {
            st[Side::Read].signal_next_reader = false;
            let owner = st[Side::Write].async_owner();
            pair.bridge.post(Side::Write, PollEvents::WRITABLE, SignalReason::Writable, owner);
        }

        if consumed > 0 {
            let now = SystemTime::now();
            st[Side::Write].times.mtime = now;
            st[Side::Read].times.mtime = now;
        }
        Some(match outcome {
            Ok(()) => Ok(consumed),
            Err(_) if consumed > 0 => Ok(consumed),
            Err(err) => Err(err),
        })
    }
}
