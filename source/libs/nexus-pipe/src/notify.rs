// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Event/notification bridge between pipe state transitions and the host's
//! readiness and signal machinery.
//!
//! Sinks are invoked while the pair's shared lock is held: an [`EventSink`]
//! must not call back into the pipe it is notifying about.

use std::sync::Arc;

use bitflags::bitflags;

use crate::state::PipeId;
use crate::Side;

bitflags! {
    /// Readiness conditions reported by `poll` and pushed to an [`EventSink`].
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PollEvents: u32 {
        /// Data or end-of-file can be observed by a read.
        const READABLE = 1 << 0;
        /// At least `PIPE_BUF` bytes can be written without blocking, or the reader is gone.
        const WRITABLE = 1 << 1;
        /// The peer endpoint closed.
        const HANGUP = 1 << 2;
        /// A write would fail (reader gone).
        const ERROR = 1 << 3;
    }
}

/// Registered recipient of asynchronous notifications for an endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Owner {
    /// A single process.
    Process(u32),
    /// Every member of a process group.
    ProcessGroup(u32),
}

/// Reason code attached to an out-of-band signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignalReason {
    /// Data became available.
    Readable,
    /// Space became available.
    Writable,
    /// The writer closed; the reader will see end-of-file.
    Hangup,
    /// The reader closed; writes on this endpoint now fail.
    Error,
    /// A write failed because the reader is gone.
    BrokenPipe,
}

/// External readiness/signal delivery consumed by the bridge.
pub trait EventSink: Send + Sync {
    /// Wakes readiness waiters registered on `side` of pair `pipe`.
    fn readiness(&self, pipe: PipeId, side: Side, events: PollEvents);

    /// Requests delivery of an out-of-band signal to `owner`.
    fn signal(&self, owner: Owner, reason: SignalReason);
}

/// Sink that drops every notification.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn readiness(&self, _pipe: PipeId, _side: Side, _events: PollEvents) {}

    fn signal(&self, _owner: Owner, _reason: SignalReason) {}
}

/// Per-pair handle onto the sink.
pub(crate) struct Bridge {
    sink: Arc<dyn EventSink>,
    id: PipeId,
}

impl Bridge {
    pub(crate) fn new(sink: Arc<dyn EventSink>, id: PipeId) -> Self {
        Self { sink, id }
    }

    /// Notifies waiters on `side` and, when `side` opted into asynchronous
    /// notification, its owner.
    pub(crate) fn post(
        &self,
        side: Side,
        events: PollEvents,
        reason: SignalReason,
        async_owner: Option<Owner>,
    ) {
        self.sink.readiness(self.id, side, events);
        if let Some(owner) = async_owner {
            self.sink.signal(owner, reason);
        }
    }

    /// Delivers a signal regardless of readiness waiters.
    pub(crate) fn signal(&self, owner: Owner, reason: SignalReason) {
        self.sink.signal(owner, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        readiness: Mutex<Vec<(Side, PollEvents)>>,
        signals: Mutex<Vec<(Owner, SignalReason)>>,
    }

    impl EventSink for Recorder {
        fn readiness(&self, _pipe: PipeId, side: Side, events: PollEvents) {
            self.readiness.lock().push((side, events));
        }

        fn signal(&self, owner: Owner, reason: SignalReason) {
            self.signals.lock().push((owner, reason));
        }
    }

    #[test]
    fn post_signals_only_async_owners() {
        let recorder = Arc::new(Recorder::default());
        let bridge = Bridge::new(recorder.clone(), PipeId::next());
        bridge.post(Side::Read, PollEvents::READABLE, SignalReason::Readable, None);
        bridge.post(
            Side::Write,
            PollEvents::WRITABLE,
            SignalReason::Writable,
            Some(Owner::ProcessGroup(7)),
        );
        assert_eq!(
            *recorder.readiness.lock(),
            vec![(Side::Read, PollEvents::READABLE), (Side::Write, PollEvents::WRITABLE)]
        );
        assert_eq!(*recorder.signals.lock(), vec![(Owner::ProcessGroup(7), SignalReason::Writable)]);
    }
}
