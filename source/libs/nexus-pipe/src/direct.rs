// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Direct-transfer capability for large writes
//!
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//!
//! PUBLIC API:
//!   - trait DirectTransfer: host capability that exposes a writer's chunk to the reader
//!   - struct LoanWindow: per-endpoint reusable window the capability maps chunks into
//!   - struct HeapLoan: portable capability backed by a heap window
//!   - enum LoanError: mapping failures (the caller degrades to the ring path)
//!
//! HANDSHAKE (per chunk, on the buffer-owning endpoint):
//!   Idle -> Draining   writer mapped a chunk, waits for the ring to drain
//!   Draining -> Ready  ring empty, reader may copy out of the window
//!   Ready -> Consumed  reader took the last byte of the chunk
//!   Consumed -> Idle   writer unmapped and accounted the chunk
//!
//! A cancelled or failed handshake goes straight back to Idle; the writer
//! accounts whatever the reader consumed up to that point.

use core::fmt;

use thiserror::Error;

/// Errors raised while mapping a chunk into a [`LoanWindow`].
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum LoanError {
    /// The window could not be grown to hold the chunk.
    #[error("loan window allocation failed")]
    OutOfMemory,
    /// The capability declined this chunk.
    #[error("direct transfer unavailable")]
    Unavailable,
}

/// Address-space window a writer's chunk is exposed through.
///
/// The reservation survives across chunks and calls so repeated large writes
/// reuse it; only the mapped prefix is visible to the reader.
#[derive(Debug, Default)]
pub struct LoanWindow {
    region: Vec<u8>,
    mapped: usize,
}

impl LoanWindow {
    /// Bytes currently reserved.
    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Bytes of the current chunk.
    pub fn mapped_len(&self) -> usize {
        self.mapped
    }

    /// The current chunk as seen by the reader.
    pub fn mapped(&self) -> &[u8] {
        &self.region[..self.mapped]
    }

    /// Grows the reservation to at least `len` bytes.
    pub fn reserve(&mut self, len: usize) -> Result<(), LoanError> {
        if len <= self.region.len() {
            return Ok(());
        }
        let extra = len - self.region.len();
        self.region.try_reserve_exact(extra).map_err(|_| LoanError::OutOfMemory)?;
        self.region.resize(len, 0);
        Ok(())
    }

    /// Exposes `src` through the window. The reservation must already fit it.
    pub fn install(&mut self, src: &[u8]) -> Result<(), LoanError> {
        let dst = self.region.get_mut(..src.len()).ok_or(LoanError::OutOfMemory)?;
        dst.copy_from_slice(src);
        self.mapped = src.len();
        Ok(())
    }

    /// Hides the current chunk; the reservation is kept.
    pub fn clear(&mut self) {
        self.mapped = 0;
    }

    /// Drops the reservation; returns how many bytes it held.
    pub(crate) fn release(&mut self) -> usize {
        let size = self.region.len();
        *self = Self::default();
        size
    }
}

/// Host capability that hands a writer's chunk to the reader without going
/// through the ring buffer.
pub trait DirectTransfer: Send + Sync + fmt::Debug {
    /// Makes `src` readable through `window`.
    ///
    /// On `Ok`, `window.mapped()` must expose all of `src`. A mapping that
    /// covers less is revoked with [`DirectTransfer::unmap`] and the write
    /// goes through the ring instead.
    fn map(&self, window: &mut LoanWindow, src: &[u8]) -> Result<(), LoanError>;

    /// Revokes the reader's view of the current chunk.
    fn unmap(&self, window: &mut LoanWindow);
}

/// Portable capability: the chunk is placed in a heap window owned by the
/// receiving endpoint and the reader copies straight out of it.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeapLoan;

impl DirectTransfer for HeapLoan {
    fn map(&self, window: &mut LoanWindow, src: &[u8]) -> Result<(), LoanError> {
        window.reserve(src.len())?;
        window.install(src)
    }

    fn unmap(&self, window: &mut LoanWindow) {
        window.clear();
    }
}

/// Phase of the direct-transfer handshake.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) enum DirectState {
    #[default]
    Idle,
    Draining,
    Ready,
    Consumed,
}

impl DirectState {
    pub(crate) fn is_idle(self) -> bool {
        self == Self::Idle
    }
}

/// Progress of the reader through the chunk currently mapped in the window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct LoanDescriptor {
    pub(crate) offset: usize,
    pub(crate) remaining: usize,
}

impl LoanDescriptor {
    pub(crate) fn new(len: usize) -> Self {
        Self { offset: 0, remaining: len }
    }

    pub(crate) fn consumed(&self) -> usize {
        self.offset
    }

    /// Copies the next bytes of the chunk into `dst`.
    pub(crate) fn copy_out(&mut self, window: &LoanWindow, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.remaining);
        dst[..n].copy_from_slice(&window.mapped()[self.offset..self.offset + n]);
        self.offset += n;
        self.remaining -= n;
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_loan_maps_and_reuses_reservation() {
        let mut window = LoanWindow::default();
        HeapLoan.map(&mut window, b"abcdefgh").unwrap();
        assert_eq!(window.mapped(), b"abcdefgh");
        HeapLoan.unmap(&mut window);
        assert!(window.mapped().is_empty());
        HeapLoan.map(&mut window, b"xyz").unwrap();
        assert_eq!(window.capacity(), 8);
        assert_eq!(window.mapped(), b"xyz");
        assert_eq!(window.release(), 8);
    }

    #[test]
    fn descriptor_walks_the_chunk() {
        let mut window = LoanWindow::default();
        HeapLoan.map(&mut window, b"0123456789").unwrap();
        let mut desc = LoanDescriptor::new(10);
        let mut out = [0u8; 4];
        assert_eq!(desc.copy_out(&window, &mut out), 4);
        assert_eq!(&out, b"0123");
        let mut rest = [0u8; 16];
        assert_eq!(desc.copy_out(&window, &mut rest), 6);
        assert_eq!(&rest[..6], b"456789");
        assert_eq!(desc.remaining, 0);
        assert_eq!(desc.consumed(), 10);
    }

    #[test]
    fn install_without_reservation_fails() {
        let mut window = LoanWindow::default();
        assert_eq!(window.install(b"abc"), Err(LoanError::OutOfMemory));
    }
}
