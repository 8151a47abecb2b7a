// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Fixed-capacity circular byte buffer backing the copying path
//!
//! OWNERS: @runtime
//!
//! INVARIANTS:
//!   - `0 <= cnt <= size`, `input < size`, `output < size` (both 0 when `size == 0`)
//!   - both cursors snap back to 0 whenever the buffer drains
//!   - capacity only changes while the buffer is empty

use crate::error::{PipeError, Result};
use crate::PIPE_BUF;

/// Circular byte buffer with in/out cursors and a fill count.
#[derive(Debug, Default)]
pub(crate) struct RingBuffer {
    buf: Vec<u8>,
    input: usize,
    output: usize,
    cnt: usize,
}

fn alloc(size: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(size).map_err(|_| PipeError::OutOfMemory)?;
    buf.resize(size, 0);
    Ok(buf)
}

impl RingBuffer {
    pub(crate) fn with_capacity(size: usize) -> Result<Self> {
        Ok(Self { buf: alloc(size)?, input: 0, output: 0, cnt: 0 })
    }

    pub(crate) fn size(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.cnt
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.cnt == 0
    }

    pub(crate) fn free(&self) -> usize {
        self.size() - self.cnt
    }

    /// Space usable by a write of `len` bytes.
    ///
    /// Writes of at most [`PIPE_BUF`] bytes are all-or-nothing: if they do not
    /// fit they get no space at all and the writer has to wait.
    pub(crate) fn space_for(&self, len: usize) -> usize {
        let space = self.free();
        if space < len && len <= PIPE_BUF {
            0
        } else {
            space.min(len)
        }
    }

    /// Copies as much of `src` as fits; returns the byte count.
    pub(crate) fn write(&mut self, src: &[u8]) -> usize {
        let n = src.len().min(self.free());
        if n == 0 {
            return 0;
        }
        let size = self.size();
        let first = n.min(size - self.input);
        self.buf[self.input..self.input + first].copy_from_slice(&src[..first]);
        self.buf[..n - first].copy_from_slice(&src[first..n]);
        self.input = (self.input + n) % size;
        self.cnt += n;
        n
    }

    /// Copies up to `dst.len()` queued bytes out; returns the byte count.
    pub(crate) fn read(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.cnt);
        if n == 0 {
            return 0;
        }
        let size = self.size();
        let first = n.min(size - self.output);
        dst[..first].copy_from_slice(&self.buf[self.output..self.output + first]);
        dst[first..n].copy_from_slice(&self.buf[..n - first]);
        self.output = (self.output + n) % size;
        self.cnt -= n;
        if self.cnt == 0 {
            // Restart at 0 so the next writes land in one contiguous run.
            self.input = 0;
            self.output = 0;
        }
        n
    }

    /// Replaces the storage with one of `size` bytes. Only legal while empty.
    pub(crate) fn resize(&mut self, size: usize) -> Result<()> {
        debug_assert!(self.is_empty(), "ring resized while holding data");
        self.buf = alloc(size)?;
        self.input = 0;
        self.output = 0;
        Ok(())
    }

    /// Drops the storage and any queued bytes; returns the released capacity.
    pub(crate) fn release(&mut self) -> usize {
        let size = self.size();
        *self = Self::default();
        size
    }
}
