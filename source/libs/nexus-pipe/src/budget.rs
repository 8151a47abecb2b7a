// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Shared resource budget for oversized rings and loan windows.
//!
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Internal (crate public, but intended for in-tree use)
//! TEST_COVERAGE: Unit tests (host)
//!
//! Charges are opportunistic: a refused charge means "take the unoptimized
//! path", never an error.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::config::{DEFAULT_MAP_BUDGET, DEFAULT_MAX_BIG_PIPES};

static GLOBAL: Lazy<Arc<ResourceBudget>> =
    Lazy::new(|| Arc::new(ResourceBudget::new(DEFAULT_MAP_BUDGET, DEFAULT_MAX_BIG_PIPES)));

/// Space and oversized-ring accounting shared by every pair of a factory.
#[derive(Debug)]
pub struct ResourceBudget {
    charged: AtomicUsize,
    limit: usize,
    big_pipes: AtomicUsize,
    max_big_pipes: usize,
}

impl ResourceBudget {
    /// Creates a budget of `limit` bytes and `max_big_pipes` oversized rings.
    pub fn new(limit: usize, max_big_pipes: usize) -> Self {
        Self { charged: AtomicUsize::new(0), limit, big_pipes: AtomicUsize::new(0), max_big_pipes }
    }

    /// Process-wide budget used by [`crate::create`].
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    /// Bytes currently charged.
    pub fn charged(&self) -> usize {
        self.charged.load(Ordering::Relaxed)
    }

    /// Byte limit of this budget.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of rings currently holding an oversized buffer.
    pub fn big_pipes(&self) -> usize {
        self.big_pipes.load(Ordering::Relaxed)
    }

    /// Returns `true` once more than half of the byte budget is in use.
    pub(crate) fn under_pressure(&self) -> bool {
        self.charged() > self.limit / 2
    }

    /// Charges `bytes` if that keeps the total within the limit.
    pub(crate) fn try_charge(&self, bytes: usize) -> bool {
        self.charged
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|total| *total <= self.limit)
            })
            .is_ok()
    }

    /// Charges `bytes` unconditionally (initial rings must always exist).
    pub(crate) fn force_charge(&self, bytes: usize) {
        self.charged.fetch_add(bytes, Ordering::AcqRel);
    }

    pub(crate) fn release(&self, bytes: usize) {
        let prev = self.charged.fetch_sub(bytes, Ordering::AcqRel);
        debug_assert!(prev >= bytes, "budget released more than charged");
    }

    /// Claims one oversized-ring slot.
    pub(crate) fn try_acquire_big(&self) -> bool {
        self.big_pipes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_big_pipes).then_some(n + 1)
            })
            .is_ok()
    }

    pub(crate) fn release_big(&self) {
        let prev = self.big_pipes.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "big pipe slot released twice");
    }
}
