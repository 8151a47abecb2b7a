// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Builds connected pipe pairs from a config, a budget, an optional
//! direct-transfer capability and an event sink.

use std::sync::Arc;

use log::debug;

use crate::budget::ResourceBudget;
use crate::config::PipeConfig;
use crate::direct::{DirectTransfer, HeapLoan};
use crate::endpoint::{Endpoint, ReadEnd, WriteEnd};
use crate::error::{ConfigError, Result};
use crate::notify::{Bridge, EventSink, NullSink};
use crate::ring::RingBuffer;
use crate::state::{EndpointCore, IoData, PairContext, PairState, PipeId, SharedLock};
use crate::Side;

/// Creates pipe pairs sharing one configuration and resource budget.
#[derive(Clone)]
pub struct PipeFactory {
    config: PipeConfig,
    budget: Arc<ResourceBudget>,
    transfer: Option<Arc<dyn DirectTransfer>>,
    sink: Arc<dyn EventSink>,
}

impl Default for PipeFactory {
    /// Default tunables on the process-wide budget.
    fn default() -> Self {
        Self::assemble(PipeConfig::default(), ResourceBudget::global())
    }
}

impl PipeFactory {
    /// Validates `config` and builds a factory with a private budget sized from it.
    pub fn new(config: PipeConfig) -> core::result::Result<Self, ConfigError> {
        config.validate()?;
        let budget = Arc::new(ResourceBudget::new(config.map_budget, config.max_big_pipes));
        Ok(Self::assemble(config, budget))
    }

    fn assemble(config: PipeConfig, budget: Arc<ResourceBudget>) -> Self {
        let transfer: Option<Arc<dyn DirectTransfer>> =
            if config.direct { Some(Arc::new(HeapLoan)) } else { None };
        Self { config, budget, transfer, sink: Arc::new(NullSink) }
    }

    /// Shares `budget` with other factories instead of the private one.
    pub fn with_budget(mut self, budget: Arc<ResourceBudget>) -> Self {
        self.budget = budget;
        self
    }

    /// Replaces the direct-transfer capability; `None` keeps every write on the ring.
    pub fn with_transfer(mut self, transfer: Option<Arc<dyn DirectTransfer>>) -> Self {
        self.transfer = transfer;
        self
    }

    /// Routes readiness and signal notifications to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Tunables applied to new pairs.
    pub fn config(&self) -> &PipeConfig {
        &self.config
    }

    /// Budget charged by pairs from this factory.
    pub fn budget(&self) -> &Arc<ResourceBudget> {
        &self.budget
    }

    /// Allocates a connected pair.
    pub fn create(&self) -> Result<(ReadEnd, WriteEnd)> {
        let id = PipeId::next();
        let ring = RingBuffer::with_capacity(self.config.initial_size)?;
        let size = ring.size();
        self.budget.force_charge(size);

        let reader = Arc::new(EndpointCore::new(Side::Read, IoData::with_ring(ring)));
        let writer = Arc::new(EndpointCore::new(Side::Write, IoData::default()));
        let state = PairState::new(&reader, &writer, size);
        let ctx = PairContext {
            config: self.config.clone(),
            budget: Arc::clone(&self.budget),
            transfer: self.transfer.clone(),
            bridge: Bridge::new(Arc::clone(&self.sink), id),
        };
        let shared = Arc::new(SharedLock::new(id, state, ctx));
        debug!("{id}: created with {size} byte ring");

        Ok((
            ReadEnd(Endpoint::new(Arc::clone(&shared), reader)),
            WriteEnd(Endpoint::new(shared, writer)),
        ))
    }
}
