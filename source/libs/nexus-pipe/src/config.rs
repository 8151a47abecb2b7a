// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Injected tunables for pipe pairs (buffer sizes, direct path, budgets)
//!
//! OWNERS: @runtime
//!
//! STATUS: Functional
//!
//! The direct-path threshold and chunk size are tuning values: ordering and
//! atomicity hold for any valid combination accepted by [`PipeConfig::validate`].

use serde::Deserialize;

use crate::error::ConfigError;
use crate::PIPE_BUF;

/// Default ring capacity at creation.
pub const DEFAULT_INITIAL_SIZE: usize = 16 * 1024;
/// Default ring capacity after growth for a large write.
pub const DEFAULT_BIG_SIZE: usize = 64 * 1024;
/// Default cap on concurrently oversized rings.
pub const DEFAULT_MAX_BIG_PIPES: usize = 32;
/// Default ring + loan space budget.
pub const DEFAULT_MAP_BUDGET: usize = 16 * 1024 * 1024;
/// Default minimum write length routed through the direct path.
pub const DEFAULT_DIRECT_THRESHOLD: usize = 8 * 1024;
/// Default largest chunk handed over per direct transfer.
pub const DEFAULT_DIRECT_CHUNK: usize = 256 * 1024;

/// Tunables applied to every pair built by a [`crate::PipeFactory`].
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PipeConfig {
    /// Ring capacity at creation.
    pub initial_size: usize,
    /// Ring capacity when grown for a write longer than `initial_size`.
    pub big_size: usize,
    /// Maximum number of rings allowed at `big_size` at the same time.
    pub max_big_pipes: usize,
    /// Bytes of ring and loan-window space before optimizations back off.
    pub map_budget: usize,
    /// Minimum remaining write length that qualifies for the direct path.
    pub direct_threshold: usize,
    /// Largest chunk handed to the reader in one direct transfer.
    pub direct_chunk: usize,
    /// Install the heap loan capability when building a factory from this config.
    pub direct: bool,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            initial_size: DEFAULT_INITIAL_SIZE,
            big_size: DEFAULT_BIG_SIZE,
            max_big_pipes: DEFAULT_MAX_BIG_PIPES,
            map_budget: DEFAULT_MAP_BUDGET,
            direct_threshold: DEFAULT_DIRECT_THRESHOLD,
            direct_chunk: DEFAULT_DIRECT_CHUNK,
            direct: true,
        }
    }
}

impl PipeConfig {
    /// Parses a TOML document and validates the result.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input).map_err(|source| ConfigError::Parse { source })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the cross-field constraints the channel relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_size < PIPE_BUF {
            return Err(ConfigError::Invalid {
                field: "initial_size",
                reason: "must hold at least one atomic write (PIPE_BUF)",
            });
        }
        if self.big_size < self.initial_size {
            return Err(ConfigError::Invalid {
                field: "big_size",
                reason: "must not be smaller than initial_size",
            });
        }
        if self.direct_threshold <= PIPE_BUF {
            // Atomic writes must never be split into direct chunks.
            return Err(ConfigError::Invalid {
                field: "direct_threshold",
                reason: "must exceed PIPE_BUF",
            });
        }
        if self.direct_chunk < self.direct_threshold {
            return Err(ConfigError::Invalid {
                field: "direct_chunk",
                reason: "must not be smaller than direct_threshold",
            });
        }
        Ok(())
    }
}
