//! Receiver configuration.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Tunables of one catchain instance.
///
/// All periods are in milliseconds. Randomized periods are drawn uniformly
/// from `[min, max]` each time the timer is rescheduled.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CatchainConfig {
    /// Maximum number of cross-source dependencies per block.
    pub max_deps: usize,

    /// Height bound coefficient (per mille). 0 disables the bound.
    pub max_block_height_coeff: u64,

    /// Maximum serialized block size in bytes.
    pub max_serialized_block_size: u64,

    /// Maximum blocks pushed in reply to one getDifference.
    pub max_blocks_to_send: usize,

    /// Size of the gossip neighbour sample.
    pub max_neighbours: usize,

    /// Maximum getBlock fetches issued per sync round.
    pub max_pending_deps_fetch: usize,

    /// Random picks tried per sync round before giving up.
    pub max_sources_sync_attempts: usize,

    pub sync_period_min_ms: u64,
    pub sync_period_max_ms: u64,

    pub neighbours_rotate_min_ms: u64,
    pub neighbours_rotate_max_ms: u64,

    pub get_difference_timeout_ms: u64,
    pub get_block_timeout_ms: u64,

    /// Initial sync window in safe mode.
    pub initial_sync_ms: u64,

    /// Initial sync window when own blocks may be recovered from the network.
    pub unsafe_initial_sync_ms: u64,

    /// Recheck delay while own chain is still being recovered.
    pub unsafe_recheck_ms: u64,

    /// Recheck delay while the root pointer rewrite is in flight.
    pub unsafe_root_retry_ms: u64,

    /// Accept own blocks from the network before start (state loss recovery).
    pub allow_unsafe_self_blocks_resync: bool,

    /// Hashes remembered per peer for duplicate suppression.
    pub peer_filter_capacity: usize,

    /// Store deletion attempts on destroy.
    pub destroy_attempts: u32,

    /// Base backoff between store deletion attempts (doubles per attempt).
    pub destroy_backoff_ms: u64,

    /// Fixed RNG seed for reproducible runs. Entropy when absent.
    pub rng_seed: Option<u64>,
}

impl Default for CatchainConfig {
    fn default() -> Self {
        Self {
            max_deps: 4,
            max_block_height_coeff: 0,
            max_serialized_block_size: 16 * 1024 * 1024, // 16 MiB
            max_blocks_to_send: 100,
            max_neighbours: 5,
            max_pending_deps_fetch: 16,
            max_sources_sync_attempts: 3,
            sync_period_min_ms: 100,
            sync_period_max_ms: 200,
            neighbours_rotate_min_ms: 60_000,
            neighbours_rotate_max_ms: 120_000,
            get_difference_timeout_ms: 5_000,
            get_block_timeout_ms: 2_000,
            initial_sync_ms: 5_000,
            unsafe_initial_sync_ms: 300_000,
            unsafe_recheck_ms: 60_000,
            unsafe_root_retry_ms: 5_000,
            allow_unsafe_self_blocks_resync: false,
            peer_filter_capacity: 10_000,
            destroy_attempts: 10,
            destroy_backoff_ms: 100,
            rng_seed: None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("local key is not a member of the session")]
    UnknownLocalMember,

    #[error("session has no members")]
    NoMembers,

    #[error("duplicate member key")]
    DuplicateMember,

    #[error("failed to parse config: {0}")]
    Parse(String),
}

impl CatchainConfig {
    /// Parse from JSON, filling missing fields with defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_deps == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_deps",
                reason: "must be at least 1".into(),
            });
        }
        if self.max_blocks_to_send == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_blocks_to_send",
                reason: "must be at least 1".into(),
            });
        }
        if self.sync_period_min_ms > self.sync_period_max_ms {
            return Err(ConfigError::InvalidValue {
                field: "sync_period_min_ms",
                reason: "exceeds sync_period_max_ms".into(),
            });
        }
        if self.neighbours_rotate_min_ms > self.neighbours_rotate_max_ms {
            return Err(ConfigError::InvalidValue {
                field: "neighbours_rotate_min_ms",
                reason: "exceeds neighbours_rotate_max_ms".into(),
            });
        }
        Ok(())
    }

    pub fn get_difference_timeout(&self) -> Duration {
        Duration::from_millis(self.get_difference_timeout_ms)
    }

    pub fn get_block_timeout(&self) -> Duration {
        Duration::from_millis(self.get_block_timeout_ms)
    }

    /// Initial sync window for the configured mode.
    pub fn initial_sync_window(&self) -> Duration {
        if self.allow_unsafe_self_blocks_resync {
            Duration::from_millis(self.unsafe_initial_sync_ms)
        } else {
            Duration::from_millis(self.initial_sync_ms)
        }
    }

    pub fn destroy_backoff(&self) -> Duration {
        Duration::from_millis(self.destroy_backoff_ms)
    }
}
