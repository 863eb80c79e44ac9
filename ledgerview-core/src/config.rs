//! Configuration types
//!
//! Values are loaded from `LEDGERVIEW_*` environment variables with defaults
//! suitable for a single local process. Quorum, voting period and every TTL
//! are inputs here rather than constants in the engine or cache.

use crate::{ConfigError, LedgerError, LedgerResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ============================================================================
// DEFAULTS
// ============================================================================

pub const DEFAULT_QUORUM: usize = 127;
pub const DEFAULT_VOTING_PERIOD_SECS: u64 = 7 * 24 * 60 * 60;
pub const DEFAULT_POWER_CONTRACT: &str = "bond";
pub const DEFAULT_POWER_METHOD: &str = "bondPower";

pub const DEFAULT_VOTING_POWER_TTL_SECS: u64 = 30;
pub const DEFAULT_TOKEN_BALANCE_TTL_SECS: u64 = 30;
pub const DEFAULT_AGGREGATE_TTL_SECS: u64 = 300;
pub const DEFAULT_EVENT_LOG_TTL_SECS: u64 = 120;
pub const DEFAULT_BLOCK_TIME_TTL_SECS: u64 = 3600;
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 15;
pub const DEFAULT_REFRESH_IDLE_SECS: u64 = 600;
pub const DEFAULT_LMDB_MAP_SIZE_MB: usize = 64;

// ============================================================================
// CACHE NAMESPACES
// ============================================================================

/// Data class of a cached value. Each class carries its own TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CacheNamespace {
    /// Governance weight of an identity.
    VotingPower,
    /// Token balances.
    TokenBalance,
    /// Slow-changing totals and supply figures.
    Aggregate,
    /// Event log query results.
    EventLog,
    /// Block timestamps, effectively immutable.
    BlockTime,
}

impl CacheNamespace {
    pub const ALL: [CacheNamespace; 5] = [
        CacheNamespace::VotingPower,
        CacheNamespace::TokenBalance,
        CacheNamespace::Aggregate,
        CacheNamespace::EventLog,
        CacheNamespace::BlockTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheNamespace::VotingPower => "voting-power",
            CacheNamespace::TokenBalance => "token-balance",
            CacheNamespace::Aggregate => "aggregate",
            CacheNamespace::EventLog => "event-log",
            CacheNamespace::BlockTime => "block-time",
        }
    }

    fn env_suffix(&self) -> &'static str {
        match self {
            CacheNamespace::VotingPower => "VOTING_POWER",
            CacheNamespace::TokenBalance => "TOKEN_BALANCE",
            CacheNamespace::Aggregate => "AGGREGATE",
            CacheNamespace::EventLog => "EVENT_LOG",
            CacheNamespace::BlockTime => "BLOCK_TIME",
        }
    }
}

impl fmt::Display for CacheNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// GOVERNANCE CONFIGURATION
// ============================================================================

/// Governance rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// Minimum distinct voters for a binding outcome.
    pub quorum: usize,
    /// Time between creation and close.
    pub voting_period: Duration,
    /// Contract queried for voting power.
    pub power_contract: String,
    /// Method queried for voting power; receives the identity as its argument.
    pub power_method: String,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            quorum: DEFAULT_QUORUM,
            voting_period: Duration::from_secs(DEFAULT_VOTING_PERIOD_SECS),
            power_contract: DEFAULT_POWER_CONTRACT.to_string(),
            power_method: DEFAULT_POWER_METHOD.to_string(),
        }
    }
}

impl GovernanceConfig {
    /// Create GovernanceConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `LEDGERVIEW_QUORUM`: Minimum distinct voters (default: 127)
    /// - `LEDGERVIEW_VOTING_PERIOD_SECS`: Voting window (default: 604800)
    /// - `LEDGERVIEW_POWER_CONTRACT`: Contract key for power reads (default: bond)
    /// - `LEDGERVIEW_POWER_METHOD`: Method for power reads (default: bondPower)
    pub fn from_env() -> Self {
        let quorum = std::env::var("LEDGERVIEW_QUORUM")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_QUORUM);

        let voting_period = Duration::from_secs(
            std::env::var("LEDGERVIEW_VOTING_PERIOD_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_VOTING_PERIOD_SECS),
        );

        let power_contract = std::env::var("LEDGERVIEW_POWER_CONTRACT")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_POWER_CONTRACT.to_string());

        let power_method = std::env::var("LEDGERVIEW_POWER_METHOD")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_POWER_METHOD.to_string());

        Self {
            quorum,
            voting_period,
            power_contract,
            power_method,
        }
    }

    pub fn with_quorum(mut self, quorum: usize) -> Self {
        self.quorum = quorum;
        self
    }

    pub fn with_voting_period(mut self, period: Duration) -> Self {
        self.voting_period = period;
        self
    }

    /// Voting period as a chrono duration for timestamp arithmetic.
    pub fn voting_period_chrono(&self) -> LedgerResult<chrono::Duration> {
        chrono::Duration::from_std(self.voting_period).map_err(|e| {
            LedgerError::Config(ConfigError::InvalidValue {
                field: "voting_period".to_string(),
                value: format!("{:?}", self.voting_period),
                reason: e.to_string(),
            })
        })
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.quorum == 0 {
            return Err(LedgerError::Config(ConfigError::InvalidValue {
                field: "quorum".to_string(),
                value: self.quorum.to_string(),
                reason: "quorum must be greater than 0".to_string(),
            }));
        }

        if self.voting_period.is_zero() {
            return Err(LedgerError::Config(ConfigError::InvalidValue {
                field: "voting_period".to_string(),
                value: format!("{:?}", self.voting_period),
                reason: "voting_period must be positive".to_string(),
            }));
        }
        self.voting_period_chrono()?;

        if self.power_contract.trim().is_empty() || self.power_method.trim().is_empty() {
            return Err(LedgerError::Config(ConfigError::InvalidValue {
                field: "power_contract/power_method".to_string(),
                value: format!("{}.{}", self.power_contract, self.power_method),
                reason: "voting power call must name a contract and a method".to_string(),
            }));
        }

        Ok(())
    }
}

// ============================================================================
// CACHE CONFIGURATION
// ============================================================================

/// Read-model cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub voting_power_ttl: Duration,
    pub token_balance_ttl: Duration,
    pub aggregate_ttl: Duration,
    pub event_log_ttl: Duration,
    pub block_time_ttl: Duration,
    /// How often the background refresh task re-validates expired keys.
    pub refresh_interval: Duration,
    /// Keys not read for this long are no longer refreshed in the background.
    pub refresh_idle_after: Duration,
    /// LMDB map size for the durable store.
    pub lmdb_map_size_mb: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            voting_power_ttl: Duration::from_secs(DEFAULT_VOTING_POWER_TTL_SECS),
            token_balance_ttl: Duration::from_secs(DEFAULT_TOKEN_BALANCE_TTL_SECS),
            aggregate_ttl: Duration::from_secs(DEFAULT_AGGREGATE_TTL_SECS),
            event_log_ttl: Duration::from_secs(DEFAULT_EVENT_LOG_TTL_SECS),
            block_time_ttl: Duration::from_secs(DEFAULT_BLOCK_TIME_TTL_SECS),
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
            refresh_idle_after: Duration::from_secs(DEFAULT_REFRESH_IDLE_SECS),
            lmdb_map_size_mb: DEFAULT_LMDB_MAP_SIZE_MB,
        }
    }
}

impl CacheConfig {
    /// Create CacheConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `LEDGERVIEW_TTL_VOTING_POWER_SECS` (default: 30)
    /// - `LEDGERVIEW_TTL_TOKEN_BALANCE_SECS` (default: 30)
    /// - `LEDGERVIEW_TTL_AGGREGATE_SECS` (default: 300)
    /// - `LEDGERVIEW_TTL_EVENT_LOG_SECS` (default: 120)
    /// - `LEDGERVIEW_TTL_BLOCK_TIME_SECS` (default: 3600)
    /// - `LEDGERVIEW_REFRESH_INTERVAL_SECS` (default: 15)
    /// - `LEDGERVIEW_REFRESH_IDLE_SECS` (default: 600)
    /// - `LEDGERVIEW_LMDB_MAP_SIZE_MB` (default: 64)
    pub fn from_env() -> Self {
        let mut config = Self::default();
        for namespace in CacheNamespace::ALL {
            let var = format!("LEDGERVIEW_TTL_{}_SECS", namespace.env_suffix());
            if let Some(secs) = std::env::var(&var).ok().and_then(|s| s.parse().ok()) {
                config = config.with_ttl(namespace, Duration::from_secs(secs));
            }
        }

        config.refresh_interval = Duration::from_secs(
            std::env::var("LEDGERVIEW_REFRESH_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_REFRESH_INTERVAL_SECS),
        );

        config.refresh_idle_after = Duration::from_secs(
            std::env::var("LEDGERVIEW_REFRESH_IDLE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_REFRESH_IDLE_SECS),
        );

        config.lmdb_map_size_mb = std::env::var("LEDGERVIEW_LMDB_MAP_SIZE_MB")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_LMDB_MAP_SIZE_MB);

        config
    }

    /// TTL for a data class.
    pub fn ttl_for(&self, namespace: CacheNamespace) -> Duration {
        match namespace {
            CacheNamespace::VotingPower => self.voting_power_ttl,
            CacheNamespace::TokenBalance => self.token_balance_ttl,
            CacheNamespace::Aggregate => self.aggregate_ttl,
            CacheNamespace::EventLog => self.event_log_ttl,
            CacheNamespace::BlockTime => self.block_time_ttl,
        }
    }

    pub fn with_ttl(mut self, namespace: CacheNamespace, ttl: Duration) -> Self {
        match namespace {
            CacheNamespace::VotingPower => self.voting_power_ttl = ttl,
            CacheNamespace::TokenBalance => self.token_balance_ttl = ttl,
            CacheNamespace::Aggregate => self.aggregate_ttl = ttl,
            CacheNamespace::EventLog => self.event_log_ttl = ttl,
            CacheNamespace::BlockTime => self.block_time_ttl = ttl,
        }
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_refresh_idle_after(mut self, idle: Duration) -> Self {
        self.refresh_idle_after = idle;
        self
    }

    pub fn validate(&self) -> LedgerResult<()> {
        for namespace in CacheNamespace::ALL {
            let ttl = self.ttl_for(namespace);
            if ttl.is_zero() {
                return Err(LedgerError::Config(ConfigError::InvalidValue {
                    field: format!("ttl.{}", namespace),
                    value: format!("{:?}", ttl),
                    reason: "ttl must be positive".to_string(),
                }));
            }
        }

        if self.refresh_interval.is_zero() {
            return Err(LedgerError::Config(ConfigError::InvalidValue {
                field: "refresh_interval".to_string(),
                value: format!("{:?}", self.refresh_interval),
                reason: "refresh_interval must be positive".to_string(),
            }));
        }

        if self.refresh_idle_after.is_zero() {
            return Err(LedgerError::Config(ConfigError::InvalidValue {
                field: "refresh_idle_after".to_string(),
                value: format!("{:?}", self.refresh_idle_after),
                reason: "refresh_idle_after must be positive".to_string(),
            }));
        }

        if self.lmdb_map_size_mb == 0 {
            return Err(LedgerError::Config(ConfigError::InvalidValue {
                field: "lmdb_map_size_mb".to_string(),
                value: self.lmdb_map_size_mb.to_string(),
                reason: "lmdb_map_size_mb must be positive".to_string(),
            }));
        }

        Ok(())
    }
}

// ============================================================================
// MASTER CONFIGURATION
// ============================================================================

/// Master configuration struct.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub governance: GovernanceConfig,
    pub cache: CacheConfig,
}

impl LedgerConfig {
    pub fn from_env() -> Self {
        Self {
            governance: GovernanceConfig::from_env(),
            cache: CacheConfig::from_env(),
        }
    }

    pub fn validate(&self) -> LedgerResult<()> {
        self.governance.validate()?;
        self.cache.validate()
    }
}
