use crate::directory::GridNetwork;
use crate::escrow::payout::DistributionName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// The full configuration of the explorer capacity engine. This includes the grid network the
/// explorer serves, the escrow settings, the default prices, and the retry policy applied to
/// wallet operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The grid network this explorer is serving.
    network: GridNetwork,
    /// Address receiving the foundation share of payouts. If not set, the address of the wallet
    /// itself is used.
    #[serde(default)]
    foundation_address: Option<String>,
    /// Escrow settings.
    #[serde(default)]
    escrow: EscrowConfig,
    /// Default prices used when a farm does not configure a custom price.
    #[serde(default)]
    prices: PriceConfig,
    /// Retry policy of mutating wallet operations.
    #[serde(default)]
    backoff: BackoffConfig,
    /// Capacity planner settings.
    #[serde(default)]
    planner: PlannerConfig,
}

/// Configuration of the escrow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EscrowConfig {
    /// Seconds between two reconciliation passes.
    balance_check_interval: u64,
    /// Seconds a customer has to fund an escrow before it is refunded.
    reservation_timeout: u64,
    /// Amount of paid reservation ids which can be buffered before the escrow blocks.
    paid_buffer: usize,
    /// The payout distribution to use for every supported asset code.
    asset_distributions: BTreeMap<String, DistributionName>,
}

/// Default prices for capacity, in dollars per month.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PriceConfig {
    /// Price of a compute unit for a month.
    pub cu: f64,
    /// Price of a storage unit for a month.
    pub su: f64,
    /// Price of a public ipv4 address for a month.
    pub ipv4u: f64,
    /// The price of a single token, in thousandths of a dollar.
    pub tft_price_mill: u64,
}

/// Exponential backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackoffConfig {
    /// Delay before the first retry, in milliseconds.
    initial_interval_ms: u64,
    /// Factor applied to the delay after every attempt.
    multiplier: f64,
    /// Upper bound of a single delay, in milliseconds.
    max_interval_ms: u64,
    /// Total time after which retrying stops, in milliseconds.
    max_elapsed_ms: u64,
}

/// Configuration of the capacity planner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlannerConfig {
    /// A pool must have at least this many seconds of capacity left to accept a new workload.
    min_pool_lifetime: i64,
    /// Maximum amount of attempts to update a pool which is concurrently modified.
    max_update_attempts: usize,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        let mut asset_distributions = BTreeMap::new();
        asset_distributions.insert("TFT".to_string(), DistributionName::Grid3);
        EscrowConfig {
            balance_check_interval: 5,
            reservation_timeout: 60 * 60,
            paid_buffer: 100,
            asset_distributions,
        }
    }
}

impl Default for PriceConfig {
    fn default() -> Self {
        PriceConfig {
            cu: 10.,
            su: 8.,
            ipv4u: 6.,
            tft_price_mill: 80,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            initial_interval_ms: 500,
            multiplier: 1.5,
            max_interval_ms: 2_000,
            max_elapsed_ms: 60_000,
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig {
            min_pool_lifetime: 60 * 5,
            max_update_attempts: 5,
        }
    }
}

impl Config {
    /// Create a config for the given network with all other values set to their defaults.
    pub fn new(network: GridNetwork) -> Self {
        Config {
            network,
            foundation_address: None,
            escrow: EscrowConfig::default(),
            prices: PriceConfig::default(),
            backoff: BackoffConfig::default(),
            planner: PlannerConfig::default(),
        }
    }

    /// Validate the config. This makes sure that all configured distributions are usable and
    /// that prices and intervals are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.escrow.validate()?;
        self.prices.validate()?;
        self.backoff.validate()?;
        if self.planner.max_update_attempts == 0 {
            return Err("planner must be allowed at least 1 update attempt"
                .to_string()
                .into());
        }
        if self.planner.min_pool_lifetime < 0 {
            return Err("minimum pool lifetime can't be negative".to_string().into());
        }
        Ok(())
    }

    /// Get the grid network served by this explorer.
    pub fn network(&self) -> GridNetwork {
        self.network
    }

    /// Get the configured foundation address, if any.
    pub fn foundation_address(&self) -> Option<&str> {
        self.foundation_address.as_deref()
    }

    /// Get the escrow configuration.
    pub fn escrow(&self) -> &EscrowConfig {
        &self.escrow
    }

    /// Get the default prices.
    pub fn prices(&self) -> &PriceConfig {
        &self.prices
    }

    /// Get the wallet retry policy.
    pub fn backoff(&self) -> &BackoffConfig {
        &self.backoff
    }

    /// Get the planner configuration.
    pub fn planner(&self) -> &PlannerConfig {
        &self.planner
    }

    /// Set the foundation address.
    pub fn set_foundation_address(&mut self, address: String) {
        self.foundation_address = Some(address);
    }

    /// Replace the escrow configuration.
    pub fn set_escrow(&mut self, escrow: EscrowConfig) {
        self.escrow = escrow;
    }

    /// Replace the default prices.
    pub fn set_prices(&mut self, prices: PriceConfig) {
        self.prices = prices;
    }

    /// Replace the wallet retry policy.
    pub fn set_backoff(&mut self, backoff: BackoffConfig) {
        self.backoff = backoff;
    }

    /// Replace the planner configuration.
    pub fn set_planner(&mut self, planner: PlannerConfig) {
        self.planner = planner;
    }
}

impl EscrowConfig {
    /// Create a new escrow config. Intervals are in seconds.
    pub fn new(
        balance_check_interval: u64,
        reservation_timeout: u64,
        paid_buffer: usize,
        asset_distributions: BTreeMap<String, DistributionName>,
    ) -> Self {
        EscrowConfig {
            balance_check_interval,
            reservation_timeout,
            paid_buffer,
            asset_distributions,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.balance_check_interval == 0 {
            return Err("balance check interval must be at least 1 second"
                .to_string()
                .into());
        }
        if i64::try_from(self.reservation_timeout).is_err() {
            return Err(format!(
                "reservation timeout of {}s is too large",
                self.reservation_timeout
            )
            .into());
        }
        if self.paid_buffer == 0 {
            return Err("paid capacity buffer must hold at least 1 entry"
                .to_string()
                .into());
        }
        if self.asset_distributions.is_empty() {
            return Err("no payout distribution configured for any asset"
                .to_string()
                .into());
        }
        for (code, name) in &self.asset_distributions {
            if !name.distribution().is_valid() {
                return Err(format!("distribution {} for asset {} is not valid", name, code).into());
            }
        }
        Ok(())
    }

    /// Interval between two reconciliation passes.
    pub fn balance_check_interval(&self) -> Duration {
        Duration::from_secs(self.balance_check_interval)
    }

    /// Time a customer has to fund the escrow, in seconds.
    pub fn reservation_timeout(&self) -> i64 {
        i64::try_from(self.reservation_timeout).unwrap_or(i64::MAX)
    }

    /// Capacity of the paid reservation channel.
    pub fn paid_buffer(&self) -> usize {
        self.paid_buffer
    }

    /// The payout distribution to use for an asset code, if the asset is supported at all.
    pub fn distribution_for(&self, asset_code: &str) -> Option<DistributionName> {
        self.asset_distributions.get(asset_code).copied()
    }
}

impl PriceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let valid = |price: f64| price.is_finite() && price >= 0.;
        if !(valid(self.cu) && valid(self.su) && valid(self.ipv4u)) {
            return Err("prices must be finite and can't be negative"
                .to_string()
                .into());
        }
        if self.tft_price_mill == 0 {
            return Err("token price must be set".to_string().into());
        }
        Ok(())
    }
}

impl BackoffConfig {
    /// Create a new backoff policy. All durations are in milliseconds.
    pub fn new(
        initial_interval_ms: u64,
        multiplier: f64,
        max_interval_ms: u64,
        max_elapsed_ms: u64,
    ) -> Self {
        BackoffConfig {
            initial_interval_ms,
            multiplier,
            max_interval_ms,
            max_elapsed_ms,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_interval_ms == 0 || self.max_interval_ms == 0 {
            return Err("backoff intervals must be positive".to_string().into());
        }
        if self.multiplier < 1. {
            return Err("backoff multiplier must be at least 1".to_string().into());
        }
        Ok(())
    }

    /// Delay before the first retry.
    pub fn initial_interval(&self) -> Duration {
        Duration::from_millis(self.initial_interval_ms)
    }

    /// Factor applied to the delay after every attempt.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Upper bound of a single delay.
    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    /// Total time after which no new attempt is started.
    pub fn max_elapsed(&self) -> Duration {
        Duration::from_millis(self.max_elapsed_ms)
    }
}

impl PlannerConfig {
    /// Create a new planner config. The lifetime is in seconds.
    pub fn new(min_pool_lifetime: i64, max_update_attempts: usize) -> Self {
        PlannerConfig {
            min_pool_lifetime,
            max_update_attempts,
        }
    }

    /// Minimum amount of seconds a pool must still be able to run to accept a workload.
    pub fn min_pool_lifetime(&self) -> i64 {
        self.min_pool_lifetime
    }

    /// Maximum amount of attempts to update a pool which is concurrently modified.
    pub fn max_update_attempts(&self) -> usize {
        self.max_update_attempts
    }
}

/// An error in the configuration
#[derive(Debug)]
pub struct ConfigError {
    msg: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

// default impls are fine here
impl std::error::Error for ConfigError {}

impl From<String> for ConfigError {
    fn from(s: String) -> Self {
        ConfigError { msg: s }
    }
}
