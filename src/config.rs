use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::Result;

const ENV_PREFIX: &str = "BASKETBOT";

/// Engine tuning knobs
///
/// Loaded from an optional TOML file, then overridden by
/// `BASKETBOT__<FIELD>` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Candles kept per (symbol, timeframe)
    pub candle_cache_size: usize,
    /// Candles requested per monitor poll
    pub candle_fetch_limit: usize,
    pub price_poll_seconds: u64,
    /// Delay before checking an IOC chase order
    pub fill_check_delay_ms: u64,
    /// Minimum entry re-price move, in percent
    pub reprice_threshold_pct: f64,
    pub entry_update_interval_seconds: u64,
    pub entry_max_chases: u32,
    pub event_channel_capacity: usize,
    pub snapshot_path: String,
    pub redis_url: Option<String>,
    pub market_data_url: String,
    /// Requests per minute allowed against the market data API
    pub market_data_rpm: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            candle_cache_size: 100,
            candle_fetch_limit: 2,
            price_poll_seconds: 5,
            fill_check_delay_ms: 1500,
            reprice_threshold_pct: 0.1,
            entry_update_interval_seconds: 5,
            entry_max_chases: 10,
            event_channel_capacity: 1024,
            snapshot_path: "basketbot-state.json".to_string(),
            redis_url: None,
            market_data_url: "https://api.binance.com".to_string(),
            market_data_rpm: 600,
        }
    }
}

impl EngineConfig {
    /// Load configuration from `path` (if given) and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let loaded: EngineConfig = settings.try_deserialize()?;
        tracing::debug!(?loaded, "Engine configuration loaded");
        Ok(loaded)
    }

    pub fn price_poll_interval(&self) -> Duration {
        Duration::from_secs(self.price_poll_seconds.max(1))
    }

    pub fn fill_check_delay(&self) -> Duration {
        Duration::from_millis(self.fill_check_delay_ms)
    }

    /// Re-price threshold as a fraction
    pub fn reprice_threshold(&self) -> f64 {
        self.reprice_threshold_pct / 100.0
    }
}
