use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::MarketData;
use crate::models::{Candle, Timeframe};
use crate::Result;

const MAX_SAMPLES: usize = 5_000;

struct SymbolWalk {
    price: f64,
    samples: Vec<(DateTime<Utc>, f64)>,
}

struct WalkState {
    rng: StdRng,
    symbols: HashMap<String, SymbolWalk>,
}

/// Random-walk market data for offline paper runs
///
/// Every request advances the symbol's price one step and records a
/// sample; candles are built by bucketing samples on timeframe boundaries.
pub struct SyntheticFeed {
    state: Mutex<WalkState>,
    base_price: f64,
    /// Max relative move per step (0.002 = ±0.2%)
    step_volatility: f64,
}

impl SyntheticFeed {
    /// Create a feed with a seed for reproducibility
    pub fn new(seed: u64, base_price: f64, step_volatility: f64) -> Self {
        Self {
            state: Mutex::new(WalkState {
                rng: StdRng::seed_from_u64(seed),
                symbols: HashMap::new(),
            }),
            base_price,
            step_volatility,
        }
    }

    fn state(&self) -> MutexGuard<'_, WalkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn step(&self, symbol: &str) -> f64 {
        let mut state = self.state();
        let change = state.rng.gen_range(-self.step_volatility..=self.step_volatility);
        let base = self.base_price;
        let walk = state
            .symbols
            .entry(symbol.to_string())
            .or_insert_with(|| SymbolWalk {
                price: base,
                samples: Vec::new(),
            });

        walk.price = (walk.price * (1.0 + change)).max(f64::EPSILON);
        walk.samples.push((Utc::now(), walk.price));
        if walk.samples.len() > MAX_SAMPLES {
            let excess = walk.samples.len() - MAX_SAMPLES;
            walk.samples.drain(..excess);
        }
        walk.price
    }

    fn build_candles(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Vec<Candle> {
        let state = self.state();
        let Some(walk) = state.symbols.get(symbol) else {
            return Vec::new();
        };

        let bucket_secs = (timeframe.minutes() * 60) as i64;
        let mut buckets: BTreeMap<i64, Candle> = BTreeMap::new();
        for (ts, price) in &walk.samples {
            let bucket = ts.timestamp() - ts.timestamp().rem_euclid(bucket_secs);
            buckets
                .entry(bucket)
                .and_modify(|c| {
                    c.high = c.high.max(*price);
                    c.low = c.low.min(*price);
                    c.close = *price;
                    c.volume += 1.0;
                })
                .or_insert_with(|| Candle {
                    timestamp: Utc.timestamp_opt(bucket, 0).single().unwrap_or(*ts),
                    open: *price,
                    high: *price,
                    low: *price,
                    close: *price,
                    volume: 1.0,
                });
        }

        buckets.into_values().rev().take(limit).collect()
    }
}

#[async_trait]
impl MarketData for SyntheticFeed {
    async fn get_price(&self, symbol: &str) -> Result<Option<f64>> {
        Ok(Some(self.step(symbol)))
    }

    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        self.step(symbol);
        Ok(self.build_candles(symbol, timeframe, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_seed_same_walk() {
        let a = SyntheticFeed::new(42, 100.0, 0.01);
        let b = SyntheticFeed::new(42, 100.0, 0.01);

        for _ in 0..20 {
            let pa = a.get_price("SOL").await.unwrap();
            let pb = b.get_price("SOL").await.unwrap();
            assert_eq!(pa, pb);
        }
    }

    #[tokio::test]
    async fn test_steps_stay_within_volatility() {
        let feed = SyntheticFeed::new(7, 100.0, 0.01);
        let mut last = 100.0;
        for _ in 0..100 {
            let price = feed.get_price("SOL").await.unwrap().unwrap();
            assert!((price / last - 1.0).abs() <= 0.01 + 1e-12);
            last = price;
        }
    }

    #[tokio::test]
    async fn test_candles_aggregate_samples() {
        let feed = SyntheticFeed::new(1, 50.0, 0.001);
        for _ in 0..10 {
            feed.get_price("JUP").await.unwrap();
        }

        let candles = feed.get_candles("JUP", Timeframe::D1, 2).await.unwrap();
        assert!(!candles.is_empty());
        let newest = &candles[0];
        assert!(newest.low <= newest.close && newest.close <= newest.high);
        assert!(newest.volume >= 1.0);
    }
}
