use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::MarketData;
use crate::models::{Candle, Timeframe};
use crate::Result;

#[derive(Default)]
struct FeedState {
    prices: HashMap<String, VecDeque<f64>>,
    candles: HashMap<(String, Timeframe), Vec<Candle>>,
    price_requests: usize,
    candle_requests: usize,
}

/// In-memory market data driven by the caller
///
/// Queued prices are consumed one per `get_price` call; the last one sticks.
#[derive(Default)]
pub struct ScriptedFeed {
    state: Mutex<FeedState>,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the price sequence with a single sticky price
    pub fn set_price(&self, symbol: &str, price: f64) {
        self.state()
            .prices
            .insert(symbol.to_string(), VecDeque::from([price]));
    }

    /// Queue a deterministic price sequence
    pub fn push_prices(&self, symbol: &str, prices: &[f64]) {
        self.state()
            .prices
            .entry(symbol.to_string())
            .or_default()
            .extend(prices.iter().copied());
    }

    pub fn clear_price(&self, symbol: &str) {
        self.state().prices.remove(symbol);
    }

    /// Set candles for a key, newest first
    pub fn set_candles(&self, symbol: &str, timeframe: Timeframe, candles: Vec<Candle>) {
        self.state()
            .candles
            .insert((symbol.to_string(), timeframe), candles);
    }

    pub fn price_requests(&self) -> usize {
        self.state().price_requests
    }

    pub fn candle_requests(&self) -> usize {
        self.state().candle_requests
    }
}

#[async_trait]
impl MarketData for ScriptedFeed {
    async fn get_price(&self, symbol: &str) -> Result<Option<f64>> {
        let mut state = self.state();
        state.price_requests += 1;

        let Some(queue) = state.prices.get_mut(symbol) else {
            return Ok(None);
        };
        let price = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().copied()
        };
        Ok(price)
    }

    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let mut state = self.state();
        state.candle_requests += 1;

        Ok(state
            .candles
            .get(&(symbol.to_string(), timeframe))
            .map(|candles| candles.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
