use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::models::{Candle, Timeframe};

/// Candle stream identity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandleKey {
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl CandleKey {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
        }
    }
}

impl fmt::Display for CandleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}

/// Thread-safe in-memory buffer for candle data
///
/// Maintains a rolling window of candles for each (symbol, timeframe)
#[derive(Clone)]
pub struct CandleBuffer {
    data: Arc<RwLock<HashMap<CandleKey, VecDeque<Candle>>>>,
    max_candles: usize,
}

impl CandleBuffer {
    /// Create a new candle buffer
    ///
    /// # Arguments
    /// * `max_candles` - Maximum number of candles to keep per key
    pub fn new(max_candles: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            max_candles: max_candles.max(1),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<CandleKey, VecDeque<Candle>>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<CandleKey, VecDeque<Candle>>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Timestamp of the most recent candle seen for a key
    pub fn latest_timestamp(&self, key: &CandleKey) -> Option<DateTime<Utc>> {
        self.read()
            .get(key)
            .and_then(|deque| deque.back())
            .map(|c| c.timestamp)
    }

    /// Add a candle if it is strictly newer than the cached latest
    ///
    /// If the buffer is full, removes the oldest candle. Returns whether the
    /// candle was added.
    pub fn push_if_newer(&self, key: &CandleKey, candle: Candle) -> bool {
        let mut data = self.write();
        let key_candles = data.entry(key.clone()).or_default();

        if key_candles
            .back()
            .is_some_and(|last| candle.timestamp <= last.timestamp)
        {
            return false;
        }

        key_candles.push_back(candle);

        // Remove oldest if exceeds max
        while key_candles.len() > self.max_candles {
            key_candles.pop_front();
        }

        true
    }

    pub fn candle_count(&self, key: &CandleKey) -> usize {
        self.read().get(key).map(|d| d.len()).unwrap_or(0)
    }

    /// Clear all data for a key
    pub fn clear_key(&self, key: &CandleKey) {
        self.write().remove(key);
    }
}
