// External collaborators: market data and order entry ports plus adapters
pub mod binance;
pub mod paper;
pub mod scripted;
pub mod synthetic;

pub use binance::BinanceClient;
pub use paper::{GatewayCall, PaperGateway};
pub use scripted::ScriptedFeed;
pub use synthetic::SyntheticFeed;

use async_trait::async_trait;

use crate::models::{Candle, OrderRequest, OrderResponse, OrderStatus, Timeframe};
use crate::Result;

/// Polled source of prices and candles
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Latest traded price, `None` when the symbol has no quote
    async fn get_price(&self, symbol: &str) -> Result<Option<f64>>;

    /// Most recent `limit` candles, newest first
    async fn get_candles(&self, symbol: &str, timeframe: Timeframe, limit: usize)
        -> Result<Vec<Candle>>;
}

/// Exchange order entry
///
/// `Err` means the call itself failed (transport, unknown order); an
/// exchange-side rejection comes back as `success == false`.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResponse>;

    /// Returns whether the order was cancelled
    async fn cancel_order(&self, order_id: &str) -> Result<bool>;

    async fn get_order_status(&self, order_id: &str) -> Result<OrderStatus>;
}
