// Domain types shared by the engine, its ports and persistence
pub mod basket;
pub mod entry;

pub use basket::{
    ActiveOrders, BasketConfig, BasketOrder, BasketPatch, BasketStatus, DispatchedTakeProfit,
    EntryOrderConfig,
    LimitChaserConfig, StopLossConfig, TakeProfitLevel,
};
pub use entry::{EntryConfig, EntryParams, EntryPositionOrder, EntryStatus};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Direction of a strategy (position being built or held)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[serde(alias = "buy")]
    Long,
    #[serde(alias = "sell")]
    Short,
}

impl Side {
    /// Order side that opens a position in this direction
    pub fn entry_side(self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Order side that closes a position in this direction
    pub fn exit_side(self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    /// Good-til-cancelled, rests on the book
    Gtc,
    /// Immediate-or-cancel, never rests
    Ioc,
}

impl TimeInForce {
    pub fn for_fill_or_cancel(fill_or_cancel: bool) -> Self {
        if fill_or_cancel {
            TimeInForce::Ioc
        } else {
            TimeInForce::Gtc
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DistanceType {
    Percentage,
    Absolute,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PositionType {
    Percentage,
    Fixed,
}

/// Candle timeframe
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::H6 => "6h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn minutes(self) -> u64 {
        match self {
            Timeframe::M1 => 1,
            Timeframe::M3 => 3,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H2 => 120,
            Timeframe::H4 => 240,
            Timeframe::H6 => 360,
            Timeframe::H12 => 720,
            Timeframe::D1 => 1440,
        }
    }

    /// Wall-clock length of one bar
    pub fn duration(self) -> Duration {
        Duration::from_secs(self.minutes() * 60)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tf = match s {
            "1m" => Timeframe::M1,
            "3m" => Timeframe::M3,
            "5m" => Timeframe::M5,
            "15m" => Timeframe::M15,
            "30m" => Timeframe::M30,
            "1h" => Timeframe::H1,
            "2h" => Timeframe::H2,
            "4h" => Timeframe::H4,
            "6h" => Timeframe::H6,
            "12h" => Timeframe::H12,
            "1d" => Timeframe::D1,
            other => return Err(format!("unknown timeframe '{}'", other)),
        };
        Ok(tf)
    }
}

/// OHLCV candlestick
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Order submission sent to the gateway
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: Option<f64>,
    pub time_in_force: TimeInForce,
    pub leverage: Option<u32>,
    pub reduce_only: bool,
}

/// Gateway reply to an order submission
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub success: bool,
    pub order_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// The order can no longer fill
    pub fn is_dead(self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Rejected)
    }
}

/// What happened to an entity, recorded in its execution log
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionAction {
    Created,
    Updated,
    EntryPlaced,
    EntryFilled,
    Chased,
    Filled,
    ChaseLimitReached,
    StopLossTriggered,
    TakeProfitDispatched,
    Cancelled,
    Expired,
    Error,
}

/// Append-only execution log record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub action: ExecutionAction,
    pub details: String,
    pub order_id: Option<String>,
}

impl ExecutionLogEntry {
    pub fn new(action: ExecutionAction, details: impl Into<String>, order_id: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            details: details.into(),
            order_id,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Basket,
    Entry,
}

/// Notification delivered to event subscribers for every log append
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionEvent {
    pub entity_id: Uuid,
    pub kind: EntityKind,
    pub action: ExecutionAction,
    pub timestamp: DateTime<Utc>,
    pub details: String,
    pub order_id: Option<String>,
}

impl ExecutionEvent {
    pub fn from_log(entity_id: Uuid, kind: EntityKind, entry: &ExecutionLogEntry) -> Self {
        Self {
            entity_id,
            kind,
            action: entry.action,
            timestamp: entry.timestamp,
            details: entry.details.clone(),
            order_id: entry.order_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_order_sides() {
        assert_eq!(Side::Long.entry_side(), OrderSide::Buy);
        assert_eq!(Side::Long.exit_side(), OrderSide::Sell);
        assert_eq!(Side::Short.entry_side(), OrderSide::Sell);
        assert_eq!(Side::Short.exit_side(), OrderSide::Buy);
    }

    #[test]
    fn test_side_accepts_buy_sell_aliases() {
        let side: Side = serde_json::from_str("\"buy\"").unwrap();
        assert_eq!(side, Side::Long);
        let side: Side = serde_json::from_str("\"sell\"").unwrap();
        assert_eq!(side, Side::Short);
    }

    #[test]
    fn test_timeframe_parse_and_duration() {
        let tf: Timeframe = "15m".parse().unwrap();
        assert_eq!(tf, Timeframe::M15);
        assert_eq!(tf.duration(), Duration::from_secs(900));
        assert_eq!(Timeframe::H4.as_str(), "4h");
        assert!("7m".parse::<Timeframe>().is_err());

        let json = serde_json::to_string(&Timeframe::D1).unwrap();
        assert_eq!(json, "\"1d\"");
    }

    #[test]
    fn test_time_in_force_for_fill_or_cancel() {
        assert_eq!(TimeInForce::for_fill_or_cancel(true), TimeInForce::Ioc);
        assert_eq!(TimeInForce::for_fill_or_cancel(false), TimeInForce::Gtc);
    }

    #[test]
    fn test_dead_order_status() {
        assert!(OrderStatus::Cancelled.is_dead());
        assert!(OrderStatus::Rejected.is_dead());
        assert!(!OrderStatus::Pending.is_dead());
        assert!(!OrderStatus::Filled.is_dead());
    }
}
