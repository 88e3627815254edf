use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ExecutionAction, ExecutionLogEntry, PositionType, Side};
use crate::error::{EngineError, Result};

/// Sizing and pricing parameters of a standalone entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntryParams {
    pub enabled: bool,
    /// Fraction of `max_position_size` (percentage sizing) or the quantity itself (fixed)
    pub entry_position: f64,
    pub max_position_size: f64,
    pub position_type: PositionType,
    /// Highest price a long entry may pay, 0 when unset
    #[serde(default)]
    pub long_price_limit: f64,
    /// Lowest price a short entry may sell at, 0 when unset
    #[serde(default)]
    pub short_price_limit: f64,
    /// Offset from market in percent
    pub price_distance: f64,
    pub fill_or_cancel: bool,
}

impl EntryParams {
    pub fn quantity(&self) -> f64 {
        match self.position_type {
            PositionType::Percentage => self.max_position_size * self.entry_position,
            PositionType::Fixed => self.entry_position,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Err(EngineError::validation("entry is disabled"));
        }
        if !(self.entry_position > 0.0) {
            return Err(EngineError::validation("entry position must be positive"));
        }
        if self.position_type == PositionType::Percentage && !(self.max_position_size > 0.0) {
            return Err(EngineError::validation(
                "percentage sizing requires a positive max position size",
            ));
        }
        if !(self.price_distance >= 0.0) {
            return Err(EngineError::validation("price distance must not be negative"));
        }
        if self.long_price_limit < 0.0 || self.short_price_limit < 0.0 {
            return Err(EngineError::validation("price limits must not be negative"));
        }
        Ok(())
    }
}

/// User-supplied entry definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntryConfig {
    pub symbol: String,
    pub side: Side,
    pub params: EntryParams,
    #[serde(default)]
    pub max_chases: Option<u32>,
    #[serde(default)]
    pub update_interval_seconds: Option<u64>,
    #[serde(default)]
    pub expires_after_seconds: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Active,
    Filled,
    Cancelled,
    Expired,
}

impl EntryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EntryStatus::Filled | EntryStatus::Cancelled | EntryStatus::Expired
        )
    }
}

/// Single-leg position-opening order with optional price chasing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntryPositionOrder {
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub params: EntryParams,
    pub status: EntryStatus,
    pub active_order_id: Option<String>,
    pub chase_count: u32,
    pub max_chases: u32,
    pub update_interval_seconds: u64,
    pub last_price: Option<f64>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub execution_log: Vec<ExecutionLogEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EntryPositionOrder {
    pub fn new(config: EntryConfig, default_max_chases: u32, default_interval_seconds: u64) -> Self {
        let now = Utc::now();
        let expires_at = config
            .expires_after_seconds
            .map(|secs| now + Duration::seconds(secs as i64));
        let mut entry = Self {
            id: Uuid::new_v4(),
            symbol: config.symbol,
            side: config.side,
            params: config.params,
            status: EntryStatus::Pending,
            active_order_id: None,
            chase_count: 0,
            max_chases: config.max_chases.unwrap_or(default_max_chases),
            update_interval_seconds: config
                .update_interval_seconds
                .unwrap_or(default_interval_seconds)
                .max(1),
            last_price: None,
            expires_at,
            execution_log: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        entry.log(
            ExecutionAction::Created,
            format!("{} {} qty {}", entry.side, entry.symbol, entry.params.quantity()),
            None,
        );
        entry
    }

    pub fn log(&mut self, action: ExecutionAction, details: impl Into<String>, order_id: Option<String>) {
        self.execution_log
            .push(ExecutionLogEntry::new(action, details, order_id));
        self.updated_at = Utc::now();
    }

    /// Move to `next` unless already terminal; returns whether the status changed
    pub fn transition(&mut self, next: EntryStatus) -> bool {
        if self.status.is_terminal() || next == self.status || next == EntryStatus::Pending {
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}
