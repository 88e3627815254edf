use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use super::{
    DistanceType, ExecutionAction, ExecutionLogEntry, OrderType, Side, Timeframe,
};
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntryOrderConfig {
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: Option<f64>,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
}

fn default_leverage() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct StopLossConfig {
    pub enabled: bool,
    pub trigger_price: f64,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
    pub timeframe: Timeframe,
    pub candle_close_confirmation: bool,
}

impl Default for StopLossConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            trigger_price: 0.0,
            order_type: OrderType::Market,
            limit_price: None,
            timeframe: Timeframe::M1,
            candle_close_confirmation: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct LimitChaserConfig {
    pub enabled: bool,
    pub distance: f64,
    pub distance_type: DistanceType,
    pub fill_or_cancel: bool,
    pub update_interval_seconds: u64,
    pub max_chases: u32,
    /// Engine-owned, never taken from user input on update
    pub chase_count: u32,
}

impl Default for LimitChaserConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            distance: 0.0,
            distance_type: DistanceType::Percentage,
            fill_or_cancel: false,
            update_interval_seconds: 10,
            max_chases: 10,
            chase_count: 0,
        }
    }
}

impl LimitChaserConfig {
    /// Absolute price offset for the given reference price
    pub fn offset(&self, price: f64) -> f64 {
        match self.distance_type {
            DistanceType::Percentage => price * self.distance / 100.0,
            DistanceType::Absolute => self.distance,
        }
    }

    pub fn exhausted(&self) -> bool {
        self.chase_count >= self.max_chases
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TakeProfitLevel {
    pub id: String,
    pub target_price: f64,
    pub quantity_percent: f64,
    pub order_type: OrderType,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl TakeProfitLevel {
    /// Price has reached the target in the side-correct direction
    pub fn reached(&self, side: Side, price: f64) -> bool {
        match side {
            Side::Long => price >= self.target_price,
            Side::Short => price <= self.target_price,
        }
    }
}

/// Exit order sent out for a take-profit level
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DispatchedTakeProfit {
    pub level_id: String,
    pub order_id: String,
    pub quantity: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BasketStatus {
    Pending,
    Active,
    Completed,
    Cancelled,
    Error,
}

impl BasketStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BasketStatus::Completed | BasketStatus::Cancelled | BasketStatus::Error
        )
    }

    /// Status only moves forward; terminal states are final
    pub fn can_transition_to(self, next: BasketStatus) -> bool {
        !self.is_terminal() && next != BasketStatus::Pending && next != self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ActiveOrders {
    pub entry_order_id: Option<String>,
    pub stop_loss_order_id: Option<String>,
    pub limit_chaser_order_id: Option<String>,
    pub take_profit_order_ids: Vec<String>,
}

impl ActiveOrders {
    /// Every order id currently tracked for the basket
    pub fn all_ids(&self) -> Vec<String> {
        self.entry_order_id
            .iter()
            .chain(self.stop_loss_order_id.iter())
            .chain(self.limit_chaser_order_id.iter())
            .chain(self.take_profit_order_ids.iter())
            .filter(|id| !id.is_empty())
            .cloned()
            .collect()
    }
}

/// User-supplied basket definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BasketConfig {
    pub symbol: String,
    pub side: Side,
    pub entry_order: EntryOrderConfig,
    #[serde(default)]
    pub stop_loss: StopLossConfig,
    #[serde(default)]
    pub limit_chaser: LimitChaserConfig,
    #[serde(default)]
    pub take_profits: Vec<TakeProfitLevel>,
}

impl BasketConfig {
    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(EngineError::validation("symbol is required"));
        }

        let entry = &self.entry_order;
        if !(entry.quantity > 0.0) {
            return Err(EngineError::validation("entry quantity must be positive"));
        }
        if entry.order_type == OrderType::Limit && !entry.price.is_some_and(|p| p > 0.0) {
            return Err(EngineError::validation("limit entry requires a positive price"));
        }
        if entry.leverage == 0 {
            return Err(EngineError::validation("leverage must be at least 1"));
        }

        let sl = &self.stop_loss;
        if sl.enabled {
            if !(sl.trigger_price > 0.0) {
                return Err(EngineError::validation("stop-loss trigger price must be positive"));
            }
            if sl.limit_price.is_some_and(|p| !(p > 0.0)) {
                return Err(EngineError::validation("stop-loss limit price must be positive"));
            }
        }

        let chaser = &self.limit_chaser;
        if chaser.enabled {
            if !(chaser.distance >= 0.0) {
                return Err(EngineError::validation("chaser distance must not be negative"));
            }
            if chaser.update_interval_seconds == 0 {
                return Err(EngineError::validation("chaser interval must be at least 1s"));
            }
            if chaser.max_chases == 0 {
                return Err(EngineError::validation("chaser max chases must be at least 1"));
            }
        }

        let mut seen = HashSet::new();
        for level in &self.take_profits {
            if !seen.insert(level.id.as_str()) {
                return Err(EngineError::validation(format!(
                    "duplicate take-profit id '{}'",
                    level.id
                )));
            }
            if !(level.target_price > 0.0) {
                return Err(EngineError::validation("take-profit target must be positive"));
            }
            if !(level.quantity_percent > 0.0 && level.quantity_percent <= 100.0) {
                return Err(EngineError::validation(
                    "take-profit quantity percent must be in (0, 100]",
                ));
            }
        }

        Ok(())
    }
}

/// Partial update of a basket's strategy legs
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct BasketPatch {
    pub entry_order: Option<EntryOrderConfig>,
    pub stop_loss: Option<StopLossConfig>,
    pub limit_chaser: Option<LimitChaserConfig>,
    pub take_profits: Option<Vec<TakeProfitLevel>>,
}

/// Multi-leg conditional strategy tracked as one lifecycle entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BasketOrder {
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub entry_order: EntryOrderConfig,
    pub stop_loss: StopLossConfig,
    pub limit_chaser: LimitChaserConfig,
    pub take_profits: Vec<TakeProfitLevel>,
    pub status: BasketStatus,
    pub active_orders: ActiveOrders,
    pub execution_log: Vec<ExecutionLogEntry>,
    #[serde(default)]
    pub entry_filled: bool,
    /// Quantity sent out through take-profit dispatches
    #[serde(default)]
    pub exited_quantity: f64,
    #[serde(default)]
    pub limit_chaser_price: Option<f64>,
    /// Levels that fired; a fired level never re-arms
    #[serde(default)]
    pub dispatched_take_profits: Vec<DispatchedTakeProfit>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BasketOrder {
    pub fn new(config: BasketConfig) -> Self {
        let now = Utc::now();
        let mut basket = Self {
            id: Uuid::new_v4(),
            symbol: config.symbol,
            side: config.side,
            entry_order: config.entry_order,
            stop_loss: config.stop_loss,
            limit_chaser: LimitChaserConfig {
                chase_count: 0,
                ..config.limit_chaser
            },
            take_profits: config.take_profits,
            status: BasketStatus::Pending,
            active_orders: ActiveOrders::default(),
            execution_log: Vec::new(),
            entry_filled: false,
            exited_quantity: 0.0,
            limit_chaser_price: None,
            dispatched_take_profits: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        basket.log(
            ExecutionAction::Created,
            format!(
                "{} {} {} x{}",
                basket.side, basket.symbol, basket.entry_order.quantity, basket.entry_order.leverage
            ),
            None,
        );
        basket
    }

    pub fn config(&self) -> BasketConfig {
        BasketConfig {
            symbol: self.symbol.clone(),
            side: self.side,
            entry_order: self.entry_order.clone(),
            stop_loss: self.stop_loss.clone(),
            limit_chaser: self.limit_chaser.clone(),
            take_profits: self.take_profits.clone(),
        }
    }

    pub fn log(&mut self, action: ExecutionAction, details: impl Into<String>, order_id: Option<String>) {
        self.execution_log
            .push(ExecutionLogEntry::new(action, details, order_id));
        self.updated_at = Utc::now();
    }

    /// Move to `next` if allowed; returns whether the status changed
    pub fn transition(&mut self, next: BasketStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }

    pub fn is_active(&self) -> bool {
        self.status == BasketStatus::Active
    }

    /// Position size not yet sent out by take-profits
    pub fn remaining_quantity(&self) -> f64 {
        (self.entry_order.quantity - self.exited_quantity).max(0.0)
    }

    pub fn take_profit(&self, level_id: &str) -> Option<&TakeProfitLevel> {
        self.take_profits.iter().find(|l| l.id == level_id)
    }

    pub fn take_profit_mut(&mut self, level_id: &str) -> Option<&mut TakeProfitLevel> {
        self.take_profits.iter_mut().find(|l| l.id == level_id)
    }

    pub fn was_dispatched(&self, level_id: &str) -> bool {
        self.dispatched_take_profits
            .iter()
            .any(|d| d.level_id == level_id)
    }

    /// Stop-loss evaluated on candle close
    pub fn uses_candle_stop(&self) -> bool {
        self.stop_loss.enabled && self.stop_loss.candle_close_confirmation
    }

    /// Stop-loss evaluated against every live price poll
    pub fn uses_immediate_stop(&self) -> bool {
        self.stop_loss.enabled && !self.stop_loss.candle_close_confirmation
    }

    pub fn has_pending_take_profits(&self) -> bool {
        self.take_profits.iter().any(|l| l.enabled)
    }

    /// Needs the per-symbol live price watcher
    pub fn needs_price_watch(&self) -> bool {
        self.uses_immediate_stop() || self.has_pending_take_profits()
    }

    /// Apply a user patch; the chase counter and status stay engine-owned
    pub fn apply_patch(&mut self, patch: BasketPatch) -> Result<()> {
        if self.status.is_terminal() {
            return Err(EngineError::validation(format!(
                "basket is {:?} and can no longer change",
                self.status
            )));
        }

        let mut next = self.config();
        if let Some(entry) = patch.entry_order {
            if self.status != BasketStatus::Pending {
                return Err(EngineError::validation(
                    "entry order can only change while the basket is pending",
                ));
            }
            next.entry_order = entry;
        }
        if let Some(sl) = patch.stop_loss {
            next.stop_loss = sl;
        }
        if let Some(chaser) = patch.limit_chaser {
            next.limit_chaser = LimitChaserConfig {
                chase_count: self.limit_chaser.chase_count,
                ..chaser
            };
        }
        if let Some(mut levels) = patch.take_profits {
            for level in &mut levels {
                if self.was_dispatched(&level.id) {
                    level.enabled = false;
                }
            }
            next.take_profits = levels;
        }
        next.validate()?;

        self.entry_order = next.entry_order;
        self.stop_loss = next.stop_loss;
        self.limit_chaser = next.limit_chaser;
        self.take_profits = next.take_profits;
        self.log(ExecutionAction::Updated, "configuration updated", None);
        Ok(())
    }
}
