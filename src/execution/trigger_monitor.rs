use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

use super::{
    CandleBuffer, CandleKey, EngineContext, LimitChaser, PeriodicTask, TakeProfitDispatcher,
    TaskSet, TickControl,
};
use crate::error::EngineError;
use crate::models::{
    BasketOrder, BasketStatus, Candle, ExecutionAction, OrderRequest, OrderType, Side,
    TimeInForce,
};
use crate::Result;

/// Stop-loss predicate: a long exits at or below the trigger, a short at or above
pub fn stop_loss_hit(side: Side, price: f64, trigger_price: f64) -> bool {
    match side {
        Side::Long => price <= trigger_price,
        Side::Short => price >= trigger_price,
    }
}

/// What a monitor task polls
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WatchKey {
    /// Candle-close stop-losses for one (symbol, timeframe)
    Candles(CandleKey),
    /// Live price for immediate stop-losses and take-profits
    Live(String),
}

/// Watches candles and live prices on behalf of active baskets
///
/// One task per watch key, shared by every basket on that key. A task stops
/// itself once no active basket needs it.
#[derive(Clone)]
pub struct TriggerMonitor {
    ctx: Arc<EngineContext>,
    chaser: LimitChaser,
    take_profits: TakeProfitDispatcher,
    candles: CandleBuffer,
    tasks: TaskSet<WatchKey>,
}

impl TriggerMonitor {
    pub fn new(
        ctx: Arc<EngineContext>,
        chaser: LimitChaser,
        take_profits: TakeProfitDispatcher,
    ) -> Self {
        let candles = CandleBuffer::new(ctx.config.candle_cache_size);
        Self {
            ctx,
            chaser,
            take_profits,
            candles,
            tasks: TaskSet::new(),
        }
    }

    pub fn candle_buffer(&self) -> &CandleBuffer {
        &self.candles
    }

    pub fn is_watching(&self, key: &WatchKey) -> bool {
        self.tasks.is_running(key)
    }

    pub fn stop_all(&self) {
        self.tasks.stop_all();
    }

    /// Make sure every monitor the basket needs is running
    pub fn watch(&self, basket: &BasketOrder) {
        if !basket.is_active() {
            return;
        }
        if basket.uses_candle_stop() {
            self.watch_candles(CandleKey::new(&basket.symbol, basket.stop_loss.timeframe));
        }
        if basket.needs_price_watch() {
            self.watch_live(basket.symbol.clone());
        }
    }

    fn watch_candles(&self, key: CandleKey) {
        let name = format!("candles:{}", key);
        let period = key.timeframe.duration();
        let this = self.clone();
        let task_key = WatchKey::Candles(key.clone());

        let spawned = self.tasks.ensure(task_key, move || {
            PeriodicTask::spawn(name, Instant::now(), period, move || {
                let this = this.clone();
                let key = key.clone();
                async move { this.poll_candles(&key).await }
            })
        });
        if spawned {
            tracing::info!(period_secs = period.as_secs(), "Candle-close monitor started");
        }
    }

    fn watch_live(&self, symbol: String) {
        let name = format!("price:{}", symbol);
        let period = self.ctx.config.price_poll_interval();
        let this = self.clone();
        let task_key = WatchKey::Live(symbol.clone());

        let spawned = self.tasks.ensure(task_key, move || {
            PeriodicTask::spawn(name, Instant::now(), period, move || {
                let this = this.clone();
                let symbol = symbol.clone();
                async move { this.poll_live(&symbol).await }
            })
        });
        if spawned {
            tracing::info!(period_secs = period.as_secs(), "Live price monitor started");
        }
    }

    fn candle_stop_baskets(&self, key: &CandleKey) -> Vec<BasketOrder> {
        self.ctx.registry.find(|b| {
            b.is_active()
                && b.uses_candle_stop()
                && b.symbol == key.symbol
                && b.stop_loss.timeframe == key.timeframe
        })
    }

    /// One candle-monitor tick
    pub async fn poll_candles(&self, key: &CandleKey) -> TickControl {
        if self.candle_stop_baskets(key).is_empty() {
            tracing::debug!(key = %key, "No baskets left on candle key, monitor stopping");
            self.candles.clear_key(key);
            return TickControl::Stop;
        }

        let limit = self.ctx.config.candle_fetch_limit.max(2);
        match self
            .ctx
            .market_data
            .get_candles(&key.symbol, key.timeframe, limit)
            .await
        {
            Ok(candles) => {
                self.on_candles(key, &candles).await;
            }
            Err(e) => {
                tracing::warn!(key = %key, "Failed to fetch candles: {}", e);
            }
        }
        TickControl::Continue
    }

    /// Evaluate candle-close stop-losses against freshly fetched candles
    ///
    /// `candles` are newest first. Only a newest candle strictly later than
    /// the cached one counts as a close of the previous candle, whose close
    /// is then compared with every matching trigger. Returns the baskets that
    /// were stopped out.
    pub async fn on_candles(&self, key: &CandleKey, candles: &[Candle]) -> Vec<Uuid> {
        let [newest, closed, ..] = candles else {
            tracing::debug!(key = %key, count = candles.len(), "Not enough candles to evaluate");
            return Vec::new();
        };
        let cached = self.candles.latest_timestamp(key);
        if !self.candles.push_if_newer(key, newest.clone()) {
            return Vec::new();
        }

        let close = closed.close;
        tracing::debug!(
            key = %key,
            close,
            at = %closed.timestamp,
            previous = ?cached,
            cached = self.candles.candle_count(key),
            "Candle closed"
        );

        let mut triggered = Vec::new();
        for basket in self.candle_stop_baskets(key) {
            if !stop_loss_hit(basket.side, close, basket.stop_loss.trigger_price) {
                continue;
            }
            match self.trigger_stop_loss(basket.id, close).await {
                Ok(true) => triggered.push(basket.id),
                Ok(false) => {}
                Err(e) => tracing::warn!(basket = %basket.id, "Stop-loss trigger failed: {}", e),
            }
        }
        triggered
    }

    /// One live-price tick: immediate stop-losses first, then take-profits
    pub async fn poll_live(&self, symbol: &str) -> TickControl {
        let baskets = self
            .ctx
            .registry
            .find(|b| b.is_active() && b.symbol == symbol && b.needs_price_watch());
        if baskets.is_empty() {
            tracing::debug!(symbol, "No baskets left on symbol, price monitor stopping");
            return TickControl::Stop;
        }

        let price = match self.ctx.market_data.get_price(symbol).await {
            Ok(Some(price)) => price,
            Ok(None) => {
                tracing::debug!(symbol, "No live price");
                return TickControl::Continue;
            }
            Err(e) => {
                tracing::warn!(symbol, "Failed to fetch live price: {}", e);
                return TickControl::Continue;
            }
        };

        for basket in baskets {
            if basket.uses_immediate_stop()
                && stop_loss_hit(basket.side, price, basket.stop_loss.trigger_price)
            {
                if let Err(e) = self.trigger_stop_loss(basket.id, price).await {
                    tracing::warn!(basket = %basket.id, "Stop-loss trigger failed: {}", e);
                }
                continue;
            }
            if basket.has_pending_take_profits() {
                if let Err(e) = self.take_profits.check_levels(basket.id, price).await {
                    tracing::warn!(basket = %basket.id, "Take-profit check failed: {}", e);
                }
            }
        }
        TickControl::Continue
    }

    /// Exit the basket's position after its stop-loss fired
    ///
    /// Halts the chaser and pulls its resting order, then submits a
    /// reduce-only exit for the remaining quantity. If the entry never
    /// filled, the entry order is pulled instead. Returns whether the basket
    /// was completed; a failed exit leaves it active for the next evaluation.
    pub async fn trigger_stop_loss(&self, id: Uuid, price: f64) -> Result<bool> {
        let _slot = self.ctx.slots.acquire(id).await;

        let basket = self
            .ctx
            .registry
            .get(id)
            .ok_or_else(|| EngineError::basket_not_found(id))?;
        if !basket.is_active() {
            return Ok(false);
        }

        self.chaser.halt(id).await;

        let entry_filled = match self.ctx.ensure_entry_filled(id).await {
            Ok(filled) => filled,
            Err(e) => {
                tracing::warn!(basket = %id, "Entry status unknown, exiting anyway: {}", e);
                true
            }
        };
        if !self.ctx.registry.get(id).is_some_and(|b| b.is_active()) {
            return Ok(false);
        }

        let sl = &basket.stop_loss;
        if !entry_filled {
            return Ok(self.abandon_entry(&basket, price).await);
        }

        let released = self.ctx.pull_take_profits(&basket).await;
        let quantity = self
            .ctx
            .registry
            .get(id)
            .map(|b| b.remaining_quantity())
            .unwrap_or_default();
        if released > 0.0 {
            tracing::info!(basket = %id, released, "Resting take-profits pulled into the stop exit");
        }
        if quantity <= 0.0 {
            self.ctx
                .registry
                .mutate(id, |b| {
                    b.transition(BasketStatus::Completed);
                    b.log(
                        ExecutionAction::StopLossTriggered,
                        format!("{:.4} crossed trigger {:.4}, nothing left to exit", price, sl.trigger_price),
                        None,
                    );
                })
                .await;
            return Ok(true);
        }

        let request = OrderRequest {
            symbol: basket.symbol.clone(),
            side: basket.side.exit_side(),
            order_type: sl.order_type,
            quantity,
            price: match sl.order_type {
                OrderType::Limit => Some(sl.limit_price.unwrap_or(sl.trigger_price)),
                OrderType::Market => None,
            },
            time_in_force: TimeInForce::Gtc,
            leverage: None,
            reduce_only: true,
        };

        match self.ctx.place(&request).await {
            Ok(order_id) => {
                tracing::warn!(
                    basket = %id,
                    symbol = %basket.symbol,
                    price,
                    trigger = sl.trigger_price,
                    order_id = %order_id,
                    "🛑 Stop-loss triggered"
                );
                self.ctx
                    .registry
                    .mutate(id, |b| {
                        b.active_orders.stop_loss_order_id = Some(order_id.clone());
                        b.transition(BasketStatus::Completed);
                        b.log(
                            ExecutionAction::StopLossTriggered,
                            format!(
                                "{:.4} crossed trigger {:.4}, {:?} exit qty {}",
                                price, sl.trigger_price, sl.order_type, quantity
                            ),
                            Some(order_id),
                        );
                    })
                    .await;
                Ok(true)
            }
            Err(e) => {
                tracing::error!(basket = %id, "Stop-loss exit failed: {}", e);
                self.ctx
                    .registry
                    .mutate(id, |b| {
                        b.log(
                            ExecutionAction::Error,
                            format!("stop-loss exit failed: {}", e),
                            None,
                        );
                    })
                    .await;
                Ok(false)
            }
        }
    }

    async fn abandon_entry(&self, basket: &BasketOrder, price: f64) -> bool {
        let id = basket.id;
        let entry_order = basket.active_orders.entry_order_id.clone();
        let mut failure = None;
        if let Some(order_id) = &entry_order {
            if let Err(e) = self.ctx.gateway.cancel_order(order_id).await {
                tracing::warn!(basket = %id, order_id = %order_id, "Failed to cancel entry order: {}", e);
                failure = Some(format!("failed to cancel entry order: {}", e));
            }
        }

        tracing::warn!(basket = %id, price, "Stop-loss hit before entry filled, entry pulled");
        self.ctx
            .registry
            .mutate(id, |b| {
                if let Some(details) = failure {
                    b.log(ExecutionAction::Error, details, entry_order.clone());
                }
                b.transition(BasketStatus::Completed);
                b.log(
                    ExecutionAction::StopLossTriggered,
                    format!(
                        "{:.4} crossed trigger {:.4} before entry filled, entry order pulled",
                        price, b.stop_loss.trigger_price
                    ),
                    entry_order,
                );
            })
            .await;
        true
    }
}
