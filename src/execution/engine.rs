use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{
    EngineContext, EntryChaser, EventBus, LimitChaser, Registry, TakeProfitDispatcher,
    TriggerMonitor,
};
use crate::api::{MarketData, OrderGateway};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::{
    BasketConfig, BasketOrder, BasketPatch, BasketStatus, EntryConfig, EntryPositionOrder,
    EntryStatus, ExecutionAction, ExecutionEvent, OrderRequest, OrderType, TimeInForce,
};
use crate::persistence::SnapshotStore;
use crate::Result;

/// Conditional order execution engine
///
/// Owns the registry and every periodic task. Construct one per process with
/// the ports it should drive.
pub struct BasketEngine {
    ctx: Arc<EngineContext>,
    monitor: TriggerMonitor,
    chaser: LimitChaser,
    take_profits: TakeProfitDispatcher,
    entries: EntryChaser,
}

impl BasketEngine {
    /// Build the engine over the persisted registry
    pub async fn new(
        market_data: Arc<dyn MarketData>,
        gateway: Arc<dyn OrderGateway>,
        store: Arc<dyn SnapshotStore>,
        config: EngineConfig,
    ) -> Result<Self> {
        let events = EventBus::new(config.event_channel_capacity);
        let registry = Registry::load(store, events).await?;
        let ctx = Arc::new(EngineContext::new(registry, gateway, market_data, config));

        let chaser = LimitChaser::new(ctx.clone());
        let take_profits = TakeProfitDispatcher::new(ctx.clone());
        let monitor = TriggerMonitor::new(ctx.clone(), chaser.clone(), take_profits.clone());
        let entries = EntryChaser::new(ctx.clone());

        Ok(Self {
            ctx,
            monitor,
            chaser,
            take_profits,
            entries,
        })
    }

    /// Resume monitors and chasers for everything still live
    ///
    /// Returns the number of baskets and entries resumed.
    pub fn start(&self) -> usize {
        let mut resumed = 0;

        for basket in self.ctx.registry.find(|b| b.is_active()) {
            self.wire(&basket);
            resumed += 1;
        }
        for entry in self.ctx.registry.entries() {
            if self.entries.start(entry.id) {
                resumed += 1;
            }
        }

        tracing::info!(resumed, "Engine started");
        resumed
    }

    /// Stop every periodic task; entity state is left as is
    pub fn shutdown(&self) {
        self.monitor.stop_all();
        self.chaser.stop_all();
        self.entries.stop_all();
        tracing::info!("Engine stopped");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.ctx.registry.events().subscribe()
    }

    pub fn monitor(&self) -> &TriggerMonitor {
        &self.monitor
    }

    fn wire(&self, basket: &BasketOrder) {
        self.monitor.watch(basket);
        self.chaser.start(basket.id);
    }

    // ------------------------------------------------------------------
    // Baskets
    // ------------------------------------------------------------------

    pub async fn create(&self, config: BasketConfig) -> Result<Uuid> {
        self.ctx.registry.create(config).await
    }

    pub fn get(&self, id: Uuid) -> Option<BasketOrder> {
        self.ctx.registry.get(id)
    }

    pub fn list(&self) -> Vec<BasketOrder> {
        self.ctx.registry.list()
    }

    /// Place the entry order of a pending basket and start its monitors
    ///
    /// A failed entry placement moves the basket to `error`.
    pub async fn activate(&self, id: Uuid) -> Result<()> {
        let basket = {
            let _slot = self.ctx.slots.acquire(id).await;

            let basket = self
                .ctx
                .registry
                .get(id)
                .ok_or_else(|| EngineError::basket_not_found(id))?;
            if basket.status != BasketStatus::Pending {
                return Err(EngineError::validation(format!(
                    "basket {} is {:?}, only pending baskets activate",
                    id, basket.status
                )));
            }
            basket.config().validate()?;

            let entry = &basket.entry_order;
            let request = OrderRequest {
                symbol: basket.symbol.clone(),
                side: basket.side.entry_side(),
                order_type: entry.order_type,
                quantity: entry.quantity,
                price: match entry.order_type {
                    OrderType::Limit => entry.price,
                    OrderType::Market => None,
                },
                time_in_force: TimeInForce::Gtc,
                leverage: Some(entry.leverage),
                reduce_only: false,
            };

            match self.ctx.place(&request).await {
                Ok(order_id) => {
                    tracing::info!(
                        basket = %id,
                        symbol = %basket.symbol,
                        side = %basket.side,
                        order_id = %order_id,
                        "🚀 Basket activated"
                    );
                    self.ctx
                        .registry
                        .mutate(id, |b| {
                            b.active_orders.entry_order_id = Some(order_id.clone());
                            b.transition(BasketStatus::Active);
                            b.log(
                                ExecutionAction::EntryPlaced,
                                format!(
                                    "{:?} entry qty {} x{}",
                                    b.entry_order.order_type, b.entry_order.quantity, b.entry_order.leverage
                                ),
                                Some(order_id),
                            );
                        })
                        .await;
                }
                Err(e) => {
                    tracing::error!(basket = %id, "Entry placement failed: {}", e);
                    self.ctx
                        .registry
                        .mutate(id, |b| {
                            b.log(
                                ExecutionAction::Error,
                                format!("entry placement failed: {}", e),
                                None,
                            );
                            b.transition(BasketStatus::Error);
                        })
                        .await;
                    return Err(e);
                }
            }

            self.ctx
                .registry
                .get(id)
                .ok_or_else(|| EngineError::basket_not_found(id))?
        };

        self.wire(&basket);
        Ok(())
    }

    /// Patch a basket's legs; `Ok(false)` for unknown or finished baskets
    ///
    /// Disabling the chaser stops its loop and pulls its resting order.
    pub async fn update(&self, id: Uuid, patch: BasketPatch) -> Result<bool> {
        let basket = {
            let _slot = self.ctx.slots.acquire(id).await;

            let Some(before) = self.ctx.registry.get(id) else {
                return Ok(false);
            };
            if !self.ctx.registry.update(id, patch).await? {
                return Ok(false);
            }
            let Some(after) = self.ctx.registry.get(id) else {
                return Ok(false);
            };

            if before.limit_chaser.enabled && !after.limit_chaser.enabled {
                tracing::info!(basket = %id, "Limit chaser disabled");
                self.chaser.halt(id).await;
            }
            after
        };

        self.wire(&basket);
        Ok(true)
    }

    /// Cancel every tracked order and mark the basket cancelled
    ///
    /// Returns `Ok(false)` for an unknown id. Cancelling a finished basket is
    /// a no-op success. Exchange cancel failures are logged and do not block
    /// the local transition.
    pub async fn cancel(&self, id: Uuid) -> Result<bool> {
        let Some(basket) = self.ctx.registry.get(id) else {
            return Ok(false);
        };
        if basket.status.is_terminal() {
            return Ok(true);
        }

        let _slot = self.ctx.slots.acquire(id).await;
        let Some(basket) = self.ctx.registry.get(id) else {
            return Ok(false);
        };
        if basket.status.is_terminal() {
            return Ok(true);
        }

        self.chaser.stop(id);

        let mut cancelled = 0;
        let mut failures = Vec::new();
        for order_id in basket.active_orders.all_ids() {
            match self.ctx.gateway.cancel_order(&order_id).await {
                Ok(true) => cancelled += 1,
                Ok(false) => {
                    tracing::debug!(basket = %id, order_id = %order_id, "Order already closed");
                }
                Err(e) => {
                    tracing::warn!(basket = %id, order_id = %order_id, "Failed to cancel order: {}", e);
                    failures.push((order_id, e.to_string()));
                }
            }
        }

        tracing::info!(basket = %id, cancelled, failed = failures.len(), "Basket cancelled");
        self.ctx
            .registry
            .mutate(id, |b| {
                for (order_id, error) in failures {
                    b.log(
                        ExecutionAction::Error,
                        format!("cancel failed: {}", error),
                        Some(order_id),
                    );
                }
                b.transition(BasketStatus::Cancelled);
                b.log(
                    ExecutionAction::Cancelled,
                    format!("basket cancelled, {} open orders pulled", cancelled),
                    None,
                );
            })
            .await;
        Ok(true)
    }

    pub async fn dispatch_take_profit(&self, id: Uuid, level_id: &str) -> Result<bool> {
        self.take_profits.dispatch(id, level_id).await
    }

    pub async fn check_take_profits(&self, id: Uuid, price: f64) -> Result<usize> {
        self.take_profits.check_levels(id, price).await
    }

    // ------------------------------------------------------------------
    // Entries
    // ------------------------------------------------------------------

    pub async fn create_entry(&self, config: EntryConfig) -> Result<Uuid> {
        self.entries.create_entry(config).await
    }

    pub async fn cancel_entry(&self, id: Uuid) -> Result<bool> {
        self.entries.cancel_entry(id).await
    }

    pub async fn refresh_entry(&self, id: Uuid) -> Result<EntryStatus> {
        self.entries.refresh(id).await
    }

    pub fn get_entry(&self, id: Uuid) -> Option<EntryPositionOrder> {
        self.ctx.registry.entry(id)
    }

    pub fn list_entries(&self) -> Vec<EntryPositionOrder> {
        self.ctx.registry.entries()
    }
}

impl Drop for BasketEngine {
    fn drop(&mut self) {
        self.monitor.stop_all();
        self.chaser.stop_all();
        self.entries.stop_all();
    }
}
