use std::sync::Arc;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use super::{EngineContext, PeriodicTask, TaskSet, TickControl};
use crate::models::{
    BasketStatus, ExecutionAction, LimitChaserConfig, OrderRequest, OrderStatus, OrderType, Side,
    TimeInForce,
};
use crate::Result;

/// Resting price for a chaser exit: below market when closing a long,
/// above market when closing a short
pub fn chase_price(side: Side, market_price: f64, chaser: &LimitChaserConfig) -> f64 {
    let offset = chaser.offset(market_price);
    match side {
        Side::Long => market_price - offset,
        Side::Short => market_price + offset,
    }
}

/// Per-basket cancel/replace loop that chases the exit price
#[derive(Clone)]
pub struct LimitChaser {
    ctx: Arc<EngineContext>,
    tasks: TaskSet<Uuid>,
}

impl LimitChaser {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            tasks: TaskSet::new(),
        }
    }

    /// Start chasing for an active basket with the chaser enabled
    ///
    /// Returns whether a new loop was spawned.
    pub fn start(&self, id: Uuid) -> bool {
        let Some(basket) = self.ctx.registry.get(id) else {
            return false;
        };
        let chaser = &basket.limit_chaser;
        if !basket.is_active() || !chaser.enabled || chaser.exhausted() {
            return false;
        }

        let period = Duration::from_secs(chaser.update_interval_seconds.max(1));
        let this = self.clone();
        let spawned = self.tasks.ensure(id, move || {
            PeriodicTask::spawn(
                format!("chaser:{}", id),
                Instant::now() + period,
                period,
                move || {
                    let this = this.clone();
                    async move { this.tick(id).await }
                },
            )
        });

        if spawned {
            tracing::info!(
                basket = %id,
                interval_secs = period.as_secs(),
                max_chases = chaser.max_chases,
                "Limit chaser started"
            );
        }
        spawned
    }

    /// Stop the loop without touching the resting order
    pub fn stop(&self, id: Uuid) -> bool {
        self.tasks.stop(&id)
    }

    pub fn is_running(&self, id: Uuid) -> bool {
        self.tasks.is_running(&id)
    }

    pub fn stop_all(&self) {
        self.tasks.stop_all();
    }

    /// Stop the loop and pull the resting chaser order
    ///
    /// Callers hold the basket's slot. A failed cancel is logged on the
    /// basket and the local order id is cleared anyway.
    pub async fn halt(&self, id: Uuid) {
        self.stop(id);

        let Some(order_id) = self
            .ctx
            .registry
            .get(id)
            .and_then(|b| b.active_orders.limit_chaser_order_id)
        else {
            return;
        };

        let failure = match self.ctx.gateway.cancel_order(&order_id).await {
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(basket = %id, order_id = %order_id, "Failed to cancel chaser order: {}", e);
                Some(format!("failed to cancel chaser order: {}", e))
            }
        };

        self.ctx
            .registry
            .mutate(id, |b| {
                b.active_orders.limit_chaser_order_id = None;
                if let Some(details) = failure {
                    b.log(ExecutionAction::Error, details, Some(order_id));
                }
            })
            .await;
    }

    /// One chase step; skipped when another step for the basket is running
    pub async fn tick(&self, id: Uuid) -> TickControl {
        let Some(_slot) = self.ctx.slots.try_acquire(id) else {
            tracing::debug!(basket = %id, "Chase tick skipped, basket busy");
            return TickControl::Continue;
        };

        match self.chase(id).await {
            Ok(control) => control,
            Err(e) => {
                tracing::warn!(basket = %id, "Chase tick failed: {}", e);
                self.ctx
                    .registry
                    .mutate(id, |b| {
                        b.log(ExecutionAction::Error, format!("limit chaser: {}", e), None)
                    })
                    .await;
                TickControl::Continue
            }
        }
    }

    async fn chase(&self, id: Uuid) -> Result<TickControl> {
        let Some(basket) = self.ctx.registry.get(id) else {
            return Ok(TickControl::Stop);
        };
        if !basket.is_active() || !basket.limit_chaser.enabled {
            return Ok(TickControl::Stop);
        }
        if !self.ctx.ensure_entry_filled(id).await? {
            return Ok(TickControl::Continue);
        }

        if let Some(previous) = basket.active_orders.limit_chaser_order_id.clone() {
            match self.ctx.gateway.get_order_status(&previous).await? {
                OrderStatus::Filled => {
                    self.complete(id, previous).await;
                    return Ok(TickControl::Stop);
                }
                OrderStatus::Pending => {
                    if basket.limit_chaser.exhausted() {
                        self.give_up(id).await;
                        return Ok(TickControl::Stop);
                    }
                    if !self.ctx.gateway.cancel_order(&previous).await? {
                        // Lost the race against a fill
                        if self.ctx.gateway.get_order_status(&previous).await? == OrderStatus::Filled {
                            self.complete(id, previous).await;
                            return Ok(TickControl::Stop);
                        }
                        return Ok(TickControl::Continue);
                    }
                }
                OrderStatus::Cancelled | OrderStatus::Rejected => {}
            }

            self.ctx
                .registry
                .mutate(id, |b| b.active_orders.limit_chaser_order_id = None)
                .await;
        }

        if basket.limit_chaser.exhausted() {
            self.give_up(id).await;
            return Ok(TickControl::Stop);
        }

        let released = self.ctx.pull_take_profits(&basket).await;
        if released > 0.0 {
            tracing::info!(basket = %id, released, "Resting take-profits pulled into the chaser exit");
        }
        let quantity = self
            .ctx
            .registry
            .get(id)
            .map(|b| b.remaining_quantity())
            .unwrap_or_default();
        if quantity <= 0.0 {
            tracing::debug!(basket = %id, "Nothing left to exit, chaser stopping");
            return Ok(TickControl::Stop);
        }

        let Some(market_price) = self.ctx.market_data.get_price(&basket.symbol).await? else {
            tracing::debug!(basket = %id, symbol = %basket.symbol, "No price, chase deferred");
            return Ok(TickControl::Continue);
        };

        let chaser = &basket.limit_chaser;
        let limit_price = chase_price(basket.side, market_price, chaser);
        let time_in_force = TimeInForce::for_fill_or_cancel(chaser.fill_or_cancel);
        let request = OrderRequest {
            symbol: basket.symbol.clone(),
            side: basket.side.exit_side(),
            order_type: OrderType::Limit,
            quantity,
            price: Some(limit_price),
            time_in_force,
            leverage: None,
            reduce_only: true,
        };

        let order_id = self.ctx.place(&request).await?;
        let chase_number = chaser.chase_count + 1;

        tracing::info!(
            basket = %id,
            order_id = %order_id,
            market_price,
            limit_price,
            chase = chase_number,
            max_chases = chaser.max_chases,
            "Chaser order placed"
        );

        self.ctx
            .registry
            .mutate(id, |b| {
                b.limit_chaser.chase_count = chase_number;
                b.active_orders.limit_chaser_order_id = Some(order_id.clone());
                b.limit_chaser_price = Some(limit_price);
                b.log(
                    ExecutionAction::Chased,
                    format!(
                        "chase {}/{} {:?} @ {:.4} (market {:.4})",
                        chase_number, b.limit_chaser.max_chases, time_in_force, limit_price, market_price
                    ),
                    Some(order_id.clone()),
                );
            })
            .await;

        if time_in_force == TimeInForce::Ioc {
            self.schedule_fill_check(id, order_id);
        }

        Ok(TickControl::Continue)
    }

    fn schedule_fill_check(&self, id: Uuid, order_id: String) {
        let this = self.clone();
        let delay = self.ctx.config.fill_check_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.check_fill(id, &order_id).await;
        });
    }

    /// Delayed status check of an IOC chase order
    async fn check_fill(&self, id: Uuid, order_id: &str) {
        let _slot = self.ctx.slots.acquire(id).await;

        let Some(basket) = self.ctx.registry.get(id) else {
            return;
        };
        if !basket.is_active()
            || basket.active_orders.limit_chaser_order_id.as_deref() != Some(order_id)
        {
            return;
        }

        match self.ctx.gateway.get_order_status(order_id).await {
            Ok(OrderStatus::Filled) => {
                self.complete(id, order_id.to_string()).await;
                self.stop(id);
            }
            Ok(status) if status.is_dead() => {
                tracing::debug!(basket = %id, order_id, "IOC chase order expired unfilled");
                self.ctx
                    .registry
                    .mutate(id, |b| b.active_orders.limit_chaser_order_id = None)
                    .await;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(basket = %id, order_id, "Fill check failed: {}", e);
            }
        }
    }

    async fn complete(&self, id: Uuid, order_id: String) {
        tracing::info!(basket = %id, order_id = %order_id, "✅ Chaser exit filled, basket completed");
        self.ctx
            .registry
            .mutate(id, |b| {
                let price = b.limit_chaser_price.unwrap_or_default();
                b.transition(BasketStatus::Completed);
                b.log(
                    ExecutionAction::Filled,
                    format!("chaser exit filled @ {:.4}", price),
                    Some(order_id),
                );
            })
            .await;
    }

    async fn give_up(&self, id: Uuid) {
        tracing::info!(basket = %id, "Chase ceiling reached, chaser stopped");
        self.ctx
            .registry
            .mutate(id, |b| {
                let resting = b.active_orders.limit_chaser_order_id.clone();
                b.log(
                    ExecutionAction::ChaseLimitReached,
                    format!("{} chases used, last order left as is", b.limit_chaser.chase_count),
                    resting,
                );
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::test_support::{activate_directly, basket_config, harness};
    use crate::execution::TakeProfitDispatcher;
    use crate::models::{DistanceType, OrderSide, TakeProfitLevel};

    fn chaser_config(fill_or_cancel: bool, max_chases: u32) -> LimitChaserConfig {
        LimitChaserConfig {
            enabled: true,
            distance: 1.0,
            distance_type: DistanceType::Absolute,
            fill_or_cancel,
            update_interval_seconds: 10,
            max_chases,
            chase_count: 0,
        }
    }

    #[test]
    fn test_chase_price_by_side() {
        let percent = LimitChaserConfig {
            distance: 0.5,
            distance_type: DistanceType::Percentage,
            ..chaser_config(false, 5)
        };
        assert_eq!(chase_price(Side::Long, 200.0, &percent), 199.0);
        assert_eq!(chase_price(Side::Short, 200.0, &percent), 201.0);
        assert_eq!(chase_price(Side::Long, 200.0, &chaser_config(false, 5)), 199.0);
    }

    #[tokio::test]
    async fn test_price_sequence_cancel_then_replace() {
        let h = harness();
        let mut config = basket_config(Side::Long);
        config.limit_chaser = chaser_config(false, 10);
        let id = activate_directly(&h, config).await;
        let chaser = LimitChaser::new(h.ctx.clone());

        h.feed.push_prices("BTCUSDT", &[100.0, 101.0, 102.0]);
        for _ in 0..3 {
            assert_eq!(chaser.tick(id).await, TickControl::Continue);
            assert!(h.gateway.open_orders().len() <= 1);
        }

        let prices: Vec<Option<f64>> = h
            .gateway
            .placed()
            .iter()
            .filter(|(_, r)| r.reduce_only)
            .map(|(_, r)| r.price)
            .collect();
        assert_eq!(prices, vec![Some(99.0), Some(100.0), Some(101.0)]);
        assert_eq!(h.gateway.cancelled().len(), 2);

        let basket = h.ctx.registry.get(id).unwrap();
        assert_eq!(basket.limit_chaser.chase_count, 3);
        assert_eq!(basket.limit_chaser_price, Some(101.0));
        assert_eq!(h.gateway.open_orders().len(), 1);
    }

    #[tokio::test]
    async fn test_ceiling_stops_without_forcing_fill() {
        let h = harness();
        let mut config = basket_config(Side::Short);
        config.limit_chaser = chaser_config(false, 2);
        let id = activate_directly(&h, config).await;
        let chaser = LimitChaser::new(h.ctx.clone());
        h.feed.set_price("BTCUSDT", 100.0);

        assert_eq!(chaser.tick(id).await, TickControl::Continue);
        assert_eq!(chaser.tick(id).await, TickControl::Continue);
        assert_eq!(chaser.tick(id).await, TickControl::Stop);

        let basket = h.ctx.registry.get(id).unwrap();
        assert_eq!(basket.status, BasketStatus::Active);
        assert_eq!(basket.limit_chaser.chase_count, 2);
        let limits = basket
            .execution_log
            .iter()
            .filter(|l| l.action == ExecutionAction::ChaseLimitReached)
            .count();
        assert_eq!(limits, 1);

        // The last order keeps resting
        let (last_id, last) = h.gateway.placed().pop().unwrap();
        assert_eq!(last.side, OrderSide::Buy);
        assert_eq!(h.gateway.open_orders(), vec![last_id]);
        assert!(!chaser.start(id));
    }

    #[tokio::test]
    async fn test_filled_chase_order_completes_basket() {
        let h = harness();
        let mut config = basket_config(Side::Long);
        config.limit_chaser = chaser_config(false, 10);
        let id = activate_directly(&h, config).await;
        let chaser = LimitChaser::new(h.ctx.clone());
        h.feed.set_price("BTCUSDT", 100.0);

        chaser.tick(id).await;
        let order_id = h
            .ctx
            .registry
            .get(id)
            .unwrap()
            .active_orders
            .limit_chaser_order_id
            .unwrap();
        h.gateway.set_status(&order_id, OrderStatus::Filled);

        assert_eq!(chaser.tick(id).await, TickControl::Stop);
        let basket = h.ctx.registry.get(id).unwrap();
        assert_eq!(basket.status, BasketStatus::Completed);
        assert_eq!(
            basket.execution_log.last().unwrap().action,
            ExecutionAction::Filled
        );
    }

    #[tokio::test]
    async fn test_chaser_exit_absorbs_resting_take_profit() {
        let h = harness();
        let mut config = basket_config(Side::Long);
        config.limit_chaser = chaser_config(false, 10);
        config.take_profits = vec![TakeProfitLevel {
            id: "tp1".to_string(),
            enabled: true,
            target_price: 110.0,
            quantity_percent: 50.0,
            order_type: OrderType::Limit,
        }];
        let id = activate_directly(&h, config).await;
        h.ctx.ensure_entry_filled(id).await.unwrap();
        assert!(TakeProfitDispatcher::new(h.ctx.clone())
            .dispatch(id, "tp1")
            .await
            .unwrap());
        let tp_order = h.ctx.registry.get(id).unwrap().active_orders.take_profit_order_ids[0].clone();

        let chaser = LimitChaser::new(h.ctx.clone());
        h.feed.set_price("BTCUSDT", 100.0);
        chaser.tick(id).await;

        assert_eq!(h.gateway.status_of(&tp_order), Some(OrderStatus::Cancelled));
        let basket = h.ctx.registry.get(id).unwrap();
        let chase_order = basket.active_orders.limit_chaser_order_id.clone().unwrap();
        assert_eq!(basket.exited_quantity, 0.0);
        let (_, request) = h.gateway.placed().pop().unwrap();
        assert_eq!(request.quantity, 2.0);
        assert_eq!(h.gateway.open_orders(), vec![chase_order.clone()]);

        h.gateway.set_status(&chase_order, OrderStatus::Filled);
        assert_eq!(chaser.tick(id).await, TickControl::Stop);
        assert_eq!(h.ctx.registry.get(id).unwrap().status, BasketStatus::Completed);
        assert!(h.gateway.open_orders().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ioc_fill_check_clears_unfilled_order() {
        let h = harness();
        let mut config = basket_config(Side::Long);
        config.limit_chaser = chaser_config(true, 10);
        let id = activate_directly(&h, config).await;
        let chaser = LimitChaser::new(h.ctx.clone());
        h.feed.set_price("BTCUSDT", 100.0);

        chaser.tick(id).await;
        let (order_id, request) = h.gateway.placed().pop().unwrap();
        assert_eq!(request.time_in_force, TimeInForce::Ioc);
        assert_eq!(
            h.ctx
                .registry
                .get(id)
                .unwrap()
                .active_orders
                .limit_chaser_order_id,
            Some(order_id.clone())
        );
        h.gateway.set_status(&order_id, OrderStatus::Cancelled);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let basket = h.ctx.registry.get(id).unwrap();
        assert!(basket.active_orders.limit_chaser_order_id.is_none());
        assert_eq!(basket.status, BasketStatus::Active);
    }

    #[tokio::test]
    async fn test_waits_for_entry_fill() {
        let h = harness();
        let mut config = basket_config(Side::Long);
        config.limit_chaser = chaser_config(false, 10);
        let id = activate_directly(&h, config).await;
        let entry_id = h
            .ctx
            .registry
            .get(id)
            .unwrap()
            .active_orders
            .entry_order_id
            .unwrap();
        h.gateway.set_status(&entry_id, OrderStatus::Pending);
        h.feed.set_price("BTCUSDT", 100.0);

        let chaser = LimitChaser::new(h.ctx.clone());
        assert_eq!(chaser.tick(id).await, TickControl::Continue);
        assert_eq!(h.ctx.registry.get(id).unwrap().limit_chaser.chase_count, 0);

        h.gateway.set_status(&entry_id, OrderStatus::Filled);
        chaser.tick(id).await;
        let basket = h.ctx.registry.get(id).unwrap();
        assert!(basket.entry_filled);
        assert_eq!(basket.limit_chaser.chase_count, 1);
    }

    #[tokio::test]
    async fn test_busy_slot_skips_tick() {
        let h = harness();
        let mut config = basket_config(Side::Long);
        config.limit_chaser = chaser_config(false, 10);
        let id = activate_directly(&h, config).await;
        let chaser = LimitChaser::new(h.ctx.clone());
        h.feed.set_price("BTCUSDT", 100.0);

        let held = h.ctx.slots.acquire(id).await;
        assert_eq!(chaser.tick(id).await, TickControl::Continue);
        assert_eq!(h.ctx.registry.get(id).unwrap().limit_chaser.chase_count, 0);
        drop(held);

        chaser.tick(id).await;
        assert_eq!(h.ctx.registry.get(id).unwrap().limit_chaser.chase_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_loop_and_halt() {
        let h = harness();
        let mut config = basket_config(Side::Long);
        config.limit_chaser = chaser_config(false, 10);
        let id = activate_directly(&h, config).await;
        let chaser = LimitChaser::new(h.ctx.clone());
        h.feed.set_price("BTCUSDT", 100.0);

        assert!(chaser.start(id));
        assert!(!chaser.start(id));
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(h.ctx.registry.get(id).unwrap().limit_chaser.chase_count, 2);

        {
            let _slot = h.ctx.slots.acquire(id).await;
            chaser.halt(id).await;
        }
        assert!(!chaser.is_running(id));
        assert!(h.gateway.open_orders().is_empty());
        assert!(h
            .ctx
            .registry
            .get(id)
            .unwrap()
            .active_orders
            .limit_chaser_order_id
            .is_none());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.ctx.registry.get(id).unwrap().limit_chaser.chase_count, 2);
    }
}
