use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use super::{EngineContext, PeriodicTask, TaskSet, TickControl};
use crate::error::EngineError;
use crate::models::{
    EntryConfig, EntryParams, EntryPositionOrder, EntryStatus, ExecutionAction, OrderRequest,
    OrderStatus, OrderType, Side, TimeInForce,
};
use crate::Result;

/// Entry limit price: `price_distance` percent inside the market, clamped to
/// the side's price limit when one is set
pub fn entry_price(side: Side, market_price: f64, params: &EntryParams) -> f64 {
    let distance = params.price_distance / 100.0;
    match side {
        Side::Long => {
            let price = market_price * (1.0 - distance);
            if params.long_price_limit > 0.0 && price > params.long_price_limit {
                params.long_price_limit
            } else {
                price
            }
        }
        Side::Short => {
            let price = market_price * (1.0 + distance);
            if params.short_price_limit > 0.0 && price < params.short_price_limit {
                params.short_price_limit
            } else {
                price
            }
        }
    }
}

/// Opens single-leg positions, chasing the entry price when asked to
///
/// Entries with `fill_or_cancel` get a cancel/replace loop; the others keep
/// their first order.
#[derive(Clone)]
pub struct EntryChaser {
    ctx: Arc<EngineContext>,
    tasks: TaskSet<Uuid>,
}

impl EntryChaser {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self {
            ctx,
            tasks: TaskSet::new(),
        }
    }

    /// Validate, register and place the first entry order
    ///
    /// A failed first placement is logged on the entry, which stays pending;
    /// a chasing entry retries on its next tick.
    pub async fn create_entry(&self, config: EntryConfig) -> Result<Uuid> {
        if config.symbol.trim().is_empty() {
            return Err(EngineError::validation("symbol is required"));
        }
        config.params.validate()?;

        let entry = EntryPositionOrder::new(
            config,
            self.ctx.config.entry_max_chases,
            self.ctx.config.entry_update_interval_seconds,
        );
        let chasing = entry.params.fill_or_cancel;
        tracing::info!(
            entry = %entry.id,
            symbol = %entry.symbol,
            side = %entry.side,
            quantity = entry.params.quantity(),
            chasing,
            "Entry created"
        );
        let id = self.ctx.registry.insert_entry(entry).await;

        {
            let _slot = self.ctx.slots.acquire(id).await;
            if let Err(e) = self.reprice(id).await {
                self.record_error(id, format!("initial placement failed: {}", e))
                    .await;
            }
        }

        self.start(id);
        Ok(id)
    }

    /// Start the chase loop for a live chasing entry, or the expiry timer of
    /// a static entry with a deadline
    ///
    /// Returns whether a new task was spawned.
    pub fn start(&self, id: Uuid) -> bool {
        let Some(entry) = self.ctx.registry.entry(id) else {
            return false;
        };
        if entry.status.is_terminal() {
            return false;
        }
        if !entry.params.fill_or_cancel {
            return match entry.expires_at {
                Some(expires_at) => self.schedule_expiry(id, expires_at),
                None => false,
            };
        }

        let period = Duration::from_secs(entry.update_interval_seconds.max(1));
        let this = self.clone();
        self.tasks.ensure(id, move || {
            PeriodicTask::spawn(
                format!("entry:{}", id),
                Instant::now() + period,
                period,
                move || {
                    let this = this.clone();
                    async move { this.tick(id).await }
                },
            )
        })
    }

    fn schedule_expiry(&self, id: Uuid, expires_at: DateTime<Utc>) -> bool {
        let delay = (expires_at - Utc::now()).to_std().unwrap_or_default();
        let this = self.clone();
        self.tasks.ensure(id, move || {
            PeriodicTask::spawn(
                format!("entry-expiry:{}", id),
                Instant::now() + delay,
                Duration::from_secs(1),
                move || {
                    let this = this.clone();
                    async move {
                        this.expire_static(id).await;
                        TickControl::Stop
                    }
                },
            )
        })
    }

    pub fn is_running(&self, id: Uuid) -> bool {
        self.tasks.is_running(&id)
    }

    pub fn stop_all(&self) {
        self.tasks.stop_all();
    }

    /// Cancel the entry; `Ok(false)` when the id is unknown
    ///
    /// Cancelling a finished entry is a no-op success. A failed exchange
    /// cancel is logged and the entry is still marked cancelled.
    pub async fn cancel_entry(&self, id: Uuid) -> Result<bool> {
        if self.ctx.registry.entry(id).is_none() {
            return Ok(false);
        }

        let _slot = self.ctx.slots.acquire(id).await;
        self.tasks.stop(&id);

        let Some(entry) = self.ctx.registry.entry(id) else {
            return Ok(false);
        };
        if entry.status.is_terminal() {
            return Ok(true);
        }

        let failure = self.pull_order(&entry).await;
        tracing::info!(entry = %id, "Entry cancelled");
        self.ctx
            .registry
            .mutate_entry(id, |e| {
                if let Some(details) = failure {
                    e.log(ExecutionAction::Error, details, e.active_order_id.clone());
                }
                e.transition(EntryStatus::Cancelled);
                e.log(ExecutionAction::Cancelled, "entry cancelled", e.active_order_id.clone());
            })
            .await;
        Ok(true)
    }

    /// Query the resting order and record a fill, or the expiry once the
    /// deadline has passed
    pub async fn refresh(&self, id: Uuid) -> Result<EntryStatus> {
        let _slot = self.ctx.slots.acquire(id).await;
        let entry = self
            .ctx
            .registry
            .entry(id)
            .ok_or_else(|| EngineError::entry_not_found(id))?;

        if entry.status.is_terminal() {
            return Ok(entry.status);
        }
        if let Some(order_id) = &entry.active_order_id {
            if self.ctx.gateway.get_order_status(order_id).await? == OrderStatus::Filled {
                self.mark_filled(id, order_id.clone()).await;
                self.tasks.stop(&id);
                return Ok(EntryStatus::Filled);
            }
        }
        if entry.is_expired_at(Utc::now()) {
            self.tasks.stop(&id);
            self.expire(&entry).await;
            return Ok(EntryStatus::Expired);
        }
        Ok(entry.status)
    }

    /// Deadline of a static entry: a last fill check, then expiry
    async fn expire_static(&self, id: Uuid) {
        let _slot = self.ctx.slots.acquire(id).await;
        let Some(entry) = self.ctx.registry.entry(id) else {
            return;
        };
        if entry.status.is_terminal() {
            return;
        }
        if let Some(order_id) = &entry.active_order_id {
            if let Ok(OrderStatus::Filled) = self.ctx.gateway.get_order_status(order_id).await {
                self.mark_filled(id, order_id.clone()).await;
                return;
            }
        }
        self.expire(&entry).await;
    }

    /// One chase step; skipped when another step for the entry is running
    pub async fn tick(&self, id: Uuid) -> TickControl {
        let Some(_slot) = self.ctx.slots.try_acquire(id) else {
            tracing::debug!(entry = %id, "Entry tick skipped, entry busy");
            return TickControl::Continue;
        };

        match self.chase(id).await {
            Ok(control) => control,
            Err(e) => {
                tracing::warn!(entry = %id, "Entry tick failed: {}", e);
                self.record_error(id, format!("entry chaser: {}", e)).await;
                TickControl::Continue
            }
        }
    }

    async fn chase(&self, id: Uuid) -> Result<TickControl> {
        let Some(entry) = self.ctx.registry.entry(id) else {
            return Ok(TickControl::Stop);
        };
        if entry.status.is_terminal() {
            return Ok(TickControl::Stop);
        }

        if entry.is_expired_at(Utc::now()) {
            self.expire(&entry).await;
            return Ok(TickControl::Stop);
        }

        if let Some(order_id) = &entry.active_order_id {
            if self.ctx.gateway.get_order_status(order_id).await? == OrderStatus::Filled {
                self.mark_filled(id, order_id.clone()).await;
                return Ok(TickControl::Stop);
            }
            if entry.chase_count >= entry.max_chases {
                tracing::info!(entry = %id, "Entry chase ceiling reached, entry left active");
                self.ctx
                    .registry
                    .mutate_entry(id, |e| {
                        e.log(
                            ExecutionAction::ChaseLimitReached,
                            format!("{} chases used, last order left as is", e.chase_count),
                            e.active_order_id.clone(),
                        );
                    })
                    .await;
                return Ok(TickControl::Stop);
            }
        }

        self.reprice(id).await?;
        Ok(TickControl::Continue)
    }

    /// Place the entry order, replacing the previous one if the price moved
    /// enough. Callers hold the entry's slot.
    async fn reprice(&self, id: Uuid) -> Result<()> {
        let entry = self
            .ctx
            .registry
            .entry(id)
            .ok_or_else(|| EngineError::entry_not_found(id))?;

        let market_price = self
            .ctx
            .market_data
            .get_price(&entry.symbol)
            .await?
            .ok_or_else(|| EngineError::MarketData(format!("no price for {}", entry.symbol)))?;
        let price = entry_price(entry.side, market_price, &entry.params);

        if let Some(previous) = &entry.active_order_id {
            match self.ctx.gateway.get_order_status(previous).await? {
                OrderStatus::Filled => {
                    self.mark_filled(id, previous.clone()).await;
                    self.tasks.stop(&id);
                    return Ok(());
                }
                OrderStatus::Pending => {
                    if let Some(last) = entry.last_price {
                        let moved = (price - last).abs() / last;
                        if moved < self.ctx.config.reprice_threshold() {
                            tracing::debug!(entry = %id, price, last, "Entry price unchanged, re-price suppressed");
                            return Ok(());
                        }
                    }
                    if !self.ctx.gateway.cancel_order(previous).await? {
                        match self.ctx.gateway.get_order_status(previous).await? {
                            OrderStatus::Filled => {
                                self.mark_filled(id, previous.clone()).await;
                                self.tasks.stop(&id);
                                return Ok(());
                            }
                            // Still resting, never two orders at once
                            OrderStatus::Pending => return Ok(()),
                            OrderStatus::Cancelled | OrderStatus::Rejected => {}
                        }
                    }
                }
                OrderStatus::Cancelled | OrderStatus::Rejected => {
                    tracing::debug!(entry = %id, order_id = %previous, "Entry order died unfilled, placing again");
                }
            }
        }

        let request = OrderRequest {
            symbol: entry.symbol.clone(),
            side: entry.side.entry_side(),
            order_type: OrderType::Limit,
            quantity: entry.params.quantity(),
            price: Some(price),
            time_in_force: TimeInForce::for_fill_or_cancel(entry.params.fill_or_cancel),
            leverage: None,
            reduce_only: false,
        };
        let replacing = entry.active_order_id.is_some();

        let order_id = match self.ctx.place(&request).await {
            Ok(order_id) => order_id,
            Err(e) => {
                if replacing {
                    self.ctx
                        .registry
                        .mutate_entry(id, |entry| entry.active_order_id = None)
                        .await;
                }
                return Err(e);
            }
        };

        tracing::info!(
            entry = %id,
            order_id = %order_id,
            market_price,
            price,
            quantity = request.quantity,
            "Entry order placed"
        );
        self.ctx
            .registry
            .mutate_entry(id, |e| {
                let action = if replacing {
                    e.chase_count += 1;
                    ExecutionAction::Chased
                } else {
                    ExecutionAction::EntryPlaced
                };
                e.active_order_id = Some(order_id.clone());
                e.last_price = Some(price);
                e.transition(EntryStatus::Active);
                e.log(
                    action,
                    format!(
                        "{} {} @ {:.4} (market {:.4}), chase {}/{}",
                        e.side,
                        request.quantity,
                        price,
                        market_price,
                        e.chase_count,
                        e.max_chases
                    ),
                    Some(order_id),
                );
            })
            .await;
        Ok(())
    }

    async fn pull_order(&self, entry: &EntryPositionOrder) -> Option<String> {
        let order_id = entry.active_order_id.as_ref()?;
        match self.ctx.gateway.cancel_order(order_id).await {
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(entry = %entry.id, order_id = %order_id, "Failed to cancel entry order: {}", e);
                Some(format!("failed to cancel entry order: {}", e))
            }
        }
    }

    async fn expire(&self, entry: &EntryPositionOrder) {
        let failure = self.pull_order(entry).await;
        tracing::info!(entry = %entry.id, "Entry expired");
        self.ctx
            .registry
            .mutate_entry(entry.id, |e| {
                if let Some(details) = failure {
                    e.log(ExecutionAction::Error, details, e.active_order_id.clone());
                }
                e.transition(EntryStatus::Expired);
                e.log(ExecutionAction::Expired, "entry expired", e.active_order_id.clone());
            })
            .await;
    }

    async fn mark_filled(&self, id: Uuid, order_id: String) {
        tracing::info!(entry = %id, order_id = %order_id, "✅ Entry filled");
        self.ctx
            .registry
            .mutate_entry(id, |e| {
                e.transition(EntryStatus::Filled);
                let price = e.last_price.unwrap_or_default();
                e.log(
                    ExecutionAction::Filled,
                    format!("entry filled @ {:.4}", price),
                    Some(order_id),
                );
            })
            .await;
    }

    async fn record_error(&self, id: Uuid, details: String) {
        self.ctx
            .registry
            .mutate_entry(id, |e| e.log(ExecutionAction::Error, details, None))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::test_support::{harness, matching_harness};
    use crate::models::{OrderSide, PositionType};

    fn create_test_params(fill_or_cancel: bool) -> EntryParams {
        EntryParams {
            enabled: true,
            entry_position: 0.5,
            max_position_size: 1000.0,
            position_type: PositionType::Percentage,
            long_price_limit: 0.0,
            short_price_limit: 0.0,
            price_distance: 1.5,
            fill_or_cancel,
        }
    }

    fn create_test_config(side: Side, fill_or_cancel: bool) -> EntryConfig {
        EntryConfig {
            symbol: "BTCUSDT".to_string(),
            side,
            params: create_test_params(fill_or_cancel),
            max_chases: Some(3),
            update_interval_seconds: Some(5),
            expires_after_seconds: None,
        }
    }

    #[test]
    fn test_entry_price_offsets_and_clamps() {
        let params = create_test_params(true);
        assert!((entry_price(Side::Long, 95_000.0, &params) - 93_575.0).abs() < 1e-6);
        assert!((entry_price(Side::Short, 100.0, &params) - 101.5).abs() < 1e-9);

        let capped = EntryParams {
            long_price_limit: 93_000.0,
            short_price_limit: 102.0,
            ..params
        };
        assert_eq!(entry_price(Side::Long, 95_000.0, &capped), 93_000.0);
        assert_eq!(entry_price(Side::Short, 100.0, &capped), 102.0);

        // A limit that is not breached leaves the price alone
        let loose = EntryParams {
            long_price_limit: 99_000.0,
            ..create_test_params(true)
        };
        assert!((entry_price(Side::Long, 95_000.0, &loose) - 93_575.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_first_order_scenario() {
        let h = matching_harness();
        h.feed.set_price("BTCUSDT", 95_000.0);
        let chaser = EntryChaser::new(h.ctx.clone());

        let id = chaser
            .create_entry(create_test_config(Side::Long, true))
            .await
            .unwrap();

        let (_, request) = h.gateway.placed().pop().unwrap();
        assert_eq!(request.side, OrderSide::Buy);
        assert_eq!(request.quantity, 500.0);
        assert!((request.price.unwrap() - 93_575.0).abs() < 1e-6);
        assert_eq!(request.time_in_force, TimeInForce::Ioc);
        assert!(!request.reduce_only);

        let entry = h.ctx.registry.entry(id).unwrap();
        assert_eq!(entry.status, EntryStatus::Active);
        assert_eq!(entry.chase_count, 0);
        assert!(chaser.is_running(id));
    }

    #[tokio::test]
    async fn test_static_entry_has_no_loop() {
        let h = harness();
        h.feed.set_price("BTCUSDT", 100.0);
        let chaser = EntryChaser::new(h.ctx.clone());

        let id = chaser
            .create_entry(create_test_config(Side::Short, false))
            .await
            .unwrap();

        assert!(!chaser.is_running(id));
        let (order_id, request) = h.gateway.placed().pop().unwrap();
        assert_eq!(request.time_in_force, TimeInForce::Gtc);
        assert_eq!(h.gateway.open_orders(), vec![order_id.clone()]);

        h.gateway.set_status(&order_id, OrderStatus::Filled);
        assert_eq!(chaser.refresh(id).await.unwrap(), EntryStatus::Filled);
    }

    #[tokio::test]
    async fn test_reprice_threshold_and_ceiling() {
        let h = harness();
        h.feed
            .push_prices("BTCUSDT", &[100.0, 100.05, 102.0, 104.0, 106.0, 108.0]);
        let chaser = EntryChaser::new(h.ctx.clone());
        let id = chaser
            .create_entry(create_test_config(Side::Long, true))
            .await
            .unwrap();

        // 0.05% move is below the threshold
        assert_eq!(chaser.tick(id).await, TickControl::Continue);
        assert_eq!(h.gateway.placed().len(), 1);

        for _ in 0..3 {
            assert_eq!(chaser.tick(id).await, TickControl::Continue);
        }
        let entry = h.ctx.registry.entry(id).unwrap();
        assert_eq!(entry.chase_count, 3);
        assert_eq!(h.gateway.cancelled().len(), 3);
        assert_eq!(h.gateway.open_orders().len(), 1);

        assert_eq!(chaser.tick(id).await, TickControl::Stop);
        let entry = h.ctx.registry.entry(id).unwrap();
        assert_eq!(entry.status, EntryStatus::Active);
        assert_eq!(entry.chase_count, 3);
        assert_eq!(
            entry.execution_log.last().unwrap().action,
            ExecutionAction::ChaseLimitReached
        );
        assert_eq!(h.gateway.placed().len(), 4);
    }

    #[tokio::test]
    async fn test_dead_ioc_is_replaced_at_a_flat_price() {
        let h = matching_harness();
        h.feed.set_price("BTCUSDT", 100.0);
        let chaser = EntryChaser::new(h.ctx.clone());
        let id = chaser
            .create_entry(create_test_config(Side::Long, true))
            .await
            .unwrap();
        let (first, _) = h.gateway.placed().pop().unwrap();
        assert_eq!(h.gateway.status_of(&first), Some(OrderStatus::Cancelled));

        for _ in 0..3 {
            assert_eq!(chaser.tick(id).await, TickControl::Continue);
        }
        let placed = h.gateway.placed();
        assert_eq!(placed.len(), 4);
        assert!(placed
            .iter()
            .all(|(_, r)| (r.price.unwrap() - 98.5).abs() < 1e-9));
        assert!(h.gateway.open_orders().is_empty());
        assert!(h.gateway.cancelled().is_empty());

        let entry = h.ctx.registry.entry(id).unwrap();
        assert_eq!(entry.chase_count, 3);
        assert_eq!(entry.status, EntryStatus::Active);

        assert_eq!(chaser.tick(id).await, TickControl::Stop);
        assert_eq!(
            h.ctx.registry.entry(id).unwrap().execution_log.last().unwrap().action,
            ExecutionAction::ChaseLimitReached
        );
        assert_eq!(h.gateway.placed().len(), 4);
    }

    #[tokio::test]
    async fn test_cancel_entry_is_idempotent() {
        let h = harness();
        h.feed.set_price("BTCUSDT", 100.0);
        let chaser = EntryChaser::new(h.ctx.clone());
        let id = chaser
            .create_entry(create_test_config(Side::Long, true))
            .await
            .unwrap();
        let order_id = h.ctx.registry.entry(id).unwrap().active_order_id.unwrap();

        assert!(chaser.cancel_entry(id).await.unwrap());
        assert!(!chaser.is_running(id));
        assert_eq!(h.gateway.status_of(&order_id), Some(OrderStatus::Cancelled));
        assert_eq!(
            h.ctx.registry.entry(id).unwrap().status,
            EntryStatus::Cancelled
        );

        let calls = h.gateway.calls().len();
        assert!(chaser.cancel_entry(id).await.unwrap());
        assert_eq!(h.gateway.calls().len(), calls);
        assert!(!chaser.cancel_entry(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_survives_gateway_failure() {
        let h = harness();
        h.feed.set_price("BTCUSDT", 100.0);
        let chaser = EntryChaser::new(h.ctx.clone());
        let id = chaser
            .create_entry(create_test_config(Side::Long, false))
            .await
            .unwrap();

        h.gateway.fail_next(1);
        assert!(chaser.cancel_entry(id).await.unwrap());
        let entry = h.ctx.registry.entry(id).unwrap();
        assert_eq!(entry.status, EntryStatus::Cancelled);
        assert!(entry
            .execution_log
            .iter()
            .any(|l| l.action == ExecutionAction::Error));
    }

    #[tokio::test]
    async fn test_validation_rejects_before_any_order() {
        let h = harness();
        let chaser = EntryChaser::new(h.ctx.clone());
        let mut config = create_test_config(Side::Long, true);
        config.params.enabled = false;

        assert!(chaser.create_entry(config).await.is_err());
        assert!(h.ctx.registry.entries().is_empty());
        assert!(h.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_price_leaves_entry_pending_until_next_tick() {
        let h = harness();
        let chaser = EntryChaser::new(h.ctx.clone());
        let id = chaser
            .create_entry(create_test_config(Side::Long, true))
            .await
            .unwrap();

        let entry = h.ctx.registry.entry(id).unwrap();
        assert_eq!(entry.status, EntryStatus::Pending);
        assert_eq!(entry.execution_log.last().unwrap().action, ExecutionAction::Error);

        h.feed.set_price("BTCUSDT", 100.0);
        chaser.tick(id).await;
        let entry = h.ctx.registry.entry(id).unwrap();
        assert_eq!(entry.status, EntryStatus::Active);
        assert_eq!(entry.chase_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_cancels_resting_order() {
        let h = harness();
        h.feed.set_price("BTCUSDT", 100.0);
        let chaser = EntryChaser::new(h.ctx.clone());
        let mut config = create_test_config(Side::Long, true);
        config.expires_after_seconds = Some(0);
        let id = chaser.create_entry(config).await.unwrap();
        let order_id = h.ctx.registry.entry(id).unwrap().active_order_id.unwrap();

        assert_eq!(chaser.tick(id).await, TickControl::Stop);
        assert_eq!(h.ctx.registry.entry(id).unwrap().status, EntryStatus::Expired);
        assert_eq!(h.gateway.status_of(&order_id), Some(OrderStatus::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_static_entry_expires_on_its_deadline() {
        let h = harness();
        h.feed.set_price("BTCUSDT", 100.0);
        let chaser = EntryChaser::new(h.ctx.clone());
        let mut config = create_test_config(Side::Long, false);
        config.expires_after_seconds = Some(30);
        let id = chaser.create_entry(config).await.unwrap();
        let order_id = h.ctx.registry.entry(id).unwrap().active_order_id.unwrap();
        assert!(chaser.is_running(id));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.ctx.registry.entry(id).unwrap().status, EntryStatus::Active);

        tokio::time::sleep(Duration::from_secs(21)).await;
        assert_eq!(h.ctx.registry.entry(id).unwrap().status, EntryStatus::Expired);
        assert_eq!(h.gateway.status_of(&order_id), Some(OrderStatus::Cancelled));
        assert!(!chaser.is_running(id));
        assert_eq!(h.gateway.placed().len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_expires_a_static_entry_past_its_deadline() {
        let h = harness();
        h.feed.set_price("BTCUSDT", 100.0);
        let chaser = EntryChaser::new(h.ctx.clone());
        let id = chaser
            .create_entry(create_test_config(Side::Long, false))
            .await
            .unwrap();
        let order_id = h.ctx.registry.entry(id).unwrap().active_order_id.unwrap();
        assert_eq!(chaser.refresh(id).await.unwrap(), EntryStatus::Active);

        h.ctx
            .registry
            .mutate_entry(id, |e| {
                e.expires_at = Some(Utc::now() - chrono::Duration::seconds(1))
            })
            .await;
        assert_eq!(chaser.refresh(id).await.unwrap(), EntryStatus::Expired);
        assert_eq!(h.gateway.status_of(&order_id), Some(OrderStatus::Cancelled));
    }
}
