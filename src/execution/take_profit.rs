use std::sync::Arc;
use uuid::Uuid;

use super::EngineContext;
use crate::error::EngineError;
use crate::models::{DispatchedTakeProfit, ExecutionAction, OrderRequest, OrderType, TimeInForce};
use crate::Result;

/// Fires single-shot partial exits for take-profit levels
#[derive(Clone)]
pub struct TakeProfitDispatcher {
    ctx: Arc<EngineContext>,
}

impl TakeProfitDispatcher {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Dispatch one level; returns whether an order went out
    pub async fn dispatch(&self, id: Uuid, level_id: &str) -> Result<bool> {
        let _slot = self.ctx.slots.acquire(id).await;
        self.dispatch_locked(id, level_id).await
    }

    /// Dispatch every enabled level the price has reached
    ///
    /// Nothing is dispatched until the entry order has filled. Returns the
    /// number of levels sent out.
    pub async fn check_levels(&self, id: Uuid, price: f64) -> Result<usize> {
        let _slot = self.ctx.slots.acquire(id).await;

        let basket = self
            .ctx
            .registry
            .get(id)
            .ok_or_else(|| EngineError::basket_not_found(id))?;
        if !basket.is_active() || !self.ctx.ensure_entry_filled(id).await? {
            return Ok(0);
        }

        let reached: Vec<String> = basket
            .take_profits
            .iter()
            .filter(|level| level.enabled && level.reached(basket.side, price))
            .map(|level| level.id.clone())
            .collect();

        let mut dispatched = 0;
        for level_id in reached {
            if self.dispatch_locked(id, &level_id).await? {
                dispatched += 1;
            }
        }
        Ok(dispatched)
    }

    async fn dispatch_locked(&self, id: Uuid, level_id: &str) -> Result<bool> {
        let basket = self
            .ctx
            .registry
            .get(id)
            .ok_or_else(|| EngineError::basket_not_found(id))?;
        if !basket.is_active() {
            return Ok(false);
        }
        let level = basket.take_profit(level_id).cloned().ok_or_else(|| {
            EngineError::validation(format!("basket {} has no take-profit '{}'", id, level_id))
        })?;
        if !level.enabled || basket.was_dispatched(level_id) {
            return Ok(false);
        }

        let quantity = basket.entry_order.quantity * level.quantity_percent / 100.0;
        let request = OrderRequest {
            symbol: basket.symbol.clone(),
            side: basket.side.exit_side(),
            order_type: level.order_type,
            quantity,
            price: match level.order_type {
                OrderType::Limit => Some(level.target_price),
                OrderType::Market => None,
            },
            time_in_force: TimeInForce::Gtc,
            leverage: None,
            reduce_only: true,
        };

        match self.ctx.place(&request).await {
            Ok(order_id) => {
                tracing::info!(
                    basket = %id,
                    level = %level.id,
                    target = level.target_price,
                    quantity,
                    "🎯 Take-profit dispatched"
                );
                self.ctx
                    .registry
                    .mutate(id, |b| {
                        if let Some(level) = b.take_profit_mut(level_id) {
                            level.enabled = false;
                        }
                        b.active_orders.take_profit_order_ids.push(order_id.clone());
                        b.dispatched_take_profits.push(DispatchedTakeProfit {
                            level_id: level.id.clone(),
                            order_id: order_id.clone(),
                            quantity,
                        });
                        b.exited_quantity += quantity;
                        b.log(
                            ExecutionAction::TakeProfitDispatched,
                            format!(
                                "{} {}% @ {} qty {}",
                                level.id, level.quantity_percent, level.target_price, quantity
                            ),
                            Some(order_id),
                        );
                    })
                    .await;
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(basket = %id, level = %level.id, "Take-profit dispatch failed: {}", e);
                self.ctx
                    .registry
                    .mutate(id, |b| {
                        b.log(
                            ExecutionAction::Error,
                            format!("take-profit {} failed: {}", level.id, e),
                            None,
                        );
                    })
                    .await;
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::test_support::{activate_directly, basket_config, harness};
    use crate::models::{BasketPatch, OrderSide, Side, TakeProfitLevel};

    fn level(id: &str, target: f64, pct: f64, order_type: OrderType) -> TakeProfitLevel {
        TakeProfitLevel {
            id: id.to_string(),
            target_price: target,
            quantity_percent: pct,
            order_type,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_dispatch_is_single_shot() {
        let h = harness();
        let mut config = basket_config(Side::Long);
        config.take_profits = vec![level("tp1", 110.0, 50.0, OrderType::Limit)];
        let id = activate_directly(&h, config).await;
        let dispatcher = TakeProfitDispatcher::new(h.ctx.clone());

        assert!(dispatcher.dispatch(id, "tp1").await.unwrap());
        assert!(!dispatcher.dispatch(id, "tp1").await.unwrap());

        let basket = h.ctx.registry.get(id).unwrap();
        assert!(!basket.take_profit("tp1").unwrap().enabled);
        assert_eq!(basket.active_orders.take_profit_order_ids.len(), 1);
        assert_eq!(basket.exited_quantity, 1.0);

        let (_, request) = h.gateway.placed().pop().unwrap();
        assert_eq!(request.side, OrderSide::Sell);
        assert_eq!(request.price, Some(110.0));
        assert_eq!(request.quantity, 1.0);
        assert!(request.reduce_only);
    }

    #[tokio::test]
    async fn test_patched_ladder_does_not_fire_twice() {
        let h = harness();
        let mut config = basket_config(Side::Long);
        config.take_profits = vec![level("tp1", 110.0, 50.0, OrderType::Limit)];
        let id = activate_directly(&h, config).await;
        let dispatcher = TakeProfitDispatcher::new(h.ctx.clone());

        assert!(dispatcher.dispatch(id, "tp1").await.unwrap());
        let saves = h.store.save_count();

        let patch = BasketPatch {
            take_profits: Some(vec![level("tp1", 110.0, 50.0, OrderType::Limit)]),
            ..Default::default()
        };
        assert!(h.ctx.registry.update(id, patch).await.unwrap());
        assert!(h.store.save_count() > saves);

        assert!(!dispatcher.dispatch(id, "tp1").await.unwrap());
        assert_eq!(dispatcher.check_levels(id, 111.0).await.unwrap(), 0);

        let basket = h.ctx.registry.get(id).unwrap();
        assert!(!basket.take_profit("tp1").unwrap().enabled);
        assert_eq!(basket.active_orders.take_profit_order_ids.len(), 1);
        assert_eq!(basket.dispatched_take_profits.len(), 1);
        assert_eq!(basket.exited_quantity, 1.0);
    }

    #[tokio::test]
    async fn test_unknown_level_is_an_error() {
        let h = harness();
        let id = activate_directly(&h, basket_config(Side::Long)).await;
        let dispatcher = TakeProfitDispatcher::new(h.ctx.clone());

        assert!(dispatcher.dispatch(id, "missing").await.is_err());
        assert!(dispatcher.dispatch(Uuid::new_v4(), "tp1").await.is_err());
    }

    #[tokio::test]
    async fn test_check_levels_by_side() {
        let h = harness();
        let mut config = basket_config(Side::Short);
        config.take_profits = vec![
            level("near", 95.0, 25.0, OrderType::Market),
            level("far", 90.0, 25.0, OrderType::Limit),
        ];
        let id = activate_directly(&h, config).await;
        let dispatcher = TakeProfitDispatcher::new(h.ctx.clone());

        assert_eq!(dispatcher.check_levels(id, 96.0).await.unwrap(), 0);
        assert_eq!(dispatcher.check_levels(id, 94.0).await.unwrap(), 1);
        assert_eq!(dispatcher.check_levels(id, 94.0).await.unwrap(), 0);
        assert_eq!(dispatcher.check_levels(id, 89.0).await.unwrap(), 1);

        let basket = h.ctx.registry.get(id).unwrap();
        assert!(!basket.has_pending_take_profits());
        assert_eq!(basket.exited_quantity, 1.0);
    }

    #[tokio::test]
    async fn test_rejected_dispatch_keeps_level_enabled() {
        let h = harness();
        let mut config = basket_config(Side::Long);
        config.take_profits = vec![level("tp1", 110.0, 100.0, OrderType::Market)];
        let id = activate_directly(&h, config).await;
        let dispatcher = TakeProfitDispatcher::new(h.ctx.clone());

        h.gateway.reject_next(1);
        assert!(!dispatcher.dispatch(id, "tp1").await.unwrap());

        let basket = h.ctx.registry.get(id).unwrap();
        assert!(basket.take_profit("tp1").unwrap().enabled);
        assert_eq!(
            basket.execution_log.last().unwrap().action,
            ExecutionAction::Error
        );

        assert!(dispatcher.dispatch(id, "tp1").await.unwrap());
    }
}
