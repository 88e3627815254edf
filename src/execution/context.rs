use std::sync::Arc;
use uuid::Uuid;

use super::{EntitySlots, Registry};
use crate::api::{MarketData, OrderGateway};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::{BasketOrder, BasketStatus, ExecutionAction, OrderRequest, OrderStatus};
use crate::Result;

/// Collaborators shared by every execution service
pub struct EngineContext {
    pub registry: Registry,
    pub gateway: Arc<dyn OrderGateway>,
    pub market_data: Arc<dyn MarketData>,
    pub slots: EntitySlots,
    pub config: EngineConfig,
}

impl EngineContext {
    pub fn new(
        registry: Registry,
        gateway: Arc<dyn OrderGateway>,
        market_data: Arc<dyn MarketData>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            gateway,
            market_data,
            slots: EntitySlots::new(),
            config,
        }
    }

    /// Submit an order and return its exchange id
    ///
    /// An exchange-side rejection is turned into a gateway error carrying the
    /// exchange message.
    pub async fn place(&self, request: &OrderRequest) -> Result<String> {
        let response = self.gateway.place_order(request).await?;
        match response.order_id {
            Some(order_id) if response.success => Ok(order_id),
            _ => Err(EngineError::gateway(response.message)),
        }
    }

    /// Whether the basket's entry order has filled
    ///
    /// The first filled observation is recorded on the basket. An entry order
    /// that died unfilled moves the basket to `error`. Callers hold the
    /// basket's slot.
    pub async fn ensure_entry_filled(&self, id: Uuid) -> Result<bool> {
        let basket = self
            .registry
            .get(id)
            .ok_or_else(|| EngineError::basket_not_found(id))?;

        if basket.entry_filled {
            return Ok(true);
        }
        let Some(order_id) = basket.active_orders.entry_order_id.clone() else {
            return Ok(false);
        };

        match self.gateway.get_order_status(&order_id).await? {
            OrderStatus::Filled => {
                tracing::info!(basket = %id, order_id = %order_id, "Entry order filled");
                self.registry
                    .mutate(id, |b| {
                        b.entry_filled = true;
                        b.log(ExecutionAction::EntryFilled, "entry order filled", Some(order_id));
                    })
                    .await;
                Ok(true)
            }
            OrderStatus::Pending => Ok(false),
            status => {
                tracing::warn!(basket = %id, order_id = %order_id, ?status, "Entry order died unfilled");
                self.registry
                    .mutate(id, |b| {
                        b.log(
                            ExecutionAction::Error,
                            format!("entry order ended {:?} without filling", status),
                            Some(order_id),
                        );
                        b.transition(BasketStatus::Error);
                    })
                    .await;
                Ok(false)
            }
        }
    }

    /// Cancel take-profit orders still resting so an exit covers them
    ///
    /// Returns the quantity handed back from pulled orders.
    pub async fn pull_take_profits(&self, basket: &BasketOrder) -> f64 {
        let mut released = 0.0;
        let mut failures = Vec::new();

        for dispatched in &basket.dispatched_take_profits {
            let order_id = &dispatched.order_id;
            let pulled = match self.gateway.get_order_status(order_id).await {
                Ok(OrderStatus::Pending) => self.gateway.cancel_order(order_id).await,
                Ok(_) => Ok(false),
                Err(e) => Err(e),
            };
            match pulled {
                Ok(true) => released += dispatched.quantity,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(basket = %basket.id, order_id = %order_id, "Failed to pull take-profit order: {}", e);
                    failures.push((order_id.clone(), e.to_string()));
                }
            }
        }

        if released > 0.0 || !failures.is_empty() {
            self.registry
                .mutate(basket.id, |b| {
                    b.exited_quantity = (b.exited_quantity - released).max(0.0);
                    for (order_id, error) in failures {
                        b.log(
                            ExecutionAction::Error,
                            format!("failed to pull take-profit order: {}", error),
                            Some(order_id),
                        );
                    }
                })
                .await;
        }
        released
    }
}
