use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{MarketData, OrderGateway};
use crate::error::EngineError;
use crate::models::{OrderRequest, OrderResponse, OrderSide, OrderStatus, OrderType, TimeInForce};
use crate::Result;

/// Every call received by the paper gateway, in order
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCall {
    Place { order_id: Option<String>, request: OrderRequest },
    Cancel { order_id: String },
}

#[derive(Debug, Clone)]
struct PaperOrder {
    request: OrderRequest,
    status: OrderStatus,
}

#[derive(Default)]
struct PaperState {
    next_id: u64,
    orders: HashMap<String, PaperOrder>,
    calls: Vec<GatewayCall>,
    reject_next: usize,
    fail_next: usize,
}

/// Simulated order gateway
///
/// Market orders fill immediately. Limit orders fill when marketable against
/// the attached feed; otherwise IOC orders cancel and GTC orders rest until a
/// later status query finds them marketable. Without a feed, limit orders
/// only change state through [`PaperGateway::set_status`].
#[derive(Clone, Default)]
pub struct PaperGateway {
    feed: Option<Arc<dyn MarketData>>,
    state: Arc<Mutex<PaperState>>,
}

fn marketable(request: &OrderRequest, market: f64) -> bool {
    match (request.side, request.price) {
        (_, None) => true,
        (OrderSide::Buy, Some(limit)) => limit >= market,
        (OrderSide::Sell, Some(limit)) => limit <= market,
    }
}

impl PaperGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gateway that matches limit orders against `feed`
    pub fn with_feed(feed: Arc<dyn MarketData>) -> Self {
        Self {
            feed: Some(feed),
            state: Arc::new(Mutex::new(PaperState::default())),
        }
    }

    fn state(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn market_price(&self, symbol: &str) -> Option<f64> {
        match &self.feed {
            Some(feed) => feed.get_price(symbol).await.ok().flatten(),
            None => None,
        }
    }

    /// Exchange-side rejection (`success == false`) for the next `n` placements
    pub fn reject_next(&self, n: usize) {
        self.state().reject_next = n;
    }

    /// Transport failure (`Err`) for the next `n` calls of any kind
    pub fn fail_next(&self, n: usize) {
        self.state().fail_next = n;
    }

    /// Force the status of a known order
    pub fn set_status(&self, order_id: &str, status: OrderStatus) {
        if let Some(order) = self.state().orders.get_mut(order_id) {
            order.status = status;
        }
    }

    pub fn status_of(&self, order_id: &str) -> Option<OrderStatus> {
        self.state().orders.get(order_id).map(|o| o.status)
    }

    pub fn calls(&self) -> Vec<GatewayCall> {
        self.state().calls.clone()
    }

    /// Requests that were accepted, in submission order
    pub fn placed(&self) -> Vec<(String, OrderRequest)> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                GatewayCall::Place {
                    order_id: Some(id),
                    request,
                } => Some((id.clone(), request.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                GatewayCall::Cancel { order_id } => Some(order_id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Orders still resting on the simulated book
    pub fn open_orders(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .state()
            .orders
            .iter()
            .filter(|(_, o)| o.status == OrderStatus::Pending)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn take_failure(&self) -> Result<()> {
        let mut state = self.state();
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(EngineError::gateway("simulated transport failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderResponse> {
        self.take_failure()?;
        let market = self.market_price(&request.symbol).await;

        let mut state = self.state();
        if state.reject_next > 0 {
            state.reject_next -= 1;
            state.calls.push(GatewayCall::Place {
                order_id: None,
                request: request.clone(),
            });
            return Ok(OrderResponse {
                success: false,
                order_id: None,
                message: "rejected by paper exchange".to_string(),
            });
        }

        state.next_id += 1;
        let order_id = format!("paper-{}", state.next_id);

        let status = match request.order_type {
            OrderType::Market => OrderStatus::Filled,
            OrderType::Limit => match market {
                Some(price) if marketable(request, price) => OrderStatus::Filled,
                Some(_) if request.time_in_force == TimeInForce::Ioc => OrderStatus::Cancelled,
                _ => OrderStatus::Pending,
            },
        };

        tracing::debug!(
            order_id = %order_id,
            symbol = %request.symbol,
            side = ?request.side,
            price = ?request.price,
            quantity = request.quantity,
            status = ?status,
            "Paper order placed"
        );

        state.orders.insert(
            order_id.clone(),
            PaperOrder {
                request: request.clone(),
                status,
            },
        );
        state.calls.push(GatewayCall::Place {
            order_id: Some(order_id.clone()),
            request: request.clone(),
        });

        Ok(OrderResponse {
            success: true,
            order_id: Some(order_id),
            message: "accepted".to_string(),
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool> {
        self.take_failure()?;

        let mut state = self.state();
        state.calls.push(GatewayCall::Cancel {
            order_id: order_id.to_string(),
        });

        match state.orders.get_mut(order_id) {
            Some(order) if order.status == OrderStatus::Pending => {
                order.status = OrderStatus::Cancelled;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_order_status(&self, order_id: &str) -> Result<OrderStatus> {
        self.take_failure()?;

        let resting = {
            let state = self.state();
            let order = state
                .orders
                .get(order_id)
                .ok_or_else(|| EngineError::gateway(format!("unknown order {}", order_id)))?;
            if order.status != OrderStatus::Pending {
                return Ok(order.status);
            }
            order.request.clone()
        };

        if let Some(price) = self.market_price(&resting.symbol).await {
            if marketable(&resting, price) {
                let mut state = self.state();
                if let Some(order) = state.orders.get_mut(order_id) {
                    if order.status == OrderStatus::Pending {
                        order.status = OrderStatus::Filled;
                    }
                    return Ok(order.status);
                }
            }
        }

        Ok(OrderStatus::Pending)
    }
}
