use tokio::sync::broadcast;

use crate::models::ExecutionEvent;

/// Fan-out channel for execution notifications
///
/// The engine only ever emits; UI and telemetry subscribe. Slow subscribers
/// lag and miss events rather than blocking the engine.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Execution event dropped, no subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityKind, ExecutionAction};
    use chrono::Utc;
    use uuid::Uuid;

    fn create_test_event(action: ExecutionAction) -> ExecutionEvent {
        ExecutionEvent {
            entity_id: Uuid::new_v4(),
            kind: EntityKind::Basket,
            action,
            timestamp: Utc::now(),
            details: "test".to_string(),
            order_id: None,
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_events() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(create_test_event(ExecutionAction::Created));

        assert_eq!(a.recv().await.unwrap().action, ExecutionAction::Created);
        assert_eq!(b.recv().await.unwrap().action, ExecutionAction::Created);
    }

    #[test]
    fn test_emit_without_subscribers_is_harmless() {
        let bus = EventBus::new(4);
        bus.emit(create_test_event(ExecutionAction::Error));
        assert_eq!(bus.subscriber_count(), 0);
    }
}
