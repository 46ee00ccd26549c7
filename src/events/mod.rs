//! In-process domain events published after an order commits.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::OrderStatus;

#[derive(Clone, Debug)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the consumer is gone.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "Dropping domain event");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        total: Decimal,
        item_count: usize,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    OrderCompleted(Uuid),
    OrderCancelled(Uuid),
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated {
                order_id,
                order_number,
                total,
                item_count,
            } => info!(
                %order_id,
                %order_number,
                %total,
                item_count,
                "Order created"
            ),
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => info!(
                %order_id,
                old_status = old_status.as_str(),
                new_status = new_status.as_str(),
                "Order status changed"
            ),
            Event::OrderCompleted(order_id) => info!(%order_id, "Order completed"),
            Event::OrderCancelled(order_id) => {
                info!(%order_id, "Order cancelled; stock is not returned")
            }
        }
    }

    info!("Event processing loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_to_receiver() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let id = Uuid::new_v4();

        sender.send(Event::OrderCompleted(id)).await.unwrap();
        assert_eq!(rx.recv().await, Some(Event::OrderCompleted(id)));
    }

    #[tokio::test]
    async fn send_fails_once_receiver_is_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        assert!(sender.send(Event::OrderCancelled(Uuid::new_v4())).await.is_err());
        sender.send_or_log(Event::OrderCancelled(Uuid::new_v4())).await;
    }
}
