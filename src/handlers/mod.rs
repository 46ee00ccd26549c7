pub mod common;
pub mod orders;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{
    order_message::MessageOptions,
    order_number::RandomOrderNumberGenerator,
    order_status::{OrderStatusService, TransitionPolicy},
    orders::OrderService,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub order_status: Arc<OrderStatusService>,
    pub messaging: Arc<MessageOptions>,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, event_sender: Arc<EventSender>, config: &AppConfig) -> Self {
        let generator = Arc::new(RandomOrderNumberGenerator::from(&config.orders));

        let orders = Arc::new(OrderService::new(
            db_pool.clone(),
            Some(event_sender.clone()),
            generator,
            config.orders.max_generation_attempts,
        ));

        let order_status = Arc::new(OrderStatusService::new(
            db_pool,
            Some(event_sender),
            TransitionPolicy {
                allow_from_terminal: config.orders.allow_terminal_transitions,
            },
        ));

        Self {
            orders,
            order_status,
            messaging: Arc::new(MessageOptions::from(&config.messaging)),
        }
    }
}
