mod common;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use chrono::{DateTime, Utc};
use common::TestApp;
use rust_decimal_macros::dec;
use storefront_orders::{
    errors::ServiceError,
    services::{
        order_number::OrderNumberGenerator,
        orders::{CartLine, CreateOrderRequest, CustomerInfo, OrderService, OrderTotals},
    },
};
use uuid::Uuid;

/// Hands out a fixed sequence of candidates, repeating the last one.
#[derive(Debug)]
struct ScriptedNumbers(Mutex<VecDeque<String>>);

impl ScriptedNumbers {
    fn new(numbers: &[&str]) -> Arc<Self> {
        Arc::new(Self(Mutex::new(
            numbers.iter().map(|n| n.to_string()).collect(),
        )))
    }
}

impl OrderNumberGenerator for ScriptedNumbers {
    fn generate(&self, _now: DateTime<Utc>) -> String {
        let mut queue = self.0.lock().unwrap();
        if queue.len() > 1 {
            queue.pop_front().unwrap()
        } else {
            queue.front().cloned().unwrap()
        }
    }
}

fn request(product_id: Uuid) -> CreateOrderRequest {
    CreateOrderRequest {
        items: vec![CartLine {
            product_id: Some(product_id),
            quantity: 1,
            ..Default::default()
        }],
        customer: CustomerInfo {
            name: Some("Ada Lovelace".into()),
            email: Some("ada@example.com".into()),
            phone: Some("+54 9 11 2233-4455".into()),
            address: Some("Calle Falsa 123".into()),
            city: Some("Buenos Aires".into()),
            ..Default::default()
        },
        totals: OrderTotals {
            subtotal: dec!(8.00),
            shipping: dec!(0),
            total: dec!(8.00),
        },
    }
}

fn service(app: &TestApp, generator: Arc<ScriptedNumbers>, attempts: u32) -> OrderService {
    OrderService::new(app.state.db.clone(), None, generator, attempts)
}

#[tokio::test]
async fn taken_numbers_are_skipped() {
    let app = TestApp::new().await;
    let mug = app.seed_product("Enamel Mug", dec!(8.00), 5).await;

    let first = service(&app, ScriptedNumbers::new(&["ORD-2026-AAAAAAAA"]), 5)
        .create_order_from_cart(request(mug.id), None)
        .await
        .unwrap();
    assert_eq!(first.order.order_number, "ORD-2026-AAAAAAAA");

    let second = service(
        &app,
        ScriptedNumbers::new(&["ORD-2026-AAAAAAAA", "ORD-2026-BBBBBBBB"]),
        5,
    )
    .create_order_from_cart(request(mug.id), None)
    .await
    .unwrap();
    assert_eq!(second.order.order_number, "ORD-2026-BBBBBBBB");
    assert_eq!(app.product_stock(mug.id).await, 3);
}

#[tokio::test]
async fn exhausted_attempts_fail_without_writing() {
    let app = TestApp::new().await;
    let mug = app.seed_product("Enamel Mug", dec!(8.00), 5).await;

    service(&app, ScriptedNumbers::new(&["ORD-2026-AAAAAAAA"]), 3)
        .create_order_from_cart(request(mug.id), None)
        .await
        .unwrap();

    let result = service(&app, ScriptedNumbers::new(&["ORD-2026-AAAAAAAA"]), 3)
        .create_order_from_cart(request(mug.id), None)
        .await;

    assert_matches!(result, Err(ServiceError::GenerationExhausted { attempts: 3 }));
    assert_eq!(app.order_count().await, 1);
    assert_eq!(app.product_stock(mug.id).await, 4);
}
