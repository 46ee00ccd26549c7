#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};
use serde_json::{json, Value};
use storefront_orders::{
    auth::consts,
    config::{AppConfig, MessagingConfig},
    db,
    entities::{order, order_item, product, product_variant},
    events::{self, EventSender},
    AppState,
};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_SECRET: &str = "k3y-for-integration-tests-0123456789-abcdefghijklmnopqrstuvwxyz-XYZ";
pub const CHANNEL_ID: &str = "5491122334455";

/// Helper harness for spinning up the application backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub customer_id: Uuid,
    admin_token: String,
    customer_token: String,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Construct a test application, letting the caller adjust configuration first.
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let mut messaging = MessagingConfig::new(CHANNEL_ID);
        messaging.store_base_url = Some("https://shop.example".to_string());

        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
            messaging,
        );
        // One connection keeps the in-memory database alive and serializes transactions.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.db_acquire_timeout_secs = 30;
        cfg.db_idle_timeout_secs = 3600;
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));
        let state = AppState::new(Arc::new(pool), cfg, Arc::new(EventSender::new(event_tx)));

        let customer_id = Uuid::new_v4();
        let admin_token = state
            .auth
            .issue_token("ops@example.com", vec![consts::ROLE_ADMIN.to_string()], vec![])
            .expect("sign admin token");
        let customer_token = state
            .auth
            .issue_token(
                &customer_id.to_string(),
                vec![consts::ROLE_CUSTOMER.to_string()],
                vec![
                    consts::ORDERS_CREATE.to_string(),
                    consts::ORDERS_READ.to_string(),
                ],
            )
            .expect("sign customer token");

        Self {
            router: storefront_orders::app(state.clone()),
            state,
            customer_id,
            admin_token,
            customer_token,
            _event_task: event_task,
        }
    }

    pub fn admin_token(&self) -> &str {
        &self.admin_token
    }

    pub fn customer_token(&self) -> &str {
        &self.customer_token
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Storefront checkout as the seeded customer; returns status and JSON body.
    pub async fn checkout(&self, payload: Value) -> (StatusCode, Value) {
        let response = self
            .request(
                Method::POST,
                "/api/v1/orders/checkout",
                Some(payload),
                Some(self.customer_token()),
            )
            .await;
        split(response).await
    }

    pub async fn admin(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let response = self.request(method, uri, body, Some(self.admin_token())).await;
        split(response).await
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> product::Model {
        product::ActiveModel {
            name: Set(name.to_string()),
            slug: Set(name.to_lowercase().replace(' ', "-")),
            image_url: Set(Some(format!(
                "https://cdn.example/{}.jpg",
                name.to_lowercase().replace(' ', "-")
            ))),
            price: Set(price),
            stock: Set(stock),
            is_active: Set(true),
            ..Default::default()
        }
        .insert(&*self.state.db)
        .await
        .expect("seed product")
    }

    pub async fn seed_variant(
        &self,
        product_id: Uuid,
        sku: &str,
        size: Option<&str>,
        color: Option<&str>,
        price: Option<Decimal>,
        stock: i32,
    ) -> product_variant::Model {
        product_variant::ActiveModel {
            product_id: Set(product_id),
            sku: Set(sku.to_string()),
            size: Set(size.map(str::to_string)),
            color: Set(color.map(str::to_string)),
            price: Set(price),
            stock: Set(stock),
            ..Default::default()
        }
        .insert(&*self.state.db)
        .await
        .expect("seed variant")
    }

    pub async fn product_stock(&self, id: Uuid) -> i32 {
        product::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("load product")
            .expect("product exists")
            .stock
    }

    pub async fn variant_stock(&self, id: Uuid) -> i32 {
        product_variant::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("load variant")
            .expect("variant exists")
            .stock
    }

    pub async fn order_count(&self) -> u64 {
        order::Entity::find()
            .count(&*self.state.db)
            .await
            .expect("count orders")
    }

    pub async fn order_item_count(&self) -> u64 {
        order_item::Entity::find()
            .count(&*self.state.db)
            .await
            .expect("count order items")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn split(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| json!(String::from_utf8_lossy(&bytes)))
    };
    (status, body)
}

pub fn customer() -> Value {
    json!({
        "name": "Ada Lovelace",
        "email": "ada@example.com",
        "phone": "+54 9 11 2233-4455",
        "address": "Calle Falsa 123",
        "city": "Buenos Aires",
        "postal_code": "C1000"
    })
}

pub fn line(product_id: Uuid, quantity: i32, unit_price: &str) -> Value {
    json!({
        "product_id": product_id,
        "quantity": quantity,
        "unit_price": unit_price
    })
}

pub fn cart(items: Vec<Value>, subtotal: &str, shipping: &str, total: &str) -> Value {
    json!({
        "items": items,
        "customer": customer(),
        "totals": { "subtotal": subtotal, "shipping": shipping, "total": total }
    })
}

/// Fields named in a 422 body.
pub fn error_fields(body: &Value) -> Vec<String> {
    body["field_errors"]
        .as_array()
        .map(|errors| {
            errors
                .iter()
                .filter_map(|e| e["field"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
