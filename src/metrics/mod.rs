//! Prometheus counters for the order pipeline, exposed at `/metrics`.

use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
};
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref ORDER_CREATIONS: IntCounter =
        IntCounter::new("order_creations_total", "Total number of orders created")
            .expect("metric can be created");
    pub static ref ORDER_CREATION_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "order_creation_failures_total",
            "Total number of failed order creations"
        ),
        &["kind"]
    )
    .expect("metric can be created");
    pub static ref ORDER_NUMBER_COLLISIONS: IntCounter = IntCounter::new(
        "order_number_collisions_total",
        "Generated order numbers that were already taken"
    )
    .expect("metric can be created");
    pub static ref ORDER_STATUS_TRANSITIONS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "order_status_transitions_total",
            "Order status transitions by target status"
        ),
        &["status"]
    )
    .expect("metric can be created");
}

/// Registers every collector once; repeated calls are harmless.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ORDER_CREATIONS.clone()),
        Box::new(ORDER_CREATION_FAILURES.clone()),
        Box::new(ORDER_NUMBER_COLLISIONS.clone()),
        Box::new(ORDER_STATUS_TRANSITIONS.clone()),
    ];
    for collector in collectors {
        // AlreadyReg is expected when the app is built more than once in a process.
        let _ = REGISTRY.register(collector);
    }
}

pub fn record_order_failure(kind: &str) {
    ORDER_CREATION_FAILURES.with_label_values(&[kind]).inc();
}

pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, String::new()).into_response();
    }

    (
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        String::from_utf8_lossy(&buffer).into_owned(),
    )
        .into_response()
}
