mod common;

use axum::http::{Method, StatusCode};
use common::{cart, error_fields, line, TestApp};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use uuid::Uuid;

async fn place_order(app: &TestApp, stock: i32) -> (Uuid, Uuid) {
    let mug = app.seed_product("Enamel Mug", dec!(8.00), stock).await;
    let (status, body) = app
        .checkout(cart(vec![line(mug.id, 1, "8.00")], "8.00", "0", "8.00"))
        .await;
    assert_eq!(status, StatusCode::CREATED, "body: {body}");
    let order_id = body["data"]["id"].as_str().unwrap().parse().unwrap();
    (order_id, mug.id)
}

async fn set_status(app: &TestApp, order_id: Uuid, status: &str) -> (StatusCode, Value) {
    app.admin(
        Method::PUT,
        &format!("/api/v1/orders/{}/status", order_id),
        Some(json!({ "status": status })),
    )
    .await
}

#[tokio::test]
async fn completing_an_order_stamps_completed_at() {
    let app = TestApp::new().await;
    let (order_id, mug_id) = place_order(&app, 5).await;

    let (status, body) = set_status(&app, order_id, "completed").await;

    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["data"]["status"], "completed");
    assert!(body["data"]["completed_at"].is_string());
    assert_eq!(app.product_stock(mug_id).await, 4);
}

#[tokio::test]
async fn completed_at_survives_later_transitions() {
    let app = TestApp::new().await;
    let (order_id, _) = place_order(&app, 5).await;

    let (_, completed) = set_status(&app, order_id, "completed").await;
    let stamped = completed["data"]["completed_at"].clone();

    let (status, cancelled) = set_status(&app, order_id, "cancelled").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["data"]["status"], "cancelled");
    assert_eq!(cancelled["data"]["completed_at"], stamped);

    let (status, recompleted) = set_status(&app, order_id, "completed").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(recompleted["data"]["completed_at"], stamped);
}

#[tokio::test]
async fn cancelling_does_not_restock() {
    let app = TestApp::new().await;
    let (order_id, mug_id) = place_order(&app, 2).await;
    assert_eq!(app.product_stock(mug_id).await, 1);

    let (status, body) = set_status(&app, order_id, "cancelled").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "cancelled");
    assert!(body["data"]["completed_at"].is_null());
    assert_eq!(app.product_stock(mug_id).await, 1);
}

#[tokio::test]
async fn cancelled_orders_can_be_reopened_by_default() {
    let app = TestApp::new().await;
    let (order_id, _) = place_order(&app, 5).await;

    set_status(&app, order_id, "cancelled").await;
    let (status, body) = set_status(&app, order_id, "pending").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "pending");
}

#[tokio::test]
async fn strict_policy_keeps_terminal_orders_closed() {
    let app = TestApp::with_config(|cfg| cfg.orders.allow_terminal_transitions = false).await;
    let (order_id, _) = place_order(&app, 5).await;

    let (status, _) = set_status(&app, order_id, "cancelled").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = set_status(&app, order_id, "pending").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(error_fields(&body).contains(&"status".to_string()));
}

#[tokio::test]
async fn setting_the_current_status_changes_nothing() {
    let app = TestApp::new().await;
    let (order_id, _) = place_order(&app, 5).await;

    let (_, before) = app
        .admin(Method::GET, &format!("/api/v1/orders/{}", order_id), None)
        .await;
    let (status, body) = set_status(&app, order_id, "pending").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "pending");
    assert_eq!(body["data"]["updated_at"], before["data"]["updated_at"]);
}

#[tokio::test]
async fn unknown_status_is_rejected() {
    let app = TestApp::new().await;
    let (order_id, _) = place_order(&app, 5).await;

    let (status, body) = set_status(&app, order_id, "processing").await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "validation_failed");
    assert!(error_fields(&body).contains(&"status".to_string()));
}

#[tokio::test]
async fn missing_order_is_not_found() {
    let app = TestApp::new().await;

    let (status, body) = set_status(&app, Uuid::new_v4(), "completed").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
async fn customers_cannot_change_status() {
    let app = TestApp::new().await;
    let (order_id, _) = place_order(&app, 5).await;

    let response = app
        .request(
            Method::PUT,
            &format!("/api/v1/orders/{}/status", order_id),
            Some(json!({ "status": "completed" })),
            Some(app.customer_token()),
        )
        .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
