mod common;

use axum::http::{Method, StatusCode};
use common::{cart, error_fields, line, TestApp, CHANNEL_ID};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, IntoActiveModel, Set};
use serde_json::{json, Value};

async fn checkout_one(app: &TestApp, name: &str, price: &str, qty: i32) -> Value {
    let unit = price.parse().unwrap();
    let product = app.seed_product(name, unit, 10).await;
    let total = (unit * rust_decimal::Decimal::from(qty)).to_string();
    let (status, body) = app
        .checkout(cart(vec![line(product.id, qty, price)], &total, "0", &total))
        .await;
    assert_eq!(status, StatusCode::CREATED, "body: {body}");
    body["data"].clone()
}

#[tokio::test]
async fn order_can_be_fetched_by_id_and_number() {
    let app = TestApp::new().await;
    let created = checkout_one(&app, "Enamel Mug", "8.00", 2).await;
    let number = created["order_number"].as_str().unwrap();

    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/orders/{}", created["id"].as_str().unwrap()),
            None,
            Some(app.customer_token()),
        )
        .await;
    let (status, by_id) = common::split(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_id["data"]["order_number"], number);
    assert_eq!(by_id["data"]["items"].as_array().unwrap().len(), 1);

    let (status, by_number) = app
        .admin(
            Method::GET,
            &format!("/api/v1/orders/by-number/{}", number),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(by_number["data"]["id"], created["id"]);

    let (status, missing) = app
        .admin(Method::GET, "/api/v1/orders/by-number/ORD-0000-NOPE0000", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(missing["code"], "not_found");
}

#[tokio::test]
async fn list_filters_by_status_and_paginates() {
    let app = TestApp::new().await;
    let first = checkout_one(&app, "Enamel Mug", "8.00", 1).await;
    checkout_one(&app, "Desk Lamp", "45.00", 1).await;
    checkout_one(&app, "Tote Bag", "15.00", 1).await;

    let (status, _) = app
        .admin(
            Method::PUT,
            &format!("/api/v1/orders/{}/status", first["id"].as_str().unwrap()),
            Some(json!({ "status": "completed" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, all) = app.admin(Method::GET, "/api/v1/orders", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all["data"]["total"], 3);

    let (_, pending) = app
        .admin(Method::GET, "/api/v1/orders?status=pending", None)
        .await;
    assert_eq!(pending["data"]["total"], 2);
    assert!(pending["data"]["orders"]
        .as_array()
        .unwrap()
        .iter()
        .all(|o| o["status"] == "pending"));

    let (_, completed) = app
        .admin(Method::GET, "/api/v1/orders?status=completed", None)
        .await;
    assert_eq!(completed["data"]["total"], 1);
    assert_eq!(completed["data"]["orders"][0]["id"], first["id"]);

    let (_, paged) = app
        .admin(Method::GET, "/api/v1/orders?page=2&per_page=2", None)
        .await;
    assert_eq!(paged["data"]["page"], 2);
    assert_eq!(paged["data"]["per_page"], 2);
    assert_eq!(paged["data"]["orders"].as_array().unwrap().len(), 1);

    let (status, body) = app
        .admin(Method::GET, "/api/v1/orders?status=shipped", None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(error_fields(&body).contains(&"status".to_string()));
}

#[tokio::test]
async fn order_lines_are_snapshots_of_the_catalog() {
    let app = TestApp::new().await;
    let mug = app.seed_product("Enamel Mug", dec!(8.00), 5).await;
    let (_, body) = app
        .checkout(cart(vec![line(mug.id, 1, "8.00")], "8.00", "0", "8.00"))
        .await;
    let order_id = body["data"]["id"].as_str().unwrap().to_string();

    let mut renamed = mug.into_active_model();
    renamed.name = Set("Steel Mug".to_string());
    renamed.price = Set(dec!(99.00));
    renamed.update(&*app.state.db).await.unwrap();

    let (_, fetched) = app
        .admin(Method::GET, &format!("/api/v1/orders/{}", order_id), None)
        .await;
    let item = &fetched["data"]["items"][0];
    assert_eq!(item["product_name"], "Enamel Mug");
    assert_eq!(item["unit_price"], "8.00");
    assert_eq!(fetched["data"]["total"], "8.00");
}

#[tokio::test]
async fn manual_orders_accept_free_text_lines() {
    let app = TestApp::new().await;
    let mug = app.seed_product("Enamel Mug", dec!(8.00), 5).await;

    let payload = cart(
        vec![
            line(mug.id, 1, "8.00"),
            json!({ "product_name": "Gift wrapping", "quantity": 1, "unit_price": "3.50" }),
        ],
        "11.50",
        "2.00",
        "13.50",
    );
    let (status, body) = app
        .admin(Method::POST, "/api/v1/orders/manual", Some(payload))
        .await;

    assert_eq!(status, StatusCode::CREATED, "body: {body}");
    assert_eq!(body["data"]["source"], "manual");
    assert!(body["data"]["user_id"].is_null());
    let items = body["data"]["items"].as_array().unwrap();
    assert_eq!(items[1]["product_name"], "Gift wrapping");
    assert!(items[1]["product_id"].is_null());
    assert_eq!(items[1]["line_total"], "3.50");
    assert_eq!(app.product_stock(mug.id).await, 4);
}

#[tokio::test]
async fn manual_free_text_lines_need_name_and_price() {
    let app = TestApp::new().await;

    let payload = cart(vec![json!({ "quantity": 1 })], "0", "0", "0");
    let (status, body) = app
        .admin(Method::POST, "/api/v1/orders/manual", Some(payload))
        .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let fields = error_fields(&body);
    assert!(fields.contains(&"items[0].product_name".to_string()));
    assert!(fields.contains(&"items[0].unit_price".to_string()));
}

#[tokio::test]
async fn storefront_lines_need_a_product_reference() {
    let app = TestApp::new().await;

    let payload = cart(
        vec![json!({ "product_name": "Anything", "quantity": 1, "unit_price": "1.00" })],
        "1.00",
        "0",
        "1.00",
    );
    let (status, body) = app.checkout(payload).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(error_fields(&body).contains(&"items[0].product_id".to_string()));
}

fn without_sent_line(text: &str) -> Vec<&str> {
    text.lines().filter(|l| !l.starts_with("Sent: ")).collect()
}

#[tokio::test]
async fn message_endpoint_renders_both_flows() {
    let app = TestApp::new().await;
    let created = checkout_one(&app, "Enamel Mug", "8.00", 2).await;
    let id = created["id"].as_str().unwrap();
    let number = created["order_number"].as_str().unwrap();

    let (status, customer) = app
        .admin(Method::GET, &format!("/api/v1/orders/{}/message", id), None)
        .await;
    assert_eq!(status, StatusCode::OK, "body: {customer}");
    let text = customer["data"]["text"].as_str().unwrap();
    assert!(text.starts_with(&format!("*Order {}*", number)));
    assert!(text.contains("- 2 x Enamel Mug @ $8.00 = $16.00"));
    assert!(text.contains("https://shop.example/products/enamel-mug"));
    assert!(text.contains("*Total: $16.00*"));
    assert_eq!(customer["data"]["truncated"], false);

    let link = customer["data"]["deep_link"].as_str().unwrap();
    assert!(link.starts_with(&format!("https://wa.me/{}?text=", CHANNEL_ID)));
    assert!(!link.contains(' '));
    assert!(!link.contains('+'));

    let (_, admin) = app
        .admin(
            Method::GET,
            &format!("/api/v1/orders/{}/message?flow=admin", id),
            None,
        )
        .await;
    let admin_text = admin["data"]["text"].as_str().unwrap();
    assert!(admin_text.contains("- 2 x Enamel Mug @ $8.00 = $16.00"));
    assert!(!admin_text.contains("/products/"));
}

#[tokio::test]
async fn message_is_stable_across_renders() {
    let app = TestApp::new().await;
    let created = checkout_one(&app, "Desk Lamp", "45.00", 1).await;
    let uri = format!("/api/v1/orders/{}/message", created["id"].as_str().unwrap());

    let (_, first) = app.admin(Method::GET, &uri, None).await;
    let (_, second) = app.admin(Method::GET, &uri, None).await;

    assert_eq!(
        without_sent_line(first["data"]["text"].as_str().unwrap()),
        without_sent_line(second["data"]["text"].as_str().unwrap())
    );
}

#[tokio::test]
async fn reads_require_authentication() {
    let app = TestApp::new().await;

    let response = app.request(Method::GET, "/api/v1/orders", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .request(Method::GET, "/api/v1/orders", None, Some("not-a-jwt"))
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_and_metrics_are_public() {
    let app = TestApp::new().await;
    checkout_one(&app, "Enamel Mug", "8.00", 1).await;

    let response = app.request(Method::GET, "/health", None, None).await;
    let (status, health) = common::split(response).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["data"]["status"], "healthy");

    let response = app.request(Method::GET, "/metrics", None, None).await;
    assert_eq!(response.status(), StatusCode::OK);
}
