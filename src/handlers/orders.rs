use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::handlers::common::JsonBody;
use crate::services::order_message::{render_order_message, MessageFlow, RenderedMessage};
use crate::services::order_status::{parse_status, OrderStatusResponse, UpdateOrderStatusRequest};
use crate::services::orders::{CreateOrderRequest, OrderListResponse, OrderResponse};
use crate::{auth::AuthUser, errors::ServiceError, ApiResponse, ApiResult, AppState};

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct OrderListQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    /// `pending`, `completed` or `cancelled`
    pub status: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct MessageQuery {
    pub flow: Option<MessageFlow>,
}

/// Storefront checkout
#[utoipa::path(
    post,
    path = "/api/v1/orders/checkout",
    summary = "Create an order from a cart",
    description = "Validates the cart against the catalog, reserves stock and persists the order atomically",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<OrderResponse>,
            headers(("X-Request-Id" = String, description = "Unique request id"))
        ),
        (status = 401, description = "Missing or invalid bearer token", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 422, description = "Validation failed or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 500, description = "Internal server error", body = crate::errors::ErrorResponse),
        (status = 503, description = "Storage unavailable, retry", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn checkout(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    JsonBody(request): JsonBody<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    let created = state
        .services
        .orders
        .create_order_from_cart(request, auth_user.owner_id())
        .await?;

    info!(order_number = %created.order.order_number, user_id = %auth_user.user_id, "Checkout completed");
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(OrderResponse::from(created))),
    ))
}

/// Administrative manual order
#[utoipa::path(
    post,
    path = "/api/v1/orders/manual",
    summary = "Create a manual order",
    description = "Lines may reference the catalog or be free-text with an authoritative price",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<OrderResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 422, description = "Validation failed or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 503, description = "Storage unavailable, retry", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn create_manual_order(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    JsonBody(request): JsonBody<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    let created = state.services.orders.create_manual_order(request).await?;

    info!(order_number = %created.order.order_number, user_id = %auth_user.user_id, "Manual order created");
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(OrderResponse::from(created))),
    ))
}

/// List orders
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List orders",
    description = "Newest first, optionally filtered by status",
    params(OrderListQuery),
    responses(
        (status = 200, description = "Orders retrieved successfully", body = ApiResponse<OrderListResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 422, description = "Unknown status filter", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<OrderListQuery>,
) -> ApiResult<OrderListResponse> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(parse_status)
        .transpose()?;

    let per_page = query
        .per_page
        .unwrap_or(state.config.api_default_page_size)
        .min(state.config.api_max_page_size);

    let page = state
        .services
        .orders
        .list_orders(query.page.unwrap_or(1), per_page, status)
        .await?;

    Ok(Json(ApiResponse::success(OrderListResponse::from(page))))
}

/// Get an order with its items
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order found", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<OrderResponse> {
    let order = state.services.orders.get_order(id).await?;
    Ok(Json(ApiResponse::success(OrderResponse::from(order))))
}

/// Get an order by its human-facing number
#[utoipa::path(
    get,
    path = "/api/v1/orders/by-number/{order_number}",
    params(("order_number" = String, Path, description = "Order number, e.g. ORD-2024-7KQ2M9XA")),
    responses(
        (status = 200, description = "Order found", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn get_order_by_number(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> ApiResult<OrderResponse> {
    let order = state
        .services
        .orders
        .get_order_by_number(&order_number)
        .await?;
    Ok(Json(ApiResponse::success(OrderResponse::from(order))))
}

/// Move an order to another status
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Status updated", body = ApiResponse<OrderStatusResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 422, description = "Unknown status", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    JsonBody(request): JsonBody<UpdateOrderStatusRequest>,
) -> ApiResult<OrderStatusResponse> {
    let updated = state
        .services
        .order_status
        .update_status(id, &request.status)
        .await?;

    info!(order_id = %id, status = updated.status.as_str(), user_id = %auth_user.user_id, "Order status set");
    Ok(Json(ApiResponse::success(OrderStatusResponse::from(updated))))
}

/// Render the fulfillment message and deep link
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}/message",
    params(
        ("id" = Uuid, Path, description = "Order id"),
        MessageQuery
    ),
    responses(
        (status = 200, description = "Message rendered", body = ApiResponse<RenderedMessage>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn get_order_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<MessageQuery>,
) -> ApiResult<RenderedMessage> {
    let order = state.services.orders.get_order(id).await?;
    let rendered = render_order_message(
        &order,
        query.flow.unwrap_or_default(),
        &state.services.messaging,
        Utc::now(),
    );
    Ok(Json(ApiResponse::success(rendered)))
}
