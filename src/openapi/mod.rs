use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront Orders API",
        version = "1.0.0",
        description = r#"
Cart-to-order materialization for a storefront with manual, message-based fulfillment.

## Authentication

Every `/api/v1` endpoint requires a bearer JWT:

```
Authorization: Bearer <your-jwt-token>
```

## Errors

Failures return an `ErrorResponse`. Validation problems list every offending field
(`email`, `items[0].quantity`, `totals.total`); stock conflicts carry the line,
requested and available quantities in `details`.
"#
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "orders", description = "Checkout, order queries, status and fulfillment messages")
    ),
    paths(
        crate::handlers::orders::checkout,
        crate::handlers::orders::create_manual_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::get_order_by_number,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::get_order_message,
    ),
    components(
        schemas(
            crate::services::orders::CreateOrderRequest,
            crate::services::orders::CartLine,
            crate::services::orders::CustomerInfo,
            crate::services::orders::OrderTotals,
            crate::services::orders::OrderResponse,
            crate::services::orders::OrderItemResponse,
            crate::services::orders::OrderListResponse,
            crate::services::order_status::UpdateOrderStatusRequest,
            crate::services::order_status::OrderStatusResponse,
            crate::services::order_message::RenderedMessage,
            crate::services::order_message::MessageFlow,
            crate::entities::OrderStatus,
            crate::entities::OrderSource,
            crate::errors::ErrorResponse,
            crate::errors::FieldError,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDocV1;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDocV1::openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_order_routes() {
        let json = serde_json::to_string(&ApiDocV1::openapi()).unwrap();
        assert!(json.contains("Storefront Orders API"));
        assert!(json.contains("/api/v1/orders/checkout"));
        assert!(json.contains("/api/v1/orders/{id}/message"));
        assert!(json.contains("\"Bearer\""));
    }
}
