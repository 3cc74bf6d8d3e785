use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront API

Catalog, cart and order placement for a single storefront.

## Authentication

Everything except registration, login and product reads requires a JWT:

```
Authorization: Bearer <your-jwt-token>
```

Customers may only act on their own cart and orders. Product changes and
order status updates require the `admin` role.

## Error Handling

Errors share one body shape:

```json
{
  "error": "Bad Request",
  "message": "Insufficient stock for product 'Widget': requested 3, available 1",
  "details": { "requested": 3, "available": 1 },
  "timestamp": "2024-12-09T10:30:00.000Z"
}
```
        "#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers((url = "http://localhost:8080", description = "Local development")),
    tags(
        (name = "auth", description = "Registration and login"),
        (name = "orders", description = "Order placement and lifecycle"),
        (name = "cart", description = "Shopping cart"),
        (name = "products", description = "Product catalog"),
        (name = "users", description = "User accounts")
    ),
    paths(
        crate::auth::register_handler,
        crate::auth::login_handler,
        crate::handlers::orders::place_order,
        crate::handlers::orders::get_order,
        crate::handlers::orders::list_user_orders,
        crate::handlers::orders::update_order_status,
        crate::handlers::orders::cancel_order,
        crate::handlers::carts::get_cart,
        crate::handlers::carts::add_item,
        crate::handlers::carts::update_item,
        crate::handlers::carts::remove_item,
        crate::handlers::carts::clear_cart,
        crate::handlers::products::list_products,
        crate::handlers::products::get_product,
        crate::handlers::products::create_product,
        crate::handlers::products::update_product,
        crate::handlers::products::delete_product,
        crate::handlers::users::get_user,
        crate::handlers::users::delete_user,
    ),
    components(
        schemas(
            crate::dto::ShippingAddress,
            crate::dto::OrderItemView,
            crate::dto::PaymentView,
            crate::dto::OrderView,
            crate::dto::CartItemView,
            crate::dto::CartView,
            crate::dto::ProductView,
            crate::dto::UserView,
            crate::auth::TokenResponse,
            crate::services::users::RegisterUserRequest,
            crate::services::users::LoginRequest,
            crate::services::orders::PlaceOrderRequest,
            crate::services::orders::UpdateOrderStatusRequest,
            crate::services::carts::AddCartItemRequest,
            crate::services::carts::UpdateCartItemRequest,
            crate::services::products::CreateProductRequest,
            crate::services::products::UpdateProductRequest,
            crate::handlers::common::PaginationMeta,
            crate::entities::order::OrderStatus,
            crate::entities::payment::PaymentMethod,
            crate::entities::payment::PaymentStatus,
            crate::entities::user::UserRole,
            crate::errors::ErrorResponse
        )
    ),
    modifiers(&BearerSecurity)
)]
pub struct ApiDocV1;

/// Registers the `Bearer` scheme the handlers reference in `security(...)`.
struct BearerSecurity;

impl Modify for BearerSecurity {
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
    fn document_lists_order_routes_and_bearer_scheme() {
        let json = serde_json::to_string(&ApiDocV1::openapi()).unwrap();
        assert!(json.contains("Storefront API"));
        assert!(json.contains("/api/v1/orders/{id}/status"));
        assert!(json.contains("/api/v1/cart/{user_id}/items"));
        assert!(json.contains("\"Bearer\""));
    }
}
