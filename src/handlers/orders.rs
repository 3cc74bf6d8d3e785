use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use tracing::info;
use uuid::Uuid;

use crate::{
    auth::{AuthRouterExt, AuthUser},
    dto::OrderView,
    errors::ApiError,
    handlers::common::{
        created_response, no_content_response, validate_input, PaginationParams,
    },
    services::orders::{PlaceOrderRequest, UpdateOrderStatusRequest},
    AppState,
};

/// Order routes, mounted under `/api/v1/orders`
pub fn order_routes() -> Router<AppState> {
    let admin = Router::new()
        .route("/:id/status", put(update_order_status))
        .with_role("admin");

    Router::new()
        .route("/", post(place_order))
        .route("/:id", get(get_order).delete(cancel_order))
        .route("/user/:user_id", get(list_user_orders))
        .with_auth()
        .merge(admin)
}

/// Place an order from the user's cart
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = PlaceOrderRequest,
    responses(
        (status = 201, description = "Order placed", body = OrderView),
        (status = 400, description = "Empty cart, insufficient stock or invalid input", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized"),
        (status = 402, description = "Payment failed", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "User or product not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order number could not be allocated", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn place_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<PlaceOrderRequest>,
) -> Result<Response, ApiError> {
    auth_user.ensure_can_act_for(request.user_id)?;
    validate_input(&request)?;

    let order = state.services.orders.place_order(request).await?;
    info!(order_id = %order.id, order_number = %order.order_number, "order created");
    Ok(created_response(order))
}

/// Fetch an order with its lines and payment
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order", body = OrderView),
        (status = 400, description = "Malformed id"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderView>, ApiError> {
    let order = state.services.orders.get_order(id).await?;
    auth_user.ensure_can_act_for(order.user_id)?;
    Ok(Json(order))
}

/// List a user's orders, newest first
#[utoipa::path(
    get,
    path = "/api/v1/orders/user/{user_id}",
    params(("user_id" = Uuid, Path, description = "Owner id"), PaginationParams),
    responses(
        (status = 200, description = "Orders, newest first", body = [OrderView]),
        (status = 400, description = "Malformed id"),
        (status = 403, description = "Forbidden")
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn list_user_orders(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(user_id): Path<Uuid>,
    Query(params): Query<PaginationParams>,
) -> Result<Json<Vec<OrderView>>, ApiError> {
    auth_user.ensure_can_act_for(user_id)?;

    let (page, per_page) = params.resolve(
        state.config.api_default_page_size,
        state.config.api_max_page_size,
    );
    let orders = state
        .services
        .orders
        .list_user_orders(user_id, PaginationParams::offset(page, per_page), per_page)
        .await?;
    Ok(Json(orders))
}

/// Move an order along its lifecycle (admin)
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 204, description = "Status updated"),
        (status = 400, description = "Illegal transition", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order changed concurrently", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateOrderStatusRequest>,
) -> Result<Response, ApiError> {
    state
        .services
        .orders
        .update_status(id, request.status)
        .await?;
    Ok(no_content_response())
}

/// Cancel an order, restocking its lines and refunding its payment
#[utoipa::path(
    delete,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 204, description = "Order cancelled"),
        (status = 400, description = "Order already shipped, delivered or cancelled", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "orders"
)]
pub async fn cancel_order(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state.services.orders.get_order(id).await?;
    auth_user.ensure_can_act_for(order.user_id)?;

    state.services.orders.cancel_order(id).await?;
    Ok(no_content_response())
}
