use axum::{
    extract::{Path, State},
    response::Response,
    routing::{get, post, put},
    Json, Router,
};
use uuid::Uuid;

use crate::{
    auth::{AuthRouterExt, AuthUser},
    dto::{CartItemView, CartView},
    errors::ApiError,
    handlers::common::{no_content_response, success_response, validate_input},
    services::carts::{AddCartItemRequest, UpdateCartItemRequest},
    AppState,
};

/// Cart routes, mounted under `/api/v1/cart`
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/:user_id", get(get_cart).delete(clear_cart))
        .route("/:user_id/items", post(add_item))
        .route("/items/:item_id", put(update_item).delete(remove_item))
        .with_auth()
}

/// View a user's cart, creating it on first access
#[utoipa::path(
    get,
    path = "/api/v1/cart/{user_id}",
    params(("user_id" = Uuid, Path, description = "Cart owner")),
    responses(
        (status = 200, description = "Cart", body = CartView),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "User not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<Json<CartView>, ApiError> {
    auth_user.ensure_can_act_for(user_id)?;
    Ok(Json(state.services.carts.get_cart(user_id).await?))
}

/// Add a product to the cart, merging with an existing line
#[utoipa::path(
    post,
    path = "/api/v1/cart/{user_id}/items",
    params(("user_id" = Uuid, Path, description = "Cart owner")),
    request_body = AddCartItemRequest,
    responses(
        (status = 200, description = "Saved cart line", body = CartItemView),
        (status = 400, description = "Invalid quantity or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "User or product not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn add_item(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(user_id): Path<Uuid>,
    Json(request): Json<AddCartItemRequest>,
) -> Result<Response, ApiError> {
    auth_user.ensure_can_act_for(user_id)?;
    validate_input(&request)?;

    let line = state.services.carts.add_item(user_id, request).await?;
    Ok(success_response(line))
}

/// Change a line's quantity
#[utoipa::path(
    put,
    path = "/api/v1/cart/items/{item_id}",
    params(("item_id" = Uuid, Path, description = "Cart line id")),
    request_body = UpdateCartItemRequest,
    responses(
        (status = 204, description = "Quantity updated"),
        (status = 400, description = "Invalid quantity or insufficient stock", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Cart line not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn update_item(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(item_id): Path<Uuid>,
    Json(request): Json<UpdateCartItemRequest>,
) -> Result<Response, ApiError> {
    validate_input(&request)?;
    let owner = state.services.carts.item_owner(item_id).await?;
    auth_user.ensure_can_act_for(owner)?;

    state
        .services
        .carts
        .update_quantity(item_id, request.quantity)
        .await?;
    Ok(no_content_response())
}

/// Remove a line from its cart
#[utoipa::path(
    delete,
    path = "/api/v1/cart/items/{item_id}",
    params(("item_id" = Uuid, Path, description = "Cart line id")),
    responses(
        (status = 204, description = "Line removed"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Cart line not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(item_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let owner = state.services.carts.item_owner(item_id).await?;
    auth_user.ensure_can_act_for(owner)?;

    state.services.carts.remove_item(item_id).await?;
    Ok(no_content_response())
}

/// Remove every line from a user's cart
#[utoipa::path(
    delete,
    path = "/api/v1/cart/{user_id}",
    params(("user_id" = Uuid, Path, description = "Cart owner")),
    responses(
        (status = 204, description = "Cart emptied"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "User not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "cart"
)]
pub async fn clear_cart(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(user_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    auth_user.ensure_can_act_for(user_id)?;
    state.services.carts.clear_cart(user_id).await?;
    Ok(no_content_response())
}
