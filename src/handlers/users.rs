use axum::{
    extract::{Path, State},
    response::Response,
    routing::get,
    Json, Router,
};
use uuid::Uuid;

use crate::{
    auth::{AuthRouterExt, AuthUser},
    dto::{user_view, UserView},
    errors::ApiError,
    handlers::common::no_content_response,
    AppState,
};

/// User routes, mounted under `/api/v1/users`
pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/:id", get(get_user).delete(delete_user))
        .with_auth()
}

/// Fetch an active user
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "User", body = UserView),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not found or deactivated", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "users"
)]
pub async fn get_user(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<UserView>, ApiError> {
    auth_user.ensure_can_act_for(id)?;
    let user = state.services.users.get_user(id).await?;
    Ok(Json(user_view(&user)))
}

/// Deactivate a user
#[utoipa::path(
    delete,
    path = "/api/v1/users/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 204, description = "Deactivated"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "users"
)]
pub async fn delete_user(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    auth_user.ensure_can_act_for(id)?;
    state.services.users.delete_user(id).await?;
    Ok(no_content_response())
}
