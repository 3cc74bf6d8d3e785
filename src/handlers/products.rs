use axum::{
    extract::{Path, Query, State},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::{
    auth::AuthRouterExt,
    dto::{product_view, ProductView},
    errors::ApiError,
    handlers::common::{
        created_response, no_content_response, validate_input, PaginatedResponse,
        PaginationParams,
    },
    services::products::{CreateProductRequest, UpdateProductRequest},
    AppState,
};

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ProductListQuery {
    /// 1-based page number
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    /// Case-insensitive substring of the product name
    pub search: Option<String>,
}

/// Product routes, mounted under `/api/v1/products`. Reads are public.
pub fn product_routes() -> Router<AppState> {
    let admin = Router::new()
        .route("/", axum::routing::post(create_product))
        .route("/:id", axum::routing::put(update_product).delete(delete_product))
        .with_role("admin");

    Router::new()
        .route("/", get(list_products))
        .route("/:id", get(get_product))
        .merge(admin)
}

/// List active products
#[utoipa::path(
    get,
    path = "/api/v1/products",
    params(ProductListQuery),
    responses((status = 200, description = "One page of products", body = PaginatedResponse<ProductView>)),
    tag = "products"
)]
pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductListQuery>,
) -> Result<Json<PaginatedResponse<ProductView>>, ApiError> {
    let params = PaginationParams {
        page: query.page.unwrap_or(1),
        per_page: query.per_page,
    };
    let (page, per_page) = params.resolve(
        state.config.api_default_page_size,
        state.config.api_max_page_size,
    );

    let (products, total) = state
        .services
        .products
        .list_products(query.search.as_deref(), page, per_page)
        .await?;
    let views = products.iter().map(product_view).collect();
    Ok(Json(PaginatedResponse::new(views, page, per_page, total)))
}

/// Fetch an active product
#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product", body = ProductView),
        (status = 404, description = "Not found or inactive", body = crate::errors::ErrorResponse)
    ),
    tag = "products"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProductView>, ApiError> {
    let product = state.services.products.get_product(id).await?;
    Ok(Json(product_view(&product)))
}

/// Create a product (admin)
#[utoipa::path(
    post,
    path = "/api/v1/products",
    request_body = CreateProductRequest,
    responses(
        (status = 201, description = "Created", body = ProductView),
        (status = 400, description = "Invalid input", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required")
    ),
    security(("Bearer" = [])),
    tag = "products"
)]
pub async fn create_product(
    State(state): State<AppState>,
    Json(request): Json<CreateProductRequest>,
) -> Result<Response, ApiError> {
    validate_input(&request)?;
    let product = state.services.products.create_product(request).await?;
    Ok(created_response(product_view(&product)))
}

/// Update a product at a known version (admin)
#[utoipa::path(
    put,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    request_body = UpdateProductRequest,
    responses(
        (status = 200, description = "Updated", body = ProductView),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Version mismatch", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "products"
)]
pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateProductRequest>,
) -> Result<Json<ProductView>, ApiError> {
    validate_input(&request)?;
    let product = state.services.products.update_product(id, request).await?;
    Ok(Json(product_view(&product)))
}

/// Deactivate a product (admin)
#[utoipa::path(
    delete,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 204, description = "Deactivated"),
        (status = 404, description = "Not found", body = crate::errors::ErrorResponse)
    ),
    security(("Bearer" = [])),
    tag = "products"
)]
pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    state.services.products.delete_product(id).await?;
    Ok(no_content_response())
}
