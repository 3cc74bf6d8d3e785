//! Stock bookkeeping on `products.stock_quantity`.
//!
//! Stock is never read-modified-written. Every change is a single conditional
//! `UPDATE` so two transactions racing for the last units cannot both win.

use crate::{
    entities::product::{self, Column as ProductColumn},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Takes `quantity` units of an active product, failing with
/// `InsufficientStock` if fewer are on hand at the moment of the write.
#[instrument(skip(conn))]
pub async fn reserve_stock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<(), ServiceError> {
    if quantity <= 0 {
        return Err(ServiceError::ValidationError(
            "quantity must be positive".to_string(),
        ));
    }

    let result = product::Entity::update_many()
        .col_expr(
            ProductColumn::StockQuantity,
            Expr::col(ProductColumn::StockQuantity).sub(quantity),
        )
        .col_expr(ProductColumn::Version, Expr::col(ProductColumn::Version).add(1))
        .col_expr(ProductColumn::UpdatedAt, Expr::value(Utc::now()))
        .filter(ProductColumn::Id.eq(product_id))
        .filter(ProductColumn::IsActive.eq(true))
        .filter(ProductColumn::StockQuantity.gte(quantity))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(shortfall(conn, product_id, quantity).await?);
    }

    debug!("stock reserved");
    Ok(())
}

/// Puts `quantity` units back. Inactive products are restocked too; the
/// units were taken while the product was live.
#[instrument(skip(conn))]
pub async fn restore_stock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<(), ServiceError> {
    let result = product::Entity::update_many()
        .col_expr(
            ProductColumn::StockQuantity,
            Expr::col(ProductColumn::StockQuantity).add(quantity),
        )
        .col_expr(ProductColumn::Version, Expr::col(ProductColumn::Version).add(1))
        .col_expr(ProductColumn::UpdatedAt, Expr::value(Utc::now()))
        .filter(ProductColumn::Id.eq(product_id))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        warn!("product row missing while restoring stock");
    }
    Ok(())
}

/// Checks an intended line quantity against live stock without changing it.
pub async fn ensure_available<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<product::Model, ServiceError> {
    let product = find_active_product(conn, product_id).await?;
    if !product.has_stock_for(quantity) {
        return Err(ServiceError::InsufficientStock {
            product_id,
            product_name: product.name,
            requested: quantity,
            available: product.stock_quantity,
        });
    }
    Ok(product)
}

pub async fn find_active_product<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
) -> Result<product::Model, ServiceError> {
    product::Entity::find_by_id(product_id)
        .filter(ProductColumn::IsActive.eq(true))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Product", product_id))
}

/// Explains why a conditional decrement matched no row.
async fn shortfall<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    requested: i32,
) -> Result<ServiceError, ServiceError> {
    let product = find_active_product(conn, product_id).await?;
    Ok(ServiceError::InsufficientStock {
        product_id,
        product_name: product.name,
        requested,
        available: product.stock_quantity,
    })
}
