use crate::{
    db::DbPool,
    entities::product::{self, Column as ProductColumn},
    errors::ServiceError,
    services::inventory,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

fn validate_money(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() || value.scale() > 4 {
        let mut err = ValidationError::new("money");
        err.message = Some("must be non-negative with at most 4 decimal places".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    #[validate(custom = "validate_money")]
    #[schema(value_type = String, example = "19.99")]
    pub price: Decimal,
    #[validate(custom = "validate_money")]
    #[schema(value_type = Option<String>)]
    pub discount_price: Option<Decimal>,
    #[validate(range(min = 0))]
    pub stock_quantity: i32,
}

/// Partial update. `expected_version` must match the stored version.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateProductRequest {
    pub expected_version: i32,
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    #[validate(custom = "validate_money")]
    #[schema(value_type = Option<String>)]
    pub price: Option<Decimal>,
    #[validate(custom = "validate_money")]
    #[schema(value_type = Option<String>)]
    pub discount_price: Option<Decimal>,
    /// Removes any discount; wins over `discount_price`
    #[serde(default)]
    pub clear_discount: bool,
    #[validate(range(min = 0))]
    pub stock_quantity: Option<i32>,
}

/// Catalogue maintenance. Reads only ever see active products.
#[derive(Clone)]
pub struct ProductService {
    db: Arc<DbPool>,
}

impl ProductService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(name = %request.name))]
    pub async fn create_product(
        &self,
        request: CreateProductRequest,
    ) -> Result<product::Model, ServiceError> {
        request.validate()?;

        let product = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name.trim().to_string()),
            description: Set(request.description),
            price: Set(request.price),
            discount_price: Set(request.discount_price),
            stock_quantity: Set(request.stock_quantity),
            is_active: Set(true),
            version: Set(1),
            ..Default::default()
        }
        .insert(&*self.db)
        .await?;

        info!(product_id = %product.id, "product created");
        Ok(product)
    }

    pub async fn get_product(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        inventory::find_active_product(&*self.db, product_id).await
    }

    /// One page of active products ordered by name, plus the total count.
    /// `page` is 1-based.
    #[instrument(skip(self))]
    pub async fn list_products(
        &self,
        search: Option<&str>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<product::Model>, u64), ServiceError> {
        let mut query = product::Entity::find().filter(ProductColumn::IsActive.eq(true));
        if let Some(term) = search.map(str::trim).filter(|t| !t.is_empty()) {
            query = query.filter(ProductColumn::Name.contains(term));
        }

        let paginator = query
            .order_by_asc(ProductColumn::Name)
            .order_by_asc(ProductColumn::Id)
            .paginate(&*self.db, per_page.max(1));
        let total = paginator.num_items().await?;
        let products = paginator.fetch_page(page.saturating_sub(1)).await?;

        Ok((products, total))
    }

    /// Applies a partial update if the product is still at `expected_version`.
    #[instrument(skip(self, request), fields(expected_version = request.expected_version))]
    pub async fn update_product(
        &self,
        product_id: Uuid,
        request: UpdateProductRequest,
    ) -> Result<product::Model, ServiceError> {
        request.validate()?;
        let current = inventory::find_active_product(&*self.db, product_id).await?;
        if current.version != request.expected_version {
            return Err(ServiceError::ConcurrentModification(product_id));
        }

        let mut changes = product::ActiveModel {
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        if let Some(name) = request.name {
            changes.name = Set(name.trim().to_string());
        }
        if let Some(description) = request.description {
            changes.description = Set(Some(description));
        }
        if let Some(price) = request.price {
            changes.price = Set(price);
        }
        if request.clear_discount {
            changes.discount_price = Set(None);
        } else if let Some(discount) = request.discount_price {
            changes.discount_price = Set(Some(discount));
        }
        if let Some(stock) = request.stock_quantity {
            changes.stock_quantity = Set(stock);
        }

        let result = product::Entity::update_many()
            .set(changes)
            .col_expr(ProductColumn::Version, Expr::col(ProductColumn::Version).add(1))
            .filter(ProductColumn::Id.eq(product_id))
            .filter(ProductColumn::IsActive.eq(true))
            .filter(ProductColumn::Version.eq(request.expected_version))
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::ConcurrentModification(product_id));
        }

        info!(%product_id, "product updated");
        self.get_product(product_id).await
    }

    /// Soft delete. Existing orders keep referring to the row.
    #[instrument(skip(self))]
    pub async fn delete_product(&self, product_id: Uuid) -> Result<(), ServiceError> {
        let result = product::Entity::update_many()
            .col_expr(ProductColumn::IsActive, Expr::value(false))
            .col_expr(ProductColumn::Version, Expr::col(ProductColumn::Version).add(1))
            .col_expr(ProductColumn::UpdatedAt, Expr::value(Utc::now()))
            .filter(ProductColumn::Id.eq(product_id))
            .filter(ProductColumn::IsActive.eq(true))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::not_found("Product", product_id));
        }
        info!(%product_id, "product deactivated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn money_must_be_non_negative_and_four_places() {
        assert!(validate_money(&dec!(19.99)).is_ok());
        assert!(validate_money(&dec!(0)).is_ok());
        assert!(validate_money(&dec!(-0.01)).is_err());
        assert!(validate_money(&dec!(1.00001)).is_err());
    }

    #[test]
    fn create_request_rejects_blank_name_and_negative_stock() {
        let request = CreateProductRequest {
            name: String::new(),
            description: None,
            price: dec!(5.00),
            discount_price: None,
            stock_quantity: -1,
        };
        let errors = request.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("name"));
        assert!(fields.contains_key("stock_quantity"));
    }
}
