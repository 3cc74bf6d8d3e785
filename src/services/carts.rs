use crate::{
    db::DbPool,
    dto::{cart_item_view, cart_view, CartItemView, CartView},
    entities::{cart, cart_item, product, user},
    errors::ServiceError,
    services::{inventory, orders::touch_cart},
};
use chrono::Utc;
use sea_orm::{
    sea_query::OnConflict, ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

pub const MAX_LINE_QUANTITY: i32 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct AddCartItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 10000))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct UpdateCartItemRequest {
    #[validate(range(min = 1, max = 10000))]
    pub quantity: i32,
}

/// Per-user shopping carts.
///
/// Line prices are snapshots of the product's effective price taken when the
/// line was last added to. Every mutation bumps the cart's `updated_at`.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DbPool>,
}

impl CartService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Returns the user's cart, creating an empty one on first access.
    #[instrument(skip(self))]
    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let db = &*self.db;
        find_active_user(db, user_id).await?;
        let cart = get_or_create_cart(db, user_id).await?;

        let items = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(db)
            .await?;
        let product_ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
        let names: HashMap<Uuid, String> = product::Entity::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|p| (p.id, p.name))
            .collect();

        Ok(cart_view(&cart, &items, &names))
    }

    /// Adds `quantity` of a product. An existing line for the product absorbs
    /// the quantity and takes the current effective price.
    #[instrument(skip(self, request), fields(product_id = %request.product_id, quantity = request.quantity))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        request: AddCartItemRequest,
    ) -> Result<CartItemView, ServiceError> {
        request.validate()?;

        let txn = self.db.begin().await?;
        let now = Utc::now();

        find_active_user(&txn, user_id).await?;
        let cart = get_or_create_cart(&txn, user_id).await?;
        let product = inventory::find_active_product(&txn, request.product_id).await?;

        let existing = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product.id))
            .one(&txn)
            .await?;

        let wanted = existing
            .as_ref()
            .map_or(0, |line| line.quantity)
            .saturating_add(request.quantity);
        if wanted > MAX_LINE_QUANTITY {
            return Err(ServiceError::ValidationError(format!(
                "a cart line may hold at most {} units",
                MAX_LINE_QUANTITY
            )));
        }
        if !product.has_stock_for(wanted) {
            return Err(ServiceError::InsufficientStock {
                product_id: product.id,
                product_name: product.name,
                requested: wanted,
                available: product.stock_quantity,
            });
        }

        let line = match existing {
            Some(line) => {
                let mut active: cart_item::ActiveModel = line.into();
                active.quantity = Set(wanted);
                active.unit_price = Set(product.effective_price());
                active.updated_at = Set(now);
                active.update(&txn).await?
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(product.id),
                    quantity: Set(wanted),
                    unit_price: Set(product.effective_price()),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?
            }
        };
        touch_cart(&txn, cart.id).await?;
        txn.commit().await?;

        info!(cart_id = %cart.id, line_id = %line.id, quantity = line.quantity, "cart line saved");
        Ok(cart_item_view(&line, Some(&product.name)))
    }

    /// Sets a line's quantity after checking it against live stock. The
    /// snapshotted price is left alone.
    #[instrument(skip(self))]
    pub async fn update_quantity(&self, item_id: Uuid, quantity: i32) -> Result<(), ServiceError> {
        if !(1..=MAX_LINE_QUANTITY).contains(&quantity) {
            return Err(ServiceError::ValidationError(format!(
                "quantity must be between 1 and {}",
                MAX_LINE_QUANTITY
            )));
        }

        let txn = self.db.begin().await?;
        let line = find_line(&txn, item_id).await?;
        inventory::ensure_available(&txn, line.product_id, quantity).await?;

        let cart_id = line.cart_id;
        let mut active: cart_item::ActiveModel = line.into();
        active.quantity = Set(quantity);
        active.updated_at = Set(Utc::now());
        active.update(&txn).await?;
        touch_cart(&txn, cart_id).await?;

        txn.commit().await?;
        debug!(quantity, "cart line quantity updated");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, item_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        let line = find_line(&txn, item_id).await?;

        cart_item::Entity::delete_by_id(line.id).exec(&txn).await?;
        touch_cart(&txn, line.cart_id).await?;

        txn.commit().await?;
        debug!("cart line removed");
        Ok(())
    }

    /// Empties the user's cart. A user without a cart has nothing to clear.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        find_active_user(&txn, user_id).await?;

        if let Some(cart) = cart::Entity::find()
            .filter(cart::Column::UserId.eq(user_id))
            .one(&txn)
            .await?
        {
            let removed = cart_item::Entity::delete_many()
                .filter(cart_item::Column::CartId.eq(cart.id))
                .exec(&txn)
                .await?;
            touch_cart(&txn, cart.id).await?;
            debug!(lines = removed.rows_affected, "cart cleared");
        }

        txn.commit().await?;
        Ok(())
    }

    /// Owner of the cart a line belongs to, for access checks.
    pub async fn item_owner(&self, item_id: Uuid) -> Result<Uuid, ServiceError> {
        let db = &*self.db;
        let line = find_line(db, item_id).await?;
        let cart = cart::Entity::find_by_id(line.cart_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Cart", line.cart_id))?;
        Ok(cart.user_id)
    }
}

/// Finds the user's cart or creates it.
pub async fn get_or_create_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<cart::Model, ServiceError> {
    match find_cart(conn, user_id).await? {
        Some(cart) => Ok(cart),
        None => claim_cart(conn, user_id).await,
    }
}

/// Inserts a cart for `user_id` unless one exists, then returns whichever row
/// is stored. A conflicting insert is skipped by the database rather than
/// raised, so an enclosing transaction stays usable after losing a creation
/// race.
pub async fn claim_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<cart::Model, ServiceError> {
    let now = Utc::now();
    let candidate = cart::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let inserted = cart::Entity::insert(candidate)
        .on_conflict(
            OnConflict::column(cart::Column::UserId)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;
    if inserted == 0 {
        debug!(%user_id, "cart already present");
    }

    find_cart(conn, user_id)
        .await?
        .ok_or_else(|| ServiceError::InternalError(format!("cart for user {} vanished", user_id)))
}

async fn find_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<Option<cart::Model>, DbErr> {
    cart::Entity::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await
}

async fn find_line<C: ConnectionTrait>(
    conn: &C,
    item_id: Uuid,
) -> Result<cart_item::Model, ServiceError> {
    cart_item::Entity::find_by_id(item_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("Cart item", item_id))
}

pub(crate) async fn find_active_user<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<user::Model, ServiceError> {
    user::Entity::find_by_id(user_id)
        .filter(user::Column::IsActive.eq(true))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::not_found("User", user_id))
}
