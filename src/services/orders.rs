use crate::{
    db::DbPool,
    dto::{order_view, OrderView, ShippingAddress},
    entities::{
        cart, cart_item,
        order::{self, OrderStatus},
        order_item, payment,
        payment::{PaymentMethod, PaymentStatus},
        product, user,
    },
    errors::ServiceError,
    services::{
        inventory,
        order_number::OrderNumberSource,
        order_status::{self, Transition},
        payments::{card_last_four, PaymentService},
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveEnum, ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Checkout request: turns the user's cart into an order.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct PlaceOrderRequest {
    pub user_id: Uuid,
    #[validate]
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    /// Required for card methods; only the last four digits are stored
    #[validate(length(min = 12, max = 23))]
    pub card_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

/// Order placement, lookup and lifecycle.
///
/// Placement and cancellation each run in one database transaction; a failure
/// at any step leaves orders, stock, payments and the cart as they were.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    payments: PaymentService,
    order_numbers: Arc<dyn OrderNumberSource>,
    max_number_attempts: u32,
}

impl OrderService {
    pub fn new(
        db: Arc<DbPool>,
        payments: PaymentService,
        order_numbers: Arc<dyn OrderNumberSource>,
        max_number_attempts: u32,
    ) -> Self {
        Self {
            db,
            payments,
            order_numbers,
            max_number_attempts: max_number_attempts.max(1),
        }
    }

    /// Places an order from the user's cart.
    ///
    /// Checks run in a fixed order: active user, non-empty cart, card details,
    /// then stock per line.
    ///
    /// An order-number collision discards the whole attempt and starts over
    /// with a fresh number. After `max_number_attempts` collisions the call
    /// fails with `Conflict`.
    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn place_order(&self, request: PlaceOrderRequest) -> Result<OrderView, ServiceError> {
        request.validate()?;

        for attempt in 1..=self.max_number_attempts {
            let order_number = self.order_numbers.next(Utc::now());
            match self.try_place_order(&request, &order_number).await {
                Ok(order_id) => {
                    info!(%order_id, %order_number, "order placed");
                    return self.get_order(order_id).await;
                }
                Err(ServiceError::OrderNumberCollision(number)) => {
                    warn!(attempt, order_number = %number, "order number already taken");
                }
                Err(e) => return Err(e),
            }
        }

        Err(ServiceError::Conflict(format!(
            "could not allocate a unique order number after {} attempts",
            self.max_number_attempts
        )))
    }

    async fn try_place_order(
        &self,
        request: &PlaceOrderRequest,
        order_number: &str,
    ) -> Result<Uuid, ServiceError> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        let user = user::Entity::find_by_id(request.user_id)
            .filter(user::Column::IsActive.eq(true))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("User", request.user_id))?;

        let cart = cart::Entity::find()
            .filter(cart::Column::UserId.eq(user.id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::InvalidState("cart empty".to_string()))?;

        let lines = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .order_by_asc(cart_item::Column::CreatedAt)
            .all(&txn)
            .await?;
        if lines.is_empty() {
            return Err(ServiceError::InvalidState("cart empty".to_string()));
        }
        card_last_four(request.payment_method, request.card_number.as_deref())?;

        for line in &lines {
            inventory::ensure_available(&txn, line.product_id, line.quantity).await?;
        }

        let total: Decimal = lines.iter().map(cart_item::Model::line_total).sum();
        let order_id = Uuid::new_v4();
        let address = &request.shipping_address;

        order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number.to_string()),
            user_id: Set(user.id),
            total_amount: Set(total),
            status: Set(OrderStatus::Pending),
            order_date: Set(now),
            shipped_date: Set(None),
            delivered_date: Set(None),
            shipping_street: Set(address.street.clone()),
            shipping_city: Set(address.city.clone()),
            shipping_state: Set(address.state.clone()),
            shipping_postal_code: Set(address.postal_code.clone()),
            shipping_country: Set(address.country.clone()),
            version: Set(1),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| order_insert_error(e, order_number))?;

        for line in &lines {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                subtotal: Set(line.line_total()),
            }
            .insert(&txn)
            .await?;

            // Re-checked at write time; the read above may already be stale.
            inventory::reserve_stock(&txn, line.product_id, line.quantity).await?;
        }

        self.payments
            .charge_order(
                &txn,
                order_id,
                total,
                request.payment_method,
                request.card_number.as_deref(),
            )
            .await?;

        cart_item::Entity::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;
        touch_cart(&txn, cart.id).await?;

        txn.commit().await?;
        Ok(order_id)
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderView, ServiceError> {
        let db = &*self.db;
        let order = order::Entity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;

        let mut views = load_views(db, vec![order]).await?;
        views
            .pop()
            .ok_or_else(|| ServiceError::InternalError("order view went missing".to_string()))
    }

    /// A user's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_user_orders(
        &self,
        user_id: Uuid,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<OrderView>, ServiceError> {
        let db = &*self.db;
        let orders = order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::OrderDate)
            .order_by_desc(order::Column::Id)
            .offset(offset)
            .limit(limit)
            .all(db)
            .await?;

        load_views(db, orders).await
    }

    /// Moves an order along its lifecycle. Cancelling goes through
    /// [`OrderService::cancel_order`] so stock and payment follow.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<(), ServiceError> {
        let order = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;

        match order_status::classify(order.status, new_status)? {
            Transition::Unchanged => Ok(()),
            Transition::Cancel => self.cancel_order(order_id).await,
            Transition::Advance(to) => {
                order_status::write_status(&*self.db, &order, to, Utc::now()).await?;
                info!(from = %order.status, to = %to, "order status changed");
                Ok(())
            }
        }
    }

    /// Cancels a pending or processing order: restocks every line and marks
    /// the payment refunded.
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        let now = Utc::now();

        let order = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::not_found("Order", order_id))?;

        if !order_status::can_cancel(order.status) {
            return Err(ServiceError::InvalidState(format!(
                "order {} is {} and cannot be cancelled",
                order.order_number, order.status
            )));
        }

        order_status::write_status(&txn, &order, OrderStatus::Cancelled, now).await?;

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .all(&txn)
            .await?;
        for item in &items {
            inventory::restore_stock(&txn, item.product_id, item.quantity).await?;
        }

        payment::Entity::update_many()
            .col_expr(
                payment::Column::Status,
                Expr::value(PaymentStatus::Refunded.to_value()),
            )
            .col_expr(payment::Column::UpdatedAt, Expr::value(now))
            .filter(payment::Column::OrderId.eq(order.id))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        info!(order_number = %order.order_number, lines = items.len(), "order cancelled");
        Ok(())
    }
}

/// A unique violation on the order number is retryable; anything else is not.
fn order_insert_error(err: DbErr, order_number: &str) -> ServiceError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(detail)) if detail.contains("order_number") => {
            ServiceError::OrderNumberCollision(order_number.to_string())
        }
        _ => ServiceError::DatabaseError(err),
    }
}

pub(crate) async fn touch_cart<C: ConnectionTrait>(conn: &C, cart_id: Uuid) -> Result<(), DbErr> {
    cart::Entity::update_many()
        .col_expr(cart::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(cart::Column::Id.eq(cart_id))
        .exec(conn)
        .await?;
    Ok(())
}

/// Loads lines, payments and product names for `orders` in three queries and
/// maps them to views, preserving the input order.
async fn load_views<C: ConnectionTrait>(
    conn: &C,
    orders: Vec<order::Model>,
) -> Result<Vec<OrderView>, ServiceError> {
    if orders.is_empty() {
        return Ok(Vec::new());
    }
    let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();

    let items = order_item::Entity::find()
        .filter(order_item::Column::OrderId.is_in(order_ids.clone()))
        .order_by_asc(order_item::Column::Id)
        .all(conn)
        .await?;
    let payments = payment::Entity::find()
        .filter(payment::Column::OrderId.is_in(order_ids))
        .all(conn)
        .await?;

    let mut product_ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
    product_ids.sort_unstable();
    product_ids.dedup();
    let product_names: HashMap<Uuid, String> = product::Entity::find()
        .filter(product::Column::Id.is_in(product_ids))
        .all(conn)
        .await?
        .into_iter()
        .map(|p| (p.id, p.name))
        .collect();

    let mut items_by_order: HashMap<Uuid, Vec<order_item::Model>> = HashMap::new();
    for item in items {
        items_by_order.entry(item.order_id).or_default().push(item);
    }
    let payments_by_order: HashMap<Uuid, payment::Model> =
        payments.into_iter().map(|p| (p.order_id, p)).collect();

    Ok(orders
        .iter()
        .map(|order| {
            let items = items_by_order
                .get(&order.id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            order_view(
                order,
                items,
                payments_by_order.get(&order.id),
                &product_names,
            )
        })
        .collect())
}
