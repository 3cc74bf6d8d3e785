//! Order lifecycle rules.
//!
//! ```text
//! Pending ──► Processing ──► Shipped ──► Delivered
//!    │             │
//!    └──► Cancelled ◄┘
//! ```
//!
//! Delivered, Cancelled and Refunded are terminal.

use crate::{
    entities::order::{self, Column as OrderColumn, OrderStatus},
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveEnum, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
};

/// What a requested status change amounts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Requested status equals the current one.
    Unchanged,
    /// Plain status write.
    Advance(OrderStatus),
    /// Must go through the cancellation transaction.
    Cancel,
}

pub fn allowed_next(from: OrderStatus) -> &'static [OrderStatus] {
    match from {
        OrderStatus::Pending => &[OrderStatus::Processing, OrderStatus::Cancelled],
        OrderStatus::Processing => &[OrderStatus::Shipped, OrderStatus::Cancelled],
        OrderStatus::Shipped => &[OrderStatus::Delivered],
        OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Refunded => &[],
    }
}

pub fn is_terminal(status: OrderStatus) -> bool {
    allowed_next(status).is_empty()
}

pub fn can_cancel(status: OrderStatus) -> bool {
    allowed_next(status).contains(&OrderStatus::Cancelled)
}

pub fn classify(from: OrderStatus, to: OrderStatus) -> Result<Transition, ServiceError> {
    if from == to {
        return Ok(Transition::Unchanged);
    }
    if !allowed_next(from).contains(&to) {
        return Err(ServiceError::InvalidState(format!(
            "cannot move order from {} to {}",
            from, to
        )));
    }
    Ok(match to {
        OrderStatus::Cancelled => Transition::Cancel,
        other => Transition::Advance(other),
    })
}

/// Writes `to` onto `current` if nobody else bumped its version first.
/// Shipped and delivered timestamps are only ever filled in, never replaced.
pub async fn write_status<C: ConnectionTrait>(
    conn: &C,
    current: &order::Model,
    to: OrderStatus,
    now: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let mut update = order::Entity::update_many()
        .col_expr(OrderColumn::Status, Expr::value(to.to_value()))
        .col_expr(OrderColumn::Version, Expr::col(OrderColumn::Version).add(1))
        .col_expr(OrderColumn::UpdatedAt, Expr::value(now));

    if to == OrderStatus::Shipped && current.shipped_date.is_none() {
        update = update.col_expr(OrderColumn::ShippedDate, Expr::value(now));
    }
    if to == OrderStatus::Delivered && current.delivered_date.is_none() {
        update = update.col_expr(OrderColumn::DeliveredDate, Expr::value(now));
    }

    let result = update
        .filter(OrderColumn::Id.eq(current.id))
        .filter(OrderColumn::Version.eq(current.version))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::ConcurrentModification(current.id));
    }
    Ok(())
}
