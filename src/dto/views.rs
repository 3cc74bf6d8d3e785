use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::entities::{
    cart, cart_item, order, order_item, payment, product, user, OrderStatus, PaymentMethod,
    PaymentStatus, UserRole,
};

/// Delivery address, as captured on the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct ShippingAddress {
    #[validate(length(min = 1, max = 200))]
    pub street: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(max = 100))]
    pub state: Option<String>,
    #[validate(length(min = 1, max = 20))]
    pub postal_code: String,
    #[validate(length(min = 2, max = 100))]
    pub country: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: Option<String>,
    pub quantity: i32,
    #[schema(value_type = String)]
    pub unit_price: Decimal,
    #[schema(value_type = String)]
    pub subtotal: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentView {
    pub id: Uuid,
    #[schema(value_type = String)]
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub card_last_four: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Order with its lines and payment.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderView {
    pub id: Uuid,
    pub order_number: String,
    pub user_id: Uuid,
    pub status: OrderStatus,
    #[schema(value_type = String)]
    pub total_amount: Decimal,
    pub order_date: DateTime<Utc>,
    pub shipped_date: Option<DateTime<Utc>>,
    pub delivered_date: Option<DateTime<Utc>>,
    pub shipping_address: ShippingAddress,
    pub items: Vec<OrderItemView>,
    pub payment: Option<PaymentView>,
    pub version: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartItemView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: Option<String>,
    pub quantity: i32,
    #[schema(value_type = String)]
    pub unit_price: Decimal,
    #[schema(value_type = String)]
    pub line_total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub items: Vec<CartItemView>,
    /// Sum of line quantities
    pub item_count: i32,
    #[schema(value_type = String)]
    pub total: Decimal,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProductView {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    #[schema(value_type = String)]
    pub price: Decimal,
    #[schema(value_type = Option<String>)]
    pub discount_price: Option<Decimal>,
    /// Price a buyer pays today
    #[schema(value_type = String)]
    pub effective_price: Decimal,
    pub stock_quantity: i32,
    /// Send back on update for optimistic concurrency
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserView {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

pub fn shipping_address(order: &order::Model) -> ShippingAddress {
    ShippingAddress {
        street: order.shipping_street.clone(),
        city: order.shipping_city.clone(),
        state: order.shipping_state.clone(),
        postal_code: order.shipping_postal_code.clone(),
        country: order.shipping_country.clone(),
    }
}

pub fn payment_view(payment: &payment::Model) -> PaymentView {
    PaymentView {
        id: payment.id,
        amount: payment.amount,
        method: payment.method,
        status: payment.status,
        transaction_id: payment.transaction_id.clone(),
        card_last_four: payment.card_last_four.clone(),
        created_at: payment.created_at,
    }
}

/// `product_names` may be partial; lines without an entry get no name.
pub fn order_view(
    order: &order::Model,
    items: &[order_item::Model],
    payment: Option<&payment::Model>,
    product_names: &HashMap<Uuid, String>,
) -> OrderView {
    OrderView {
        id: order.id,
        order_number: order.order_number.clone(),
        user_id: order.user_id,
        status: order.status,
        total_amount: order.total_amount,
        order_date: order.order_date,
        shipped_date: order.shipped_date,
        delivered_date: order.delivered_date,
        shipping_address: shipping_address(order),
        items: items
            .iter()
            .map(|item| OrderItemView {
                id: item.id,
                product_id: item.product_id,
                product_name: product_names.get(&item.product_id).cloned(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                subtotal: item.subtotal,
            })
            .collect(),
        payment: payment.map(payment_view),
        version: order.version,
    }
}

pub fn cart_item_view(item: &cart_item::Model, product_name: Option<&str>) -> CartItemView {
    CartItemView {
        id: item.id,
        product_id: item.product_id,
        product_name: product_name.map(str::to_string),
        quantity: item.quantity,
        unit_price: item.unit_price,
        line_total: item.line_total(),
    }
}

pub fn cart_view(
    cart: &cart::Model,
    items: &[cart_item::Model],
    product_names: &HashMap<Uuid, String>,
) -> CartView {
    let items: Vec<CartItemView> = items
        .iter()
        .map(|item| {
            cart_item_view(
                item,
                product_names.get(&item.product_id).map(String::as_str),
            )
        })
        .collect();

    CartView {
        id: cart.id,
        user_id: cart.user_id,
        item_count: items.iter().map(|item| item.quantity).sum(),
        total: items.iter().map(|item| item.line_total).sum(),
        items,
        updated_at: cart.updated_at,
    }
}

pub fn product_view(product: &product::Model) -> ProductView {
    ProductView {
        id: product.id,
        name: product.name.clone(),
        description: product.description.clone(),
        price: product.price,
        discount_price: product.discount_price,
        effective_price: product.effective_price(),
        stock_quantity: product.stock_quantity,
        version: product.version,
        created_at: product.created_at,
        updated_at: product.updated_at,
    }
}

pub fn user_view(user: &user::Model) -> UserView {
    UserView {
        id: user.id,
        email: user.email.clone(),
        name: user.name.clone(),
        role: user.role,
        created_at: user.created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn cart_view_totals_snapshot_prices() {
        let now = Utc::now();
        let cart = cart::Model {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        };
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let line = |product_id, quantity, unit_price| cart_item::Model {
            id: Uuid::new_v4(),
            cart_id: cart.id,
            product_id,
            quantity,
            unit_price,
            created_at: now,
            updated_at: now,
        };
        let items = vec![line(a, 2, dec!(10.00)), line(b, 1, dec!(5.00))];
        let names = HashMap::from([(a, "Kettle".to_string())]);

        let view = cart_view(&cart, &items, &names);
        assert_eq!(view.item_count, 3);
        assert_eq!(view.total, dec!(25.00));
        assert_eq!(view.items[0].product_name.as_deref(), Some("Kettle"));
        assert_eq!(view.items[0].line_total, dec!(20.00));
        assert!(view.items[1].product_name.is_none());
    }

    #[test]
    fn empty_cart_view_is_zeroed() {
        let now = Utc::now();
        let cart = cart::Model {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        };
        let view = cart_view(&cart, &[], &HashMap::new());
        assert_eq!(view.item_count, 0);
        assert_eq!(view.total, Decimal::ZERO);
    }
}
