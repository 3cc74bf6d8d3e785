//! Order placement against a real SQLite database: totals, stock, payment,
//! cart clearing, and the all-or-nothing behaviour when a step fails.

mod common;

use std::{collections::HashSet, sync::Arc};

use assert_matches::assert_matches;
use async_trait::async_trait;
use common::{card_order, TestApp};
use rust_decimal_macros::dec;
use sea_orm::{EntityTrait, PaginatorTrait, TransactionTrait};
use storefront_api::{
    entities::{order, payment, product, OrderStatus, PaymentMethod, PaymentStatus},
    errors::ServiceError,
    services::{
        inventory,
        order_number::{is_well_formed, RandomOrderNumbers, ScriptedOrderNumbers},
        payments::{ChargeReceipt, ChargeRequest, PaymentProcessor, StandInPaymentProcessor},
        products::UpdateProductRequest,
    },
};

/// Processor that turns every charge down.
struct DecliningProcessor;

#[async_trait]
impl PaymentProcessor for DecliningProcessor {
    async fn charge(&self, _request: &ChargeRequest) -> Result<ChargeReceipt, ServiceError> {
        Ok(ChargeReceipt {
            status: PaymentStatus::Failed,
            transaction_id: None,
        })
    }
}

async fn order_count(app: &TestApp) -> u64 {
    order::Entity::find().count(&*app.state.db).await.unwrap()
}

async fn payment_count(app: &TestApp) -> u64 {
    payment::Entity::find().count(&*app.state.db).await.unwrap()
}

#[tokio::test]
async fn places_order_from_cart_and_clears_it() {
    let app = TestApp::new().await;
    let buyer = app.create_customer("buyer@shop.test").await;
    let mug = app.create_product("Mug", dec!(10.00), 5).await;
    let tea = app.create_product("Tea", dec!(5.00), 3).await;
    app.add_to_cart(buyer.id, mug.id, 2).await;
    app.add_to_cart(buyer.id, tea.id, 1).await;

    let placed = app
        .services()
        .orders
        .place_order(card_order(buyer.id))
        .await
        .unwrap();

    assert_eq!(placed.status, OrderStatus::Pending);
    assert_eq!(placed.total_amount, dec!(25.00));
    assert!(is_well_formed(&placed.order_number), "{}", placed.order_number);
    assert_eq!(placed.version, 1);

    let mut subtotals: Vec<_> = placed.items.iter().map(|i| i.subtotal).collect();
    subtotals.sort();
    assert_eq!(subtotals, vec![dec!(5.00), dec!(20.00)]);
    let item_sum: rust_decimal::Decimal = placed.items.iter().map(|i| i.subtotal).sum();
    assert_eq!(item_sum, placed.total_amount);

    let payment = placed.payment.expect("payment recorded");
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(payment.amount, dec!(25.00));
    assert_eq!(payment.method, PaymentMethod::CreditCard);
    assert_eq!(payment.card_last_four.as_deref(), Some("1111"));
    assert!(payment.transaction_id.unwrap().starts_with("FAKE_"));

    assert_eq!(app.stock_of(mug.id).await, 3);
    assert_eq!(app.stock_of(tea.id).await, 2);

    let cart = app.services().carts.get_cart(buyer.id).await.unwrap();
    assert!(cart.items.is_empty());
    assert_eq!(cart.total, dec!(0));
}

#[tokio::test]
async fn insufficient_stock_changes_nothing() {
    let app = TestApp::new().await;
    let buyer = app.create_customer("short@shop.test").await;
    let lamp = app.create_product("Lamp", dec!(40.00), 5).await;
    let bulb = app.create_product("Bulb", dec!(2.50), 10).await;
    app.add_to_cart(buyer.id, bulb.id, 4).await;
    app.add_to_cart(buyer.id, lamp.id, 2).await;

    // Stock drops after the lamp went into the cart.
    app.services()
        .products
        .update_product(
            lamp.id,
            UpdateProductRequest {
                expected_version: lamp.version,
                stock_quantity: Some(1),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let err = app
        .services()
        .orders
        .place_order(card_order(buyer.id))
        .await
        .unwrap_err();

    assert_matches!(
        err,
        ServiceError::InsufficientStock { requested: 2, available: 1, .. }
    );
    assert_eq!(order_count(&app).await, 0);
    assert_eq!(payment_count(&app).await, 0);
    assert_eq!(app.stock_of(lamp.id).await, 1);
    assert_eq!(app.stock_of(bulb.id).await, 10);

    let cart = app.services().carts.get_cart(buyer.id).await.unwrap();
    assert_eq!(cart.items.len(), 2);
}

#[tokio::test]
async fn empty_cart_is_rejected() {
    let app = TestApp::new().await;
    let buyer = app.create_customer("empty@shop.test").await;

    let err = app
        .services()
        .orders
        .place_order(card_order(buyer.id))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::InvalidState(msg) if msg.contains("cart empty"));
}

#[tokio::test]
async fn card_payment_requires_card_number() {
    let app = TestApp::new().await;
    let buyer = app.create_customer("nocard@shop.test").await;
    let mug = app.create_product("Mug", dec!(10.00), 5).await;
    app.add_to_cart(buyer.id, mug.id, 1).await;

    let mut request = card_order(buyer.id);
    request.card_number = None;
    let err = app.services().orders.place_order(request).await.unwrap_err();

    assert_matches!(err, ServiceError::ValidationError(_));
    assert_eq!(app.stock_of(mug.id).await, 5);
}

#[tokio::test]
async fn cash_on_delivery_needs_no_card() {
    let app = TestApp::new().await;
    let buyer = app.create_customer("cod@shop.test").await;
    let mug = app.create_product("Mug", dec!(10.00), 5).await;
    app.add_to_cart(buyer.id, mug.id, 1).await;

    let mut request = card_order(buyer.id);
    request.payment_method = PaymentMethod::CashOnDelivery;
    request.card_number = None;
    let placed = app.services().orders.place_order(request).await.unwrap();

    let payment = placed.payment.unwrap();
    assert_eq!(payment.method, PaymentMethod::CashOnDelivery);
    assert!(payment.card_last_four.is_none());
}

#[tokio::test]
async fn declined_payment_rolls_back_everything() {
    let app = TestApp::with_collaborators(
        Arc::new(DecliningProcessor),
        Arc::new(RandomOrderNumbers),
        5,
    )
    .await;
    let buyer = app.create_customer("declined@shop.test").await;
    let mug = app.create_product("Mug", dec!(10.00), 5).await;
    app.add_to_cart(buyer.id, mug.id, 2).await;

    let err = app
        .services()
        .orders
        .place_order(card_order(buyer.id))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::PaymentFailed(_));
    assert_eq!(err.status_code(), axum::http::StatusCode::PAYMENT_REQUIRED);
    assert_eq!(order_count(&app).await, 0);
    assert_eq!(payment_count(&app).await, 0);
    assert_eq!(app.stock_of(mug.id).await, 5);

    let cart = app.services().carts.get_cart(buyer.id).await.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 2);
}

#[tokio::test]
async fn order_number_collision_retries_with_fresh_number() {
    let numbers = ScriptedOrderNumbers::new(["0000BEEF", "0000BEEF", "0000CAFE"]);
    let app = TestApp::with_collaborators(
        Arc::new(StandInPaymentProcessor),
        Arc::new(numbers),
        5,
    )
    .await;
    let first = app.create_customer("first@shop.test").await;
    let second = app.create_customer("second@shop.test").await;
    let mug = app.create_product("Mug", dec!(10.00), 5).await;
    app.add_to_cart(first.id, mug.id, 1).await;
    app.add_to_cart(second.id, mug.id, 1).await;

    let a = app.services().orders.place_order(card_order(first.id)).await.unwrap();
    let b = app.services().orders.place_order(card_order(second.id)).await.unwrap();

    assert!(a.order_number.ends_with("-0000BEEF"));
    assert!(b.order_number.ends_with("-0000CAFE"));
    assert_eq!(app.stock_of(mug.id).await, 3);
    assert_eq!(order_count(&app).await, 2);
}

#[tokio::test]
async fn exhausted_order_numbers_surface_as_conflict() {
    let numbers = ScriptedOrderNumbers::new(["0000F00D", "0000F00D", "0000F00D"]);
    let app = TestApp::with_collaborators(
        Arc::new(StandInPaymentProcessor),
        Arc::new(numbers),
        2,
    )
    .await;
    let first = app.create_customer("one@shop.test").await;
    let second = app.create_customer("two@shop.test").await;
    let mug = app.create_product("Mug", dec!(10.00), 5).await;
    app.add_to_cart(first.id, mug.id, 1).await;
    app.add_to_cart(second.id, mug.id, 1).await;

    app.services().orders.place_order(card_order(first.id)).await.unwrap();
    let err = app
        .services()
        .orders
        .place_order(card_order(second.id))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::Conflict(_));
    assert_eq!(err.status_code(), axum::http::StatusCode::CONFLICT);
    assert_eq!(order_count(&app).await, 1);
    assert_eq!(app.stock_of(mug.id).await, 4);
    let cart = app.services().carts.get_cart(second.id).await.unwrap();
    assert_eq!(cart.items.len(), 1);
}

#[tokio::test]
async fn concurrent_buyers_never_oversell() {
    let app = TestApp::new().await;
    let gadget = app.create_product("Gadget", dec!(9.99), 10).await;

    let mut buyers = Vec::new();
    for i in 0..20 {
        let buyer = app.create_customer(&format!("rush{}@shop.test", i)).await;
        app.add_to_cart(buyer.id, gadget.id, 1).await;
        buyers.push(buyer.id);
    }

    let mut tasks = Vec::new();
    for buyer in buyers {
        let orders = app.services().orders.clone();
        tasks.push(tokio::spawn(async move {
            orders.place_order(card_order(buyer)).await
        }));
    }

    let mut placed = Vec::new();
    let mut short = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(order) => placed.push(order),
            Err(ServiceError::InsufficientStock { .. }) => short += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }

    assert_eq!(placed.len(), 10);
    assert_eq!(short, 10);
    assert_eq!(app.stock_of(gadget.id).await, 0);

    let numbers: HashSet<_> = placed.iter().map(|o| o.order_number.clone()).collect();
    assert_eq!(numbers.len(), placed.len());
}

#[tokio::test]
async fn unknown_user_cannot_place_order() {
    let app = TestApp::new().await;

    let err = app
        .services()
        .orders
        .place_order(card_order(uuid::Uuid::new_v4()))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn stock_taken_after_the_availability_check_is_caught_at_write_time() {
    let app = TestApp::new().await;
    let lamp = app.create_product("Lamp", dec!(40.00), 5).await;

    let txn = app.state.db.begin().await.unwrap();
    // Both buyers see five lamps on hand.
    let seen = inventory::ensure_available(&txn, lamp.id, 3).await.unwrap();
    assert_eq!(seen.stock_quantity, 5);

    // Another buyer takes four before this one writes.
    inventory::reserve_stock(&txn, lamp.id, 4).await.unwrap();

    let err = inventory::reserve_stock(&txn, lamp.id, 3).await.unwrap_err();
    assert_matches!(
        err,
        ServiceError::InsufficientStock { requested: 3, available: 1, product_id, .. }
            if product_id == lamp.id
    );
    txn.commit().await.unwrap();

    let after = product::Entity::find_by_id(lamp.id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(after.stock_quantity, 1);
    // Only the successful decrement bumped the version.
    assert_eq!(after.version, lamp.version + 1);
}

#[tokio::test]
async fn unknown_user_without_card_is_not_found() {
    let app = TestApp::new().await;

    let mut request = card_order(uuid::Uuid::new_v4());
    request.card_number = None;
    let err = app.services().orders.place_order(request).await.unwrap_err();

    assert_matches!(err, ServiceError::NotFound(_));
}
