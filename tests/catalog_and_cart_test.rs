mod common;

use assert_matches::assert_matches;
use common::TestApp;
use rust_decimal_macros::dec;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set,
    TransactionTrait,
};
use storefront_api::{
    db::is_unique_violation,
    entities::{cart, user, UserRole},
    errors::ServiceError,
    services::{
        carts::{claim_cart, get_or_create_cart, AddCartItemRequest, MAX_LINE_QUANTITY},
        products::{CreateProductRequest, UpdateProductRequest},
        users::RegisterUserRequest,
    },
};

#[tokio::test]
async fn product_update_requires_current_version() {
    let app = TestApp::new().await;
    let products = &app.services().products;
    let kettle = app.create_product("Kettle", dec!(30.00), 4).await;

    let updated = products
        .update_product(
            kettle.id,
            UpdateProductRequest {
                expected_version: kettle.version,
                price: Some(dec!(27.50)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.version, kettle.version + 1);
    assert_eq!(updated.price, dec!(27.50));
    assert_eq!(updated.stock_quantity, 4);

    let err = products
        .update_product(
            kettle.id,
            UpdateProductRequest {
                expected_version: kettle.version,
                name: Some("Stale".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ConcurrentModification(id) if id == kettle.id);
    assert_eq!(products.get_product(kettle.id).await.unwrap().name, "Kettle");
}

#[tokio::test]
async fn negative_price_is_rejected() {
    let app = TestApp::new().await;
    let err = app
        .services()
        .products
        .create_product(CreateProductRequest {
            name: "Broken".into(),
            description: None,
            price: dec!(-1.00),
            discount_price: None,
            stock_quantity: 1,
        })
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn deleted_products_disappear_from_reads() {
    let app = TestApp::new().await;
    let products = &app.services().products;
    let kettle = app.create_product("Kettle", dec!(30.00), 4).await;

    products.delete_product(kettle.id).await.unwrap();

    assert_matches!(
        products.get_product(kettle.id).await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        products.delete_product(kettle.id).await,
        Err(ServiceError::NotFound(_))
    );
    let (listed, total) = products.list_products(None, 1, 20).await.unwrap();
    assert!(listed.is_empty());
    assert_eq!(total, 0);
}

#[tokio::test]
async fn lists_and_searches_products_by_name() {
    let app = TestApp::new().await;
    for name in ["Travel Mug", "Teapot", "Mug Rack", "Spoon"] {
        app.create_product(name, dec!(5.00), 1).await;
    }
    let products = &app.services().products;

    let (found, total) = products.list_products(Some("mug"), 1, 20).await.unwrap();
    assert_eq!(total, 2);
    let names: Vec<_> = found.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["Mug Rack", "Travel Mug"]);

    let (page_two, total) = products.list_products(None, 2, 3).await.unwrap();
    assert_eq!(total, 4);
    assert_eq!(page_two.len(), 1);
    assert_eq!(page_two[0].name, "Travel Mug");
}

#[tokio::test]
async fn registration_creates_an_empty_cart() {
    let app = TestApp::new().await;
    let user = app.create_customer("fresh@shop.test").await;

    let cart = app.services().carts.get_cart(user.id).await.unwrap();
    assert_eq!(cart.user_id, user.id);
    assert!(cart.items.is_empty());
    assert_eq!(cart.item_count, 0);
}

#[tokio::test]
async fn duplicate_email_is_a_conflict_until_deactivated() {
    let app = TestApp::new().await;
    let users = &app.services().users;
    let first = app.create_customer("dup@shop.test").await;

    let request = RegisterUserRequest {
        email: "DUP@shop.test".into(),
        name: "Again".into(),
        password: common::TEST_PASSWORD.into(),
    };
    assert_matches!(
        users.register(request.clone()).await,
        Err(ServiceError::Conflict(_))
    );

    users.delete_user(first.id).await.unwrap();
    let second = users.register(request).await.unwrap();
    assert_ne!(second.id, first.id);
    assert_eq!(second.email, "dup@shop.test");
}

#[tokio::test]
async fn authenticate_checks_password() {
    let app = TestApp::new().await;
    let users = &app.services().users;
    let user = app.create_customer("login@shop.test").await;

    let found = users
        .authenticate(" Login@Shop.test ", common::TEST_PASSWORD)
        .await
        .unwrap();
    assert_eq!(found.id, user.id);
    assert_matches!(
        users.authenticate("login@shop.test", "wrong password").await,
        Err(ServiceError::Unauthorized(_))
    );
    assert_matches!(
        users.authenticate("nobody@shop.test", common::TEST_PASSWORD).await,
        Err(ServiceError::Unauthorized(_))
    );
}

#[tokio::test]
async fn adding_the_same_product_merges_lines_at_current_price() {
    let app = TestApp::new().await;
    let buyer = app.create_customer("merge@shop.test").await;
    let mug = app.create_product("Mug", dec!(10.00), 10).await;
    let carts = &app.services().carts;

    app.add_to_cart(buyer.id, mug.id, 2).await;
    app.services()
        .products
        .update_product(
            mug.id,
            UpdateProductRequest {
                expected_version: mug.version,
                discount_price: Some(dec!(8.00)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let line = carts
        .add_item(
            buyer.id,
            AddCartItemRequest {
                product_id: mug.id,
                quantity: 3,
            },
        )
        .await
        .unwrap();

    assert_eq!(line.quantity, 5);
    assert_eq!(line.unit_price, dec!(8.00));
    let cart = carts.get_cart(buyer.id).await.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.item_count, 5);
    assert_eq!(cart.total, dec!(40.00));
}

#[tokio::test]
async fn cart_rejects_more_than_stock() {
    let app = TestApp::new().await;
    let buyer = app.create_customer("greedy@shop.test").await;
    let mug = app.create_product("Mug", dec!(10.00), 3).await;
    let carts = &app.services().carts;

    app.add_to_cart(buyer.id, mug.id, 2).await;
    let err = carts
        .add_item(
            buyer.id,
            AddCartItemRequest {
                product_id: mug.id,
                quantity: 2,
            },
        )
        .await
        .unwrap_err();

    assert_matches!(
        err,
        ServiceError::InsufficientStock { requested: 4, available: 3, .. }
    );
    let cart = carts.get_cart(buyer.id).await.unwrap();
    assert_eq!(cart.items[0].quantity, 2);
}

#[tokio::test]
async fn cart_line_quantity_is_bounded() {
    let app = TestApp::new().await;
    let buyer = app.create_customer("bounds@shop.test").await;
    let mug = app.create_product("Mug", dec!(1.00), 50_000).await;
    let carts = &app.services().carts;

    let zero = carts
        .add_item(
            buyer.id,
            AddCartItemRequest {
                product_id: mug.id,
                quantity: 0,
            },
        )
        .await;
    assert_matches!(zero, Err(ServiceError::ValidationError(_)));

    app.add_to_cart(buyer.id, mug.id, MAX_LINE_QUANTITY - 1).await;
    let over = carts
        .add_item(
            buyer.id,
            AddCartItemRequest {
                product_id: mug.id,
                quantity: 2,
            },
        )
        .await;
    assert_matches!(over, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn update_remove_and_clear_cart_lines() {
    let app = TestApp::new().await;
    let buyer = app.create_customer("edit@shop.test").await;
    let mug = app.create_product("Mug", dec!(10.00), 5).await;
    let tea = app.create_product("Tea", dec!(4.00), 5).await;
    let carts = &app.services().carts;

    app.add_to_cart(buyer.id, mug.id, 1).await;
    app.add_to_cart(buyer.id, tea.id, 1).await;
    let cart = carts.get_cart(buyer.id).await.unwrap();
    let mug_line = cart.items.iter().find(|i| i.product_id == mug.id).unwrap().id;
    let tea_line = cart.items.iter().find(|i| i.product_id == tea.id).unwrap().id;

    assert_eq!(carts.item_owner(mug_line).await.unwrap(), buyer.id);

    carts.update_quantity(mug_line, 4).await.unwrap();
    assert_matches!(
        carts.update_quantity(mug_line, 6).await,
        Err(ServiceError::InsufficientStock { .. })
    );
    assert_matches!(
        carts.update_quantity(mug_line, 0).await,
        Err(ServiceError::ValidationError(_))
    );

    carts.remove_item(tea_line).await.unwrap();
    assert_matches!(carts.remove_item(tea_line).await, Err(ServiceError::NotFound(_)));

    let cart = carts.get_cart(buyer.id).await.unwrap();
    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 4);
    assert_eq!(cart.total, dec!(40.00));

    carts.clear_cart(buyer.id).await.unwrap();
    assert!(carts.get_cart(buyer.id).await.unwrap().items.is_empty());
}

#[tokio::test]
async fn inactive_products_cannot_be_added() {
    let app = TestApp::new().await;
    let buyer = app.create_customer("gone@shop.test").await;
    let mug = app.create_product("Mug", dec!(10.00), 5).await;
    app.services().products.delete_product(mug.id).await.unwrap();

    let err = app
        .services()
        .carts
        .add_item(
            buyer.id,
            AddCartItemRequest {
                product_id: mug.id,
                quantity: 1,
            },
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn database_refuses_a_second_active_row_for_an_email() {
    let app = TestApp::new().await;
    let first = app.create_customer("race@shop.test").await;
    let db = &*app.state.db;

    let twin = |active: bool| user::ActiveModel {
        id: Set(uuid::Uuid::new_v4()),
        email: Set("race@shop.test".into()),
        name: Set("Twin".into()),
        password_hash: Set(first.password_hash.clone()),
        role: Set(UserRole::Customer),
        is_active: Set(active),
        ..Default::default()
    };

    let err = twin(true).insert(db).await.unwrap_err();
    assert!(is_unique_violation(&err), "{err:?}");

    // Tombstoned rows do not take part in uniqueness.
    twin(false).insert(db).await.unwrap();
}

#[tokio::test]
async fn claiming_an_existing_cart_keeps_the_transaction_usable() {
    let app = TestApp::new().await;
    let buyer = app.create_customer("claim@shop.test").await;
    let existing = app.services().carts.get_cart(buyer.id).await.unwrap();

    let txn = app.state.db.begin().await.unwrap();
    let claimed = claim_cart(&txn, buyer.id).await.unwrap();
    assert_eq!(claimed.id, existing.id);

    // Further statements in the same transaction still run.
    let again = get_or_create_cart(&txn, buyer.id).await.unwrap();
    assert_eq!(again.id, existing.id);
    txn.commit().await.unwrap();

    let carts = cart::Entity::find()
        .filter(cart::Column::UserId.eq(buyer.id))
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(carts, 1);
}
