#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{header, Method, Request},
    response::Response,
    Router,
};
use rust_decimal::Decimal;
use sea_orm::EntityTrait;
use serde_json::Value;
use storefront_api::{
    config::AppConfig,
    db,
    dto::ShippingAddress,
    entities::{payment::PaymentMethod, product, user, UserRole},
    handlers::AppServices,
    services::{
        carts::AddCartItemRequest,
        order_number::{OrderNumberSource, RandomOrderNumbers},
        orders::PlaceOrderRequest,
        payments::{PaymentProcessor, StandInPaymentProcessor},
        products::CreateProductRequest,
        users::RegisterUserRequest,
    },
    AppState,
};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str =
    "k3Jx9QpL2vTz8RmW5nYb7HcFd4GsAe6UoXiPq1ZwVtNrMyLkJhBgCfDeSaQwErTy";
pub const TEST_PASSWORD: &str = "correct horse battery";
pub const TEST_CARD: &str = "4111 1111 1111 1111";

/// Application backed by a throwaway SQLite file, driven in-process.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _db_dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_collaborators(Arc::new(StandInPaymentProcessor), Arc::new(RandomOrderNumbers), 5)
            .await
    }

    /// Same app with the payment processor, order-number source and retry
    /// budget replaced.
    pub async fn with_collaborators(
        processor: Arc<dyn PaymentProcessor>,
        order_numbers: Arc<dyn OrderNumberSource>,
        max_number_attempts: u32,
    ) -> Self {
        let db_dir = tempfile::tempdir().expect("temp dir");
        let db_path = db_dir.path().join("storefront.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            TEST_JWT_SECRET.to_string(),
            3600,
            "127.0.0.1".to_string(),
            18_080,
            "development".to_string(),
        );
        // One connection: SQLite serialises writers anyway.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.db_acquire_timeout_secs = 30;
        cfg.order_number_max_attempts = max_number_attempts;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let services = AppServices::with_collaborators(db_arc.clone(), &cfg, processor, order_numbers);
        let state = AppState::with_services(db_arc, cfg, services);
        let router = storefront_api::build_router(state.clone());

        Self {
            router,
            state,
            _db_dir: db_dir,
        }
    }

    pub fn services(&self) -> &AppServices {
        &self.state.services
    }

    pub async fn create_user(&self, email: &str, role: UserRole) -> user::Model {
        self.services()
            .users
            .create_user(
                RegisterUserRequest {
                    email: email.to_string(),
                    name: email.split('@').next().unwrap_or("user").to_string(),
                    password: TEST_PASSWORD.to_string(),
                },
                role,
            )
            .await
            .expect("create user")
    }

    pub async fn create_customer(&self, email: &str) -> user::Model {
        self.create_user(email, UserRole::Customer).await
    }

    pub async fn create_admin(&self) -> user::Model {
        self.create_user("admin@shop.test", UserRole::Admin).await
    }

    pub fn token_for(&self, user: &user::Model) -> String {
        self.state.auth.generate_token(user).expect("token")
    }

    pub async fn create_product(&self, name: &str, price: Decimal, stock: i32) -> product::Model {
        self.services()
            .products
            .create_product(CreateProductRequest {
                name: name.to_string(),
                description: None,
                price,
                discount_price: None,
                stock_quantity: stock,
            })
            .await
            .expect("create product")
    }

    pub async fn add_to_cart(&self, user_id: Uuid, product_id: Uuid, quantity: i32) {
        self.services()
            .carts
            .add_item(
                user_id,
                AddCartItemRequest {
                    product_id,
                    quantity,
                },
            )
            .await
            .expect("add to cart");
    }

    /// Current stock read straight from the table, active or not.
    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        product::Entity::find_by_id(product_id)
            .one(&*self.state.db)
            .await
            .expect("query product")
            .expect("product exists")
            .stock_quantity
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        self.router
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("router is infallible")
    }
}

pub fn shipping_address() -> ShippingAddress {
    ShippingAddress {
        street: "1 Market St".to_string(),
        city: "Springfield".to_string(),
        state: Some("IL".to_string()),
        postal_code: "62701".to_string(),
        country: "US".to_string(),
    }
}

pub fn card_order(user_id: Uuid) -> PlaceOrderRequest {
    PlaceOrderRequest {
        user_id,
        shipping_address: shipping_address(),
        payment_method: PaymentMethod::CreditCard,
        card_number: Some(TEST_CARD.to_string()),
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
