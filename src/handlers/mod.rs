pub mod carts;
pub mod common;
pub mod orders;
pub mod products;
pub mod users;

use crate::{
    config::AppConfig,
    db::DbPool,
    services::{
        carts::CartService,
        order_number::{OrderNumberSource, RandomOrderNumbers},
        orders::OrderService,
        payments::{PaymentProcessor, PaymentService, StandInPaymentProcessor},
        products::ProductService,
        users::UserService,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub carts: Arc<CartService>,
    pub products: Arc<ProductService>,
    pub users: Arc<UserService>,
}

impl AppServices {
    /// Production wiring: random order numbers and the stand-in processor.
    pub fn new(db_pool: Arc<DbPool>, config: &AppConfig) -> Self {
        Self::with_collaborators(
            db_pool,
            config,
            Arc::new(StandInPaymentProcessor),
            Arc::new(RandomOrderNumbers),
        )
    }

    /// Same wiring with the payment processor and order-number source supplied.
    pub fn with_collaborators(
        db_pool: Arc<DbPool>,
        config: &AppConfig,
        processor: Arc<dyn PaymentProcessor>,
        order_numbers: Arc<dyn OrderNumberSource>,
    ) -> Self {
        let orders = Arc::new(OrderService::new(
            db_pool.clone(),
            PaymentService::new(processor),
            order_numbers,
            config.order_number_max_attempts,
        ));

        Self {
            orders,
            carts: Arc::new(CartService::new(db_pool.clone())),
            products: Arc::new(ProductService::new(db_pool.clone())),
            users: Arc::new(UserService::new(db_pool)),
        }
    }
}
