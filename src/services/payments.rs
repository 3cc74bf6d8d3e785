use crate::{
    entities::payment::{self, PaymentMethod, PaymentStatus},
    errors::ServiceError,
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ConnectionTrait, Set};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub const STAND_IN_TRANSACTION_PREFIX: &str = "FAKE_";

/// What the processor is asked to charge. Carries the full card number only
/// for the duration of the call; it is never persisted.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub order_id: Uuid,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub card_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeReceipt {
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
}

/// Seam between order placement and whatever actually moves money.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeReceipt, ServiceError>;
}

/// Placeholder processor. It talks to no gateway: every charge succeeds
/// immediately with a locally fabricated `FAKE_` transaction id. Replace it
/// with a real [`PaymentProcessor`] before taking actual payments.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandInPaymentProcessor;

#[async_trait]
impl PaymentProcessor for StandInPaymentProcessor {
    async fn charge(&self, request: &ChargeRequest) -> Result<ChargeReceipt, ServiceError> {
        let token: [u8; 8] = rand::random();
        let transaction_id = format!("{}{}", STAND_IN_TRANSACTION_PREFIX, hex::encode_upper(token));
        warn!(
            order_id = %request.order_id,
            amount = %request.amount,
            "stand-in payment processor approved charge without a gateway"
        );
        Ok(ChargeReceipt {
            status: PaymentStatus::Completed,
            transaction_id: Some(transaction_id),
        })
    }
}

/// Checks the card requirements for `method` and returns the last four digits
/// to store, if any.
pub fn card_last_four(
    method: PaymentMethod,
    card_number: Option<&str>,
) -> Result<Option<String>, ServiceError> {
    let digits: Option<String> = card_number.map(|raw| {
        raw.chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .collect()
    });

    match (method.requires_card(), digits) {
        (true, None) => Err(ServiceError::ValidationError(format!(
            "card number is required for {} payments",
            method
        ))),
        (_, Some(digits)) => {
            if !(12..=19).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit())
            {
                return Err(ServiceError::ValidationError(
                    "card number must be 12 to 19 digits".to_string(),
                ));
            }
            Ok(Some(digits[digits.len() - 4..].to_string()))
        }
        (false, None) => Ok(None),
    }
}

#[derive(Clone)]
pub struct PaymentService {
    processor: Arc<dyn PaymentProcessor>,
}

impl PaymentService {
    pub fn new(processor: Arc<dyn PaymentProcessor>) -> Self {
        Self { processor }
    }

    /// Charges the order total and records the payment row on `conn`, which
    /// is expected to be the placement transaction.
    #[instrument(skip(self, conn, card_number), fields(order_id = %order_id))]
    pub async fn charge_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
        amount: Decimal,
        method: PaymentMethod,
        card_number: Option<&str>,
    ) -> Result<payment::Model, ServiceError> {
        let last_four = card_last_four(method, card_number)?;

        let receipt = self
            .processor
            .charge(&ChargeRequest {
                order_id,
                amount,
                method,
                card_number: card_number.map(str::to_string),
            })
            .await?;

        if receipt.status != PaymentStatus::Completed {
            return Err(ServiceError::PaymentFailed(format!(
                "payment for order {} ended as {}",
                order_id, receipt.status
            )));
        }

        let now = Utc::now();
        let payment = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            amount: Set(amount),
            method: Set(method),
            status: Set(receipt.status),
            transaction_id: Set(receipt.transaction_id),
            card_last_four: Set(last_four),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(conn)
        .await?;

        info!(payment_id = %payment.id, method = %method, "payment recorded");
        Ok(payment)
    }
}
