use crate::{
    auth::{hash_password, verify_password},
    db::{is_unique_violation, DbPool},
    entities::user::{self, UserRole},
    errors::ServiceError,
    services::carts::{find_active_user, get_or_create_cart},
};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RegisterUserRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Accounts. Deleting a user deactivates the row; an address freed that way
/// may be registered again.
#[derive(Clone)]
pub struct UserService {
    db: Arc<DbPool>,
}

impl UserService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    pub async fn register(&self, request: RegisterUserRequest) -> Result<user::Model, ServiceError> {
        self.create_user(request, UserRole::Customer).await
    }

    /// Creates an account with `role` together with its empty cart.
    #[instrument(skip(self, request), fields(role = %role))]
    pub async fn create_user(
        &self,
        request: RegisterUserRequest,
        role: UserRole,
    ) -> Result<user::Model, ServiceError> {
        request.validate()?;
        let email = normalize_email(&request.email);
        let password_hash = hash_password(&request.password)?;

        let txn = self.db.begin().await?;

        let taken = user::Entity::find()
            .filter(user::Column::Email.eq(email.as_str()))
            .filter(user::Column::IsActive.eq(true))
            .one(&txn)
            .await?;
        if taken.is_some() {
            return Err(email_taken(&email));
        }

        let user = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.clone()),
            name: Set(request.name.trim().to_string()),
            password_hash: Set(password_hash),
            role: Set(role),
            is_active: Set(true),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|err| {
            // Lost a race with a concurrent registration for the same address.
            if is_unique_violation(&err) {
                email_taken(&email)
            } else {
                err.into()
            }
        })?;
        get_or_create_cart(&txn, user.id).await?;

        txn.commit().await?;
        info!(user_id = %user.id, "user created");
        Ok(user)
    }

    /// Looks up an active account and checks its password. Unknown email and
    /// wrong password fail the same way.
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<user::Model, ServiceError> {
        let user = user::Entity::find()
            .filter(user::Column::Email.eq(normalize_email(email)))
            .filter(user::Column::IsActive.eq(true))
            .one(&*self.db)
            .await?;

        match user {
            Some(user) if verify_password(password, &user.password_hash)? => Ok(user),
            _ => Err(ServiceError::Unauthorized("invalid credentials".to_string())),
        }
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<user::Model, ServiceError> {
        find_active_user(&*self.db, user_id).await
    }

    #[instrument(skip(self))]
    pub async fn delete_user(&self, user_id: Uuid) -> Result<(), ServiceError> {
        let result = user::Entity::update_many()
            .col_expr(user::Column::IsActive, Expr::value(false))
            .col_expr(user::Column::UpdatedAt, Expr::value(chrono::Utc::now()))
            .filter(user::Column::Id.eq(user_id))
            .filter(user::Column::IsActive.eq(true))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::not_found("User", user_id));
        }
        info!(%user_id, "user deactivated");
        Ok(())
    }
}

fn email_taken(email: &str) -> ServiceError {
    ServiceError::Conflict(format!("email {} is already registered", email))
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
