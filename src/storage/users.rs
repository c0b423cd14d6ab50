use uuid::Uuid;

use super::{unique_to_conflict, Storage};
use crate::errors::AppError;
use crate::models::User;

impl Storage {
    pub async fn create_user(
        &self,
        name: &str,
        email: &str,
        business_name: &str,
        api_token_hash: &str,
    ) -> Result<User, AppError> {
        sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, name, email, business_name, api_token_hash)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(email)
        .bind(business_name)
        .bind(api_token_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_to_conflict(e, format!("A user with email {} already exists", email)))
    }

    pub async fn find_user_by_token_hash(&self, token_hash: &str) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE api_token_hash = $1")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::DatabaseError)
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<User, AppError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?
            .ok_or_else(|| AppError::NotFound(format!("User {}", user_id)))
    }

    /// Owner of a WhatsApp business phone number, used to route webhooks.
    pub async fn find_user_by_phone_number_id(
        &self,
        phone_number_id: &str,
    ) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE wa_phone_number_id = $1")
            .bind(phone_number_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::DatabaseError)
    }

    pub async fn update_whatsapp_credentials(
        &self,
        user_id: Uuid,
        phone_number_id: &str,
        access_token: &str,
        business_account_id: Option<&str>,
    ) -> Result<User, AppError> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET wa_phone_number_id = $2,
                wa_access_token = $3,
                wa_business_account_id = $4,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(phone_number_id)
        .bind(access_token)
        .bind(business_account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            unique_to_conflict(
                e,
                "This WhatsApp phone number is already connected to another account",
            )
        })?
        .ok_or_else(|| AppError::NotFound(format!("User {}", user_id)))
    }
}
