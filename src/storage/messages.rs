use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::Storage;
use crate::errors::AppError;
use crate::models::{Message, MessageDirection, MessageStatus};

#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub user_id: Uuid,
    pub contact_id: Uuid,
    pub wa_message_id: Option<&'a str>,
    pub direction: MessageDirection,
    pub message_type: &'a str,
    pub body: Option<&'a str>,
    pub media_url: Option<&'a str>,
    pub status: MessageStatus,
    pub created_at: Option<DateTime<Utc>>,
}

impl Storage {
    /// Inserts a message. A provider id that was already stored yields
    /// `None` instead of an error.
    pub async fn insert_message(&self, msg: &NewMessage<'_>) -> Result<Option<Message>, AppError> {
        sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages (
                id, user_id, contact_id, wa_message_id, direction, message_type,
                body, media_url, status, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, COALESCE($10, now()))
            ON CONFLICT (wa_message_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(msg.user_id)
        .bind(msg.contact_id)
        .bind(msg.wa_message_id)
        .bind(msg.direction.as_str())
        .bind(msg.message_type)
        .bind(msg.body)
        .bind(msg.media_url)
        .bind(msg.status.as_str())
        .bind(msg.created_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)
    }

    pub async fn mark_message_sent(
        &self,
        message_id: Uuid,
        wa_message_id: &str,
    ) -> Result<Message, AppError> {
        sqlx::query_as::<_, Message>(
            r#"
            UPDATE messages
            SET wa_message_id = $2, status = $3, status_updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(message_id)
        .bind(wa_message_id)
        .bind(MessageStatus::Sent.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)
    }

    pub async fn mark_message_failed(
        &self,
        message_id: Uuid,
        error: &str,
    ) -> Result<Message, AppError> {
        sqlx::query_as::<_, Message>(
            r#"
            UPDATE messages
            SET status = $2, error_message = $3, status_updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(message_id)
        .bind(MessageStatus::Failed.as_str())
        .bind(error)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)
    }

    /// Applies a provider delivery callback to one of `user_id`'s messages.
    /// Returns the updated message, or `None` when the id is unknown to that
    /// owner or the status would move backwards.
    pub async fn apply_message_status(
        &self,
        user_id: Uuid,
        wa_message_id: &str,
        next: MessageStatus,
        error: Option<&str>,
    ) -> Result<Option<Message>, AppError> {
        let Some(current) = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE wa_message_id = $1 AND user_id = $2",
        )
        .bind(wa_message_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?
        else {
            return Ok(None);
        };

        let allowed = MessageStatus::parse(&current.status)
            .map(|status| status.can_advance_to(next))
            .unwrap_or(false);
        if !allowed {
            tracing::debug!(
                "Ignoring status {} for message {} (currently {})",
                next.as_str(),
                wa_message_id,
                current.status
            );
            return Ok(None);
        }

        // Conditional on the status we read, so racing callbacks cannot regress it.
        sqlx::query_as::<_, Message>(
            r#"
            UPDATE messages
            SET status = $3, error_message = COALESCE($4, error_message), status_updated_at = now()
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(current.id)
        .bind(&current.status)
        .bind(next.as_str())
        .bind(error)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)
    }

    /// Newest first, `limit` capped at 100.
    pub async fn list_messages(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
        before: Option<DateTime<Utc>>,
        limit: Option<i64>,
    ) -> Result<Vec<Message>, AppError> {
        let limit = limit.unwrap_or(50).clamp(1, 100);
        sqlx::query_as::<_, Message>(
            r#"
            SELECT * FROM messages
            WHERE user_id = $1 AND contact_id = $2
              AND ($3::timestamptz IS NULL OR created_at < $3)
            ORDER BY created_at DESC, id DESC
            LIMIT $4
            "#,
        )
        .bind(user_id)
        .bind(contact_id)
        .bind(before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)
    }

    /// Provider id of the most recent inbound message, used for read receipts.
    pub async fn last_inbound_wa_id(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
    ) -> Result<Option<String>, AppError> {
        sqlx::query_scalar::<_, Option<String>>(
            r#"
            SELECT wa_message_id FROM messages
            WHERE user_id = $1 AND contact_id = $2 AND direction = $3
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(contact_id)
        .bind(MessageDirection::Inbound.as_str())
        .fetch_optional(&self.pool)
        .await
        .map(Option::flatten)
        .map_err(AppError::DatabaseError)
    }
}
