use serde_json::Value;

use super::Storage;
use crate::errors::AppError;

impl Storage {
    /// Stores a webhook receipt. Returns `false` when the same
    /// `(source, external_id)` was already received.
    pub async fn record_webhook_event(
        &self,
        source: &str,
        external_id: &str,
        payload: &Value,
    ) -> Result<bool, AppError> {
        let inserted = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO webhook_events (source, external_id, payload_raw, status)
            VALUES ($1, $2, $3, 'received')
            ON CONFLICT (source, external_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(source)
        .bind(external_id)
        .bind(payload)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(inserted.is_some())
    }

    pub async fn finish_webhook_event(
        &self,
        source: &str,
        external_id: &str,
        error: Option<&str>,
    ) -> Result<(), AppError> {
        let status = if error.is_some() { "failed" } else { "processed" };
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET status = $3, error_message = $4, processed_at = now()
            WHERE source = $1 AND external_id = $2
            "#,
        )
        .bind(source)
        .bind(external_id)
        .bind(status)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;
        Ok(())
    }
}
