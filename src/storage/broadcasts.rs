use uuid::Uuid;

use super::Storage;
use crate::errors::{AppError, ResultExt};
use crate::models::{
    page_window, Broadcast, BroadcastDetail, BroadcastRecipient, BroadcastStatus, Contact, Page,
};

/// Who a broadcast goes to. Exactly one kind per campaign.
#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastTarget {
    Group(Uuid),
    Tag(Uuid),
    Contacts(Vec<Uuid>),
}

#[derive(Debug, Clone)]
pub struct NewBroadcast {
    pub name: String,
    pub template_name: Option<String>,
    pub language_code: String,
    pub template_params: Vec<String>,
    pub message_body: Option<String>,
    pub target: BroadcastTarget,
}

impl Storage {
    /// Non-blocked contacts of the target, de-duplicated, ordered by name.
    pub async fn resolve_recipients(
        &self,
        user_id: Uuid,
        target: &BroadcastTarget,
    ) -> Result<Vec<Contact>, AppError> {
        let query = match target {
            BroadcastTarget::Group(group_id) => {
                self.get_group(user_id, *group_id).await?;
                sqlx::query_as::<_, Contact>(
                    r#"
                    SELECT DISTINCT c.* FROM contacts c
                    JOIN group_members m ON m.contact_id = c.id
                    WHERE c.user_id = $1 AND m.group_id = $2 AND NOT c.is_blocked
                    ORDER BY c.name, c.id
                    "#,
                )
                .bind(user_id)
                .bind(*group_id)
            }
            BroadcastTarget::Tag(tag_id) => {
                self.get_tag(user_id, *tag_id).await?;
                sqlx::query_as::<_, Contact>(
                    r#"
                    SELECT DISTINCT c.* FROM contacts c
                    JOIN contact_tags ct ON ct.contact_id = c.id
                    WHERE c.user_id = $1 AND ct.tag_id = $2 AND NOT c.is_blocked
                    ORDER BY c.name, c.id
                    "#,
                )
                .bind(user_id)
                .bind(*tag_id)
            }
            BroadcastTarget::Contacts(ids) => sqlx::query_as::<_, Contact>(
                r#"
                SELECT * FROM contacts
                WHERE user_id = $1 AND id = ANY($2) AND NOT is_blocked
                ORDER BY name, id
                "#,
            )
            .bind(user_id)
            .bind(ids.clone()),
        };

        query
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::DatabaseError)
    }

    pub async fn create_broadcast(
        &self,
        user_id: Uuid,
        new: &NewBroadcast,
        recipients: &[Contact],
    ) -> Result<Broadcast, AppError> {
        let (group_id, tag_id) = match &new.target {
            BroadcastTarget::Group(id) => (Some(*id), None),
            BroadcastTarget::Tag(id) => (None, Some(*id)),
            BroadcastTarget::Contacts(_) => (None, None),
        };

        let mut tx = self.pool.begin().await.context("Begin transaction: create broadcast")?;

        let broadcast = sqlx::query_as::<_, Broadcast>(
            r#"
            INSERT INTO broadcasts (
                id, user_id, name, template_name, language_code, template_params,
                message_body, target_group_id, target_tag_id, status, total_recipients, started_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, now())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(&new.name)
        .bind(new.template_name.as_deref())
        .bind(&new.language_code)
        .bind(serde_json::json!(new.template_params))
        .bind(new.message_body.as_deref())
        .bind(group_id)
        .bind(tag_id)
        .bind(BroadcastStatus::Sending.as_str())
        .bind(recipients.len() as i32)
        .fetch_one(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;

        let ids: Vec<Uuid> = recipients.iter().map(|c| c.id).collect();
        sqlx::query(
            r#"
            INSERT INTO broadcast_recipients (broadcast_id, contact_id, status)
            SELECT $1, UNNEST($2::uuid[]), 'pending'
            "#,
        )
        .bind(broadcast.id)
        .bind(&ids)
        .execute(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;

        tx.commit().await.context("Commit transaction: create broadcast")?;
        Ok(broadcast)
    }

    pub async fn mark_recipient_sent(
        &self,
        broadcast_id: Uuid,
        contact_id: Uuid,
        wa_message_id: &str,
    ) -> Result<Broadcast, AppError> {
        let mut tx = self.pool.begin().await.context("Begin transaction: mark recipient sent")?;
        sqlx::query(
            r#"
            UPDATE broadcast_recipients
            SET status = 'sent', wa_message_id = $3, updated_at = now()
            WHERE broadcast_id = $1 AND contact_id = $2
            "#,
        )
        .bind(broadcast_id)
        .bind(contact_id)
        .bind(wa_message_id)
        .execute(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;

        let broadcast = sqlx::query_as::<_, Broadcast>(
            "UPDATE broadcasts SET sent_count = sent_count + 1 WHERE id = $1 RETURNING *",
        )
        .bind(broadcast_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;
        tx.commit().await.context("Commit transaction: mark recipient sent")?;
        Ok(broadcast)
    }

    pub async fn mark_recipient_failed(
        &self,
        broadcast_id: Uuid,
        contact_id: Uuid,
        error: &str,
    ) -> Result<Broadcast, AppError> {
        let mut tx = self.pool.begin().await.context("Begin transaction: mark recipient failed")?;
        sqlx::query(
            r#"
            UPDATE broadcast_recipients
            SET status = 'failed', error_message = $3, updated_at = now()
            WHERE broadcast_id = $1 AND contact_id = $2
            "#,
        )
        .bind(broadcast_id)
        .bind(contact_id)
        .bind(error)
        .execute(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;

        let broadcast = sqlx::query_as::<_, Broadcast>(
            "UPDATE broadcasts SET failed_count = failed_count + 1 WHERE id = $1 RETURNING *",
        )
        .bind(broadcast_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;
        tx.commit().await.context("Commit transaction: mark recipient failed")?;
        Ok(broadcast)
    }

    pub async fn finish_broadcast(
        &self,
        broadcast_id: Uuid,
        status: BroadcastStatus,
    ) -> Result<Broadcast, AppError> {
        sqlx::query_as::<_, Broadcast>(
            r#"
            UPDATE broadcasts SET status = $2, completed_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(broadcast_id)
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)
    }

    /// Mirrors a delivery callback onto the campaign recipient that carries
    /// the same provider id, if any.
    pub async fn update_recipient_status(
        &self,
        user_id: Uuid,
        wa_message_id: &str,
        status: &str,
        error: Option<&str>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE broadcast_recipients r
            SET status = $2, error_message = COALESCE($3, r.error_message), updated_at = now()
            FROM broadcasts b
            WHERE r.wa_message_id = $1 AND b.id = r.broadcast_id AND b.user_id = $4
            "#,
        )
        .bind(wa_message_id)
        .bind(status)
        .bind(error)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;
        Ok(result.rows_affected())
    }

    pub async fn list_broadcasts(
        &self,
        user_id: Uuid,
        page: Option<i64>,
        per_page: Option<i64>,
    ) -> Result<Page<Broadcast>, AppError> {
        let (page, per_page, offset) = page_window(page, per_page);

        let total =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM broadcasts WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
                .map_err(AppError::DatabaseError)?;

        let items = sqlx::query_as::<_, Broadcast>(
            r#"
            SELECT * FROM broadcasts WHERE user_id = $1
            ORDER BY created_at DESC, id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(per_page)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(Page {
            items,
            total,
            page,
            per_page,
        })
    }

    pub async fn get_broadcast_detail(
        &self,
        user_id: Uuid,
        broadcast_id: Uuid,
    ) -> Result<BroadcastDetail, AppError> {
        let broadcast = sqlx::query_as::<_, Broadcast>(
            "SELECT * FROM broadcasts WHERE id = $1 AND user_id = $2",
        )
        .bind(broadcast_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?
        .ok_or_else(|| AppError::NotFound(format!("Broadcast {}", broadcast_id)))?;

        let recipients = sqlx::query_as::<_, BroadcastRecipient>(
            r#"
            SELECT r.contact_id, c.name AS contact_name, c.phone, r.status,
                   r.wa_message_id, r.error_message, r.updated_at
            FROM broadcast_recipients r
            JOIN contacts c ON c.id = r.contact_id
            WHERE r.broadcast_id = $1
            ORDER BY c.name, c.id
            "#,
        )
        .bind(broadcast_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(BroadcastDetail {
            broadcast,
            recipients,
        })
    }
}
