use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{in_use_to_conflict, search_term, unique_to_conflict, Storage};
use crate::errors::AppError;
use crate::models::{
    page_window, ChatListParams, Contact, ContactListParams, Page, Tag, UpdateContactRequest,
};

const CONTACT_FILTER: &str = r#"
    c.user_id = $1
    AND ($2::text IS NULL
         OR c.name ILIKE $2 OR c.phone ILIKE $2
         OR c.email ILIKE $2 OR c.company ILIKE $2)
    AND ($3::uuid IS NULL
         OR EXISTS (SELECT 1 FROM contact_tags ct WHERE ct.contact_id = c.id AND ct.tag_id = $3))
"#;

impl Storage {
    pub async fn list_contacts(
        &self,
        user_id: Uuid,
        params: &ContactListParams,
    ) -> Result<Page<Contact>, AppError> {
        let (page, per_page, offset) = page_window(params.page, params.per_page);
        let term = search_term(params.q.as_deref());

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM contacts c WHERE {}",
            CONTACT_FILTER
        ))
        .bind(user_id)
        .bind(&term)
        .bind(params.tag)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        let items = sqlx::query_as::<_, Contact>(&format!(
            "SELECT c.* FROM contacts c WHERE {} ORDER BY c.name ASC, c.id LIMIT $4 OFFSET $5",
            CONTACT_FILTER
        ))
        .bind(user_id)
        .bind(&term)
        .bind(params.tag)
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

    /// Contacts that have exchanged at least one message, most recent first.
    pub async fn list_chats(
        &self,
        user_id: Uuid,
        params: &ChatListParams,
    ) -> Result<Page<Contact>, AppError> {
        let (page, per_page, offset) = page_window(params.page, params.per_page);
        let term = search_term(params.q.as_deref());

        let filter = r#"
            user_id = $1 AND last_message_at IS NOT NULL
            AND ($2::text IS NULL OR name ILIKE $2 OR phone ILIKE $2)
        "#;

        let total = sqlx::query_scalar::<_, i64>(&format!(
            "SELECT COUNT(*) FROM contacts WHERE {}",
            filter
        ))
        .bind(user_id)
        .bind(&term)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        let items = sqlx::query_as::<_, Contact>(&format!(
            "SELECT * FROM contacts WHERE {} ORDER BY last_message_at DESC, id LIMIT $3 OFFSET $4",
            filter
        ))
        .bind(user_id)
        .bind(&term)
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

    /// Free-text lookup for the assistant.
    pub async fn search_contacts(
        &self,
        user_id: Uuid,
        query: &str,
        limit: i64,
    ) -> Result<Vec<Contact>, AppError> {
        sqlx::query_as::<_, Contact>(&format!(
            "SELECT c.* FROM contacts c WHERE {} ORDER BY c.name LIMIT $4",
            CONTACT_FILTER
        ))
        .bind(user_id)
        .bind(search_term(Some(query)))
        .bind(Option::<Uuid>::None)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)
    }

    /// `phone` must already be normalized to E.164.
    pub async fn create_contact(
        &self,
        user_id: Uuid,
        name: &str,
        phone: &str,
        email: Option<&str>,
        company: Option<&str>,
        notes: Option<&str>,
    ) -> Result<Contact, AppError> {
        sqlx::query_as::<_, Contact>(
            r#"
            INSERT INTO contacts (id, user_id, name, phone, email, company, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(name)
        .bind(phone)
        .bind(email)
        .bind(company)
        .bind(notes)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| unique_to_conflict(e, format!("A contact with phone {} already exists", phone)))
    }

    pub async fn get_contact(&self, user_id: Uuid, contact_id: Uuid) -> Result<Contact, AppError> {
        sqlx::query_as::<_, Contact>("SELECT * FROM contacts WHERE id = $1 AND user_id = $2")
            .bind(contact_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?
            .ok_or_else(|| AppError::NotFound(format!("Contact {}", contact_id)))
    }

    pub async fn contact_tags(&self, contact_id: Uuid) -> Result<Vec<Tag>, AppError> {
        sqlx::query_as::<_, Tag>(
            r#"
            SELECT t.* FROM tags t
            JOIN contact_tags ct ON ct.tag_id = t.id
            WHERE ct.contact_id = $1
            ORDER BY t.name
            "#,
        )
        .bind(contact_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)
    }

    /// Partial update. A `phone` in the patch must already be normalized.
    pub async fn update_contact(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
        patch: &UpdateContactRequest,
    ) -> Result<Contact, AppError> {
        sqlx::query_as::<_, Contact>(
            r#"
            UPDATE contacts
            SET name = COALESCE($3, name),
                phone = COALESCE($4, phone),
                email = COALESCE($5, email),
                company = COALESCE($6, company),
                notes = COALESCE($7, notes),
                is_blocked = COALESCE($8, is_blocked),
                updated_at = now()
            WHERE id = $1 AND user_id = $2
            RETURNING *
            "#,
        )
        .bind(contact_id)
        .bind(user_id)
        .bind(patch.name.as_deref())
        .bind(patch.phone.as_deref())
        .bind(patch.email.as_deref())
        .bind(patch.company.as_deref())
        .bind(patch.notes.as_deref())
        .bind(patch.is_blocked)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| unique_to_conflict(e, "Another contact already uses this phone number"))?
        .ok_or_else(|| AppError::NotFound(format!("Contact {}", contact_id)))
    }

    pub async fn delete_contact(&self, user_id: Uuid, contact_id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM contacts WHERE id = $1 AND user_id = $2")
            .bind(contact_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                in_use_to_conflict(e, "Contact has quotations, orders or payments and cannot be deleted")
            })?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Contact {}", contact_id)));
        }
        Ok(())
    }

    /// Finds the contact for an inbound WhatsApp sender, creating it on first
    /// contact. An existing contact keeps its name.
    pub async fn upsert_inbound_contact(
        &self,
        user_id: Uuid,
        phone: &str,
        profile_name: Option<&str>,
    ) -> Result<(Contact, bool), AppError> {
        if let Some(existing) =
            sqlx::query_as::<_, Contact>("SELECT * FROM contacts WHERE user_id = $1 AND phone = $2")
                .bind(user_id)
                .bind(phone)
                .fetch_optional(&self.pool)
                .await
                .map_err(AppError::DatabaseError)?
        {
            return Ok((existing, false));
        }

        let name = profile_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(phone);

        // A concurrent webhook may have inserted the same sender.
        let contact = sqlx::query_as::<_, Contact>(
            r#"
            INSERT INTO contacts (id, user_id, name, phone)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, phone) DO UPDATE SET updated_at = contacts.updated_at
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(name)
        .bind(phone)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok((contact, true))
    }

    pub async fn record_inbound_activity(
        &self,
        contact_id: Uuid,
        preview: &str,
        at: DateTime<Utc>,
    ) -> Result<Contact, AppError> {
        sqlx::query_as::<_, Contact>(
            r#"
            UPDATE contacts
            SET unread_count = unread_count + 1,
                last_message_at = GREATEST(COALESCE(last_message_at, $3), $3),
                last_message_preview = $2,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(contact_id)
        .bind(preview)
        .bind(at)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::DatabaseError)
    }

    pub async fn record_outbound_activity(
        &self,
        contact_id: Uuid,
        preview: &str,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE contacts
            SET last_message_at = now(), last_message_preview = $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(contact_id)
        .bind(preview)
        .execute(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;
        Ok(())
    }

    pub async fn reset_unread(&self, user_id: Uuid, contact_id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE contacts SET unread_count = 0 WHERE id = $1 AND user_id = $2")
            .bind(contact_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(())
    }
}
