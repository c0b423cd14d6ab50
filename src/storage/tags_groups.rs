use uuid::Uuid;

use super::Storage;
use crate::errors::AppError;
use crate::models::{Contact, ContactGroup, GroupDetail, GroupWithCount, Tag, TagWithCount};

impl Storage {
    pub async fn list_tags(&self, user_id: Uuid) -> Result<Vec<TagWithCount>, AppError> {
        sqlx::query_as::<_, TagWithCount>(
            r#"
            SELECT t.id, t.name, t.color, COUNT(ct.contact_id) AS contact_count
            FROM tags t
            LEFT JOIN contact_tags ct ON ct.tag_id = t.id
            WHERE t.user_id = $1
            GROUP BY t.id
            ORDER BY t.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)
    }

    /// Insert a tag, or return the existing one with the same (normalized) name.
    /// Runs outside any transaction: the unique violation would abort it.
    pub async fn create_or_fetch_tag(
        &self,
        user_id: Uuid,
        name: &str,
        color: Option<&str>,
    ) -> Result<Tag, AppError> {
        let inserted = sqlx::query_as::<_, Tag>(
            "INSERT INTO tags (id, user_id, name, color) VALUES ($1, $2, $3, $4) RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(name)
        .bind(color)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(tag) => Ok(tag),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                tracing::debug!("Tag '{}' already exists, fetching", name);
                sqlx::query_as::<_, Tag>("SELECT * FROM tags WHERE user_id = $1 AND name = $2")
                    .bind(user_id)
                    .bind(name)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(AppError::DatabaseError)
            }
            Err(e) => Err(AppError::DatabaseError(e)),
        }
    }

    pub async fn get_tag(&self, user_id: Uuid, tag_id: Uuid) -> Result<Tag, AppError> {
        sqlx::query_as::<_, Tag>("SELECT * FROM tags WHERE id = $1 AND user_id = $2")
            .bind(tag_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?
            .ok_or_else(|| AppError::NotFound(format!("Tag {}", tag_id)))
    }

    pub async fn delete_tag(&self, user_id: Uuid, tag_id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM tags WHERE id = $1 AND user_id = $2")
            .bind(tag_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Tag {}", tag_id)));
        }
        Ok(())
    }

    /// Attach already-normalized tag names to a contact, creating missing tags.
    pub async fn attach_tags(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
        names: &[String],
    ) -> Result<Vec<Tag>, AppError> {
        self.get_contact(user_id, contact_id).await?;

        for name in names {
            let tag = self.create_or_fetch_tag(user_id, name, None).await?;
            sqlx::query(
                "INSERT INTO contact_tags (contact_id, tag_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(contact_id)
            .bind(tag.id)
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        }

        self.contact_tags(contact_id).await
    }

    pub async fn detach_tag(
        &self,
        user_id: Uuid,
        contact_id: Uuid,
        tag_id: Uuid,
    ) -> Result<(), AppError> {
        self.get_contact(user_id, contact_id).await?;
        sqlx::query("DELETE FROM contact_tags WHERE contact_id = $1 AND tag_id = $2")
            .bind(contact_id)
            .bind(tag_id)
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(())
    }

    // ============ Groups ============

    pub async fn list_groups(&self, user_id: Uuid) -> Result<Vec<GroupWithCount>, AppError> {
        sqlx::query_as::<_, GroupWithCount>(
            r#"
            SELECT g.id, g.name, g.description, g.created_at, COUNT(m.contact_id) AS member_count
            FROM contact_groups g
            LEFT JOIN group_members m ON m.group_id = g.id
            WHERE g.user_id = $1
            GROUP BY g.id
            ORDER BY g.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)
    }

    pub async fn create_group(
        &self,
        user_id: Uuid,
        name: &str,
        description: Option<&str>,
        contact_ids: &[Uuid],
    ) -> Result<GroupDetail, AppError> {
        let mut tx = self.pool.begin().await.map_err(AppError::DatabaseError)?;

        let group = sqlx::query_as::<_, ContactGroup>(
            r#"
            INSERT INTO contact_groups (id, user_id, name, description)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(name)
        .bind(description)
        .fetch_one(&mut *tx)
        .await
        .map_err(AppError::DatabaseError)?;

        add_members(&mut tx, user_id, group.id, contact_ids).await?;
        tx.commit().await.map_err(AppError::DatabaseError)?;

        self.get_group_detail(user_id, group.id).await
    }

    pub async fn get_group(&self, user_id: Uuid, group_id: Uuid) -> Result<ContactGroup, AppError> {
        sqlx::query_as::<_, ContactGroup>(
            "SELECT * FROM contact_groups WHERE id = $1 AND user_id = $2",
        )
        .bind(group_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?
        .ok_or_else(|| AppError::NotFound(format!("Group {}", group_id)))
    }

    pub async fn get_group_detail(
        &self,
        user_id: Uuid,
        group_id: Uuid,
    ) -> Result<GroupDetail, AppError> {
        let group = self.get_group(user_id, group_id).await?;
        let members = sqlx::query_as::<_, Contact>(
            r#"
            SELECT c.* FROM contacts c
            JOIN group_members m ON m.contact_id = c.id
            WHERE m.group_id = $1
            ORDER BY c.name
            "#,
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::DatabaseError)?;

        Ok(GroupDetail { group, members })
    }

    pub async fn update_group_members(
        &self,
        user_id: Uuid,
        group_id: Uuid,
        add: &[Uuid],
        remove: &[Uuid],
    ) -> Result<GroupDetail, AppError> {
        self.get_group(user_id, group_id).await?;

        let mut tx = self.pool.begin().await.map_err(AppError::DatabaseError)?;
        add_members(&mut tx, user_id, group_id, add).await?;
        if !remove.is_empty() {
            sqlx::query("DELETE FROM group_members WHERE group_id = $1 AND contact_id = ANY($2)")
                .bind(group_id)
                .bind(remove)
                .execute(&mut *tx)
                .await
                .map_err(AppError::DatabaseError)?;
        }
        tx.commit().await.map_err(AppError::DatabaseError)?;

        self.get_group_detail(user_id, group_id).await
    }

    pub async fn delete_group(&self, user_id: Uuid, group_id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM contact_groups WHERE id = $1 AND user_id = $2")
            .bind(group_id)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Group {}", group_id)));
        }
        Ok(())
    }
}

/// Adds only contacts owned by `user_id`; unknown ids are ignored.
async fn add_members(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    group_id: Uuid,
    contact_ids: &[Uuid],
) -> Result<(), AppError> {
    if contact_ids.is_empty() {
        return Ok(());
    }
    sqlx::query(
        r#"
        INSERT INTO group_members (group_id, contact_id)
        SELECT $1, id FROM contacts WHERE user_id = $2 AND id = ANY($3)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(group_id)
    .bind(user_id)
    .bind(contact_ids)
    .execute(&mut **tx)
    .await
    .map_err(AppError::DatabaseError)?;
    Ok(())
}
