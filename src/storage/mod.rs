//! PostgreSQL persistence. One `Storage` handle, with its methods split by
//! entity across the submodules. Every query is scoped by the caller's
//! `user_id`; rows owned by someone else look exactly like missing rows.

mod billing_docs;
mod catalog;
mod contacts;
mod dashboard;
mod messages;
mod broadcasts;
mod payments;
mod tags_groups;
mod users;
mod webhook_events;

pub use billing_docs::{NewOrder, NewQuotation, QuotationPatch};
pub use broadcasts::{BroadcastTarget, NewBroadcast};
pub use dashboard::OutstandingItem;
pub use messages::NewMessage;
pub use payments::{LinkPaymentDraft, PaymentApplied};

use sqlx::PgPool;

use crate::errors::AppError;

#[derive(Clone)]
pub struct Storage {
    pool: PgPool,
}

impl Storage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Connectivity check used by the health endpoint.
    pub async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(AppError::DatabaseError)?;
        Ok(())
    }
}

/// Maps unique-constraint violations to `Conflict`, everything else to
/// `DatabaseError`.
pub(crate) fn unique_to_conflict(err: sqlx::Error, message: impl Into<String>) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict(message.into())
        }
        _ => AppError::DatabaseError(err),
    }
}

/// Maps foreign-key violations (a row still referenced elsewhere) to `Conflict`.
pub(crate) fn in_use_to_conflict(err: sqlx::Error, message: impl Into<String>) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
            AppError::Conflict(message.into())
        }
        _ => AppError::DatabaseError(err),
    }
}

/// `%term%` for ILIKE, with the pattern metacharacters escaped.
pub(crate) fn like_pattern(term: &str) -> String {
    let escaped = term
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

/// Optional search term: blank strings mean "no filter".
pub(crate) fn search_term(q: Option<&str>) -> Option<String> {
    q.map(str::trim).filter(|s| !s.is_empty()).map(like_pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_patterns_escape_wildcards() {
        assert_eq!(like_pattern(" rice "), "%rice%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }

    #[test]
    fn blank_search_is_no_filter() {
        assert_eq!(search_term(None), None);
        assert_eq!(search_term(Some("   ")), None);
        assert_eq!(search_term(Some("asha")), Some("%asha%".to_string()));
    }
}
