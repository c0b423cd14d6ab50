//! Bearer-token authentication for the business API.

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::AppError;
use crate::handlers::AppState;
use crate::models::User;
use crate::signatures::sha256_hex;
use crate::storage::Storage;
use crate::whatsapp_client::WhatsAppCredentials;

/// The authenticated business owner, inserted into request extensions.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

impl AuthUser {
    pub fn id(&self) -> Uuid {
        self.0.id
    }

    /// Cloud API credentials, or 400 when WhatsApp is not connected yet.
    pub fn whatsapp(&self) -> Result<WhatsAppCredentials, AppError> {
        whatsapp_credentials(&self.0)
    }
}

pub fn whatsapp_credentials(user: &User) -> Result<WhatsAppCredentials, AppError> {
    user.whatsapp_credentials()
        .map(|(phone_number_id, access_token)| WhatsAppCredentials {
            phone_number_id,
            access_token,
        })
        .ok_or_else(|| {
            AppError::BadRequest(
                "WhatsApp is not connected; set credentials with PUT /api/v1/me/whatsapp"
                    .to_string(),
            )
        })
}

/// 32 random bytes, hex encoded. Shown once; only the hash is stored.
pub fn generate_api_token() -> String {
    let mut bytes = Vec::with_capacity(32);
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    hex::encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    sha256_hex(token.trim().as_bytes())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolves a raw token to its owner.
pub async fn authenticate(storage: &Storage, token: &str) -> Result<User, AppError> {
    storage
        .find_user_by_token_hash(&hash_token(token))
        .await?
        .ok_or_else(|| AppError::Unauthorized("Invalid API token".to_string()))
}

/// Middleware for `/api/v1/*`: requires `Authorization: Bearer <token>`.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(req.headers())
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;

    let user = authenticate(&state.storage, token).await.map_err(|e| {
        if matches!(e, AppError::Unauthorized(_)) {
            tracing::warn!("Rejected request with unknown API token");
        }
        e
    })?;

    tracing::debug!("Authenticated user {}", user.id);
    req.extensions_mut().insert(AuthUser(user));
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn tokens_are_64_hex_chars_and_unique() {
        let a = generate_api_token();
        let b = generate_api_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn hashing_ignores_surrounding_whitespace() {
        assert_eq!(hash_token(" abc "), hash_token("abc"));
        assert_eq!(hash_token("abc").len(), 64);
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer tok123"));
        assert_eq!(bearer_token(&headers), Some("tok123"));

        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer    "));
        assert_eq!(bearer_token(&headers), None);
    }
}
