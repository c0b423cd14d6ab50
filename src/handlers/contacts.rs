use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::{require_text, AppState};
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::events::EventPayload;
use crate::models::{
    AttachTagsRequest, Contact, ContactDetail, ContactListParams, CreateContactRequest, Page, Tag,
    UpdateContactRequest,
};
use crate::validation::{is_valid_email, normalize_tag_name, require_phone};

fn check_email(email: Option<&str>) -> Result<(), AppError> {
    match email.map(str::trim) {
        Some(e) if !e.is_empty() && !is_valid_email(e) => {
            Err(AppError::BadRequest(format!("Invalid email '{}'", e)))
        }
        _ => Ok(()),
    }
}

fn normalize_tags(raw: &[String]) -> Result<Vec<String>, AppError> {
    let mut names = Vec::with_capacity(raw.len());
    for name in raw {
        let normalized = normalize_tag_name(name)?;
        if !names.contains(&normalized) {
            names.push(normalized);
        }
    }
    Ok(names)
}

/// GET /api/v1/contacts
#[utoipa::path(
    get,
    path = "/api/v1/contacts",
    params(
        ("q" = Option<String>, Query, description = "Search name, phone, email or company"),
        ("tag" = Option<Uuid>, Query, description = "Only contacts with this tag"),
        ("page" = Option<i64>, Query,),
        ("per_page" = Option<i64>, Query,)
    ),
    responses((status = 200, description = "Page of contacts")),
    tag = "contacts"
)]
pub async fn list_contacts(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(params): Query<ContactListParams>,
) -> Result<Json<Page<Contact>>, AppError> {
    let page = state.storage.list_contacts(user.id(), &params).await?;
    Ok(Json(page))
}

/// POST /api/v1/contacts
///
/// The phone number is normalized to E.164 in the configured default country;
/// a second contact with the same number is a 409.
#[utoipa::path(
    post,
    path = "/api/v1/contacts",
    request_body = CreateContactRequest,
    responses(
        (status = 201, description = "Contact created"),
        (status = 400, description = "Invalid name, phone or email"),
        (status = 409, description = "Phone number already exists")
    ),
    tag = "contacts"
)]
pub async fn create_contact(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateContactRequest>,
) -> Result<(StatusCode, Json<ContactDetail>), AppError> {
    let name = require_text(&req.name, "name")?;
    let phone = require_phone(&req.phone, &state.config.default_country)?;
    check_email(req.email.as_deref())?;
    let tags = normalize_tags(&req.tags)?;

    let contact = state
        .storage
        .create_contact(
            user.id(),
            name,
            &phone,
            req.email.as_deref().map(str::trim),
            req.company.as_deref(),
            req.notes.as_deref(),
        )
        .await?;

    let tags = if tags.is_empty() {
        Vec::new()
    } else {
        state.storage.attach_tags(user.id(), contact.id, &tags).await?
    };

    tracing::info!("✓ Contact created: {} ({})", contact.id, contact.phone);
    state.events.publish(
        user.id(),
        EventPayload::ContactUpdated {
            contact: contact.clone(),
        },
    );

    Ok((StatusCode::CREATED, Json(ContactDetail { contact, tags })))
}

/// GET /api/v1/contacts/:id
#[utoipa::path(
    get,
    path = "/api/v1/contacts/{id}",
    params(("id" = Uuid, Path, description = "Contact id")),
    responses((status = 200, description = "Contact with tags"), (status = 404, description = "Not found")),
    tag = "contacts"
)]
pub async fn get_contact(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<ContactDetail>, AppError> {
    let contact = state.storage.get_contact(user.id(), id).await?;
    let tags = state.storage.contact_tags(contact.id).await?;
    Ok(Json(ContactDetail { contact, tags }))
}

/// PATCH /api/v1/contacts/:id
///
/// Partial update; `is_blocked` blocks or unblocks the contact.
#[utoipa::path(
    patch,
    path = "/api/v1/contacts/{id}",
    params(("id" = Uuid, Path, description = "Contact id")),
    request_body = UpdateContactRequest,
    responses((status = 200, description = "Updated contact"), (status = 409, description = "Phone number taken")),
    tag = "contacts"
)]
pub async fn update_contact(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(mut req): Json<UpdateContactRequest>,
) -> Result<Json<ContactDetail>, AppError> {
    if let Some(name) = &req.name {
        req.name = Some(require_text(name, "name")?.to_string());
    }
    if let Some(phone) = &req.phone {
        req.phone = Some(require_phone(phone, &state.config.default_country)?);
    }
    check_email(req.email.as_deref())?;

    let contact = state.storage.update_contact(user.id(), id, &req).await?;
    if let Some(blocked) = req.is_blocked {
        tracing::info!(
            "Contact {} {}",
            contact.id,
            if blocked { "blocked" } else { "unblocked" }
        );
    }

    state.events.publish(
        user.id(),
        EventPayload::ContactUpdated {
            contact: contact.clone(),
        },
    );
    let tags = state.storage.contact_tags(contact.id).await?;
    Ok(Json(ContactDetail { contact, tags }))
}

/// DELETE /api/v1/contacts/:id
///
/// Contacts referenced by quotations, orders or payments cannot be deleted (409);
/// block them instead.
#[utoipa::path(
    delete,
    path = "/api/v1/contacts/{id}",
    params(("id" = Uuid, Path, description = "Contact id")),
    responses((status = 204, description = "Deleted"), (status = 409, description = "Contact has billing history")),
    tag = "contacts"
)]
pub async fn delete_contact(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.storage.delete_contact(user.id(), id).await?;
    tracing::info!("Contact {} deleted", id);
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/contacts/:id/tags
#[utoipa::path(
    post,
    path = "/api/v1/contacts/{id}/tags",
    params(("id" = Uuid, Path, description = "Contact id")),
    request_body = AttachTagsRequest,
    responses((status = 200, description = "All tags of the contact")),
    tag = "contacts"
)]
pub async fn attach_tags(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<Uuid>,
    Json(req): Json<AttachTagsRequest>,
) -> Result<Json<Vec<Tag>>, AppError> {
    let names = normalize_tags(&req.tags)?;
    if names.is_empty() {
        return Err(AppError::BadRequest("No tags given".to_string()));
    }
    let tags = state.storage.attach_tags(user.id(), id, &names).await?;
    Ok(Json(tags))
}

/// DELETE /api/v1/contacts/:id/tags/:tag_id
#[utoipa::path(
    delete,
    path = "/api/v1/contacts/{id}/tags/{tag_id}",
    params(
        ("id" = Uuid, Path, description = "Contact id"),
        ("tag_id" = Uuid, Path, description = "Tag id")
    ),
    responses((status = 204, description = "Tag removed from contact")),
    tag = "contacts"
)]
pub async fn detach_tag(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path((id, tag_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    state.storage.detach_tag(user.id(), id, tag_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_names_are_normalized_and_deduplicated() {
        let raw = vec![
            " VIP ".to_string(),
            "vip".to_string(),
            "Wholesale  Buyer".to_string(),
        ];
        assert_eq!(
            normalize_tags(&raw).unwrap(),
            vec!["vip".to_string(), "wholesale buyer".to_string()]
        );
        assert!(normalize_tags(&["  ".to_string()]).is_err());
    }

    #[test]
    fn blank_email_is_allowed_but_malformed_is_not() {
        assert!(check_email(None).is_ok());
        assert!(check_email(Some("")).is_ok());
        assert!(check_email(Some("asha@shop.in")).is_ok());
        assert!(check_email(Some("not-an-email")).is_err());
    }
}
