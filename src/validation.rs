//! Input normalization shared by handlers, webhooks and broadcasts.

use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use std::sync::OnceLock;

use crate::errors::AppError;

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(
            r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
        )
        .expect("email regex is valid")
    })
}

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"(?i)\{\{\s*(name|phone)\s*\}\}").expect("placeholder regex is valid")
    })
}

/// Structural email check (local@domain.tld).
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    if email.len() < 5 {
        return false;
    }
    email_regex().is_match(email)
}

/// Validate and normalize a phone number to E.164.
///
/// Numbers without a `+` prefix are parsed in `default_country` (ISO 3166
/// alpha-2, falling back to India). A leading `00` is treated as `+`.
///
/// Returns: (is_valid, normalized_phone_or_error_msg)
pub fn validate_phone(raw: &str, default_country: &str) -> (bool, String) {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() < 7 {
        return (false, "Phone too short".to_string());
    }

    let candidate = match trimmed.strip_prefix("00") {
        Some(rest) => format!("+{}", rest),
        None => trimmed.to_string(),
    };

    let country = default_country
        .trim()
        .to_uppercase()
        .parse::<CountryId>()
        .unwrap_or(CountryId::IN);

    match phonenumber::parse(Some(country), &candidate) {
        Ok(number) if phonenumber::is_valid(&number) => {
            let formatted = number.format().mode(Mode::E164).to_string();
            tracing::debug!("Valid phone: {} -> {}", raw, formatted);
            (true, formatted)
        }
        Ok(_) => {
            tracing::debug!("Invalid phone number: {}", raw);
            (false, "Invalid phone number".to_string())
        }
        Err(e) => {
            tracing::debug!("Failed to parse phone '{}': {:?}", raw, e);
            (false, format!("Parse error: {:?}", e))
        }
    }
}

/// Like [`validate_phone`] but as a `Result` for handlers.
pub fn require_phone(raw: &str, default_country: &str) -> Result<String, AppError> {
    match validate_phone(raw, default_country) {
        (true, normalized) => Ok(normalized),
        (false, reason) => Err(AppError::BadRequest(format!(
            "Invalid phone number '{}': {}",
            raw, reason
        ))),
    }
}

/// WhatsApp ids are E.164 digits without the leading `+`.
pub fn wa_id_to_e164(wa_id: &str) -> String {
    let digits: String = wa_id.chars().filter(|c| c.is_ascii_digit()).collect();
    format!("+{}", digits)
}

pub fn e164_to_wa_id(phone: &str) -> String {
    phone.trim_start_matches('+').to_string()
}

/// Trims, collapses inner whitespace and lower-cases a tag name.
pub fn normalize_tag_name(raw: &str) -> Result<String, AppError> {
    let normalized = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    if normalized.is_empty() {
        return Err(AppError::BadRequest("Tag name cannot be empty".to_string()));
    }
    if normalized.chars().count() > 50 {
        return Err(AppError::BadRequest(
            "Tag name cannot exceed 50 characters".to_string(),
        ));
    }
    Ok(normalized)
}

/// Substitutes `{{name}}` and `{{phone}}` in a broadcast body.
/// Unknown placeholders are left untouched.
pub fn render_placeholders(template: &str, name: &str, phone: &str) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &regex::Captures| {
            match caps[1].to_lowercase().as_str() {
                "name" => name.to_string(),
                _ => phone.to_string(),
            }
        })
        .into_owned()
}

/// First line of a message body, capped for chat list previews.
pub fn preview(text: &str) -> String {
    const MAX: usize = 80;
    let first_line = text.lines().next().unwrap_or("").trim();
    if first_line.chars().count() <= MAX {
        first_line.to_string()
    } else {
        let cut: String = first_line.chars().take(MAX - 1).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indian_mobile_numbers_normalize() {
        assert_eq!(
            validate_phone("98765 43210", "IN"),
            (true, "+919876543210".to_string())
        );
        assert_eq!(
            validate_phone("+91-98765-43210", "IN"),
            (true, "+919876543210".to_string())
        );
        assert_eq!(
            validate_phone("0091 9876543210", "IN"),
            (true, "+919876543210".to_string())
        );
    }

    #[test]
    fn short_or_garbage_phones_are_rejected() {
        assert!(!validate_phone("", "IN").0);
        assert!(!validate_phone("12345", "IN").0);
        assert!(!validate_phone("not a phone", "IN").0);
    }

    #[test]
    fn unknown_country_falls_back_to_india() {
        assert_eq!(
            validate_phone("9876543210", "ZZ"),
            (true, "+919876543210".to_string())
        );
    }

    #[test]
    fn wa_ids_convert_both_ways() {
        assert_eq!(wa_id_to_e164("919876543210"), "+919876543210");
        assert_eq!(e164_to_wa_id("+919876543210"), "919876543210");
    }

    #[test]
    fn emails() {
        assert!(is_valid_email("owner@shop.in"));
        assert!(is_valid_email("  sales+leads@example.co.uk "));
        assert!(!is_valid_email("owner@shop"));
        assert!(!is_valid_email("@shop.in"));
        assert!(!is_valid_email("a@b"));
    }

    #[test]
    fn tag_names_are_normalized() {
        assert_eq!(normalize_tag_name("  VIP   Customer ").unwrap(), "vip customer");
        assert!(normalize_tag_name("   ").is_err());
    }

    #[test]
    fn placeholders_render() {
        assert_eq!(
            render_placeholders("Hi {{ Name }}, we saved {{phone}}. {{other}}", "Asha", "+91"),
            "Hi Asha, we saved +91. {{other}}"
        );
    }

    #[test]
    fn previews_use_first_line() {
        assert_eq!(preview("hello\nworld"), "hello");
        let long = "x".repeat(200);
        assert_eq!(preview(&long).chars().count(), 80);
    }
}
