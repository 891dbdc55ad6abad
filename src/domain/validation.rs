//! Normalization rules applied before anything is persisted.
//!
//! Both Store implementations and the message router call these so that a
//! given input is accepted or rejected identically everywhere.

use uuid::Uuid;

use super::StoreError;

/// Maximum message length in characters, after trimming
pub const MAX_CONTENT_CHARS: usize = 4000;

/// Maximum server/channel name length in characters
pub const MAX_NAME_CHARS: usize = 64;

pub const MAX_DESCRIPTION_CHARS: usize = 1024;
pub const MAX_STATUS_CHARS: usize = 128;
pub const MAX_BIO_CHARS: usize = 1024;

pub const MIN_USERNAME_CHARS: usize = 3;
pub const MAX_USERNAME_CHARS: usize = 32;

pub const MIN_NONCE_CHARS: usize = 16;
pub const MAX_NONCE_CHARS: usize = 64;

/// Re-posts with the same nonce inside this window return the original message
pub const NONCE_WINDOW_SECS: i64 = 600;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 200;

/// Channels created alongside every new server
pub const DEFAULT_CHANNELS: [&str; 2] = ["general", "random"];

/// Trim message content and enforce the length bounds.
pub fn normalize_content(raw: &str) -> Result<String, StoreError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(StoreError::Empty);
    }
    if trimmed.chars().count() > MAX_CONTENT_CHARS {
        return Err(StoreError::PayloadTooLarge);
    }
    Ok(trimmed.to_string())
}

pub fn normalize_server_name(raw: &str) -> Result<String, StoreError> {
    let trimmed = raw.trim();
    check_length("Server name", trimmed, 1, MAX_NAME_CHARS)?;
    check_printable("Server name", trimmed)?;
    Ok(trimmed.to_string())
}

/// Channel names are trimmed and lowercased; uniqueness is per server.
pub fn normalize_channel_name(raw: &str) -> Result<String, StoreError> {
    let normalized = raw.trim().to_lowercase();
    check_length("Channel name", &normalized, 1, MAX_NAME_CHARS)?;
    check_printable("Channel name", &normalized)?;
    Ok(normalized)
}

/// Blank descriptions collapse to `None`.
pub fn normalize_description(raw: Option<&str>) -> Result<Option<String>, StoreError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(d) => {
            check_length("Description", d, 1, MAX_DESCRIPTION_CHARS)?;
            Ok(Some(d.to_string()))
        }
    }
}

pub fn validate_nonce(raw: Option<&str>) -> Result<Option<String>, StoreError> {
    match raw {
        None => Ok(None),
        Some(n) => {
            check_length("Nonce", n, MIN_NONCE_CHARS, MAX_NONCE_CHARS)?;
            if n.chars().any(|c| c.is_control() || c.is_whitespace()) {
                return Err(StoreError::Invalid(
                    "Nonce must not contain whitespace or control characters".into(),
                ));
            }
            Ok(Some(n.to_string()))
        }
    }
}

pub fn normalize_status(raw: &str) -> Result<String, StoreError> {
    let trimmed = raw.trim();
    check_length("Status", trimmed, 0, MAX_STATUS_CHARS)?;
    Ok(trimmed.to_string())
}

pub fn normalize_bio(raw: &str) -> Result<String, StoreError> {
    let trimmed = raw.trim();
    check_length("Bio", trimmed, 0, MAX_BIO_CHARS)?;
    Ok(trimmed.to_string())
}

/// Derive a valid username from an identity-provider claim.
///
/// Falls back to `user-<8 hex>` when the claim is missing or cannot be made
/// valid.
pub fn sanitize_username(claim: Option<&str>, user_id: Uuid) -> String {
    let candidate: String = claim
        .unwrap_or_default()
        .trim()
        .chars()
        .filter(|c| !c.is_control() && !c.is_whitespace())
        .take(MAX_USERNAME_CHARS)
        .collect();

    if candidate.chars().count() >= MIN_USERNAME_CHARS {
        candidate
    } else {
        fallback_username(user_id)
    }
}

pub fn fallback_username(user_id: Uuid) -> String {
    format!("user-{}", &user_id.simple().to_string()[..8])
}

/// Append a short suffix to a username that collided, keeping it within bounds.
pub fn disambiguate_username(username: &str, attempt: u32) -> String {
    let suffix = format!("-{}", attempt);
    let keep = MAX_USERNAME_CHARS - suffix.len();
    let base: String = username.chars().take(keep).collect();
    format!("{}{}", base, suffix)
}

fn check_length(field: &str, value: &str, min: usize, max: usize) -> Result<(), StoreError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(StoreError::Invalid(format!(
            "{} must be between {} and {} characters",
            field, min, max
        )));
    }
    Ok(())
}

fn check_printable(field: &str, value: &str) -> Result<(), StoreError> {
    if value.chars().any(char::is_control) {
        return Err(StoreError::Invalid(format!(
            "{} must not contain control characters",
            field
        )));
    }
    Ok(())
}
