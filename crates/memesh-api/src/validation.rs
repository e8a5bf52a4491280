use crate::types::*;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("empty field {0}")]
    Empty(&'static str),
    #[error("too long {0}")]
    TooLong(&'static str),
    #[error("message has neither text nor image")]
    EmptyMessage,
}

pub fn validate_credential(credential: &Credential) -> Result<(), ValidationError> {
    if credential.is_blank() {
        return Err(ValidationError::Empty("credential"));
    }
    Ok(())
}

pub fn validate_display_name(name: &str, limits: &ValidationLimits) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty("display_name"));
    }
    if trimmed.len() > limits.max_display_name_len {
        return Err(ValidationError::TooLong("display_name"));
    }
    Ok(())
}

/// Checks a draft and returns the form that goes on the wire: text trimmed,
/// blank text and blank image references dropped.
pub fn normalize_draft(draft: &Draft, limits: &ValidationLimits) -> Result<Draft, ValidationError> {
    let text = draft
        .text
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);
    let image_ref = draft
        .image_ref
        .as_deref()
        .filter(|i| !i.trim().is_empty())
        .map(str::to_string);
    if text.is_none() && image_ref.is_none() {
        return Err(ValidationError::EmptyMessage);
    }
    if text.as_deref().unwrap_or("").len() > limits.max_text_bytes {
        return Err(ValidationError::TooLong("text"));
    }
    Ok(Draft { text, image_ref })
}
