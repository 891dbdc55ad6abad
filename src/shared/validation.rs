//! Validation Utilities

use validator::ValidationErrors;

use super::error::AppError;

/// Convert validation errors to AppError
pub fn validation_error(errors: ValidationErrors) -> AppError {
    let mut fields: Vec<String> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| match &e.message {
                Some(m) => format!("{}: {}", field, m),
                None => format!("{}: invalid ({})", field, e.code),
            })
        })
        .collect();
    fields.sort();

    match fields.first() {
        Some(first) => AppError::Invalid(first.clone()),
        None => AppError::Invalid("Validation failed".into()),
    }
}
