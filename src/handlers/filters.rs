//! Validation shared by the list endpoints' query filters.

use crate::error::{AppError, Result};

/// Substring filters shorter than this match too broadly to be useful.
pub const MIN_SUBSTRING_FILTER_LENGTH: usize = 3;

fn empty(name: &str) -> AppError {
    AppError::InvalidArgument(format!(
        "invalid filter: {:?} provided but is empty",
        name
    ))
}

/// A filter that may be given any number of times.
pub fn repeated(name: &str, values: Vec<String>) -> Result<Vec<String>> {
    if values.iter().any(|v| v.is_empty()) {
        return Err(empty(name));
    }
    Ok(values)
}

/// A filter that may be given at most once.
pub fn single(name: &str, values: Vec<String>) -> Result<Option<String>> {
    let mut values = repeated(name, values)?;
    if values.len() > 1 {
        return Err(AppError::InvalidArgument(format!(
            "invalid filter: {:?} provided more than once",
            name
        )));
    }
    Ok(values.pop())
}

/// A single substring filter of at least [`MIN_SUBSTRING_FILTER_LENGTH`]
/// characters.
pub fn substring(name: &str, values: Vec<String>) -> Result<Option<String>> {
    let value = single(name, values)?;
    if let Some(v) = &value {
        if v.chars().count() < MIN_SUBSTRING_FILTER_LENGTH {
            return Err(AppError::InvalidArgument(format!(
                "invalid filter: {:?} must be at least {} characters",
                name, MIN_SUBSTRING_FILTER_LENGTH
            )));
        }
    }
    Ok(value)
}
