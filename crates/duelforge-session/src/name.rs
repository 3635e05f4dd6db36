//! Display-name rules.

use crate::SessionError;

/// Longest accepted display name, counted in `char`s after trimming.
pub const MAX_NAME_CHARS: usize = 16;

/// Normalizes and validates a requested display name.
///
/// Surrounding whitespace is trimmed. The result must be non-empty, at
/// most [`MAX_NAME_CHARS`] characters, and free of control characters.
///
/// # Errors
/// Returns [`SessionError::InvalidName`] with a human-readable reason.
pub fn validate_name(raw: &str) -> Result<String, SessionError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(SessionError::InvalidName("name is empty".into()));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(SessionError::InvalidName(format!(
            "name is longer than {MAX_NAME_CHARS} characters"
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(SessionError::InvalidName(
            "name contains control characters".into(),
        ));
    }
    Ok(name.to_owned())
}
