//! Custom field validators used with `#[derive(Validate)]`

use validator::ValidationError;

/// Twitch login charset: lowercase ASCII letters, digits and `_`
pub fn validate_channel_login(channel: &str) -> Result<(), ValidationError> {
    if channel
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_channel_login"))
    }
}

/// Stream keys travel in form fields; no embedded whitespace or control characters
pub fn validate_stream_key_shape(key: &str) -> Result<(), ValidationError> {
    if key.trim().chars().any(|c| c.is_control() || c.is_whitespace()) {
        Err(ValidationError::new("invalid_stream_key"))
    } else {
        Ok(())
    }
}
