//! Validation helpers for DTOs.

use validator::ValidationError;

/// Length of generated room codes.
pub const ROOM_CODE_LEN: usize = 6;
/// Longest accepted room or player name, in characters.
pub const MAX_NAME_CHARS: usize = 32;
/// Highest score a single submission may carry.
pub const MAX_SCORE: i64 = 1_000_000_000;

/// Validates that a room code is exactly six upper-case alphanumeric characters.
///
/// # Examples
///
/// ```ignore
/// validate_room_code("ABC123") // Ok
/// validate_room_code("abc123") // Err - lowercase
/// validate_room_code("ABC12")  // Err - too short
/// ```
pub fn validate_room_code(code: &str) -> Result<(), ValidationError> {
    if code.len() != ROOM_CODE_LEN {
        let mut err = ValidationError::new("room_code_length");
        err.message = Some(
            format!(
                "Room code must be exactly {ROOM_CODE_LEN} characters (got {})",
                code.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !code
        .chars()
        .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase())
    {
        let mut err = ValidationError::new("room_code_format");
        err.message = Some("Room code must contain only A-Z and 0-9".into());
        return Err(err);
    }

    Ok(())
}

/// Validates a display name: 1 to 32 characters once surrounding whitespace is removed.
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    let count = name.trim().chars().count();
    if count == 0 || count > MAX_NAME_CHARS {
        let mut err = ValidationError::new("name_length");
        err.message =
            Some(format!("Name must be between 1 and {MAX_NAME_CHARS} characters").into());
        return Err(err);
    }
    Ok(())
}
