/// Input validation for API routes and bot commands
use thiserror::Error;

/// Longest name accepted in lookups
pub const MAX_PLAYER_NAME_LEN: usize = 64;

/// Largest page the listing endpoint serves
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Player name cannot be empty")]
    PlayerNameEmpty,

    #[error("Player name too long (max 64 characters, got {0})")]
    PlayerNameTooLong(usize),

    #[error("Player name contains control characters")]
    PlayerNameInvalidChars,

    #[error("Page limit must be between 1 and 100, got {0}")]
    PageLimitOutOfRange(u32),
}

/// Validates a player name used for a lookup
///
/// Rules:
/// - Cannot be empty or only whitespace
/// - Max 64 characters
/// - No control characters
///
/// Site names may contain spaces and punctuation, so those are allowed.
pub fn validate_player_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::PlayerNameEmpty);
    }

    let len = name.chars().count();
    if len > MAX_PLAYER_NAME_LEN {
        return Err(ValidationError::PlayerNameTooLong(len));
    }

    if name.chars().any(char::is_control) {
        return Err(ValidationError::PlayerNameInvalidChars);
    }

    Ok(())
}

/// Validates the page size of a listing request
pub fn validate_page_limit(limit: u32) -> Result<(), ValidationError> {
    if limit == 0 || limit > MAX_PAGE_LIMIT {
        return Err(ValidationError::PageLimitOutOfRange(limit));
    }
    Ok(())
}
