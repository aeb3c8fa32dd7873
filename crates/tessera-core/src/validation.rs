//! Validation utilities.

/// Common validation functions.
///
/// Each rule returns a short machine-readable code on failure.
pub mod rules {
    /// Maximum length of a tenant id or queue name, in bytes.
    pub const MAX_IDENTIFIER_LEN: usize = 128;

    /// Separator used by catalog keys (`tenant:queue`).
    pub const KEY_SEPARATOR: char = ':';

    /// Validates that a string is not blank (not empty after trimming).
    pub fn not_blank(value: &str) -> Result<(), &'static str> {
        if value.trim().is_empty() {
            return Err("not_blank");
        }
        Ok(())
    }

    /// Validates a tenant id or queue name.
    ///
    /// Identifiers end up inside catalog keys and engine queue names, so they
    /// must not contain the key separator or whitespace.
    pub fn valid_identifier(value: &str) -> Result<(), &'static str> {
        not_blank(value)?;
        if value.len() > MAX_IDENTIFIER_LEN {
            return Err("identifier_too_long");
        }
        if value.contains(KEY_SEPARATOR) {
            return Err("identifier_contains_separator");
        }
        if value.chars().any(char::is_whitespace) {
            return Err("identifier_contains_whitespace");
        }
        Ok(())
    }
}
