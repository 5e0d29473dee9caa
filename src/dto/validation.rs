//! Validation helpers for DTOs.

use validator::ValidationError;

/// Number of digits in a participant access code.
pub const ACCESS_CODE_LEN: usize = 4;

/// Validates that an access code is exactly four ASCII digits.
///
/// # Examples
///
/// ```ignore
/// validate_access_code("0420") // Ok
/// validate_access_code("42")   // Err - too short
/// validate_access_code("12a4") // Err - not a digit
/// ```
pub fn validate_access_code(code: &str) -> Result<(), ValidationError> {
    if code.len() != ACCESS_CODE_LEN {
        let mut err = ValidationError::new("access_code_length");
        err.message = Some(
            format!(
                "Access code must be exactly {ACCESS_CODE_LEN} digits (got {})",
                code.chars().count()
            )
            .into(),
        );
        return Err(err);
    }

    if !code.bytes().all(|b| b.is_ascii_digit()) {
        let mut err = ValidationError::new("access_code_format");
        err.message = Some("Access code must contain only digits".into());
        return Err(err);
    }

    Ok(())
}

/// Validates that a display name has visible characters.
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        let mut err = ValidationError::new("display_name_blank");
        err.message = Some("Display name must not be blank".into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_access_code_valid() {
        assert!(validate_access_code("0000").is_ok());
        assert!(validate_access_code("2025").is_ok());
    }

    #[test]
    fn test_validate_access_code_invalid_length() {
        assert!(validate_access_code("123").is_err());
        assert!(validate_access_code("12345").is_err());
        assert!(validate_access_code("").is_err());
    }

    #[test]
    fn test_validate_access_code_invalid_format() {
        assert!(validate_access_code("12a4").is_err());
        assert!(validate_access_code("12 4").is_err());
        assert!(validate_access_code("١٢٣٤").is_err()); // non-ASCII digits
    }

    #[test]
    fn test_validate_display_name() {
        assert!(validate_display_name("Ada").is_ok());
        assert!(validate_display_name("   ").is_err());
    }
}
