//! Validation helpers for DTOs.

use validator::ValidationError;

/// Validates that a join code looks like one this service hands out: 4 to 6
/// ASCII alphanumeric characters, case-insensitive.
///
/// # Examples
///
/// ```ignore
/// validate_join_code("K7Pback") // Err - too long
/// validate_join_code("k7pw2")  // Ok
/// validate_join_code("K7 W2")  // Err - space
/// ```
pub fn validate_join_code(code: &str) -> Result<(), ValidationError> {
    if !(4..=6).contains(&code.len()) {
        let mut err = ValidationError::new("join_code_length");
        err.message =
            Some(format!("Join code must be 4 to 6 characters (got {})", code.len()).into());
        return Err(err);
    }

    if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        let mut err = ValidationError::new("join_code_format");
        err.message = Some("Join code must contain only letters and digits".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_join_code_valid() {
        assert!(validate_join_code("K7PW2").is_ok());
        assert!(validate_join_code("k7pw2").is_ok());
        assert!(validate_join_code("ABCD").is_ok());
        assert!(validate_join_code("123456").is_ok());
    }

    #[test]
    fn test_validate_join_code_invalid_length() {
        assert!(validate_join_code("ABC").is_err()); // too short
        assert!(validate_join_code("ABCDEFG").is_err()); // too long
        assert!(validate_join_code("").is_err()); // empty
    }

    #[test]
    fn test_validate_join_code_invalid_format() {
        assert!(validate_join_code("K7 W2").is_err()); // space
        assert!(validate_join_code("K7-W2").is_err()); // punctuation
        assert!(validate_join_code("K7ПW2").is_err()); // non-ascii
    }
}
