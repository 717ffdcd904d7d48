// Field validators shared by request DTOs and the service layer

use once_cell::sync::Lazy;
use regex::Regex;
use validator::ValidationError;

/// License keys: five dash-joined groups of five A-Z0-9 characters
pub static LICENSE_KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z0-9]{5}(-[A-Z0-9]{5}){4}$").expect("invalid license key regex"));

static USERNAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("invalid username regex"));

/// Password policy: at least 8 characters with upper, lower, digit and a
/// special character
pub fn validate_password_policy(password: &str) -> Result<(), ValidationError> {
    if password.len() < 8 {
        return Err(ValidationError::new("password_too_short"));
    }

    let has_uppercase = password.chars().any(|c| c.is_uppercase());
    let has_lowercase = password.chars().any(|c| c.is_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_special = password.chars().any(|c| !c.is_alphanumeric());

    if !has_uppercase || !has_lowercase || !has_digit || !has_special {
        return Err(ValidationError::new("password_complexity"));
    }

    Ok(())
}

/// Usernames: 3-50 characters from a conservative charset
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if username.len() < 3 || username.len() > 50 {
        return Err(ValidationError::new("username_length"));
    }
    if !USERNAME_PATTERN.is_match(username) {
        return Err(ValidationError::new("username_charset"));
    }
    Ok(())
}

/// Machine fingerprints: opaque client-supplied strings, 8-256 characters
pub fn validate_fingerprint(fingerprint: &str) -> Result<(), ValidationError> {
    if fingerprint.len() < 8 || fingerprint.len() > 256 {
        return Err(ValidationError::new("fingerprint_length"));
    }
    Ok(())
}

/// Check a candidate license key against the canonical format
pub fn validate_license_key_format(key: &str) -> Result<(), ValidationError> {
    if !LICENSE_KEY_PATTERN.is_match(key) {
        return Err(ValidationError::new("license_key_format"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_policy_matrix() {
        assert!(validate_password_policy("ValidPass@123").is_ok());
        assert!(validate_password_policy("Sh0rt!a").is_err()); // 7 chars
        assert!(validate_password_policy("alllower@123").is_err()); // no upper
        assert!(validate_password_policy("ALLUPPER@123").is_err()); // no lower
        assert!(validate_password_policy("NoDigits@here").is_err());
        assert!(validate_password_policy("NoSpecial123").is_err());
    }

    #[test]
    fn test_username_bounds() {
        assert!(validate_username("bob").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username(&"x".repeat(51)).is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username("dot.dash-under_score").is_ok());
    }

    #[test]
    fn test_fingerprint_bounds() {
        assert!(validate_fingerprint("fp-12345").is_ok());
        assert!(validate_fingerprint("short").is_err());
        assert!(validate_fingerprint(&"f".repeat(257)).is_err());
    }

    #[test]
    fn test_license_key_format() {
        assert!(validate_license_key_format("ABCDE-12345-FGHIJ-67890-KLMNO").is_ok());
        assert!(validate_license_key_format("abcde-12345-fghij-67890-klmno").is_err());
        assert!(validate_license_key_format("ABCDE-12345-FGHIJ-67890").is_err());
        assert!(validate_license_key_format("ABCDE12345FGHIJ67890KLMNO").is_err());
    }
}
