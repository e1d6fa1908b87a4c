use crate::error::{AppError, Result};

/// Longest hardware id accepted.
const MAX_HWID_LEN: usize = 256;
/// Longest key string accepted.
const MAX_KEY_LEN: usize = 128;
/// Upper bound for an administrator-set binding capacity.
const MAX_HWID_CAPACITY: i64 = 1000;

/// Validates a hardware id.
///
/// # Arguments
///
/// * `hwid` - The hardware id to validate.
///
/// # Returns
///
/// The trimmed hardware id, in the same form `/verify` looks it up.
pub fn validate_hwid(hwid: &str) -> Result<&str> {
    let hwid = hwid.trim();
    if hwid.is_empty() {
        return Err(AppError::Validation("hwid cannot be empty".to_string()));
    }

    if hwid.len() > MAX_HWID_LEN {
        return Err(AppError::Validation(format!(
            "hwid must be at most {} characters",
            MAX_HWID_LEN
        )));
    }

    if hwid.chars().any(char::is_control) {
        return Err(AppError::Validation(
            "hwid cannot contain control characters".to_string(),
        ));
    }

    Ok(hwid)
}

/// Validates a key string and returns it trimmed.
pub fn validate_key(key: &str) -> Result<&str> {
    let key = key.trim();
    if key.is_empty() {
        return Err(AppError::Validation("key cannot be empty".to_string()));
    }

    if key.len() > MAX_KEY_LEN {
        return Err(AppError::Validation(format!(
            "key must be at most {} characters",
            MAX_KEY_LEN
        )));
    }

    Ok(key)
}

/// Validates a binding capacity and narrows it to the stored type.
pub fn validate_max_hwids(max_hwids: i64) -> Result<i32> {
    if !(1..=MAX_HWID_CAPACITY).contains(&max_hwids) {
        return Err(AppError::Validation(format!(
            "maxHwids must be between 1 and {}",
            MAX_HWID_CAPACITY
        )));
    }
    Ok(max_hwids as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hwid_rules() {
        assert_eq!(validate_hwid("ABCD-1234").unwrap(), "ABCD-1234");
        assert_eq!(validate_hwid("  pc-1\t").unwrap(), "pc-1");
        assert!(validate_hwid("   ").is_err());
        assert!(validate_hwid("a\nb").is_err());
        assert!(validate_hwid(&"x".repeat(MAX_HWID_LEN + 1)).is_err());
    }

    #[test]
    fn key_rules() {
        assert_eq!(
            validate_key(" MULTI-WK-24H-A1B2C3D4 ").unwrap(),
            "MULTI-WK-24H-A1B2C3D4"
        );
        assert!(validate_key("").is_err());
        assert!(validate_key(&"K".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn capacity_rules() {
        assert_eq!(validate_max_hwids(3).unwrap(), 3);
        assert!(validate_max_hwids(0).is_err());
        assert!(validate_max_hwids(-1).is_err());
        assert!(validate_max_hwids(MAX_HWID_CAPACITY + 1).is_err());
    }
}
