//! Utility functions for relaylock

/// Validate that a value can travel as a single wire token
///
/// Tokens are non-empty and contain no whitespace.
///
/// # Examples
///
/// ```
/// use relaylock_common::is_valid_token;
///
/// assert!(is_valid_token("my-lock"));
/// assert!(!is_valid_token("my lock"));
/// assert!(!is_valid_token(""));
/// ```
pub fn is_valid_token(value: &str) -> bool {
    !value.is_empty() && !value.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_token() {
        assert!(is_valid_token("lock-1"));
        assert!(is_valid_token("relay:server-1"));
        assert!(is_valid_token("127.0.0.1:20000"));
    }

    #[test]
    fn test_is_valid_token_invalid() {
        assert!(!is_valid_token(""));
        assert!(!is_valid_token("two words"));
        assert!(!is_valid_token("tab\there"));
        assert!(!is_valid_token("line\n"));
    }
}
