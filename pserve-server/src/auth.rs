//! Shared-secret request gate

/// Path exempt from the token check
pub const STATS_PATH: &str = "/stats";

/// Decide whether a request may proceed.
///
/// `/stats` is always allowed. Every other path requires the header value to
/// equal the configured token exactly (case-sensitive, no trimming).
pub fn authorize(path: &str, header_value: Option<&str>, token: &str) -> bool {
    if path == STATS_PATH {
        return true;
    }
    match header_value {
        Some(value) => token_matches(value, token),
        None => false,
    }
}

/// Constant-value compare: inspects every byte regardless of where the
/// strings first differ.
fn token_matches(provided: &str, expected: &str) -> bool {
    if provided.len() != expected.len() {
        return false;
    }
    provided
        .bytes()
        .zip(expected.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_token_allows() {
        assert!(authorize("/report.pdf", Some("secret"), "secret"));
    }

    #[test]
    fn test_wrong_or_missing_token_denies() {
        assert!(!authorize("/report.pdf", Some("wrong"), "secret"));
        assert!(!authorize("/report.pdf", None, "secret"));
        assert!(!authorize("/report.pdf", Some(""), "secret"));
    }

    #[test]
    fn test_compare_is_case_sensitive_and_untrimmed() {
        assert!(!authorize("/report.pdf", Some("Secret"), "secret"));
        assert!(!authorize("/report.pdf", Some(" secret"), "secret"));
        assert!(!authorize("/report.pdf", Some("secret "), "secret"));
    }

    #[test]
    fn test_stats_path_bypasses_token() {
        assert!(authorize(STATS_PATH, None, "secret"));
        assert!(authorize(STATS_PATH, Some("wrong"), "secret"));
    }

    #[test]
    fn test_prefix_of_token_denies() {
        assert!(!authorize("/f", Some("sec"), "secret"));
        assert!(!authorize("/f", Some("secrets"), "secret"));
    }
}
