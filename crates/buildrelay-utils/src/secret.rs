use subtle::ConstantTimeEq;

/// Compare a presented shared secret against the expected one in constant
/// time.
///
/// An empty expected secret never matches.
#[must_use]
pub fn verify_secret(expected: &str, presented: &str) -> bool {
    if expected.is_empty() {
        return false;
    }
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_only_identical_secrets() {
        assert!(verify_secret("s3cret", "s3cret"));
        assert!(!verify_secret("s3cret", "s3creT"));
        assert!(!verify_secret("s3cret", "s3cret-extra"));
        assert!(!verify_secret("s3cret", "s3cre"));
        assert!(!verify_secret("s3cret", ""));
    }

    #[test]
    fn empty_expected_secret_never_matches() {
        assert!(!verify_secret("", ""));
        assert!(!verify_secret("", "anything"));
    }
}
