//! Identifier rules shared by step ids, state fields and named types

use once_cell::sync::Lazy;
use regex::Regex;

/// Implicit entry node of every flow
pub const START: &str = "START";

/// Implicit exit node of every flow
pub const END: &str = "END";

static IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier regex is valid"));

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_valid_identifier(name: &str) -> bool {
    IDENT_RE.is_match(name)
}

/// START and END cannot be used as step ids
pub fn is_reserved(name: &str) -> bool {
    name == START || name == END
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert!(is_valid_identifier("topic"));
        assert!(is_valid_identifier("_private"));
        assert!(is_valid_identifier("step2"));
        assert!(is_valid_identifier("CamelCase"));
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier("2step"));
        assert!(!is_valid_identifier("with-dash"));
        assert!(!is_valid_identifier("a.b"));
        assert!(!is_valid_identifier("has space"));
    }

    #[test]
    fn test_reserved() {
        assert!(is_reserved("START"));
        assert!(is_reserved("END"));
        assert!(!is_reserved("start"));
    }
}
