//! Lenient parsing of boolean settings
//!
//! Config items arrive as free-form strings. Anything outside the accepted
//! vocabulary falls back to the caller's default instead of failing the
//! reconcile.

/// Parse a boolean using the conventional vocabulary
/// (`1`, `t`, `T`, `TRUE`, `true`, `True`, `0`, `f`, `F`, `FALSE`, `false`, `False`).
pub fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Parse a boolean, treating anything unrecognized as `false`
pub fn parse_bool_or_false(s: &str) -> bool {
    parse_bool(s).unwrap_or(false)
}

/// Parse a boolean, treating anything unrecognized as `true`
pub fn parse_bool_or_true(s: &str) -> bool {
    parse_bool(s).unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognized_values() {
        for s in ["1", "t", "T", "TRUE", "true", "True"] {
            assert!(parse_bool_or_false(s), "{s}");
            assert!(parse_bool_or_true(s), "{s}");
        }
        for s in ["0", "f", "F", "FALSE", "false", "False"] {
            assert!(!parse_bool_or_false(s), "{s}");
            assert!(!parse_bool_or_true(s), "{s}");
        }
    }

    #[test]
    fn unrecognized_values_fall_back() {
        for s in ["", "yes", "no", "tRUE", " true", "2"] {
            assert!(!parse_bool_or_false(s), "{s:?}");
            assert!(parse_bool_or_true(s), "{s:?}");
            assert_eq!(parse_bool(s), None);
        }
    }
}
