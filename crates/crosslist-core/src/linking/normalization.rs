//! Name normalization for linking

/// Normalize an item name for comparison
///
/// - Converts to lowercase unless `case_sensitive`
/// - Collapses whitespace runs to a single space
/// - Trims both ends
pub fn normalize_name(name: &str, case_sensitive: bool) -> String {
    let collapsed = collapse_whitespace(name.trim());
    if case_sensitive {
        collapsed
    } else {
        collapsed.to_lowercase()
    }
}

/// Collapse multiple whitespace characters into a single space
fn collapse_whitespace(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut prev_was_space = false;

    for c in s.chars() {
        if c.is_whitespace() {
            if !prev_was_space {
                result.push(' ');
                prev_was_space = true;
            }
        } else {
            result.push(c);
            prev_was_space = false;
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Milk", false), "milk");
        assert_eq!(normalize_name("  Whole   Milk ", false), "whole milk");
        assert_eq!(normalize_name("Olive\tOil\n", false), "olive oil");
    }

    #[test]
    fn test_case_sensitive() {
        assert_eq!(normalize_name("  Whole   Milk ", true), "Whole Milk");
        assert_ne!(normalize_name("Milk", true), normalize_name("milk", true));
    }

    #[test]
    fn test_blank_name() {
        assert_eq!(normalize_name("   ", false), "");
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(
            name in "[a-zA-Z0-9éÉ \\t\\n]{0,40}",
            case_sensitive in any::<bool>()
        ) {
            let once = normalize_name(&name, case_sensitive);
            prop_assert_eq!(normalize_name(&once, case_sensitive), once);
        }

        #[test]
        fn normalized_has_no_edge_or_double_spaces(name in "[a-zA-Z \\t]{0,40}") {
            let normalized = normalize_name(&name, false);
            prop_assert!(!normalized.starts_with(' '));
            prop_assert!(!normalized.ends_with(' '));
            prop_assert!(!normalized.contains("  "));
        }
    }
}
