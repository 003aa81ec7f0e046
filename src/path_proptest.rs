//! Property-based tests for path and naming functions.
//!
//! These tests use proptest to generate random inputs and verify that
//! invariants hold for all possible inputs.

#[cfg(test)]
mod proptest_tests {
    use crate::codeflow::Codeflow;
    use crate::path::{encode_url_path, sanitize_property_name, short_sha};
    use proptest::prelude::*;

    proptest! {
        /// encode_url_path never produces filesystem-unsafe characters
        #[test]
        fn encode_url_path_never_produces_unsafe_chars(input in ".*") {
            let result = encode_url_path(&input);
            let unsafe_chars = ['/', '\\', ':', '*', '?', '"', '<', '>', '|'];
            for ch in unsafe_chars {
                prop_assert!(
                    !result.contains(ch),
                    "encode_url_path produced unsafe character '{}' from input '{}'",
                    ch,
                    input
                );
            }
        }

        #[test]
        fn sanitize_property_name_strips_separators(input in "[A-Za-z0-9.-]{0,40}") {
            let result = sanitize_property_name(&input);
            prop_assert!(!result.contains('.') && !result.contains('-'));
            prop_assert_eq!(sanitize_property_name(&result), result.clone());
        }

        #[test]
        fn short_sha_is_a_prefix(sha in "[0-9a-f]{0,40}") {
            let short = short_sha(&sha);
            prop_assert!(sha.starts_with(short));
            prop_assert!(short.len() <= 7);
        }

        /// Branch names depend only on the direction and the two SHAs.
        #[test]
        fn branch_names_are_deterministic(source in "[0-9a-f]{40}", target in "[0-9a-f]{40}") {
            let forward = Codeflow::forward(&source, &target);
            let again = Codeflow::forward(&source, &target);
            prop_assert_eq!(forward.branch_name(), again.branch_name());
            prop_assert_eq!(
                forward.branch_name(),
                format!("darc/forward/{}-{}", &source[..7], &target[..7])
            );
            let back = Codeflow::backflow(&source, &target);
            prop_assert_ne!(forward.branch_name(), back.branch_name());
        }
    }
}
