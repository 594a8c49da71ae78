// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `matcher.rs`

#[cfg(test)]
mod tests {
    use super::super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| (*t).to_string()).collect()
    }

    /// Test a negated name glob combined with all-of tags
    #[test]
    fn test_negated_glob_with_all_of_tags() {
        let matcher = SubnetMatcher::parse(Some("!test-*"), Some("&alice,bob")).unwrap();

        assert!(matcher.matches("prod-1", &tags(&["alice", "bob", "carol"])));
        assert!(!matcher.matches("prod-1", &tags(&["alice", "carol"])));
        assert!(!matcher.matches("test-1", &tags(&["alice", "bob"])));
    }

    /// Test that name regexes must match the whole name
    #[test]
    fn test_regex_is_fully_anchored() {
        let matcher = SubnetMatcher::parse(Some("~public-[0-9]+"), None).unwrap();

        assert!(matcher.matches("public-12", &[]));
        assert!(!matcher.matches("public-12-old", &[]));
        assert!(!matcher.matches("my-public-12", &[]));
    }

    /// Test that negation inverts exact, glob and regex name specs
    #[test]
    fn test_negation_inverts_every_name_spec() {
        let names = ["public-1", "test-a", "", "prod", "public-xyz"];
        for spec in ["public-*", "~test-.", "prod", "*"] {
            let plain = SubnetMatcher::parse(Some(spec), None).unwrap();
            let negated = SubnetMatcher::parse(Some(&format!("!{spec}")), None).unwrap();
            for name in names {
                assert_eq!(
                    negated.matches(name, &[]),
                    !plain.matches(name, &[]),
                    "spec {spec} name {name}"
                );
            }
        }
    }

    /// Test that negation inverts any-of and all-of tag specs
    #[test]
    fn test_negation_inverts_every_tag_spec() {
        let subjects = [tags(&[]), tags(&["a"]), tags(&["a", "b"]), tags(&["c"])];
        for spec in ["a,b", "&a,b", "c"] {
            let plain = SubnetMatcher::parse(None, Some(spec)).unwrap();
            let negated = SubnetMatcher::parse(None, Some(&format!("!{spec}"))).unwrap();
            for subject in &subjects {
                assert_eq!(negated.matches("x", subject), !plain.matches("x", subject));
            }
        }
    }

    /// Test any-of versus all-of tag matching
    #[test]
    fn test_any_and_all_tag_semantics() {
        let any = SubnetMatcher::parse(None, Some("a, b")).unwrap();
        assert!(any.matches("x", &tags(&["b"])));
        assert!(!any.matches("x", &tags(&["c"])));

        let all = SubnetMatcher::parse(None, Some("&a,b")).unwrap();
        assert!(all.matches("x", &tags(&["a", "b", "c"])));
        assert!(!all.matches("x", &tags(&["a"])));
    }

    /// Test that an empty matcher accepts every subnet
    #[test]
    fn test_unconfigured_matches_everything() {
        let matcher = SubnetMatcher::parse(Some("  "), Some("")).unwrap();
        assert!(!matcher.is_configured());
        assert!(matcher.matches("anything", &tags(&["x"])));
        assert_eq!(matcher.tag_filter(), TagFilter::default());
    }

    /// Test translation of tag specs into a server-side filter
    #[test]
    fn test_tag_filter_translation() {
        let cases = [
            ("&a,b", TagFilter { tags: tags(&["a", "b"]), ..Default::default() }),
            ("a,b", TagFilter { tags_any: tags(&["a", "b"]), ..Default::default() }),
            ("!&a,b", TagFilter { not_tags: tags(&["a", "b"]), ..Default::default() }),
            ("!a,b", TagFilter { not_tags_any: tags(&["a", "b"]), ..Default::default() }),
        ];
        for (spec, expected) in cases {
            let matcher = SubnetMatcher::parse(None, Some(spec)).unwrap();
            assert_eq!(matcher.tag_filter(), expected, "spec {spec}");
        }
    }

    /// Test that the server-side filter selects what the local predicate accepts
    #[test]
    fn test_tag_filter_agrees_with_predicate() {
        let subjects = [tags(&[]), tags(&["a"]), tags(&["a", "b"]), tags(&["b", "c"])];
        for spec in ["a,b", "&a,b", "!a,b", "!&a,b"] {
            let matcher = SubnetMatcher::parse(None, Some(spec)).unwrap();
            let filter = matcher.tag_filter();
            for subject in &subjects {
                assert_eq!(filter.admits(subject), matcher.matches("x", subject));
            }
        }
    }

    /// Test that bad globs and regexes are configuration errors
    #[test]
    fn test_invalid_patterns_are_configuration_errors() {
        assert!(matches!(
            SubnetMatcher::parse(Some("~(unclosed"), None),
            Err(LbError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            SubnetMatcher::parse(Some("public-[abc"), None),
            Err(LbError::InvalidConfiguration(_))
        ));
    }
}
