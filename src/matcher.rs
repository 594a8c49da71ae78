// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Subnet selection expressions.
//!
//! A [`SubnetMatcher`] selects candidate subnets for floating IP allocation from two
//! optional expressions:
//!
//! - **Name spec**: a leading `!` negates the predicate; a following `~` makes the rest a
//!   regular expression that must match the whole name, otherwise it is a glob pattern.
//! - **Tag spec**: a comma separated tag list; a leading `!` negates the predicate; a
//!   following `&` requires every tag, otherwise any one tag is enough.
//!
//! Both predicates must hold when both are configured. An empty expression matches
//! every subnet.
//!
//! # Example
//!
//! ```rust
//! use octavia_lb::matcher::SubnetMatcher;
//!
//! let matcher = SubnetMatcher::parse(Some("!test-*"), Some("&alice,bob")).unwrap();
//! let tags = vec!["alice".to_string(), "bob".to_string(), "carol".to_string()];
//! assert!(matcher.matches("prod-1", &tags));
//! assert!(!matcher.matches("test-1", &tags));
//! ```

use crate::cloud::types::{Subnet, TagFilter};
use crate::errors::{LbError, Result};
use regex::Regex;

#[derive(Debug, Clone)]
enum NamePattern {
    Glob(glob::Pattern),
    Regex(Regex),
}

#[derive(Debug, Clone)]
struct NamePredicate {
    negate: bool,
    pattern: NamePattern,
}

impl NamePredicate {
    fn parse(spec: &str) -> Result<Self> {
        let (negate, rest) = match spec.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, spec),
        };
        let pattern = match rest.strip_prefix('~') {
            Some(expr) => NamePattern::Regex(Regex::new(&format!("^(?:{expr})$")).map_err(
                |e| LbError::invalid(format!("invalid subnet name expression {expr:?}: {e}")),
            )?),
            None => NamePattern::Glob(glob::Pattern::new(rest).map_err(|e| {
                LbError::invalid(format!("invalid subnet name pattern {rest:?}: {e}"))
            })?),
        };
        Ok(Self { negate, pattern })
    }

    fn matches(&self, name: &str) -> bool {
        let hit = match &self.pattern {
            NamePattern::Glob(pattern) => pattern.matches(name),
            NamePattern::Regex(regex) => regex.is_match(name),
        };
        hit != self.negate
    }
}

/// Tag part of a subnet selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPredicate {
    pub negate: bool,
    pub all: bool,
    pub tags: Vec<String>,
}

impl TagPredicate {
    fn parse(spec: &str) -> Option<Self> {
        let (negate, rest) = match spec.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, spec),
        };
        let (all, rest) = match rest.strip_prefix('&') {
            Some(rest) => (true, rest),
            None => (false, rest),
        };
        let tags: Vec<String> = rest
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        (!tags.is_empty()).then_some(Self { negate, all, tags })
    }

    #[must_use]
    pub fn matches(&self, tags: &[String]) -> bool {
        let has = |t: &String| tags.contains(t);
        let hit = if self.all {
            self.tags.iter().all(has)
        } else {
            self.tags.iter().any(has)
        };
        hit != self.negate
    }

    /// Equivalent list-query filter.
    #[must_use]
    pub fn filter(&self) -> TagFilter {
        let mut filter = TagFilter::default();
        let target = match (self.negate, self.all) {
            (false, true) => &mut filter.tags,
            (false, false) => &mut filter.tags_any,
            (true, true) => &mut filter.not_tags,
            (true, false) => &mut filter.not_tags_any,
        };
        target.clone_from(&self.tags);
        filter
    }
}

/// Predicate over a subnet's name and tags.
#[derive(Debug, Clone, Default)]
pub struct SubnetMatcher {
    name: Option<NamePredicate>,
    tags: Option<TagPredicate>,
}

impl SubnetMatcher {
    /// Build a matcher from optional name and tag expressions.
    ///
    /// # Errors
    ///
    /// Returns `LbError::InvalidConfiguration` when the name spec is not a valid glob
    /// or regular expression.
    pub fn parse(name_spec: Option<&str>, tag_spec: Option<&str>) -> Result<Self> {
        let name = name_spec
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(NamePredicate::parse)
            .transpose()?;
        let tags = tag_spec.and_then(|s| TagPredicate::parse(s.trim()));
        Ok(Self { name, tags })
    }

    /// Whether either expression was given.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.name.is_some() || self.tags.is_some()
    }

    #[must_use]
    pub fn matches(&self, name: &str, tags: &[String]) -> bool {
        self.name.as_ref().is_none_or(|p| p.matches(name))
            && self.tags.as_ref().is_none_or(|p| p.matches(tags))
    }

    #[must_use]
    pub fn matches_subnet(&self, subnet: &Subnet) -> bool {
        self.matches(&subnet.name, &subnet.tags)
    }

    /// Tag filter to push down into the subnet list query.
    ///
    /// Name predicates cannot be expressed as list parameters and are applied in memory
    /// with [`SubnetMatcher::matches_subnet`].
    #[must_use]
    pub fn tag_filter(&self) -> TagFilter {
        self.tags
            .as_ref()
            .map(TagPredicate::filter)
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[path = "matcher_tests.rs"]
mod matcher_tests;
