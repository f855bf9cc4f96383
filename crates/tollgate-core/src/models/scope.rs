// ABOUTME: Normalized set of OAuth scope tokens with RFC 6749 space-delimited parsing
// ABOUTME: Provides subset, intersection, and containment checks used by consent and refresh
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Tollgate Contributors

use std::collections::BTreeSet;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Ordered, de-duplicated set of scope tokens.
///
/// Serializes as the space-delimited string form used on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ScopeSet(BTreeSet<String>);

impl ScopeSet {
    /// Empty scope set
    #[must_use]
    pub const fn empty() -> Self {
        Self(BTreeSet::new())
    }

    /// Parse a space-delimited scope string. Extra whitespace is ignored.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        Self(raw.split_whitespace().map(str::to_owned).collect())
    }

    /// Build from individual scope tokens
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(tokens.into_iter().map(Into::into).collect())
    }

    /// Whether the set is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of scope tokens
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether `scope` is part of this set
    #[must_use]
    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    /// Whether every token in `self` is also in `other`
    #[must_use]
    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.0.is_subset(&other.0)
    }

    /// Tokens of `self` that are not in `allowed`
    #[must_use]
    pub fn difference(&self, allowed: &Self) -> Vec<String> {
        self.0.difference(&allowed.0).cloned().collect()
    }

    /// Tokens present in both sets
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        Self(self.0.intersection(&other.0).cloned().collect())
    }

    /// Iterate over scope tokens in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for scope in &self.0 {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(scope)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for ScopeSet {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl Serialize for ScopeSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ScopeSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes_order_and_duplicates() {
        let scope = ScopeSet::parse("  profile openid  profile ");
        assert_eq!(scope.len(), 2);
        assert_eq!(scope.to_string(), "openid profile");
    }

    #[test]
    fn test_subset() {
        let granted = ScopeSet::parse("openid profile email");
        assert!(ScopeSet::parse("openid email").is_subset_of(&granted));
        assert!(!ScopeSet::parse("openid admin").is_subset_of(&granted));
        assert!(ScopeSet::empty().is_subset_of(&granted));
    }

    #[test]
    fn test_difference_lists_disallowed_tokens() {
        let allowed = ScopeSet::parse("openid profile");
        let requested = ScopeSet::parse("openid admin billing");
        assert_eq!(requested.difference(&allowed), vec!["admin", "billing"]);
    }

    #[test]
    fn test_serde_uses_space_delimited_form() {
        let scope = ScopeSet::parse("profile openid");
        let json = serde_json::to_string(&scope).unwrap();
        assert_eq!(json, "\"openid profile\"");
        let back: ScopeSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, scope);
    }
}
