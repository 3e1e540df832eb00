//! Label matchers
//!
//! A matcher constrains one label of a stream. A stream whose label set lacks
//! the named label is treated as carrying the empty value, so `{env=""}`
//! selects streams without an `env` label.

use crate::query::error::{QueryError, QueryResult};
use crate::storage::LabelSet;
use regex::Regex;
use std::fmt;

/// Comparison applied by a matcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchType {
    /// `=`
    Equal,
    /// `!=`
    NotEqual,
    /// `=~`
    RegexMatch,
    /// `!~`
    RegexNoMatch,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Equal => "=",
            MatchType::NotEqual => "!=",
            MatchType::RegexMatch => "=~",
            MatchType::RegexNoMatch => "!~",
        }
    }
}

/// A single `name op "value"` constraint
#[derive(Debug, Clone)]
pub struct Matcher {
    pub name: String,
    pub value: String,
    pub match_type: MatchType,
    regex: Option<Regex>,
}

impl Matcher {
    /// Create a matcher, compiling the value as a fully anchored regex for
    /// the regex match types.
    pub fn new(
        match_type: MatchType,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> QueryResult<Self> {
        let name = name.into();
        let value = value.into();
        let regex = match match_type {
            MatchType::RegexMatch | MatchType::RegexNoMatch => Some(
                Regex::new(&format!("^(?:{})$", value)).map_err(|e| QueryError::InvalidRegex {
                    name: name.clone(),
                    reason: e.to_string(),
                })?,
            ),
            MatchType::Equal | MatchType::NotEqual => None,
        };

        Ok(Self {
            name,
            value,
            match_type,
            regex,
        })
    }

    /// Shorthand for an equality matcher
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            match_type: MatchType::Equal,
            regex: None,
        }
    }

    /// Test a single label value
    pub fn matches(&self, value: &str) -> bool {
        match self.match_type {
            MatchType::Equal => self.value == value,
            MatchType::NotEqual => self.value != value,
            MatchType::RegexMatch => self.regex.as_ref().map_or(false, |re| re.is_match(value)),
            MatchType::RegexNoMatch => self.regex.as_ref().map_or(true, |re| !re.is_match(value)),
        }
    }

    /// Test the matcher against a stream's labels
    pub fn matches_labels(&self, labels: &LabelSet) -> bool {
        self.matches(labels.get(&self.name).unwrap_or(""))
    }

    /// Whether the matcher accepts a missing label
    pub fn matches_empty(&self) -> bool {
        self.matches("")
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.value == other.value && self.match_type == other.match_type
    }
}

impl Eq for Matcher {}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.match_type.as_str(), self.value)
    }
}

/// Check that every matcher accepts the label set (AND semantics)
pub fn matches_all(matchers: &[Matcher], labels: &LabelSet) -> bool {
    matchers.iter().all(|m| m.matches_labels(labels))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> LabelSet {
        LabelSet::new().label("foo", "bar").label("bar", "baz2")
    }

    #[test]
    fn test_equality_matchers() {
        assert!(Matcher::equal("foo", "bar").matches_labels(&labels()));
        assert!(!Matcher::equal("foo", "baz").matches_labels(&labels()));

        let ne = Matcher::new(MatchType::NotEqual, "foo", "baz").unwrap();
        assert!(ne.matches_labels(&labels()));
    }

    #[test]
    fn test_regex_is_anchored() {
        let m = Matcher::new(MatchType::RegexMatch, "bar", "baz[2-9]").unwrap();
        assert!(m.matches_labels(&labels()));
        assert!(!m.matches("xbaz2"));
        assert!(!m.matches("baz21"));

        let nm = Matcher::new(MatchType::RegexNoMatch, "bar", "baz[2-9]").unwrap();
        assert!(!nm.matches_labels(&labels()));
    }

    #[test]
    fn test_missing_label_is_empty() {
        let m = Matcher::equal("env", "");
        assert!(m.matches_labels(&labels()));
        assert!(m.matches_empty());

        let m = Matcher::new(MatchType::RegexMatch, "env", ".+").unwrap();
        assert!(!m.matches_labels(&labels()));
    }

    #[test]
    fn test_invalid_regex() {
        let err = Matcher::new(MatchType::RegexMatch, "bar", "baz[").unwrap_err();
        assert!(matches!(err, QueryError::InvalidRegex { .. }));
    }

    #[test]
    fn test_matches_all() {
        let matchers = vec![
            Matcher::equal("foo", "bar"),
            Matcher::new(MatchType::RegexMatch, "bar", "baz.*").unwrap(),
        ];
        assert!(matches_all(&matchers, &labels()));
        assert!(matches_all(&[], &labels()));
    }
}
