//! Label matchers for series selection.

use std::fmt;

use common_error::{ParallaxError, ParallaxResult};
use regex::Regex;

use crate::labels::Labels;

/// The comparison a matcher applies to a label value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Equal,
    NotEqual,
    Regex,
    NotRegex,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Regex => "=~",
            Self::NotRegex => "!~",
        };
        f.write_str(s)
    }
}

/// A single label matcher, e.g. `job="api"` or `instance=~"eu-.*"`.
///
/// A series with the label absent is treated as carrying the empty string, so
/// `foo=""` matches series without a `foo` label.
#[derive(Debug, Clone)]
pub struct Matcher {
    pub name: String,
    pub match_type: MatchType,
    pub value: String,
    re: Option<Regex>,
}

impl Matcher {
    /// `name="value"`
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            match_type: MatchType::Equal,
            value: value.into(),
            re: None,
        }
    }

    /// `name!="value"`
    pub fn not_equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            match_type: MatchType::NotEqual,
            value: value.into(),
            re: None,
        }
    }

    /// `name=~"value"`. The pattern is fully anchored.
    pub fn regex(name: impl Into<String>, value: impl Into<String>) -> ParallaxResult<Self> {
        let value = value.into();
        Ok(Self {
            name: name.into(),
            match_type: MatchType::Regex,
            re: Some(Self::compile(&value)?),
            value,
        })
    }

    /// `name!~"value"`. The pattern is fully anchored.
    pub fn not_regex(name: impl Into<String>, value: impl Into<String>) -> ParallaxResult<Self> {
        let value = value.into();
        Ok(Self {
            name: name.into(),
            match_type: MatchType::NotRegex,
            re: Some(Self::compile(&value)?),
            value,
        })
    }

    fn compile(pattern: &str) -> ParallaxResult<Regex> {
        Regex::new(&format!("^(?:{pattern})$"))
            .map_err(|e| ParallaxError::invalid_parameter(format!("invalid matcher regex: {e}")))
    }

    /// Whether the matcher accepts the given label value.
    pub fn matches(&self, value: &str) -> bool {
        match self.match_type {
            MatchType::Equal => self.value == value,
            MatchType::NotEqual => self.value != value,
            MatchType::Regex => self.re.as_ref().is_some_and(|re| re.is_match(value)),
            MatchType::NotRegex => !self.re.as_ref().is_some_and(|re| re.is_match(value)),
        }
    }

    /// Whether the matcher accepts the given label set.
    pub fn matches_labels(&self, labels: &Labels) -> bool {
        self.matches(labels.get(&self.name).unwrap_or(""))
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.match_type, self.value)
    }
}
