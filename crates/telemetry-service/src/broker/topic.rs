//! MQTT topic filters.
//!
//! A filter is a `/`-separated pattern. `+` matches exactly one segment and
//! `#` (only valid as the last segment) matches any number of trailing
//! segments, including none. Wildcards must occupy a whole segment.

use std::fmt;
use thiserror::Error;

/// Errors produced while validating a topic filter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicFilterError {
    #[error("topic filter must not be empty")]
    Empty,

    #[error("wildcard must occupy a whole segment in '{0}'")]
    PartialWildcard(String),

    #[error("multi-level wildcard '#' must be the last segment in '{0}'")]
    MisplacedMultiLevel(String),
}

/// A validated subscription filter such as `sensors/+/data`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter(String);

impl TopicFilter {
    /// Validate a filter string.
    pub fn parse(raw: &str) -> Result<Self, TopicFilterError> {
        if raw.is_empty() {
            return Err(TopicFilterError::Empty);
        }

        let segments: Vec<&str> = raw.split('/').collect();
        let last = segments.len().saturating_sub(1);
        for (idx, segment) in segments.iter().enumerate() {
            let has_wildcard = segment.contains('+') || segment.contains('#');
            if has_wildcard && segment.len() != 1 {
                return Err(TopicFilterError::PartialWildcard(raw.to_string()));
            }
            if *segment == "#" && idx != last {
                return Err(TopicFilterError::MisplacedMultiLevel(raw.to_string()));
            }
        }

        Ok(Self(raw.to_string()))
    }

    /// The filter as sent in a SUBSCRIBE packet.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a concrete topic name is selected by this filter.
    pub fn matches(&self, topic: &str) -> bool {
        let mut filter = self.0.split('/');
        let mut name = topic.split('/');

        loop {
            match (filter.next(), name.next()) {
                (Some("#"), _) => return true,
                (Some("+"), Some(_)) => {}
                (Some(f), Some(n)) if f == n => {}
                (None, None) => return true,
                _ => return false,
            }
        }
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
