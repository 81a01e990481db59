//! Source preference ordering for property dictionaries.
//!
//! A media-library entry can carry the same key from several sources (the
//! server, a tagging plugin, a client). A [`SourcePreference`] ranks those
//! sources so that one value can be picked per key.
//!
//! Patterns match a source name case-insensitively, either exactly or as a
//! prefix when the pattern ends in `*`. A source that matches no pattern
//! ranks after every source that does.

use serde::{Deserialize, Serialize};

/// Default ordering used by the daemon's own clients.
pub const DEFAULT_SOURCE_PREFERENCE: &[&str] = &[
    "server",
    "client/*",
    "plugin/playlist",
    "plugin/id3v2",
    "plugin/segment",
    "plugin/*",
    "*",
];

/// Ordered list of source patterns, most preferred first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePreference {
    patterns: Vec<String>,
}

impl SourcePreference {
    /// Creates a preference from patterns, most preferred first.
    ///
    /// # Example
    ///
    /// ```rust
    /// use core_protocol::source::SourcePreference;
    ///
    /// let pref = SourcePreference::new(["client/*", "server"]);
    /// assert_eq!(pref.rank("client/tagger"), Some(0));
    /// assert_eq!(pref.rank("plugin/id3v2"), None);
    /// ```
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.is_empty())
                .collect(),
        }
    }

    /// Patterns in preference order.
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Index of the first pattern matching `source`, if any.
    pub fn rank(&self, source: &str) -> Option<usize> {
        self.patterns
            .iter()
            .position(|pattern| pattern_matches(pattern, source))
    }
}

impl Default for SourcePreference {
    fn default() -> Self {
        Self::new(DEFAULT_SOURCE_PREFERENCE.iter().copied())
    }
}

fn pattern_matches(pattern: &str, source: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => source
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix)),
        None => pattern.eq_ignore_ascii_case(source),
    }
}
