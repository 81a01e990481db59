//! Track metadata resolved from a media-library entry.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use crate::source::SourcePreference;
use crate::value::{Dict, PropDict};

pub const UNKNOWN_ARTIST: &str = "[Unknown artist]";
pub const UNKNOWN_ALBUM: &str = "[Unknown album]";
pub const UNKNOWN_TITLE: &str = "[Unknown title]";

/// Metadata of one media-library entry.
///
/// Attribute keys are stored lowercased. The `id` key is parsed into
/// [`Title::id`] rather than kept as an attribute. `artist`, `album` and
/// `title` are always present, defaulting to placeholder strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Title {
    id: u32,
    attributes: BTreeMap<String, String>,
}

impl Title {
    pub fn new() -> Self {
        let mut attributes = BTreeMap::new();
        attributes.insert("artist".to_string(), UNKNOWN_ARTIST.to_string());
        attributes.insert("album".to_string(), UNKNOWN_ALBUM.to_string());
        attributes.insert("title".to_string(), UNKNOWN_TITLE.to_string());
        Self { id: 0, attributes }
    }

    /// Builds a title from the preferred value of every property.
    pub fn from_propdict(props: &PropDict, pref: &SourcePreference) -> Self {
        Self::from_dict(&props.flatten(pref))
    }

    pub fn from_dict(dict: &Dict) -> Self {
        let mut title = Self::new();
        for (key, value) in dict.iter() {
            title.set_attribute(key, value);
        }
        title
    }

    /// Sets an attribute. Empty keys are ignored; an unparsable `id` is dropped.
    pub fn set_attribute(&mut self, key: &str, value: &str) {
        if key.is_empty() {
            return;
        }
        let key = key.to_lowercase();
        if key == "id" {
            if let Ok(id) = value.trim().parse::<u32>() {
                self.id = id;
            }
            return;
        }
        self.attributes.insert(key, value.to_string());
    }

    /// Attribute value, or an empty string when missing.
    pub fn attribute(&self, key: &str) -> &str {
        self.attributes
            .get(&key.to_lowercase())
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn set_id(&mut self, id: u32) {
        self.id = id;
    }

    pub fn artist(&self) -> &str {
        self.attribute("artist")
    }

    pub fn album(&self) -> &str {
        self.attribute("album")
    }

    pub fn title(&self) -> &str {
        self.attribute("title")
    }

    pub fn url(&self) -> Option<&str> {
        self.attributes.get("url").map(String::as_str)
    }

    /// Duration in milliseconds, when the entry reports one.
    pub fn duration_ms(&self) -> Option<u32> {
        self.attributes
            .get("duration")
            .and_then(|d| d.trim().parse().ok())
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }
}

impl Default for Title {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialOrd for Title {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Title {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id
            .cmp(&other.id)
            .then_with(|| self.attributes.cmp(&other.attributes))
    }
}

impl fmt::Display for Title {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "id\t{}", self.id)?;
        for (key, value) in &self.attributes {
            writeln!(f, "{}\t{}", key, value)?;
        }
        Ok(())
    }
}
