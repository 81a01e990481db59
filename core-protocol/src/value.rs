//! # Decoded Values
//!
//! Typed shapes a daemon reply can take once decoded.
//!
//! ## Overview
//!
//! - [`Value`] - tagged union over scalars, lists and dictionaries
//! - [`Dict`] - flat string-to-string dictionary
//! - [`PropDict`] - property dictionary where every key holds one or more
//!   `(value, source)` pairs, resolved through a [`SourcePreference`]
//!
//! Empty keys are never stored in either dictionary type. Property
//! dictionaries only ever append; the per-key list of a stored key is never
//! empty.

use serde::{Deserialize, Serialize};
use std::collections::btree_map;
use std::collections::BTreeMap;

use crate::source::SourcePreference;

// ============================================================================
// Value
// ============================================================================

/// A decoded reply value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    None,
    UInt(u32),
    Int(i32),
    String(String),
    Binary(Vec<u8>),
    List(Vec<Value>),
    Dict(Dict),
    PropDict(PropDict),
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::UInt(_) => "uint32",
            Value::Int(_) => "int32",
            Value::String(_) => "string",
            Value::Binary(_) => "binary",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::PropDict(_) => "propdict",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Unsigned view of an integer value. Negative `Int`s yield `None`.
    pub fn as_uint(&self) -> Option<u32> {
        match self {
            Value::UInt(v) => Some(*v),
            Value::Int(v) => u32::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Signed view of an integer value.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::UInt(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_propdict(&self) -> Option<&PropDict> {
        match self {
            Value::PropDict(p) => Some(p),
            _ => None,
        }
    }

    /// Renders a scalar the way dictionary values are stored.
    pub fn scalar_string(&self) -> Option<String> {
        match self {
            Value::None => Some(String::new()),
            Value::UInt(v) => Some(v.to_string()),
            Value::Int(v) => Some(v.to_string()),
            Value::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<Dict> for Value {
    fn from(v: Dict) -> Self {
        Value::Dict(v)
    }
}

impl From<PropDict> for Value {
    fn from(v: PropDict) -> Self {
        Value::PropDict(v)
    }
}

// ============================================================================
// Dict
// ============================================================================

/// Flat dictionary with unique string keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dict {
    entries: BTreeMap<String, String>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an entry, replacing an existing value for the key.
    ///
    /// Returns `false` (and stores nothing) when `key` is empty.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if key.is_empty() {
            return false;
        }
        self.entries.insert(key, value.into());
        true
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn into_inner(self) -> BTreeMap<String, String> {
        self.entries
    }
}

impl<K, V> FromIterator<(K, V)> for Dict
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut dict = Dict::new();
        for (k, v) in iter {
            dict.insert(k, v);
        }
        dict
    }
}

impl IntoIterator for Dict {
    type Item = (String, String);
    type IntoIter = btree_map::IntoIter<String, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

// ============================================================================
// PropDict
// ============================================================================

/// One source-attributed value of a property-dictionary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropEntry {
    pub value: String,
    pub source: String,
}

/// Dictionary mapping each key to every `(value, source)` pair received for it.
///
/// # Example
///
/// ```rust
/// use core_protocol::source::SourcePreference;
/// use core_protocol::value::PropDict;
///
/// let mut props = PropDict::new();
/// props.append("artist", "Tagged Artist", "plugin/id3v2");
/// props.append("artist", "Edited Artist", "client/editor");
///
/// let pref = SourcePreference::new(["client/*", "plugin/*"]);
/// assert_eq!(props.value("artist", &pref), Some("Edited Artist"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropDict {
    entries: BTreeMap<String, Vec<PropEntry>>,
}

impl PropDict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a `(value, source)` pair for `key`. Existing pairs are kept.
    ///
    /// Returns `false` (and stores nothing) when `key` is empty.
    pub fn append(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        source: impl Into<String>,
    ) -> bool {
        let key = key.into();
        if key.is_empty() {
            return false;
        }
        self.entries.entry(key).or_default().push(PropEntry {
            value: value.into(),
            source: source.into(),
        });
        true
    }

    /// All pairs stored for `key`, in arrival order.
    pub fn entries(&self, key: &str) -> &[PropEntry] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Pairs for `key` sorted by `pref`.
    ///
    /// Sources matching a pattern come first, by pattern index; unmatched
    /// sources follow. Ties keep arrival order.
    pub fn ordered(&self, key: &str, pref: &SourcePreference) -> Vec<&PropEntry> {
        let mut ordered: Vec<&PropEntry> = self.entries(key).iter().collect();
        ordered.sort_by_key(|entry| pref.rank(&entry.source).unwrap_or(usize::MAX));
        ordered
    }

    /// Highest-priority pair for `key` under `pref`.
    pub fn get(&self, key: &str, pref: &SourcePreference) -> Option<&PropEntry> {
        self.entries(key)
            .iter()
            .enumerate()
            .min_by_key(|(index, entry)| (pref.rank(&entry.source).unwrap_or(usize::MAX), *index))
            .map(|(_, entry)| entry)
    }

    /// Highest-priority value for `key` under `pref`.
    pub fn value(&self, key: &str, pref: &SourcePreference) -> Option<&str> {
        self.get(key, pref).map(|entry| entry.value.as_str())
    }

    /// Resolves every key to its preferred value.
    pub fn flatten(&self, pref: &SourcePreference) -> Dict {
        let mut dict = Dict::new();
        for key in self.entries.keys() {
            if let Some(value) = self.value(key, pref) {
                dict.insert(key.clone(), value);
            }
        }
        dict
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
