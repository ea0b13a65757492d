//! Generic operations over arbitrarily deep key/value mappings.
//!
//! The distribution table is written to disk as nested JSON objects and read back
//! into a [`NestedMap`]. The operations here never mutate their input: each returns a
//! new, independently owned map.

use std::cmp::Ordering;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::ser::PrettyFormatter;
use serde_json::Value;

use crate::error::StoreError;

const JSON_INDENT: &[u8] = b"    ";

/// A mapping key: either an integer or free text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Int(i64),
    Text(String),
}

impl Key {
    /// Numeric value used for ordering. Digit-only text counts as numeric.
    fn sort_number(&self) -> Option<i128> {
        match self {
            Key::Int(i) => Some(i128::from(*i)),
            Key::Text(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
                s.parse::<i128>().ok()
            }
            Key::Text(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Key::Int(i) => Some(*i),
            Key::Text(_) => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{}", i),
            Key::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Int(value)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Text(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Text(value)
    }
}

/// Total order applied by [`sort`].
///
/// Numeric keys (integers and digit-only strings) come first, ordered by value.
/// Everything else follows in lexical order. Equal numeric values fall back to their
/// text form, then integers before text.
pub fn key_order(a: &Key, b: &Key) -> Ordering {
    match (a.sort_number(), b.sort_number()) {
        (Some(x), Some(y)) => x
            .cmp(&y)
            .then_with(|| a.to_string().cmp(&b.to_string()))
            .then_with(|| match (a, b) {
                (Key::Int(_), Key::Text(_)) => Ordering::Less,
                (Key::Text(_), Key::Int(_)) => Ordering::Greater,
                _ => Ordering::Equal,
            }),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.to_string().cmp(&b.to_string()),
    }
}

/// A value stored under a key.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Map(NestedMap),
    Int(i64),
    /// Any other scalar (string, float, bool, null). Ignored by [`sum_leaves`].
    Scalar(Value),
}

impl Node {
    pub fn as_map(&self) -> Option<&NestedMap> {
        match self {
            Node::Map(map) => Some(map),
            _ => None,
        }
    }
}

impl From<i64> for Node {
    fn from(value: i64) -> Self {
        Node::Int(value)
    }
}

impl From<NestedMap> for Node {
    fn from(value: NestedMap) -> Self {
        Node::Map(value)
    }
}

/// Insertion-ordered mapping of [`Key`] to [`Node`].
///
/// Equality ignores entry order; compare [`NestedMap::keys`] when order matters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NestedMap {
    entries: IndexMap<Key, Node>,
}

impl NestedMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the value for `key`, keeping the original position on replace.
    pub fn insert(&mut self, key: impl Into<Key>, node: impl Into<Node>) -> Option<Node> {
        self.entries.insert(key.into(), node.into())
    }

    pub fn get(&self, key: &Key) -> Option<&Node> {
        self.entries.get(key)
    }

    pub fn get_map(&self, key: &Key) -> Option<&NestedMap> {
        self.get(key).and_then(Node::as_map)
    }

    /// Sub-map under `key`, inserting an empty one first if needed.
    /// A non-map value already stored under `key` is replaced.
    pub fn branch_mut(&mut self, key: impl Into<Key>) -> &mut NestedMap {
        let node = self
            .entries
            .entry(key.into())
            .or_insert_with(|| Node::Map(NestedMap::new()));
        if !matches!(node, Node::Map(_)) {
            *node = Node::Map(NestedMap::new());
        }
        match node {
            Node::Map(map) => map,
            _ => unreachable!("node was just set to a map"),
        }
    }

    /// Adds `by` to the integer stored under `key`, starting from zero and saturating at
    /// the `i64` bounds. Non-integer values under `key` are left untouched.
    pub fn increment(&mut self, key: impl Into<Key>, by: i64) {
        if let Node::Int(n) = self.entries.entry(key.into()).or_insert(Node::Int(0)) {
            *n = n.saturating_add(by);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Key, &Node)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(Key, Node)> for NestedMap {
    fn from_iter<T: IntoIterator<Item = (Key, Node)>>(iter: T) -> Self {
        NestedMap {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a NestedMap {
    type Item = (&'a Key, &'a Node);
    type IntoIter = indexmap::map::Iter<'a, Key, Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Node::Map(map) => map.serialize(serializer),
            Node::Int(i) => serializer.serialize_i64(*i),
            Node::Scalar(value) => value.serialize(serializer),
        }
    }
}

// JSON object keys are always strings, so integer keys are written as text.
impl Serialize for NestedMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, node) in &self.entries {
            map.serialize_entry(&key.to_string(), node)?;
        }
        map.end()
    }
}

/// Copies `map` keeping only branches that hold data.
///
/// Sub-maps that end up empty (created on access but never written) are dropped at
/// every level. Scalars are kept as they are.
pub fn normalize(map: &NestedMap) -> NestedMap {
    map.iter()
        .filter_map(|(key, node)| match node {
            Node::Map(inner) => {
                let inner = normalize(inner);
                (!inner.is_empty()).then(|| (key.clone(), Node::Map(inner)))
            }
            other => Some((key.clone(), other.clone())),
        })
        .collect()
}

/// Converts every key that parses as an integer into [`Key::Int`], at every level.
pub fn coerce_numeric_keys(map: &NestedMap) -> NestedMap {
    map.iter()
        .map(|(key, node)| {
            let key = match key {
                Key::Text(s) => s.parse::<i64>().map(Key::Int).unwrap_or_else(|_| key.clone()),
                Key::Int(_) => key.clone(),
            };
            let node = match node {
                Node::Map(inner) => Node::Map(coerce_numeric_keys(inner)),
                other => other.clone(),
            };
            (key, node)
        })
        .collect()
}

/// Reorders entries at every level by [`key_order`].
pub fn sort(map: &NestedMap) -> NestedMap {
    let mut entries: Vec<(Key, Node)> = map
        .iter()
        .map(|(key, node)| {
            let node = match node {
                Node::Map(inner) => Node::Map(sort(inner)),
                other => other.clone(),
            };
            (key.clone(), node)
        })
        .collect();
    entries.sort_by(|(a, _), (b, _)| key_order(a, b));
    entries.into_iter().collect()
}

/// Sums every integer leaf across all levels and branches.
///
/// The total is widened to `i128` so that no table of `i64` leaves can overflow it.
pub fn sum_leaves(map: &NestedMap) -> i128 {
    map.iter()
        .map(|(_, node)| match node {
            Node::Map(inner) => sum_leaves(inner),
            Node::Int(i) => i128::from(*i),
            Node::Scalar(_) => 0,
        })
        .sum()
}

/// Drops integer keys outside `[min, max]` at every level.
///
/// Either bound may be absent. Text keys are always kept, though their subtrees are
/// still filtered.
pub fn filter_by_key_range(map: &NestedMap, min: Option<i64>, max: Option<i64>) -> NestedMap {
    map.iter()
        .filter(|(key, _)| match key.as_int() {
            Some(k) => min.map_or(true, |lo| k >= lo) && max.map_or(true, |hi| k <= hi),
            None => true,
        })
        .map(|(key, node)| {
            let node = match node {
                Node::Map(inner) => Node::Map(filter_by_key_range(inner, min, max)),
                other => other.clone(),
            };
            (key.clone(), node)
        })
        .collect()
}

/// Whether any level holds a text key that [`coerce_numeric_keys`] would turn into an
/// integer. Such keys are invisible to [`filter_by_key_range`].
pub fn has_numeric_text_keys(map: &NestedMap) -> bool {
    map.iter().any(|(key, node)| {
        matches!(key, Key::Text(s) if s.parse::<i64>().is_ok())
            || node.as_map().is_some_and(has_numeric_text_keys)
    })
}

/// Builds a map from a JSON object. Integer numbers become [`Node::Int`]; keys stay text.
pub fn from_json_value(value: &Value) -> Result<NestedMap, StoreError> {
    match value {
        Value::Object(object) => Ok(object_to_map(object)),
        Value::Null => Err(StoreError::NotAnObject("null")),
        Value::Bool(_) => Err(StoreError::NotAnObject("a boolean")),
        Value::Number(_) => Err(StoreError::NotAnObject("a number")),
        Value::String(_) => Err(StoreError::NotAnObject("a string")),
        Value::Array(_) => Err(StoreError::NotAnObject("an array")),
    }
}

fn object_to_map(object: &serde_json::Map<String, Value>) -> NestedMap {
    object
        .iter()
        .map(|(key, value)| {
            let node = match value {
                Value::Object(inner) => Node::Map(object_to_map(inner)),
                Value::Number(n) => n
                    .as_i64()
                    .map(Node::Int)
                    .unwrap_or_else(|| Node::Scalar(value.clone())),
                other => Node::Scalar(other.clone()),
            };
            (Key::Text(key.clone()), node)
        })
        .collect()
}

/// Reads a nested JSON object from `path`. All keys come back as text.
pub fn load_json<P: AsRef<Path>>(path: P) -> Result<NestedMap, StoreError> {
    let file = File::open(path.as_ref())?;
    let value: Value = serde_json::from_reader(BufReader::new(file))?;
    from_json_value(&value)
}

/// Writes `map` as JSON indented with four spaces, preserving entry order.
pub fn write_json_to<W: Write>(writer: W, map: &NestedMap) -> Result<(), StoreError> {
    let mut serializer =
        serde_json::Serializer::with_formatter(writer, PrettyFormatter::with_indent(JSON_INDENT));
    map.serialize(&mut serializer)?;
    Ok(())
}

pub fn write_json<P: AsRef<Path>>(path: P, map: &NestedMap) -> Result<(), StoreError> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    write_json_to(&mut writer, map)?;
    writer.flush()?;
    Ok(())
}

pub fn to_json_string(map: &NestedMap) -> Result<String, StoreError> {
    let mut buf = Vec::new();
    write_json_to(&mut buf, map)?;
    String::from_utf8(buf).map_err(|e| StoreError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
}
