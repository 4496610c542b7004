//! Named settings model
//!
//! [`Settings`] is a flat, ordered set of dotted paths to [`Value`]s. The
//! flat form is what the codec works with; [`Settings::to_document`] and
//! [`Settings::from_document`] convert to and from the nested JSON shape
//! that users edit, where numeric path segments become array indices
//! (`fm.0.rf_level` <-> `{"fm": [{"rf_level": ...}]}`).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number};
use std::collections::BTreeMap;
use std::fmt;

/// A single settings value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean, accepted by flag fields
    Bool(bool),
    /// Integer
    Integer(i64),
    /// Non-integer number
    Float(f64),
    /// Enum name or text
    Text(String),
}

impl Value {
    /// Integer view; floats qualify only when they have no fraction
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    /// Numeric view
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Text view
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Parse a value typed on the command line
    ///
    /// `true`/`false` become booleans, decimal or `0x` hex become integers,
    /// other numbers become floats, and anything else is text. Surrounding
    /// quotes force text.
    pub fn parse(s: &str) -> Value {
        let s = s.trim();
        if s.len() >= 2
            && ((s.starts_with('"') && s.ends_with('"'))
                || (s.starts_with('\'') && s.ends_with('\'')))
        {
            return Value::Text(s[1..s.len() - 1].to_string());
        }
        match s {
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            _ => {}
        }
        if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            if let Ok(v) = i64::from_str_radix(hex, 16) {
                return Value::Integer(v);
            }
        }
        if let Ok(v) = s.parse::<i64>() {
            return Value::Integer(v);
        }
        match s.parse::<f64>() {
            Ok(v) if v.is_finite() => Value::Float(v),
            _ => Value::Text(s.to_string()),
        }
    }

    fn from_json(value: &serde_json::Value) -> Option<Value> {
        match value {
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Number(n) => Some(match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            }),
            serde_json::Value::String(s) => Some(Value::Text(s.clone())),
            _ => None,
        }
    }

    fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

macro_rules! value_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::Integer(v as i64)
            }
        })*
    };
}

value_from_int!(u8, u16, u32, i32, i64);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

/// Flat map of dotted paths to values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    values: BTreeMap<String, Value>,
}

impl Settings {
    /// Empty settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value, returning the previous one
    pub fn insert(&mut self, path: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(path.into(), value.into())
    }

    /// Get a value
    pub fn get(&self, path: &str) -> Option<&Value> {
        self.values.get(path)
    }

    /// Remove a value
    pub fn remove(&mut self, path: &str) -> Option<Value> {
        self.values.remove(path)
    }

    /// Whether a path is present
    pub fn contains(&self, path: &str) -> bool {
        self.values.contains_key(path)
    }

    /// Number of leaves
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no leaves
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Leaves in path order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Overlay `other` on top of `self`
    pub fn merge(&mut self, other: Settings) {
        self.values.extend(other.values);
    }

    /// Keep only leaves equal to, or nested under, one of `paths`
    pub fn retain_paths<S: AsRef<str>>(&mut self, paths: &[S]) {
        self.values.retain(|key, _| {
            paths.iter().any(|p| {
                let p = p.as_ref().trim_end_matches('.');
                key == p
                    || (key.len() > p.len() && key.starts_with(p) && key.as_bytes()[p.len()] == b'.')
            })
        });
    }

    /// Paths whose values differ between `self` and `other`
    pub fn diff(&self, other: &Settings) -> Vec<String> {
        let mut changed: Vec<String> = self
            .values
            .iter()
            .filter(|(k, v)| other.values.get(*k) != Some(*v))
            .map(|(k, _)| k.clone())
            .collect();
        changed.extend(
            other
                .values
                .keys()
                .filter(|k| !self.values.contains_key(*k))
                .cloned(),
        );
        changed.sort();
        changed
    }

    /// Parse a `path=value` assignment
    pub fn parse_assignment(s: &str) -> Result<(String, Value)> {
        let (path, value) = s
            .split_once('=')
            .ok_or_else(|| Error::Document(format!("'{}' is not of the form key=value", s)))?;
        let path = path.trim();
        if path.is_empty() {
            return Err(Error::Document(format!("'{}' has an empty key", s)));
        }
        Ok((path.to_string(), Value::parse(value)))
    }

    /// Flatten a nested document
    ///
    /// Object keys and array indices are joined with dots. `null` entries
    /// are skipped, which lets a partial document leave array slots alone.
    /// Keys may themselves be dotted.
    pub fn from_document(doc: &serde_json::Value) -> Result<Self> {
        if !doc.is_object() {
            return Err(Error::Document("top level must be an object".into()));
        }
        let mut settings = Settings::new();
        flatten(doc, String::new(), &mut settings)?;
        Ok(settings)
    }

    /// Build the nested document
    pub fn to_document(&self) -> serde_json::Value {
        let mut root = Node::default();
        for (path, value) in &self.values {
            let node = path.split('.').fold(&mut root, |node, segment| {
                node.children.entry(segment.to_string()).or_default()
            });
            node.value = Some(value.to_json());
        }
        root.into_json()
    }
}

impl FromIterator<(String, Value)> for Settings {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Settings {
    type Item = (&'a String, &'a Value);
    type IntoIter = std::collections::btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

fn flatten(value: &serde_json::Value, prefix: String, out: &mut Settings) -> Result<()> {
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{}", prefix, key)
        }
    };
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                flatten(child, join(key), out)?;
            }
        }
        serde_json::Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                flatten(child, join(&i.to_string()), out)?;
            }
        }
        serde_json::Value::Null => {}
        scalar => {
            let v = Value::from_json(scalar)
                .ok_or_else(|| Error::Document(format!("unsupported value at '{}'", prefix)))?;
            out.insert(prefix, v);
        }
    }
    Ok(())
}

#[derive(Default)]
struct Node {
    value: Option<serde_json::Value>,
    children: BTreeMap<String, Node>,
}

impl Node {
    fn into_json(self) -> serde_json::Value {
        if self.children.is_empty() {
            return self.value.unwrap_or(serde_json::Value::Null);
        }
        let indices: Option<Vec<usize>> = self
            .children
            .keys()
            .map(|k| k.parse::<usize>().ok())
            .collect();
        match indices {
            Some(indices) => {
                let len = indices.iter().max().map_or(0, |m| m + 1);
                let mut items = vec![serde_json::Value::Null; len];
                for (i, child) in indices.into_iter().zip(self.children.into_values()) {
                    items[i] = child.into_json();
                }
                serde_json::Value::Array(items)
            }
            None => serde_json::Value::Object(
                self.children
                    .into_iter()
                    .map(|(k, v)| (k, v.into_json()))
                    .collect::<Map<String, serde_json::Value>>(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_document_flattens() {
        let doc = json!({
            "name": "Studio",
            "fm": [null, {"rf_frequency_khz": 7020, "input": "ADC1R"}],
            "video": {"video_level": 100, "enable": true},
            "general.morse_speed": 1
        });
        let s = Settings::from_document(&doc).unwrap();
        assert_eq!(s.len(), 6);
        assert_eq!(s.get("fm.1.rf_frequency_khz"), Some(&Value::Integer(7020)));
        assert_eq!(s.get("fm.1.input"), Some(&Value::from("ADC1R")));
        assert_eq!(s.get("video.enable"), Some(&Value::Bool(true)));
        assert_eq!(s.get("general.morse_speed"), Some(&Value::Integer(1)));
        assert!(!s.contains("fm.0.rf_level"));
    }

    #[test]
    fn document_rebuilds_arrays() {
        let mut s = Settings::new();
        s.insert("fm.0.rf_level", 100);
        s.insert("fm.2.rf_level", 200);
        s.insert("video.video_mode", "PAL");
        let doc = s.to_document();
        assert_eq!(
            doc,
            json!({
                "fm": [{"rf_level": 100}, null, {"rf_level": 200}],
                "video": {"video_mode": "PAL"}
            })
        );
        assert_eq!(Settings::from_document(&doc).unwrap(), s);
    }

    #[test]
    fn top_level_must_be_object() {
        assert!(matches!(
            Settings::from_document(&json!([1, 2])),
            Err(Error::Document(_))
        ));
    }

    #[test]
    fn parse_values() {
        assert_eq!(Value::parse("7020"), Value::Integer(7020));
        assert_eq!(Value::parse("0x1F"), Value::Integer(31));
        assert_eq!(Value::parse("12.5"), Value::Float(12.5));
        assert_eq!(Value::parse("true"), Value::Bool(true));
        assert_eq!(Value::parse("PAL"), Value::from("PAL"));
        assert_eq!(Value::parse("\"42\""), Value::from("42"));
    }

    #[test]
    fn parse_assignment() {
        let (k, v) = Settings::parse_assignment("fm.0.rf_frequency_khz=7020").unwrap();
        assert_eq!(k, "fm.0.rf_frequency_khz");
        assert_eq!(v, Value::Integer(7020));
        let (k, v) = Settings::parse_assignment("name=Test = 1").unwrap();
        assert_eq!(k, "name");
        assert_eq!(v, Value::from("Test = 1"));
        assert!(Settings::parse_assignment("novalue").is_err());
        assert!(Settings::parse_assignment("=3").is_err());
    }

    #[test]
    fn retain_and_diff() {
        let mut s = Settings::new();
        s.insert("fm.0.rf_level", 1);
        s.insert("fm.1.rf_level", 2);
        s.insert("fm.10.rf_level", 3);
        s.insert("name", "x");
        let mut kept = s.clone();
        kept.retain_paths(&["fm.1", "name"]);
        assert_eq!(kept.len(), 2);
        assert!(kept.contains("fm.1.rf_level"));
        assert!(!kept.contains("fm.10.rf_level"));

        let mut other = s.clone();
        other.insert("fm.0.rf_level", 9);
        assert_eq!(s.diff(&other), vec!["fm.0.rf_level".to_string()]);
    }
}
