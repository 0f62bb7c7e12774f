//! Canonical structural representation of a YAML/JSON document.
//!
//! A [`Node`] is built from YAML or JSON bytes and canonicalized on
//! construction: mapping keys are sorted, and numeric scalars that
//! round-trip cleanly as integers are stored as integers. Nodes are
//! value-like — [`Node::mask`] returns a fresh tree and nothing mutates
//! in place.

use std::collections::BTreeMap;

use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};

use crate::path::FieldPath;

/// Errors from constructing or serializing a [`Node`].
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// Input was not valid YAML.
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Input was not valid JSON.
    #[error("failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A mapping key was not a scalar.
    #[error("unsupported mapping key: {0}")]
    UnsupportedKey(String),
}

/// A node in a canonicalized document tree.
///
/// Interior nodes are sorted mappings or ordered sequences; leaves are
/// scalars.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// YAML/JSON null.
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Integer scalar (anything that round-trips cleanly as `i64`).
    Int(i64),
    /// Floating-point scalar.
    Float(f64),
    /// String scalar.
    String(String),
    /// Ordered sequence.
    Seq(Vec<Node>),
    /// Keyed mapping, canonically sorted.
    Map(BTreeMap<String, Node>),
}

impl Node {
    /// Build a node from YAML bytes (a single document).
    pub fn from_yaml_bytes(data: &[u8]) -> Result<Self, NodeError> {
        let value: serde_yaml::Value = serde_yaml::from_slice(data)?;
        Self::from_yaml_value(value)
    }

    /// Build a node from JSON bytes.
    pub fn from_json_bytes(data: &[u8]) -> Result<Self, NodeError> {
        let value: serde_json::Value = serde_json::from_slice(data)?;
        Ok(Self::from_json_value(value))
    }

    fn from_yaml_value(value: serde_yaml::Value) -> Result<Self, NodeError> {
        Ok(match value {
            serde_yaml::Value::Null => Self::Null,
            serde_yaml::Value::Bool(b) => Self::Bool(b),
            serde_yaml::Value::Number(n) => Self::from_number(n.as_i64(), n.as_u64(), n.as_f64()),
            serde_yaml::Value::String(s) => Self::String(s),
            serde_yaml::Value::Sequence(seq) => Self::Seq(
                seq.into_iter()
                    .map(Self::from_yaml_value)
                    .collect::<Result<_, _>>()?,
            ),
            serde_yaml::Value::Mapping(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    out.insert(yaml_key_to_string(k)?, Self::from_yaml_value(v)?);
                }
                Self::Map(out)
            }
            serde_yaml::Value::Tagged(tagged) => Self::from_yaml_value(tagged.value)?,
        })
    }

    fn from_json_value(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::from_number(n.as_i64(), n.as_u64(), n.as_f64()),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(seq) => {
                Self::Seq(seq.into_iter().map(Self::from_json_value).collect())
            }
            serde_json::Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json_value(v)))
                    .collect(),
            ),
        }
    }

    /// Numeric canonicalization: clean integers become `Int`, everything
    /// else an IEEE-754 double.
    #[expect(
        clippy::cast_possible_truncation,
        reason = "truncation guarded by the round-trip check"
    )]
    fn from_number(as_i64: Option<i64>, as_u64: Option<u64>, as_f64: Option<f64>) -> Self {
        if let Some(i) = as_i64 {
            return Self::Int(i);
        }
        if let Some(u) = as_u64 {
            // u64 values above i64::MAX fall through to the float form.
            if let Ok(i) = i64::try_from(u) {
                return Self::Int(i);
            }
        }
        let f = as_f64.unwrap_or(0.0);
        if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.007_199_254_740_992e15 {
            Self::Int(f as i64)
        } else {
            Self::Float(f)
        }
    }

    /// Walk a dotted path; `None` when any segment is missing or the
    /// path is malformed.
    pub fn get(&self, path: &str) -> Option<&Self> {
        let parsed = FieldPath::parse(path).ok()?;
        self.get_path(&parsed)
    }

    /// Walk a parsed path.
    pub fn get_path(&self, path: &FieldPath) -> Option<&Self> {
        let mut current = self;
        for seg in path.segments() {
            match current {
                Self::Map(map) => current = map.get(seg)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// String rendering of the node at `path`; empty when missing.
    pub fn get_string(&self, path: &str) -> String {
        self.get(path).map(Self::render).unwrap_or_default()
    }

    /// Scalar values render plainly; composites render as JSON.
    fn render(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::String(s) => s.clone(),
            Self::Seq(_) | Self::Map(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
        }
    }

    /// Return a copy of the tree with every listed path removed.
    ///
    /// Paths that do not parse or do not exist in the tree are silently
    /// ignored. Masking is idempotent and commutes over disjoint paths.
    pub fn mask<P: AsRef<str>>(&self, paths: &[P]) -> Self {
        let mut out = self.clone();
        for path in paths {
            if let Ok(parsed) = FieldPath::parse(path.as_ref()) {
                out.remove_path(&parsed);
            }
        }
        out
    }

    fn remove_path(&mut self, path: &FieldPath) {
        let segments = path.segments();
        let Some((last, parents)) = segments.split_last() else {
            return;
        };
        let mut current = self;
        for seg in parents {
            match current {
                Self::Map(map) => match map.get_mut(seg) {
                    Some(next) => current = next,
                    None => return,
                },
                _ => return,
            }
        }
        if let Self::Map(map) = current {
            map.remove(last);
        }
    }

    /// Serialize with canonical (sorted) key order.
    pub fn to_yaml(&self) -> Result<String, NodeError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Serialize to compact JSON.
    pub fn to_json(&self) -> Result<String, NodeError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Scalar equality: numeric scalars compare by value across the
    /// integer and float representations.
    #[expect(
        clippy::cast_precision_loss,
        clippy::float_cmp,
        reason = "value comparison is the contract; integers stay exact below 2^53"
    )]
    pub(crate) fn scalar_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(i), Self::Float(f)) | (Self::Float(f), Self::Int(i)) => *i as f64 == *f,
            _ => self == other,
        }
    }
}

fn yaml_key_to_string(key: serde_yaml::Value) -> Result<String, NodeError> {
    match key {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        other => Err(NodeError::UnsupportedKey(format!("{other:?}"))),
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(i) => serializer.serialize_i64(*i),
            Self::Float(f) => serializer.serialize_f64(*f),
            Self::String(s) => serializer.serialize_str(s),
            Self::Seq(seq) => {
                let mut s = serializer.serialize_seq(Some(seq.len()))?;
                for item in seq {
                    s.serialize_element(item)?;
                }
                s.end()
            }
            Self::Map(map) => {
                let mut m = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    m.serialize_entry(k, v)?;
                }
                m.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIGMAP: &str = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: cm1
  namespace: ns1
  annotations:
    app: sample
data:
  key1: val1
  key2: val2
"#;

    #[test]
    fn yaml_and_json_converge() {
        let from_yaml = Node::from_yaml_bytes(CONFIGMAP.as_bytes()).unwrap();
        let json = serde_json::to_string(&from_yaml).unwrap();
        let from_json = Node::from_json_bytes(json.as_bytes()).unwrap();
        assert_eq!(from_yaml, from_json);
    }

    #[test]
    fn get_walks_paths() {
        let node = Node::from_yaml_bytes(CONFIGMAP.as_bytes()).unwrap();
        assert_eq!(node.get_string("metadata.name"), "cm1");
        assert_eq!(node.get_string("metadata.namespace"), "ns1");
        assert_eq!(node.get_string("data.key1"), "val1");
        assert_eq!(node.get_string("spec.replicas"), "");
        assert!(node.get("data.missing").is_none());
    }

    #[test]
    fn quoted_annotation_key_lookup() {
        let yaml = r#"
metadata:
  annotations:
    cosign.sigstore.dev/message: abc
"#;
        let node = Node::from_yaml_bytes(yaml.as_bytes()).unwrap();
        assert_eq!(
            node.get_string("metadata.annotations.\"cosign.sigstore.dev/message\""),
            "abc"
        );
    }

    #[test]
    fn mask_removes_paths() {
        let node = Node::from_yaml_bytes(CONFIGMAP.as_bytes()).unwrap();
        let masked = node.mask(&["data.key1", "metadata.annotations"]);
        assert!(masked.get("data.key1").is_none());
        assert!(masked.get("metadata.annotations").is_none());
        assert_eq!(masked.get_string("data.key2"), "val2");
        // Original untouched.
        assert_eq!(node.get_string("data.key1"), "val1");
    }

    #[test]
    fn mask_is_idempotent() {
        let node = Node::from_yaml_bytes(CONFIGMAP.as_bytes()).unwrap();
        let once = node.mask(&["data.key1", "status"]);
        let twice = once.mask(&["data.key1", "status"]);
        assert_eq!(once, twice);
    }

    #[test]
    fn mask_ignores_unknown_paths() {
        let node = Node::from_yaml_bytes(CONFIGMAP.as_bytes()).unwrap();
        let masked = node.mask(&["spec.template.spec", "nope", "also..bad"]);
        assert_eq!(node, masked);
    }

    #[test]
    fn integers_canonicalize_across_formats() {
        let yaml_node = Node::from_yaml_bytes(b"replicas: 3").unwrap();
        let json_node = Node::from_json_bytes(b"{\"replicas\": 3.0}").unwrap();
        assert_eq!(yaml_node, json_node);
        assert!(matches!(
            json_node.get("replicas"),
            Some(Node::Int(3))
        ));
    }

    #[test]
    fn float_survives() {
        let node = Node::from_yaml_bytes(b"threshold: 0.5").unwrap();
        assert!(matches!(node.get("threshold"), Some(Node::Float(f)) if (f - 0.5).abs() < 1e-9));
    }

    #[test]
    fn to_yaml_reparse_is_equivalent() {
        let node = Node::from_yaml_bytes(CONFIGMAP.as_bytes()).unwrap();
        let yaml = node.to_yaml().unwrap();
        let reparsed = Node::from_yaml_bytes(yaml.as_bytes()).unwrap();
        assert_eq!(node, reparsed);
    }

    #[test]
    fn scalar_eq_crosses_numeric_types() {
        assert!(Node::Int(2).scalar_eq(&Node::Float(2.0)));
        assert!(!Node::Int(2).scalar_eq(&Node::Float(2.5)));
        assert!(!Node::Int(2).scalar_eq(&Node::String("2".to_owned())));
    }
}
