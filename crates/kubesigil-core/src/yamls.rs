//! Multi-document YAML plumbing: splitting, concatenation, directory
//! discovery, and identity-tuple lookup.
//!
//! A manifest stream holds one or more documents separated by the `---`
//! marker. Documents pair with their reference copy through the
//! identity tuple (apiVersion, kind, name, namespace); an empty
//! namespace on either side matches any.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::SigilError;

/// Identity of a Kubernetes-shaped document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    /// `apiVersion` field.
    pub api_version: String,
    /// `kind` field.
    pub kind: String,
    /// `metadata.name`.
    pub name: String,
    /// `metadata.namespace`; empty for cluster-scoped or unspecified.
    pub namespace: String,
}

impl ObjectSummary {
    /// Extract the identity tuple from a single YAML document.
    pub fn from_yaml(data: &[u8]) -> Result<Self, SigilError> {
        #[derive(Deserialize, Default)]
        struct Meta {
            #[serde(default)]
            name: String,
            #[serde(default)]
            namespace: String,
        }
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Doc {
            #[serde(default)]
            api_version: String,
            #[serde(default)]
            kind: String,
            #[serde(default)]
            metadata: Meta,
        }

        let doc: Doc = serde_yaml::from_slice(data)
            .map_err(|e| SigilError::InvalidInput(format!("not a Kubernetes object: {e}")))?;
        if doc.api_version.is_empty() || doc.kind.is_empty() || doc.metadata.name.is_empty() {
            return Err(SigilError::InvalidInput(
                "document is missing apiVersion, kind, or metadata.name".to_owned(),
            ));
        }
        Ok(Self {
            api_version: doc.api_version,
            kind: doc.kind,
            name: doc.metadata.name,
            namespace: doc.metadata.namespace,
        })
    }

    /// Identity match; an empty namespace on either side is a wildcard.
    pub fn matches(&self, other: &Self) -> bool {
        self.api_version == other.api_version
            && self.kind == other.kind
            && self.name == other.name
            && (self.namespace.is_empty()
                || other.namespace.is_empty()
                || self.namespace == other.namespace)
    }
}

/// True when the bytes decode as a Kubernetes-shaped YAML document.
pub fn is_k8s_resource_yaml(data: &[u8]) -> bool {
    ObjectSummary::from_yaml(data).is_ok()
}

/// Split a concatenated YAML stream into its documents, re-serialized
/// one per entry. Documents that fail to decode are skipped.
pub fn split_concat_yamls(data: &[u8]) -> Vec<Vec<u8>> {
    let mut docs = Vec::new();
    for document in serde_yaml::Deserializer::from_slice(data) {
        let Ok(value) = serde_yaml::Value::deserialize(document) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        if let Ok(bytes) = serde_yaml::to_string(&value) {
            docs.push(bytes.into_bytes());
        }
    }
    docs
}

/// Join documents with the `---` marker.
pub fn concat_yamls(yamls: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, y) in yamls.iter().enumerate() {
        if i > 0 {
            out.extend_from_slice(b"\n---\n");
        }
        out.extend_from_slice(y);
    }
    out
}

/// Find the single document in `concat` whose identity tuple matches.
///
/// Returns `None` when no document matches.
pub fn find_single_yaml(
    concat: &[u8],
    api_version: &str,
    kind: &str,
    name: &str,
    namespace: &str,
) -> Option<Vec<u8>> {
    let wanted = ObjectSummary {
        api_version: api_version.to_owned(),
        kind: kind.to_owned(),
        name: name.to_owned(),
        namespace: namespace.to_owned(),
    };
    split_concat_yamls(concat)
        .into_iter()
        .find(|doc| ObjectSummary::from_yaml(doc).is_ok_and(|id| id.matches(&wanted)))
}

/// Recursively collect `.yaml`/`.yml` files under `dir` that decode as
/// Kubernetes-shaped objects, as (path relative to `dir`, bytes) pairs
/// in sorted path order.
pub fn find_yamls_in_dir(dir: &Path) -> Result<Vec<(PathBuf, Vec<u8>)>, SigilError> {
    let mut found = Vec::new();
    walk_dir(dir, dir, &mut found)?;
    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found)
}

fn walk_dir(
    root: &Path,
    dir: &Path,
    found: &mut Vec<(PathBuf, Vec<u8>)>,
) -> Result<(), SigilError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk_dir(root, &path, found)?;
            continue;
        }
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
        if !is_yaml {
            continue;
        }
        let data = std::fs::read(&path)?;
        if is_k8s_resource_yaml(&data) {
            let rel = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            found.push((rel, data));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CM1: &str = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm1\n  namespace: ns1\ndata:\n  k: v\n";
    const CM2: &str = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm2\ndata:\n  k: v\n";

    #[test]
    fn summary_extraction() {
        let id = ObjectSummary::from_yaml(CM1.as_bytes()).unwrap();
        assert_eq!(id.api_version, "v1");
        assert_eq!(id.kind, "ConfigMap");
        assert_eq!(id.name, "cm1");
        assert_eq!(id.namespace, "ns1");
    }

    #[test]
    fn missing_identity_rejected() {
        assert!(ObjectSummary::from_yaml(b"data:\n  k: v\n").is_err());
        assert!(!is_k8s_resource_yaml(b"just: yaml\n"));
    }

    #[test]
    fn namespace_wildcard() {
        let with_ns = ObjectSummary::from_yaml(CM1.as_bytes()).unwrap();
        let mut without_ns = with_ns.clone();
        without_ns.namespace = String::new();
        assert!(with_ns.matches(&without_ns));
        assert!(without_ns.matches(&with_ns));

        let mut other_ns = with_ns.clone();
        other_ns.namespace = "ns2".to_owned();
        assert!(!with_ns.matches(&other_ns));
    }

    #[test]
    fn split_and_concat_round_trip() {
        let concat = concat_yamls(&[CM1.as_bytes().to_vec(), CM2.as_bytes().to_vec()]);
        let docs = split_concat_yamls(&concat);
        assert_eq!(docs.len(), 2);
        assert!(is_k8s_resource_yaml(&docs[0]));
        assert!(is_k8s_resource_yaml(&docs[1]));
    }

    #[test]
    fn split_skips_empty_documents() {
        let concat = b"---\n\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm1\n";
        let docs = split_concat_yamls(concat);
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn find_single_yaml_by_identity() {
        let concat = concat_yamls(&[CM1.as_bytes().to_vec(), CM2.as_bytes().to_vec()]);

        let found = find_single_yaml(&concat, "v1", "ConfigMap", "cm2", "").unwrap();
        let id = ObjectSummary::from_yaml(&found).unwrap();
        assert_eq!(id.name, "cm2");

        // Empty namespace in the stream matches a namespaced query.
        assert!(find_single_yaml(&concat, "v1", "ConfigMap", "cm2", "anywhere").is_some());
        assert!(find_single_yaml(&concat, "v1", "Secret", "cm2", "").is_none());
    }

    #[test]
    fn dir_discovery_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.yaml"), CM2).unwrap();
        std::fs::write(dir.path().join("sub/a.yml"), CM1).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not yaml").unwrap();
        std::fs::write(dir.path().join("a.yaml"), "random: doc\n").unwrap();

        let found = find_yamls_in_dir(dir.path()).unwrap();
        let names: Vec<String> = found
            .iter()
            .map(|(p, _)| p.display().to_string())
            .collect();
        assert_eq!(names, ["b.yaml", "sub/a.yml"]);
    }
}
