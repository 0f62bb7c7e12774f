//! Structural diff between two document trees.
//!
//! Two nodes are equivalent when their diff is empty. Mappings diff
//! key-by-key, sequences index-by-index, scalars by type-and-value
//! (numbers compare by value across the integer/float split).

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::node::Node;
use crate::path::FieldPath;

/// How a single path differs between the two sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffKind {
    /// Present only on the right side.
    Added,
    /// Present only on the left side.
    Removed,
    /// Present on both sides with different values.
    Changed,
}

/// One structural difference.
#[derive(Debug, Clone, Serialize)]
pub struct Difference {
    /// Path to the differing node.
    #[serde(serialize_with = "serialize_path")]
    pub path: FieldPath,
    /// Value on the left side, absent for [`DiffKind::Added`].
    pub left: Option<Node>,
    /// Value on the right side, absent for [`DiffKind::Removed`].
    pub right: Option<Node>,
    /// The kind of difference.
    pub kind: DiffKind,
}

fn serialize_path<S: serde::Serializer>(path: &FieldPath, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&path.to_string())
}

/// An ordered list of structural differences.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffResult {
    /// The differences, in document order.
    pub items: Vec<Difference>,
}

/// Outcome of partitioning a diff by a set of path prefixes.
#[derive(Debug)]
pub struct FilteredDiff {
    /// Differences under one of the listed prefixes.
    pub matched: DiffResult,
    /// Differences untouched by the listed prefixes.
    pub remaining: DiffResult,
    /// Paths of the matched differences, rendered.
    pub removed_paths: Vec<String>,
}

impl DiffResult {
    /// Number of differences.
    pub fn size(&self) -> usize {
        self.items.len()
    }

    /// True when the two sides are structurally equal.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Partition the diff by path prefix.
    ///
    /// A difference matches when its path equals a listed path or
    /// descends from it (whole-segment prefixes). Paths that fail to
    /// parse are ignored.
    pub fn filter<P: AsRef<str>>(&self, paths: &[P]) -> FilteredDiff {
        let prefixes: Vec<FieldPath> = paths
            .iter()
            .filter_map(|p| FieldPath::parse(p.as_ref()).ok())
            .collect();

        let mut matched = DiffResult::default();
        let mut remaining = DiffResult::default();
        let mut removed_paths = Vec::new();

        for item in &self.items {
            if prefixes.iter().any(|p| item.path.starts_with(p)) {
                removed_paths.push(item.path.to_string());
                matched.items.push(item.clone());
            } else {
                remaining.items.push(item.clone());
            }
        }

        FilteredDiff {
            matched,
            remaining,
            removed_paths,
        }
    }
}

impl fmt::Display for DiffResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for item in &self.items {
            let render = |side: &Option<Node>| {
                side.as_ref()
                    .and_then(|n| serde_json::to_string(n).ok())
                    .unwrap_or_else(|| "(absent)".to_owned())
            };
            writeln!(
                f,
                "{} {}: {} -> {}",
                match item.kind {
                    DiffKind::Added => "+",
                    DiffKind::Removed => "-",
                    DiffKind::Changed => "~",
                },
                item.path,
                render(&item.left),
                render(&item.right),
            )?;
        }
        Ok(())
    }
}

impl Node {
    /// Structural diff against another node.
    pub fn diff(&self, other: &Self) -> DiffResult {
        let mut result = DiffResult::default();
        diff_into(
            self,
            other,
            &FieldPath::from_segments(Vec::new()),
            &mut result,
        );
        result
    }
}

fn diff_into(left: &Node, right: &Node, path: &FieldPath, out: &mut DiffResult) {
    match (left, right) {
        (Node::Map(l), Node::Map(r)) => {
            let keys: BTreeSet<&String> = l.keys().chain(r.keys()).collect();
            for key in keys {
                let child = path.child(key);
                match (l.get(key), r.get(key)) {
                    (Some(lv), Some(rv)) => diff_into(lv, rv, &child, out),
                    (Some(lv), None) => out.items.push(Difference {
                        path: child,
                        left: Some(lv.clone()),
                        right: None,
                        kind: DiffKind::Removed,
                    }),
                    (None, Some(rv)) => out.items.push(Difference {
                        path: child,
                        left: None,
                        right: Some(rv.clone()),
                        kind: DiffKind::Added,
                    }),
                    (None, None) => unreachable!("key came from the union"),
                }
            }
        }
        (Node::Seq(l), Node::Seq(r)) => {
            for (i, (lv, rv)) in l.iter().zip(r.iter()).enumerate() {
                diff_into(lv, rv, &path.child(&i.to_string()), out);
            }
            // Unequal lengths surface at the trailing positions.
            for (i, lv) in l.iter().enumerate().skip(r.len()) {
                out.items.push(Difference {
                    path: path.child(&i.to_string()),
                    left: Some(lv.clone()),
                    right: None,
                    kind: DiffKind::Removed,
                });
            }
            for (i, rv) in r.iter().enumerate().skip(l.len()) {
                out.items.push(Difference {
                    path: path.child(&i.to_string()),
                    left: None,
                    right: Some(rv.clone()),
                    kind: DiffKind::Added,
                });
            }
        }
        _ => {
            // Scalars, or mismatched composite kinds.
            if !left.scalar_eq(right) {
                out.items.push(Difference {
                    path: path.clone(),
                    left: Some(left.clone()),
                    right: Some(right.clone()),
                    kind: DiffKind::Changed,
                });
            }
        }
    }
}
