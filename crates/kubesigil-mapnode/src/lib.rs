//! Canonical structural document model for Kubernetes manifests.
//!
//! `kubesigil-mapnode` turns YAML or JSON bytes into a canonicalized
//! tree ([`Node`]), supports masking field paths out of the tree, and
//! computes structural diffs between trees. The verification engine is
//! built on three facts about this model: masking is idempotent, a
//! node's diff against itself is empty, and an empty diff means
//! structural equality under the same canonicalization.

pub mod diff;
pub mod node;
pub mod path;

pub use diff::{DiffKind, DiffResult, Difference, FilteredDiff};
pub use node::{Node, NodeError};
pub use path::{FieldPath, PathError};
