//! Error types for the verification engine.

/// Errors from the kubesigil verification engine.
///
/// Mismatches are not errors: a manifest that fails to match or a
/// signature that fails to verify surfaces as an unverified
/// [`crate::verify::VerifyResult`]. These variants cover pipeline
/// failures only. Cache problems never appear here; a corrupt or
/// unreadable cache entry is always treated as a miss.
#[derive(Debug, thiserror::Error)]
pub enum SigilError {
    /// Empty manifest, malformed document, or missing identity fields.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The reference manifest could not be reached or decoded.
    #[error("failed to fetch reference manifest: {0}")]
    Fetch(String),

    /// A dry-run or patch call against the cluster failed.
    #[error("cluster operation failed: {0}")]
    Cluster(String),

    /// The signing backend failed in a way other than "not verified".
    #[error("signature operation failed: {0}")]
    Signature(String),

    /// Key material could not be loaded, parsed, or generated.
    #[error("key error: {0}")]
    Key(String),

    /// I/O failure outside the cache layer.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML (de)serialization failure.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Document model failure.
    #[error(transparent)]
    Node(#[from] kubesigil_mapnode::NodeError),
}
