//! Verification options, signer allow-list, and per-kind ignore rules.
//!
//! Options come from CLI flags or an optional YAML config file:
//!
//! ```yaml
//! imageRef: registry.local/sample/app:0.1.0
//! keyPath: /keys/pub.pem
//! signers:
//!   - dev@example.com
//! ignoreFields:
//!   - kind: Deployment
//!     fields:
//!       - spec.replicas
//! useCache: true
//! cacheDir: /tmp/kubesigil-cache
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cache::Cache;
use crate::error::SigilError;

/// Allow-list of signer names (email SAN match). Empty admits every
/// signer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignerList(pub Vec<String>);

impl SignerList {
    /// True when the list is empty or contains `name`.
    pub fn matches(&self, name: &str) -> bool {
        self.0.is_empty() || self.0.iter().any(|s| s == name)
    }
}

/// One per-kind set of field paths excluded from the match diff.
#[derive(Debug, Clone, Deserialize)]
pub struct IgnoreFieldsEntry {
    /// The `kind` this entry applies to.
    pub kind: String,
    /// Dotted field paths to drop from the diff.
    pub fields: Vec<String>,
}

/// Per-kind ignore rules; the first matching entry wins.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IgnoreFieldsConfig(pub Vec<IgnoreFieldsEntry>);

impl IgnoreFieldsConfig {
    /// Fields of the first entry whose kind matches, if any.
    pub fn fields_for(&self, kind: &str) -> Option<&[String]> {
        self.0
            .iter()
            .find(|e| e.kind == kind)
            .map(|e| e.fields.as_slice())
    }
}

/// Options for a verification run.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOption {
    /// Reference of the signed artifact; discovered from the input's
    /// `imageRef` annotation when absent.
    #[serde(default)]
    pub image_ref: Option<String>,
    /// Path to the verification key; keyless mode when absent.
    #[serde(default)]
    pub key_path: Option<String>,
    /// Signer allow-list.
    #[serde(default)]
    pub signers: SignerList,
    /// Per-kind diff exclusions.
    #[serde(default)]
    pub ignore_fields: IgnoreFieldsConfig,
    /// Enable the on-disk cache.
    #[serde(default)]
    pub use_cache: bool,
    /// Cache directory; a per-user temp default when absent.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Cache TTL override in seconds.
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

impl VerifyOption {
    /// Load options from a YAML config file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, SigilError> {
        let data = std::fs::read(path)?;
        Ok(serde_yaml::from_slice(&data)?)
    }

    /// The configured cache, when enabled.
    pub fn cache(&self) -> Option<Cache> {
        if !self.use_cache {
            return None;
        }
        let dir = self
            .cache_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("kubesigil-cache"));
        let mut cache = Cache::new(dir);
        if let Some(secs) = self.ttl_seconds {
            cache = cache.with_ttl(Duration::from_secs(secs));
        }
        Some(cache)
    }
}
