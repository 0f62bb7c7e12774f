//! Short-TTL on-disk cache for fetched manifests and image-verify
//! outcomes.
//!
//! Entries are gzip'd JSON records carrying a creation timestamp; a
//! record older than the TTL is treated as absent. Every read failure —
//! missing file, truncated gzip, mangled JSON — is a miss, never an
//! error: a corrupt cache must not fail verification. Writes go to a
//! temporary name and rename into place so concurrent or cancelled
//! calls cannot observe partial entries. Nothing is ever evicted; the
//! TTL makes stale files inert.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::artifact::{gzip_compress, gzip_decompress};

/// Default entry lifetime: long enough to help a shell loop, short
/// enough that a stale forgery cannot persist.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize, Deserialize)]
struct ManifestEntry {
    #[serde(with = "bytes_as_base64")]
    data: Vec<u8>,
    #[serde(rename = "creationTimestamp")]
    creation_timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct VerifyEntry {
    verified: bool,
    #[serde(rename = "signerName")]
    signer_name: String,
    #[serde(rename = "creationTimestamp")]
    creation_timestamp: i64,
}

/// The on-disk cache. Cheap to clone; carries only a directory and a
/// TTL.
#[derive(Debug, Clone)]
pub struct Cache {
    dir: PathBuf,
    ttl: Duration,
}

impl Cache {
    /// A cache rooted at `dir` with the default TTL.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ttl: DEFAULT_CACHE_TTL,
        }
    }

    /// Override the TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Read the cached manifest bytes for `image_ref`, if fresh.
    pub fn get_manifest(&self, image_ref: &str) -> Option<Vec<u8>> {
        let entry: ManifestEntry = self.read_entry(&self.manifest_path(image_ref)?)?;
        self.fresh(entry.creation_timestamp).then_some(entry.data)
    }

    /// Store manifest bytes for `image_ref`. Best-effort: failures are
    /// logged at debug and swallowed.
    pub fn set_manifest(&self, image_ref: &str, data: &[u8]) {
        let Some(path) = self.manifest_path(image_ref) else {
            return;
        };
        let entry = ManifestEntry {
            data: data.to_vec(),
            creation_timestamp: chrono::Utc::now().timestamp(),
        };
        self.write_entry(&path, &entry);
    }

    /// Read the cached verify outcome for (`image_ref`, `key_path`), if
    /// fresh.
    pub fn get_verify_result(&self, image_ref: &str, key_path: &str) -> Option<(bool, String)> {
        let entry: VerifyEntry = self.read_entry(&self.verify_path(image_ref, key_path)?)?;
        self.fresh(entry.creation_timestamp)
            .then_some((entry.verified, entry.signer_name))
    }

    /// Store a verify outcome. Best-effort.
    pub fn set_verify_result(
        &self,
        image_ref: &str,
        key_path: &str,
        verified: bool,
        signer_name: &str,
    ) {
        let Some(path) = self.verify_path(image_ref, key_path) else {
            return;
        };
        let entry = VerifyEntry {
            verified,
            signer_name: signer_name.to_owned(),
            creation_timestamp: chrono::Utc::now().timestamp(),
        };
        self.write_entry(&path, &entry);
    }

    fn fresh(&self, creation_timestamp: i64) -> bool {
        let age = chrono::Utc::now().timestamp() - creation_timestamp;
        age >= 0 && Duration::from_secs(age.unsigned_abs()) < self.ttl
    }

    fn manifest_path(&self, image_ref: &str) -> Option<PathBuf> {
        let normalized = normalize_image_ref(image_ref);
        if normalized.is_empty() {
            return None;
        }
        Some(self.dir.join("yaml").join(normalized))
    }

    fn verify_path(&self, image_ref: &str, key_path: &str) -> Option<PathBuf> {
        let normalized = normalize_image_ref(image_ref);
        if normalized.is_empty() {
            return None;
        }
        let key_hash = hex::encode(Sha256::digest(key_path.as_bytes()));
        Some(self.dir.join("verify").join(normalized).join(key_hash))
    }

    fn read_entry<T: for<'de> Deserialize<'de>>(&self, path: &Path) -> Option<T> {
        let compressed = std::fs::read(path).ok()?;
        let raw = gzip_decompress(&compressed)?;
        serde_json::from_slice(&raw).ok()
    }

    fn write_entry<T: Serialize>(&self, path: &Path, entry: &T) {
        if let Err(e) = self.try_write_entry(path, entry) {
            tracing::debug!(path = %path.display(), error = %e, "cache write failed");
        }
    }

    fn try_write_entry<T: Serialize>(
        &self,
        path: &Path,
        entry: &T,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let raw = serde_json::to_vec(entry)?;
        let compressed = gzip_compress(&raw)?;

        let parent = path.parent().ok_or("cache path has no parent")?;
        std::fs::create_dir_all(parent)?;

        // Temp-then-rename: a concurrent reader sees either the old
        // entry or the new one, never a torn write.
        let tmp = path.with_file_name(format!(
            ".{}.tmp-{}",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("entry"),
            std::process::id()
        ));
        std::fs::write(&tmp, &compressed)?;
        if let Err(e) = std::fs::rename(&tmp, path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

/// Normalize an image reference for use as a path component: trim,
/// lowercase, `:` and `/` become `_`.
///
/// The result must survive a URL path-segment join unchanged (the Rust
/// counterpart of the original's parse-validation); anything else —
/// including the empty string — normalizes to `""`, which no cache
/// lookup can hit.
pub fn normalize_image_ref(image_ref: &str) -> String {
    let normalized = image_ref.trim().to_lowercase().replace([':', '/'], "_");
    if normalized.is_empty() {
        return String::new();
    }
    let Ok(base) = Url::parse("cache:///") else {
        return String::new();
    };
    match base.join(&normalized) {
        Ok(joined) if joined.path().trim_start_matches('/') == normalized => normalized,
        _ => String::new(),
    }
}

mod bytes_as_base64 {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(&s)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REF: &str = "registry.local/sample/app:0.1.0";

    #[test]
    fn manifest_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());

        assert!(cache.get_manifest(REF).is_none());
        cache.set_manifest(REF, b"apiVersion: v1\n");
        assert_eq!(cache.get_manifest(REF).unwrap(), b"apiVersion: v1\n");
    }

    #[test]
    fn verify_result_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());

        assert!(cache.get_verify_result(REF, "/keys/pub.pem").is_none());
        cache.set_verify_result(REF, "/keys/pub.pem", true, "dev@example.com");
        assert_eq!(
            cache.get_verify_result(REF, "/keys/pub.pem").unwrap(),
            (true, "dev@example.com".to_owned())
        );
        // A different key path is a different entry.
        assert!(cache.get_verify_result(REF, "/keys/other.pem").is_none());
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path()).with_ttl(Duration::ZERO);
        cache.set_manifest(REF, b"data");
        assert!(cache.get_manifest(REF).is_none());
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        cache.set_manifest(REF, b"data");

        // Clobber the entry with non-gzip garbage.
        let path = cache.manifest_path(REF).unwrap();
        std::fs::write(&path, b"garbage").unwrap();
        assert!(cache.get_manifest(REF).is_none());

        // Valid gzip, invalid JSON.
        std::fs::write(&path, gzip_compress(b"not json").unwrap()).unwrap();
        assert!(cache.get_manifest(REF).is_none());
    }

    #[test]
    fn layout_matches_contract() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        cache.set_manifest(REF, b"x");
        cache.set_verify_result(REF, "k", false, "");

        let normalized = normalize_image_ref(REF);
        assert!(dir.path().join("yaml").join(&normalized).exists());
        let verify_dir = dir.path().join("verify").join(&normalized);
        assert_eq!(std::fs::read_dir(&verify_dir).unwrap().count(), 1);
    }

    #[test]
    fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        cache.set_manifest(REF, b"x");

        let yaml_dir = dir.path().join("yaml");
        let leftovers: Vec<_> = std::fs::read_dir(&yaml_dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn ref_normalization() {
        assert_eq!(
            normalize_image_ref("  Registry.Local/App:V1  "),
            "registry.local_app_v1"
        );
        assert_eq!(normalize_image_ref(""), "");
        assert_eq!(normalize_image_ref("has space"), "");
        // The unhittable key: lookups with an invalid ref never hit.
        let dir = tempfile::tempdir().unwrap();
        let cache = Cache::new(dir.path());
        cache.set_manifest("has space", b"x");
        assert!(cache.get_manifest("has space").is_none());
    }
}
