//! Artifact store seam and deterministic manifest packaging.
//!
//! Signed content travels as a gzip-compressed tar archive of the
//! manifest YAMLs. The tar stream is canonical — sorted entry order,
//! fixed modes, zeroed timestamps — so signing and verification agree
//! on the exact bytes.
//!
//! The registry-backed store is an external collaborator behind
//! [`ArtifactStore`]; [`FsArtifactStore`] is the in-tree implementation
//! for air-gapped stores and tests.

use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::cache::normalize_image_ref;
use crate::error::SigilError;

/// Pulls and pushes manifest artifacts (tar.gz blobs) and their
/// detached signatures, keyed by image reference.
///
/// Plain `async fn` (Rust 2024): the trait never crosses the crate
/// boundary as a generic bound, so the auto-trait caveat behind the
/// `async_fn_in_trait` lint is moot.
#[expect(async_fn_in_trait, reason = "crate-internal seam, Send implementors only")]
pub trait ArtifactStore: Send + Sync {
    /// Pull the artifact blob for `image_ref`.
    async fn pull(&self, image_ref: &str) -> Result<Vec<u8>, SigilError>;

    /// Push an artifact blob under `image_ref`.
    async fn push(&self, image_ref: &str, blob: &[u8]) -> Result<(), SigilError>;

    /// Pull the detached signature for `image_ref`, if one exists.
    async fn pull_signature(&self, image_ref: &str) -> Result<Option<Vec<u8>>, SigilError>;

    /// Attach a detached signature to `image_ref`.
    async fn push_signature(&self, image_ref: &str, signature: &[u8]) -> Result<(), SigilError>;
}

/// Filesystem-backed artifact store: one blob per normalized reference
/// under a root directory, signatures alongside as `<ref>.sig`.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Create a store rooted at `root`. The directory is created on
    /// first push.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blob_path(&self, image_ref: &str) -> Result<PathBuf, SigilError> {
        let normalized = normalize_image_ref(image_ref);
        if normalized.is_empty() {
            return Err(SigilError::Fetch(format!(
                "invalid image reference `{image_ref}`"
            )));
        }
        Ok(self.root.join(normalized))
    }

    fn sig_path(&self, image_ref: &str) -> Result<PathBuf, SigilError> {
        // Appended, not set_extension: normalized refs may contain dots.
        let normalized = normalize_image_ref(image_ref);
        if normalized.is_empty() {
            return Err(SigilError::Fetch(format!(
                "invalid image reference `{image_ref}`"
            )));
        }
        Ok(self.root.join(format!("{normalized}.sig")))
    }
}

impl ArtifactStore for FsArtifactStore {
    async fn pull(&self, image_ref: &str) -> Result<Vec<u8>, SigilError> {
        let path = self.blob_path(image_ref)?;
        std::fs::read(&path).map_err(|e| {
            SigilError::Fetch(format!(
                "failed to pull artifact `{image_ref}` from {}: {e}",
                path.display()
            ))
        })
    }

    async fn push(&self, image_ref: &str, blob: &[u8]) -> Result<(), SigilError> {
        let path = self.blob_path(image_ref)?;
        std::fs::create_dir_all(&self.root)?;
        std::fs::write(&path, blob)?;
        Ok(())
    }

    async fn pull_signature(&self, image_ref: &str) -> Result<Option<Vec<u8>>, SigilError> {
        let path = self.sig_path(image_ref)?;
        match std::fs::read(&path) {
            Ok(sig) => Ok(Some(sig)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SigilError::Io(e)),
        }
    }

    async fn push_signature(&self, image_ref: &str, signature: &[u8]) -> Result<(), SigilError> {
        let path = self.sig_path(image_ref)?;
        std::fs::create_dir_all(&self.root)?;
        std::fs::write(&path, signature)?;
        Ok(())
    }
}

// ── Deterministic packaging ──────────────────────────────────────────

/// Pack (relative path, bytes) pairs into a canonical tar.gz blob.
///
/// Entries are written in sorted path order with mode `0o644` and a
/// zero mtime, so identical inputs produce identical bytes.
pub fn targz_files(files: &[(PathBuf, Vec<u8>)]) -> Result<Vec<u8>, SigilError> {
    let mut sorted: Vec<&(PathBuf, Vec<u8>)> = files.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let gz = GzEncoder::new(Vec::new(), Compression::default());
    let mut tar = tar::Builder::new(gz);
    tar.mode(tar::HeaderMode::Deterministic);

    for (path, data) in sorted {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        tar.append_data(&mut header, path, data.as_slice())?;
    }

    let gz = tar.into_inner()?;
    Ok(gz.finish()?)
}

/// Extract the `.yaml`/`.yml` entries from a tar.gz blob, in archive
/// order. Entries with absolute or parent-escaping paths are skipped.
pub fn yamls_from_targz(blob: &[u8]) -> Result<Vec<Vec<u8>>, SigilError> {
    let mut archive = tar::Archive::new(GzDecoder::new(blob));
    let mut yamls = Vec::new();

    for entry in archive
        .entries()
        .map_err(|e| SigilError::Fetch(format!("unreadable artifact archive: {e}")))?
    {
        let mut entry =
            entry.map_err(|e| SigilError::Fetch(format!("unreadable archive entry: {e}")))?;
        let path = entry
            .path()
            .map_err(|e| SigilError::Fetch(format!("bad archive entry path: {e}")))?
            .into_owned();
        if !is_safe_yaml_path(&path) {
            continue;
        }
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .map_err(|e| SigilError::Fetch(format!("failed to read archive entry: {e}")))?;
        yamls.push(data);
    }

    Ok(yamls)
}

fn is_safe_yaml_path(path: &Path) -> bool {
    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
    is_yaml
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

// ── Gzip helpers ─────────────────────────────────────────────────────

/// Gzip-compress bytes.
pub fn gzip_compress(data: &[u8]) -> Result<Vec<u8>, SigilError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Gzip-decompress bytes; `None` when the input is not a gzip stream.
pub fn gzip_decompress(data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(data).read_to_end(&mut out).ok()?;
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_files() -> Vec<(PathBuf, Vec<u8>)> {
        vec![
            (
                PathBuf::from("b/deploy.yaml"),
                b"apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: d1\n".to_vec(),
            ),
            (
                PathBuf::from("a.yaml"),
                b"apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm1\n".to_vec(),
            ),
        ]
    }

    #[test]
    fn packaging_is_deterministic() {
        let files = sample_files();
        let mut shuffled = files.clone();
        shuffled.reverse();
        let a = targz_files(&files).unwrap();
        let b = targz_files(&shuffled).unwrap();
        assert_eq!(a, b, "entry order must not leak into the blob");
    }

    #[test]
    fn pack_then_extract_round_trip() {
        let files = sample_files();
        let blob = targz_files(&files).unwrap();
        let yamls = yamls_from_targz(&blob).unwrap();
        assert_eq!(yamls.len(), 2);
        // Sorted order: a.yaml before b/deploy.yaml.
        assert!(String::from_utf8_lossy(&yamls[0]).contains("ConfigMap"));
        assert!(String::from_utf8_lossy(&yamls[1]).contains("Deployment"));
    }

    #[test]
    fn extract_skips_non_yaml_and_unsafe_paths() {
        let files = vec![
            (PathBuf::from("ok.yaml"), b"a: 1\n".to_vec()),
            (PathBuf::from("README.md"), b"docs\n".to_vec()),
        ];
        let blob = targz_files(&files).unwrap();
        let yamls = yamls_from_targz(&blob).unwrap();
        assert_eq!(yamls.len(), 1);

        assert!(!is_safe_yaml_path(Path::new("../escape.yaml")));
        assert!(!is_safe_yaml_path(Path::new("/abs.yaml")));
        assert!(is_safe_yaml_path(Path::new("sub/ok.yml")));
    }

    #[test]
    fn gzip_round_trip_and_lenient_failure() {
        let data = b"hello kubesigil";
        let gz = gzip_compress(data).unwrap();
        assert_eq!(gzip_decompress(&gz).unwrap(), data);
        assert!(gzip_decompress(b"not gzip").is_none());
    }

    #[tokio::test]
    async fn fs_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());

        store.push("registry.local/app:v1", b"blob").await.unwrap();
        assert_eq!(store.pull("registry.local/app:v1").await.unwrap(), b"blob");

        assert!(store.pull_signature("registry.local/app:v1").await.unwrap().is_none());
        store
            .push_signature("registry.local/app:v1", b"sig")
            .await
            .unwrap();
        assert_eq!(
            store
                .pull_signature("registry.local/app:v1")
                .await
                .unwrap()
                .unwrap(),
            b"sig"
        );
    }

    #[tokio::test]
    async fn fs_store_missing_blob_is_fetch_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let err = store.pull("registry.local/app:v1").await.unwrap_err();
        assert!(matches!(err, SigilError::Fetch(_)));
    }

    #[tokio::test]
    async fn fs_store_rejects_invalid_ref() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        assert!(store.pull("").await.is_err());
    }
}
