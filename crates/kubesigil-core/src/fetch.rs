//! Reference-manifest fetchers.
//!
//! The reference manifest comes from one of two places: an artifact
//! pulled from a store by image reference, or the `message` annotation
//! embedded in the input itself. Dispatch is tagged on whether an image
//! reference is configured or discoverable.

use crate::annotations::{IMAGE_REF_ANNOTATION_KEY, MESSAGE_ANNOTATION_KEY, get_annotations};
use crate::artifact::{ArtifactStore, yamls_from_targz};
use crate::cache::Cache;
use crate::error::SigilError;
use crate::yamls::{ObjectSummary, concat_yamls, find_single_yaml};

use base64::Engine;

/// Resolves the reference manifest for an input document.
///
/// `fetch` returns `Ok(None)` when no reference exists for the input —
/// an unsigned manifest without a `message` annotation, or a reference
/// stream with no document matching the input's identity tuple. Errors
/// are reserved for unreachable or undecodable references.
pub enum ManifestFetcher<'a, S> {
    /// Pull the artifact by image reference, through the cache.
    Image(ImageManifestFetcher<'a, S>),
    /// Decode the `message` annotation embedded in the input.
    Annotation(AnnotationManifestFetcher),
}

impl<'a, S: ArtifactStore> ManifestFetcher<'a, S> {
    /// Pick the fetcher variant: the image variant when a reference is
    /// configured or present in the input's annotations, the
    /// annotation variant otherwise.
    pub fn new(store: &'a S, image_ref: Option<&str>, input_yaml: &[u8], cache: Option<Cache>) -> Self {
        let resolved = resolve_image_ref(image_ref, input_yaml);
        match resolved {
            Some(image_ref) => Self::Image(ImageManifestFetcher {
                store,
                image_ref,
                cache,
            }),
            None => Self::Annotation(AnnotationManifestFetcher),
        }
    }

    /// Fetch the single reference document matching the input's
    /// identity tuple.
    pub async fn fetch(&self, input_yaml: &[u8]) -> Result<Option<Vec<u8>>, SigilError> {
        match self {
            Self::Image(f) => f.fetch(input_yaml).await,
            Self::Annotation(f) => f.fetch(input_yaml),
        }
    }
}

/// Explicit reference, or the input's `imageRef` annotation.
pub fn resolve_image_ref(image_ref: Option<&str>, input_yaml: &[u8]) -> Option<String> {
    if let Some(r) = image_ref.filter(|r| !r.is_empty()) {
        return Some(r.to_owned());
    }
    get_annotations(input_yaml)
        .get(IMAGE_REF_ANNOTATION_KEY)
        .cloned()
}

/// Fetcher backed by an artifact store.
pub struct ImageManifestFetcher<'a, S> {
    store: &'a S,
    image_ref: String,
    cache: Option<Cache>,
}

impl<S: ArtifactStore> ImageManifestFetcher<'_, S> {
    async fn fetch(&self, input_yaml: &[u8]) -> Result<Option<Vec<u8>>, SigilError> {
        let concat = self.pull_concat_yamls().await?;
        lookup_by_identity(&concat, input_yaml)
    }

    /// The concatenated YAML stream of the artifact, through the cache
    /// when one is configured.
    async fn pull_concat_yamls(&self) -> Result<Vec<u8>, SigilError> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get_manifest(&self.image_ref) {
                tracing::debug!(image_ref = %self.image_ref, "manifest cache hit");
                return Ok(hit);
            }
        }

        let blob = self.store.pull(&self.image_ref).await?;
        let yamls = yamls_from_targz(&blob)?;
        let concat = concat_yamls(&yamls);

        if let Some(cache) = &self.cache {
            cache.set_manifest(&self.image_ref, &concat);
        }
        Ok(concat)
    }
}

/// Fetcher that decodes the signed payload embedded in the input's
/// annotations.
pub struct AnnotationManifestFetcher;

impl AnnotationManifestFetcher {
    fn fetch(&self, input_yaml: &[u8]) -> Result<Option<Vec<u8>>, SigilError> {
        let annotations = get_annotations(input_yaml);
        let Some(message_b64) = annotations.get(MESSAGE_ANNOTATION_KEY) else {
            return Ok(None);
        };

        let message_gz = base64::engine::general_purpose::STANDARD
            .decode(message_b64.trim())
            .map_err(|e| {
                SigilError::Fetch(format!("failed to decode base64 message annotation: {e}"))
            })?;
        let yamls = yamls_from_targz(&message_gz)?;
        let concat = concat_yamls(&yamls);

        lookup_by_identity(&concat, input_yaml)
    }
}

fn lookup_by_identity(concat: &[u8], input_yaml: &[u8]) -> Result<Option<Vec<u8>>, SigilError> {
    let id = ObjectSummary::from_yaml(input_yaml)?;
    Ok(find_single_yaml(
        concat,
        &id.api_version,
        &id.kind,
        &id.name,
        &id.namespace,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::embed_signature_annotations;
    use crate::artifact::{FsArtifactStore, targz_files};
    use std::path::PathBuf;

    const CM1: &str =
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm1\n  namespace: ns1\ndata:\n  k: v\n";
    const CM2: &str = "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cm2\ndata:\n  k: v\n";

    fn blob() -> Vec<u8> {
        targz_files(&[
            (PathBuf::from("cm1.yaml"), CM1.as_bytes().to_vec()),
            (PathBuf::from("cm2.yaml"), CM2.as_bytes().to_vec()),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn image_fetcher_finds_identity_match() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        store.push("registry.local/app:v1", &blob()).await.unwrap();

        let fetcher =
            ManifestFetcher::new(&store, Some("registry.local/app:v1"), CM1.as_bytes(), None);
        assert!(matches!(fetcher, ManifestFetcher::Image(_)));

        let found = fetcher.fetch(CM1.as_bytes()).await.unwrap().unwrap();
        let id = ObjectSummary::from_yaml(&found).unwrap();
        assert_eq!(id.name, "cm1");
    }

    #[tokio::test]
    async fn image_fetcher_no_identity_match() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        store.push("registry.local/app:v1", &blob()).await.unwrap();

        let other = "apiVersion: v1\nkind: Secret\nmetadata:\n  name: s1\n";
        let fetcher =
            ManifestFetcher::new(&store, Some("registry.local/app:v1"), other.as_bytes(), None);
        assert!(fetcher.fetch(other.as_bytes()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn image_fetcher_unreachable_reference() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let fetcher =
            ManifestFetcher::new(&store, Some("registry.local/gone:v1"), CM1.as_bytes(), None);
        assert!(matches!(
            fetcher.fetch(CM1.as_bytes()).await,
            Err(SigilError::Fetch(_))
        ));
    }

    #[tokio::test]
    async fn image_ref_discovered_from_annotation() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        store.push("registry.local/app:v1", &blob()).await.unwrap();

        let annotated = embed_signature_annotations(
            CM1.as_bytes(),
            b"m",
            b"s",
            None,
            Some("registry.local/app:v1"),
        )
        .unwrap();

        let fetcher = ManifestFetcher::new(&store, None, &annotated, None);
        assert!(matches!(fetcher, ManifestFetcher::Image(_)));
    }

    #[tokio::test]
    async fn annotation_fetcher_decodes_embedded_payload() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());

        let annotated =
            embed_signature_annotations(CM1.as_bytes(), &blob(), b"sig", None, None).unwrap();

        let fetcher = ManifestFetcher::new(&store, None, &annotated, None);
        assert!(matches!(fetcher, ManifestFetcher::Annotation(_)));

        let found = fetcher.fetch(&annotated).await.unwrap().unwrap();
        let id = ObjectSummary::from_yaml(&found).unwrap();
        assert_eq!(id.name, "cm1");
    }

    #[tokio::test]
    async fn unsigned_input_yields_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let fetcher = ManifestFetcher::new(&store, None, CM1.as_bytes(), None);
        assert!(fetcher.fetch(CM1.as_bytes()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cache_skips_store_after_first_pull() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        store.push("registry.local/app:v1", &blob()).await.unwrap();

        let cache = Cache::new(cache_dir.path());
        let fetcher = ManifestFetcher::new(
            &store,
            Some("registry.local/app:v1"),
            CM1.as_bytes(),
            Some(cache.clone()),
        );
        fetcher.fetch(CM1.as_bytes()).await.unwrap().unwrap();

        // Remove the blob: a cached fetch must still succeed.
        std::fs::remove_file(
            dir.path()
                .join(crate::cache::normalize_image_ref("registry.local/app:v1")),
        )
        .unwrap();

        let fetcher = ManifestFetcher::new(
            &store,
            Some("registry.local/app:v1"),
            CM1.as_bytes(),
            Some(cache),
        );
        assert!(fetcher.fetch(CM1.as_bytes()).await.unwrap().is_some());
    }
}
