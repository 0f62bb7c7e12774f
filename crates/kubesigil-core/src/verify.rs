//! Manifest verification: signature dispatch, manifest matching, and
//! the top-level orchestration.
//!
//! A positive result requires all three of: the reference manifest was
//! found, the input matches it under the embedded-annotation mask, and
//! the signature verifies (with the signer on the allow-list, when one
//! is configured). A mismatch or an invalid signature is data, not an
//! error.

use serde::Serialize;

use kubesigil_mapnode::{DiffResult, Node};

use crate::annotations::{EmbeddedSignature, embedded_annotation_mask, get_annotations};
use crate::artifact::ArtifactStore;
use crate::cache::Cache;
use crate::config::VerifyOption;
use crate::error::SigilError;
use crate::fetch::{ManifestFetcher, resolve_image_ref};
use crate::signing::SigningBackend;
use crate::yamls::{ObjectSummary, find_single_yaml};

/// Outcome of a verification run.
#[derive(Debug, Serialize)]
pub struct VerifyResult {
    /// True when the manifest matched and the signature verified.
    pub verified: bool,
    /// Signer name (email SAN); empty when unverified or anonymous.
    pub signer: String,
    /// Populated only when the manifest failed to match its reference.
    pub diff: Option<DiffResult>,
}

impl VerifyResult {
    fn unverified(diff: Option<DiffResult>) -> Self {
        Self {
            verified: false,
            signer: String::new(),
            diff,
        }
    }
}

impl std::fmt::Display for VerifyResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match serde_json::to_string(self) {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str("{}"),
        }
    }
}

/// Verifies the signature of an input manifest.
///
/// The image variant checks the detached signature of the artifact
/// (consulting the verify-result cache); the annotation variant checks
/// the signature embedded in the manifest itself.
pub enum SignatureVerifier<'a, B> {
    /// Verify the artifact's signature by image reference.
    Image(ImageSignatureVerifier<'a, B>),
    /// Verify the signature embedded in the input's annotations.
    Annotation(AnnotationSignatureVerifier<'a, B>),
}

impl<'a, B: SigningBackend> SignatureVerifier<'a, B> {
    /// Pick the verifier variant the same way the fetcher dispatches:
    /// image when a reference is configured or discoverable, annotation
    /// otherwise.
    pub fn new(
        backend: &'a B,
        image_ref: Option<&str>,
        input_yaml: &[u8],
        cache: Option<Cache>,
    ) -> Self {
        match resolve_image_ref(image_ref, input_yaml) {
            Some(image_ref) => Self::Image(ImageSignatureVerifier {
                backend,
                image_ref,
                cache,
            }),
            None => Self::Annotation(AnnotationSignatureVerifier {
                backend,
                input_yaml: input_yaml.to_vec(),
            }),
        }
    }

    /// Verify; returns (verified, signer name).
    pub async fn verify(&self, key_path: Option<&str>) -> Result<(bool, String), SigilError> {
        match self {
            Self::Image(v) => v.verify(key_path).await,
            Self::Annotation(v) => v.verify(key_path).await,
        }
    }
}

/// Image-signature verification with cache consult.
pub struct ImageSignatureVerifier<'a, B> {
    backend: &'a B,
    image_ref: String,
    cache: Option<Cache>,
}

impl<B: SigningBackend> ImageSignatureVerifier<'_, B> {
    async fn verify(&self, key_path: Option<&str>) -> Result<(bool, String), SigilError> {
        let cache_key = key_path.unwrap_or_default();
        if let Some(cache) = &self.cache {
            if let Some((verified, signer)) = cache.get_verify_result(&self.image_ref, cache_key) {
                tracing::debug!(image_ref = %self.image_ref, "verify-result cache hit");
                return Ok((verified, signer));
            }
        }

        let (verified, signer) = self.backend.verify_image(&self.image_ref, key_path).await?;

        if let Some(cache) = &self.cache {
            cache.set_verify_result(&self.image_ref, cache_key, verified, &signer);
        }
        Ok((verified, signer))
    }
}

/// Annotation-signature verification.
pub struct AnnotationSignatureVerifier<'a, B> {
    backend: &'a B,
    input_yaml: Vec<u8>,
}

impl<B: SigningBackend> AnnotationSignatureVerifier<'_, B> {
    async fn verify(&self, key_path: Option<&str>) -> Result<(bool, String), SigilError> {
        let annotations = get_annotations(&self.input_yaml);
        let embedded = EmbeddedSignature::from_annotations(&annotations)?.ok_or_else(|| {
            SigilError::InvalidInput("no signature annotations found in the manifest".to_owned())
        })?;

        self.backend
            .verify_blob(
                &embedded.message_gz,
                &embedded.signature,
                embedded.certificate_pem.as_deref(),
                key_path,
            )
            .await
    }
}

/// Decide whether `manifest` matches its reference under the
/// embedded-annotation mask, honoring per-kind `ignore_fields`.
///
/// Returns (matched, diff); the diff is `None` on a match.
pub fn match_manifest(
    manifest: &[u8],
    reference: &[u8],
    ignore_fields: &[String],
) -> Result<(bool, Option<DiffResult>), SigilError> {
    tracing::debug!(
        manifest = %String::from_utf8_lossy(manifest),
        reference = %String::from_utf8_lossy(reference),
        "matching manifest against reference"
    );

    let mask = embedded_annotation_mask();
    let input_node = Node::from_yaml_bytes(manifest)?;
    let masked_input = input_node.mask(&mask);

    let id = ObjectSummary::from_yaml(manifest)?;
    let Some(found) = find_single_yaml(reference, &id.api_version, &id.kind, &id.name, &id.namespace)
    else {
        return Ok((false, None));
    };
    let masked_reference = Node::from_yaml_bytes(&found)?.mask(&mask);

    let mut diff = masked_input.diff(&masked_reference);
    if !ignore_fields.is_empty() {
        diff = diff.filter(ignore_fields).remaining;
    }

    if diff.is_empty() {
        Ok((true, None))
    } else {
        tracing::debug!(diff = %diff, "manifest mismatch");
        Ok((false, Some(diff)))
    }
}

/// Verify a YAML manifest against its signed reference.
///
/// The pipeline is strictly sequential: fetch the reference, match the
/// input against it, then verify the signature. Backend failures during
/// signature verification map to an unverified result (logged), not an
/// error.
pub async fn verify_manifest<S: ArtifactStore, B: SigningBackend>(
    manifest: &[u8],
    opts: &VerifyOption,
    store: &S,
    backend: &B,
) -> Result<VerifyResult, SigilError> {
    if manifest.is_empty() {
        return Err(SigilError::InvalidInput(
            "input YAML manifest must be non-empty".to_owned(),
        ));
    }

    let summary = ObjectSummary::from_yaml(manifest)?;
    let ignore_fields = opts
        .ignore_fields
        .fields_for(&summary.kind)
        .map(<[String]>::to_vec)
        .unwrap_or_default();

    let fetcher = ManifestFetcher::new(store, opts.image_ref.as_deref(), manifest, opts.cache());
    let Some(reference) = fetcher.fetch(manifest).await? else {
        return Ok(VerifyResult::unverified(None));
    };

    let (matched, diff) = match_manifest(manifest, &reference, &ignore_fields)?;
    if !matched {
        return Ok(VerifyResult::unverified(diff));
    }

    let verifier = SignatureVerifier::new(backend, opts.image_ref.as_deref(), manifest, opts.cache());
    let (mut verified, signer) = match verifier.verify(opts.key_path.as_deref()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::debug!(error = %e, "signature verification failed");
            (false, String::new())
        }
    };

    if verified && !opts.signers.matches(&signer) {
        tracing::debug!(signer = %signer, "signer not in the allow-list");
        verified = false;
    }

    Ok(VerifyResult {
        verified,
        signer,
        diff: None,
    })
}
