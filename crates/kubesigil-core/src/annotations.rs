//! The embedded-signature annotation surface.
//!
//! A signed manifest carries five reserved keys under
//! `metadata.annotations`. The exact strings are a compatibility
//! surface shared with the counterpart signer; readers and writers must
//! agree on them.

use std::collections::BTreeMap;

use base64::Engine;
use serde::Deserialize;

use crate::artifact::{gzip_compress, gzip_decompress};
use crate::error::SigilError;

/// base64(gzip(tar of the signed YAMLs)) — the signed content.
pub const MESSAGE_ANNOTATION_KEY: &str = "cosign.sigstore.dev/message";
/// base64 of the raw signature bytes over the gzip blob.
pub const SIGNATURE_ANNOTATION_KEY: &str = "cosign.sigstore.dev/signature";
/// base64(gzip(PEM certificate chain)); may be absent for keyed mode.
pub const CERTIFICATE_ANNOTATION_KEY: &str = "cosign.sigstore.dev/certificate";
/// Optional transparency-log inclusion proof; opaque to verification.
pub const BUNDLE_ANNOTATION_KEY: &str = "cosign.sigstore.dev/bundle";
/// Optional pointer to an artifact holding the same content.
pub const IMAGE_REF_ANNOTATION_KEY: &str = "cosign.sigstore.dev/imageRef";

/// Mask paths for the five embedded keys, applied whenever a manifest
/// is compared against another manifest.
pub fn embedded_annotation_mask() -> Vec<String> {
    [
        IMAGE_REF_ANNOTATION_KEY,
        SIGNATURE_ANNOTATION_KEY,
        CERTIFICATE_ANNOTATION_KEY,
        MESSAGE_ANNOTATION_KEY,
        BUNDLE_ANNOTATION_KEY,
    ]
    .iter()
    .map(|key| format!("metadata.annotations.\"{key}\""))
    .collect()
}

/// Read `metadata.annotations` from the first document of a YAML
/// stream. Missing or malformed annotations yield an empty map.
pub fn get_annotations(yaml: &[u8]) -> BTreeMap<String, String> {
    #[derive(Deserialize, Default)]
    struct Meta {
        #[serde(default)]
        annotations: BTreeMap<String, String>,
    }
    #[derive(Deserialize)]
    struct Doc {
        #[serde(default)]
        metadata: Option<Meta>,
    }

    // The stream may hold several documents; annotations come from the
    // first.
    let first = crate::yamls::split_concat_yamls(yaml).into_iter().next();
    first
        .and_then(|doc| serde_yaml::from_slice::<Doc>(&doc).ok())
        .and_then(|d| d.metadata)
        .map(|m| m.annotations)
        .unwrap_or_default()
}

/// The decoded embedded signature set of a manifest.
#[derive(Debug)]
pub struct EmbeddedSignature {
    /// The signed blob: gzip of the canonical manifest tar.
    pub message_gz: Vec<u8>,
    /// Raw signature bytes over `message_gz`.
    pub signature: Vec<u8>,
    /// PEM certificate chain, when the signer embedded one.
    pub certificate_pem: Option<Vec<u8>>,
    /// Transparency-log proof, carried opaquely.
    pub bundle: Option<String>,
}

impl EmbeddedSignature {
    /// Decode the embedded signature set from a manifest's annotations.
    ///
    /// Returns `Ok(None)` when no `message` annotation is present (the
    /// manifest is simply unsigned); a present-but-undecodable set is
    /// an error.
    pub fn from_annotations(
        annotations: &BTreeMap<String, String>,
    ) -> Result<Option<Self>, SigilError> {
        let Some(message_b64) = annotations.get(MESSAGE_ANNOTATION_KEY) else {
            return Ok(None);
        };
        let message_gz = decode_b64(message_b64, MESSAGE_ANNOTATION_KEY)?;

        let signature_b64 = annotations.get(SIGNATURE_ANNOTATION_KEY).ok_or_else(|| {
            SigilError::InvalidInput(format!(
                "`{SIGNATURE_ANNOTATION_KEY}` is not found in the annotations"
            ))
        })?;
        let signature = decode_b64(signature_b64, SIGNATURE_ANNOTATION_KEY)?;

        // The certificate is gzip'd inside the base64; tolerate a raw
        // PEM for older signers.
        let certificate_pem = match annotations.get(CERTIFICATE_ANNOTATION_KEY) {
            Some(cert_b64) if !cert_b64.is_empty() => {
                let raw = decode_b64(cert_b64, CERTIFICATE_ANNOTATION_KEY)?;
                Some(gzip_decompress(&raw).unwrap_or(raw))
            }
            _ => None,
        };

        Ok(Some(Self {
            message_gz,
            signature,
            certificate_pem,
            bundle: annotations.get(BUNDLE_ANNOTATION_KEY).cloned(),
        }))
    }
}

fn decode_b64(value: &str, key: &str) -> Result<Vec<u8>, SigilError> {
    base64::engine::general_purpose::STANDARD
        .decode(value.trim())
        .map_err(|e| SigilError::InvalidInput(format!("failed to decode base64 in `{key}`: {e}")))
}

/// Write the embedded signature set into a single-document manifest,
/// returning the annotated YAML.
pub fn embed_signature_annotations(
    manifest: &[u8],
    message_gz: &[u8],
    signature: &[u8],
    certificate_pem: Option<&[u8]>,
    image_ref: Option<&str>,
) -> Result<Vec<u8>, SigilError> {
    let b64 = base64::engine::general_purpose::STANDARD;

    let mut doc: serde_yaml::Value = serde_yaml::from_slice(manifest)?;
    let root = doc.as_mapping_mut().ok_or_else(|| {
        SigilError::InvalidInput("manifest document is not a mapping".to_owned())
    })?;

    let metadata = root
        .entry("metadata".into())
        .or_insert_with(|| serde_yaml::Mapping::new().into());
    let metadata = metadata.as_mapping_mut().ok_or_else(|| {
        SigilError::InvalidInput("manifest metadata is not a mapping".to_owned())
    })?;
    let annotations = metadata
        .entry("annotations".into())
        .or_insert_with(|| serde_yaml::Mapping::new().into());
    let annotations = annotations.as_mapping_mut().ok_or_else(|| {
        SigilError::InvalidInput("manifest annotations are not a mapping".to_owned())
    })?;

    let mut set = |key: &str, value: String| {
        annotations.insert(key.into(), value.into());
    };
    set(MESSAGE_ANNOTATION_KEY, b64.encode(message_gz));
    set(SIGNATURE_ANNOTATION_KEY, b64.encode(signature));
    if let Some(pem) = certificate_pem {
        set(CERTIFICATE_ANNOTATION_KEY, b64.encode(gzip_compress(pem)?));
    }
    if let Some(image_ref) = image_ref {
        set(IMAGE_REF_ANNOTATION_KEY, image_ref.to_owned());
    }

    Ok(serde_yaml::to_string(&doc)?.into_bytes())
}
