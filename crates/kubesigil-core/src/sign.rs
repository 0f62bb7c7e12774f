//! The sign path: package manifests, sign the canonical blob, and
//! either push the artifact or embed the signature in the manifest
//! itself.

use std::path::{Path, PathBuf};

use crate::annotations::embed_signature_annotations;
use crate::artifact::{ArtifactStore, targz_files};
use crate::error::SigilError;
use crate::signing::SigningBackend;
use crate::yamls::{concat_yamls, find_yamls_in_dir, is_k8s_resource_yaml, split_concat_yamls};

/// Options for a signing run.
#[derive(Debug, Default)]
pub struct SignOption {
    /// Push the packaged artifact under this reference and attach a
    /// detached signature to it.
    pub image_ref: Option<String>,
    /// The signing key (generated on first use).
    pub key_path: PathBuf,
}

/// Sign the manifest file or directory at `input`.
///
/// The input YAMLs are packed into the canonical tar.gz blob and the
/// blob is signed. When an image reference is configured, the blob and
/// its signature are pushed to the store. The returned bytes are the
/// annotation-signed manifest: every input document with the
/// `message`/`signature` (and optional `imageRef`) annotations
/// embedded.
pub async fn sign_manifest<S: ArtifactStore, B: SigningBackend>(
    input: &Path,
    opts: &SignOption,
    store: &S,
    backend: &B,
) -> Result<Vec<u8>, SigilError> {
    let files = collect_input_files(input)?;
    if files.is_empty() {
        return Err(SigilError::InvalidInput(format!(
            "no Kubernetes YAML manifests found under {}",
            input.display()
        )));
    }

    let blob = targz_files(&files)?;
    let signature = backend.sign_blob(&blob, &opts.key_path).await?;

    if let Some(image_ref) = opts.image_ref.as_deref() {
        store.push(image_ref, &blob).await?;
        store.push_signature(image_ref, &signature).await?;
        tracing::info!(image_ref, "pushed signed artifact");
    }

    let mut signed_docs = Vec::new();
    for (_, data) in &files {
        for doc in split_concat_yamls(data) {
            signed_docs.push(embed_signature_annotations(
                &doc,
                &blob,
                &signature,
                None,
                opts.image_ref.as_deref(),
            )?);
        }
    }
    Ok(concat_yamls(&signed_docs))
}

/// The (relative path, bytes) set to package: a directory walk, or the
/// single input file.
fn collect_input_files(input: &Path) -> Result<Vec<(PathBuf, Vec<u8>)>, SigilError> {
    if input.is_dir() {
        return find_yamls_in_dir(input);
    }
    let data = std::fs::read(input)?;
    if !is_k8s_resource_yaml(&data) {
        return Err(SigilError::InvalidInput(format!(
            "{} is not a Kubernetes YAML manifest",
            input.display()
        )));
    }
    let name = input
        .file_name()
        .map_or_else(|| PathBuf::from("manifest.yaml"), PathBuf::from);
    Ok(vec![(name, data)])
}
