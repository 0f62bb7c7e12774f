//! Live-resource matching: the three-strategy ladder.
//!
//! A live cluster object is never byte-equal to its manifest —
//! admission controllers add fields, defaulting fills zero values,
//! labels get merged. The ladder tries increasingly expensive
//! reconciliations and stops at the first success:
//!
//! 1. direct mask-and-diff,
//! 2. server-side dry-run create (captures create-time defaulting),
//! 3. server-side apply patch, then dry-run create of the patched form
//!    (captures admission mutations on pre-existing objects).
//!
//! A strategy error does not abort the ladder; the error surfaces only
//! when every strategy erred. The last produced diff is carried for
//! diagnostics.

use std::collections::HashMap;

use kubesigil_mapnode::{DiffResult, Node};

use crate::annotations::embedded_annotation_mask;
use crate::artifact::{ArtifactStore, yamls_from_targz};
use crate::cluster::ClusterClient;
use crate::config::VerifyOption;
use crate::error::SigilError;
use crate::fetch::resolve_image_ref;
use crate::signing::SigningBackend;
use crate::verify::{SignatureVerifier, VerifyResult};
use crate::yamls::{ObjectSummary, concat_yamls, find_single_yaml};

/// Namespace used for dry-run creates of namespace-stripped manifests.
const DEFAULT_DRY_RUN_NAMESPACE: &str = "default";

/// Mask applied when comparing a live object against a reference
/// manifest: the embedded annotation keys plus the fields the API
/// server adds or rewrites on every object.
pub fn common_resource_mask() -> Vec<String> {
    let mut mask = embedded_annotation_mask();
    mask.extend(
        [
            "metadata.managedFields",
            "metadata.creationTimestamp",
            "metadata.generation",
            "metadata.resourceVersion",
            "metadata.selfLink",
            "metadata.uid",
            "metadata.namespace",
            "metadata.annotations.\"kubectl.kubernetes.io/last-applied-configuration\"",
            "metadata.annotations.\"deprecated.daemonset.template.generation\"",
            "status",
        ]
        .iter()
        .map(|&s| s.to_owned()),
    );
    mask
}

fn dry_run_mask() -> Vec<String> {
    let mut mask = common_resource_mask();
    // The dry-run may rename to avoid collisions (`foo-dryrun`).
    mask.push("metadata.name".to_owned());
    mask
}

/// Run the ladder for one live object (JSON bytes) against its
/// reference manifest document.
///
/// Returns (matched, diff): a clean mismatch carries the last strategy's
/// diff. Errors surface only when every strategy erred.
pub async fn match_resource<C: ClusterClient>(
    obj_json: &[u8],
    manifest: &[u8],
    cluster: &C,
) -> Result<(bool, Option<DiffResult>), SigilError> {
    let mut last_diff: Option<DiffResult> = None;
    let mut errors: Vec<SigilError> = Vec::new();

    match direct_match(obj_json, manifest) {
        Ok((true, _)) => return Ok((true, None)),
        Ok((false, diff)) => last_diff = diff,
        Err(e) => {
            tracing::debug!(error = %e, "direct match errored");
            errors.push(e);
        }
    }

    match dryrun_create_match(obj_json, manifest, cluster).await {
        Ok((true, _)) => return Ok((true, None)),
        Ok((false, diff)) => last_diff = diff,
        Err(e) => {
            tracing::debug!(error = %e, "dryrun create match errored");
            errors.push(e);
        }
    }

    match dryrun_apply_match(obj_json, manifest, cluster).await {
        Ok((true, _)) => return Ok((true, None)),
        Ok((false, diff)) => last_diff = diff,
        Err(e) => {
            tracing::debug!(error = %e, "dryrun apply match errored");
            errors.push(e);
        }
    }

    #[cfg(feature = "strategic-merge")]
    match dryrun_patch_match(obj_json, manifest, cluster).await {
        Ok((true, _)) => return Ok((true, None)),
        Ok((false, diff)) => last_diff = diff,
        Err(e) => {
            tracing::debug!(error = %e, "strategic merge match errored");
            errors.push(e);
        }
    }

    if last_diff.is_none() && !errors.is_empty() {
        let joined = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(SigilError::Cluster(format!(
            "every match strategy failed: {joined}"
        )));
    }
    Ok((false, last_diff))
}

/// Strategy 1: mask both sides with the common mask and diff. Succeeds
/// for immutable kinds on freshly applied objects.
fn direct_match(
    obj_json: &[u8],
    manifest: &[u8],
) -> Result<(bool, Option<DiffResult>), SigilError> {
    let mask = common_resource_mask();
    let obj_node = Node::from_json_bytes(obj_json)?;
    let mnf_node = Node::from_yaml_bytes(manifest)?;
    Ok(masked_diff(&obj_node, &mnf_node, &mask))
}

/// Strategy 2: dry-run create the namespace-stripped manifest and
/// compare against the returned, server-defaulted object.
async fn dryrun_create_match<C: ClusterClient>(
    obj_json: &[u8],
    manifest: &[u8],
    cluster: &C,
) -> Result<(bool, Option<DiffResult>), SigilError> {
    let obj_node = Node::from_json_bytes(obj_json)?;
    let mnf_node = Node::from_yaml_bytes(manifest)?;

    let ns_stripped = mnf_node.mask(&["metadata.namespace"]).to_yaml()?;
    let simulated = cluster
        .dry_run_create(ns_stripped.as_bytes(), DEFAULT_DRY_RUN_NAMESPACE)
        .await?;
    let sim_node = Node::from_yaml_bytes(&simulated)?;

    Ok(masked_diff(&obj_node, &sim_node, &dry_run_mask()))
}

/// Strategy 3: compute the server-side apply patch against the object's
/// namespace, dry-run create the patched form, and compare.
async fn dryrun_apply_match<C: ClusterClient>(
    obj_json: &[u8],
    manifest: &[u8],
    cluster: &C,
) -> Result<(bool, Option<DiffResult>), SigilError> {
    let obj_node = Node::from_json_bytes(obj_json)?;
    let obj_namespace = obj_node.get_string("metadata.namespace");

    let patched = cluster.apply_patch(manifest, &obj_namespace).await?;
    let patched_node = Node::from_yaml_bytes(&patched)?;
    let ns_stripped = patched_node.mask(&["metadata.namespace"]).to_yaml()?;

    let simulated = cluster
        .dry_run_create(ns_stripped.as_bytes(), DEFAULT_DRY_RUN_NAMESPACE)
        .await?;
    let sim_node = Node::from_yaml_bytes(&simulated)?;

    Ok(masked_diff(&obj_node, &sim_node, &dry_run_mask()))
}

/// Strategy 4 (gated): strategic-merge-patch the manifest onto the
/// object, then dry-run create the patched form.
#[cfg(feature = "strategic-merge")]
async fn dryrun_patch_match<C: ClusterClient>(
    obj_json: &[u8],
    manifest: &[u8],
    cluster: &C,
) -> Result<(bool, Option<DiffResult>), SigilError> {
    let obj_node = Node::from_json_bytes(obj_json)?;
    let obj_namespace = obj_node.get_string("metadata.namespace");

    let patched = cluster
        .strategic_merge_patch(obj_json, manifest, &obj_namespace)
        .await?;
    let patched_node = Node::from_yaml_bytes(&patched)?;
    let ns_stripped = patched_node.mask(&["metadata.namespace"]).to_yaml()?;

    let simulated = cluster
        .dry_run_create(ns_stripped.as_bytes(), DEFAULT_DRY_RUN_NAMESPACE)
        .await?;
    let sim_node = Node::from_yaml_bytes(&simulated)?;

    Ok(masked_diff(&obj_node, &sim_node, &dry_run_mask()))
}

fn masked_diff(left: &Node, right: &Node, mask: &[String]) -> (bool, Option<DiffResult>) {
    let diff = left.mask(mask).diff(&right.mask(mask));
    if diff.is_empty() {
        (true, None)
    } else {
        (false, Some(diff))
    }
}

/// Verify a set of live cluster objects (JSON) against their signed
/// manifests.
///
/// Each object resolves its image reference (explicit option or the
/// object's `imageRef` annotation); each distinct reference is pulled
/// once, through the cache. Every object must match its reference
/// document via the ladder and carry a verified signature; the first
/// failure collapses the overall result.
pub async fn verify_resource<S, B, C>(
    objs: &[Vec<u8>],
    opts: &VerifyOption,
    store: &S,
    backend: &B,
    cluster: &C,
) -> Result<VerifyResult, SigilError>
where
    S: ArtifactStore,
    B: SigningBackend,
    C: ClusterClient,
{
    if objs.is_empty() {
        return Err(SigilError::InvalidInput("no objects to verify".to_owned()));
    }

    let cache = opts.cache();
    let mut manifests: HashMap<String, Vec<u8>> = HashMap::new();
    let mut signatures: HashMap<String, (bool, String)> = HashMap::new();

    let mut verified = false;
    let mut signer = String::new();

    for obj in objs {
        let Some(image_ref) = resolve_image_ref(opts.image_ref.as_deref(), obj) else {
            return Err(SigilError::InvalidInput(
                "no image reference is found for the object".to_owned(),
            ));
        };

        let concat = match manifests.get(&image_ref) {
            Some(hit) => hit.clone(),
            None => {
                let concat = pull_concat_yamls(store, &cache, &image_ref).await?;
                manifests.insert(image_ref.clone(), concat.clone());
                concat
            }
        };

        let id = ObjectSummary::from_yaml(obj)?;
        let Some(found) =
            find_single_yaml(&concat, &id.api_version, &id.kind, &id.name, &id.namespace)
        else {
            tracing::debug!(kind = %id.kind, name = %id.name, "no reference document for object");
            return Ok(VerifyResult {
                verified: false,
                signer: String::new(),
                diff: None,
            });
        };

        let (matched, diff) = match_resource(obj, &found, cluster).await?;
        if !matched {
            return Ok(VerifyResult {
                verified: false,
                signer: String::new(),
                diff,
            });
        }

        let (obj_verified, obj_signer) = match signatures.get(&image_ref) {
            Some(hit) => hit.clone(),
            None => {
                let verifier =
                    SignatureVerifier::new(backend, Some(&image_ref), obj, cache.clone());
                let outcome = match verifier.verify(opts.key_path.as_deref()).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::debug!(error = %e, "signature verification failed");
                        (false, String::new())
                    }
                };
                signatures.insert(image_ref.clone(), outcome.clone());
                outcome
            }
        };

        let obj_verified = obj_verified && opts.signers.matches(&obj_signer);
        if !obj_verified {
            return Ok(VerifyResult {
                verified: false,
                signer: obj_signer,
                diff: None,
            });
        }
        verified = true;
        signer = obj_signer;
    }

    Ok(VerifyResult {
        verified,
        signer,
        diff: None,
    })
}

async fn pull_concat_yamls<S: ArtifactStore>(
    store: &S,
    cache: &Option<crate::cache::Cache>,
    image_ref: &str,
) -> Result<Vec<u8>, SigilError> {
    if let Some(cache) = cache {
        if let Some(hit) = cache.get_manifest(image_ref) {
            return Ok(hit);
        }
    }
    let blob = store.pull(image_ref).await?;
    let concat = concat_yamls(&yamls_from_targz(&blob)?);
    if let Some(cache) = cache {
        cache.set_manifest(image_ref, &concat);
    }
    Ok(concat)
}
