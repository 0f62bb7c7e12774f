//! Cluster API seam used by the resource-match ladder.
//!
//! The live Kubernetes API is an external collaborator; the ladder only
//! needs three server-side evaluations, all non-persisting.

use crate::error::SigilError;

/// Server-side operations against a cluster.
///
/// The returned futures are consumed inside this workspace only, so
/// the lint's warning about un-nameable future types does not apply.
#[expect(async_fn_in_trait, reason = "futures never escape the workspace")]
pub trait ClusterClient: Send + Sync {
    /// Dry-run create `manifest` in `namespace`; returns the object as
    /// the API server would have persisted it (defaulted, admitted,
    /// possibly renamed), serialized as YAML or JSON.
    async fn dry_run_create(&self, manifest: &[u8], namespace: &str)
    -> Result<Vec<u8>, SigilError>;

    /// Compute the server-side apply patch of `manifest` against
    /// `namespace`; returns the patched object bytes.
    async fn apply_patch(&self, manifest: &[u8], namespace: &str) -> Result<Vec<u8>, SigilError>;

    /// Strategic-merge-patch `manifest` onto `obj`. Only exercised by
    /// the gated fourth match strategy.
    #[cfg(feature = "strategic-merge")]
    async fn strategic_merge_patch(
        &self,
        obj: &[u8],
        manifest: &[u8],
        namespace: &str,
    ) -> Result<Vec<u8>, SigilError>;
}
