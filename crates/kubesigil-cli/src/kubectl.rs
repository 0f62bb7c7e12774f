//! kubectl plumbing for the `verify-resource` command.
//!
//! Live objects come from `kubectl get -o json`; the dry-run operations
//! the match ladder needs are server-side `kubectl create/apply
//! --dry-run=server`.

use std::process::Stdio;

use color_eyre::eyre::{Result, eyre};
use kubesigil_core::cluster::ClusterClient;
use kubesigil_core::error::SigilError;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Run `kubectl get -o json` with the caller's selectors and return the
/// individual objects (lists are unwrapped).
pub async fn get_objects(selectors: &[String]) -> Result<Vec<Vec<u8>>> {
    let mut cmd = Command::new("kubectl");
    cmd.args(["get", "--output", "json"]).args(selectors);
    tracing::debug!(args = ?selectors, "kubectl get");

    let output = cmd.output().await?;
    if !output.status.success() {
        return Err(eyre!(
            "kubectl get failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    let value: serde_json::Value = serde_json::from_slice(&output.stdout)?;
    let items = match value.get("items").and_then(serde_json::Value::as_array) {
        Some(items) => items.clone(),
        None => vec![value],
    };
    items
        .iter()
        .map(|obj| serde_json::to_vec(obj).map_err(Into::into))
        .collect()
}

/// `ClusterClient` that shells out to kubectl for server-side dry-runs.
pub struct KubectlCluster;

impl KubectlCluster {
    async fn run_with_stdin(
        &self,
        args: &[&str],
        stdin_bytes: &[u8],
    ) -> Result<Vec<u8>, SigilError> {
        let mut child = Command::new("kubectl")
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SigilError::Cluster(format!("failed to spawn kubectl: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(stdin_bytes)
                .await
                .map_err(|e| SigilError::Cluster(format!("failed to write to kubectl: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| SigilError::Cluster(format!("kubectl did not complete: {e}")))?;
        if !output.status.success() {
            return Err(SigilError::Cluster(format!(
                "kubectl {} failed: {}",
                args.first().unwrap_or(&""),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}

impl ClusterClient for KubectlCluster {
    async fn dry_run_create(
        &self,
        manifest: &[u8],
        namespace: &str,
    ) -> Result<Vec<u8>, SigilError> {
        self.run_with_stdin(
            &[
                "create",
                "-f",
                "-",
                "--dry-run=server",
                "--namespace",
                namespace,
                "--output",
                "json",
            ],
            manifest,
        )
        .await
    }

    async fn apply_patch(&self, manifest: &[u8], namespace: &str) -> Result<Vec<u8>, SigilError> {
        self.run_with_stdin(
            &[
                "apply",
                "-f",
                "-",
                "--dry-run=server",
                "--namespace",
                namespace,
                "--output",
                "json",
            ],
            manifest,
        )
        .await
    }

    #[cfg(feature = "strategic-merge")]
    async fn strategic_merge_patch(
        &self,
        _obj: &[u8],
        manifest: &[u8],
        namespace: &str,
    ) -> Result<Vec<u8>, SigilError> {
        // Server-side apply covers the gated strategy's needs when it
        // is enabled.
        self.apply_patch(manifest, namespace).await
    }
}
