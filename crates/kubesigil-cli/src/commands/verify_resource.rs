//! The `kubesigil verify-resource` subcommand.
//!
//! Takes `kubectl get`-style selectors. The kubesigil flags
//! (`-i/--image`, `-k/--key`, `-c/--config`, cache and store flags) are
//! partitioned out of the argument list; everything else forwards to
//! `kubectl get -o json`.

use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::Result;
use kubesigil_core::artifact::FsArtifactStore;
use kubesigil_core::config::VerifyOption;
use kubesigil_core::resource::verify_resource;
use kubesigil_core::signing::EcdsaBackend;

use crate::kubectl::{self, KubectlCluster};

/// Arguments for `kubesigil verify-resource`.
#[derive(Args)]
pub struct VerifyResourceArgs {
    /// kubectl get selectors, mixed freely with the kubesigil flags
    /// -i/--image, -k/--key, -c/--config, --use-cache, --cache-dir,
    /// --store-dir.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

/// The kubesigil flags partitioned out of the raw argument list.
#[derive(Debug, Default, PartialEq)]
pub struct PartitionedArgs {
    pub image: Option<String>,
    pub key: Option<String>,
    pub config: Option<PathBuf>,
    pub use_cache: bool,
    pub cache_dir: Option<PathBuf>,
    pub store_dir: Option<PathBuf>,
    pub kubectl_args: Vec<String>,
}

/// Split the raw args: flags kubesigil owns are consumed (with their
/// values); everything else forwards to kubectl.
pub fn split_args(args: &[String]) -> PartitionedArgs {
    let mut out = PartitionedArgs::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let take_value =
            |iter: &mut std::slice::Iter<String>| iter.next().cloned().unwrap_or_default();
        match arg.as_str() {
            "-i" | "--image" => out.image = Some(take_value(&mut iter)),
            "-k" | "--key" => out.key = Some(take_value(&mut iter)),
            "-c" | "--config" => out.config = Some(PathBuf::from(take_value(&mut iter))),
            "--use-cache" => out.use_cache = true,
            "--cache-dir" => out.cache_dir = Some(PathBuf::from(take_value(&mut iter))),
            "--store-dir" => out.store_dir = Some(PathBuf::from(take_value(&mut iter))),
            _ => out.kubectl_args.push(arg.clone()),
        }
    }
    out
}

/// Execute the verify-resource command.
pub async fn execute(args: VerifyResourceArgs) -> Result<()> {
    let partitioned = split_args(&args.args);

    let mut opts = match &partitioned.config {
        Some(path) => VerifyOption::from_yaml_file(path)?,
        None => VerifyOption::default(),
    };
    if partitioned.image.is_some() {
        opts.image_ref.clone_from(&partitioned.image);
    }
    if partitioned.key.is_some() {
        opts.key_path.clone_from(&partitioned.key);
    }
    if partitioned.use_cache {
        opts.use_cache = true;
    }
    if partitioned.cache_dir.is_some() {
        opts.cache_dir.clone_from(&partitioned.cache_dir);
    }

    let objs = kubectl::get_objects(&partitioned.kubectl_args).await?;

    let store_dir = partitioned
        .store_dir
        .unwrap_or_else(super::default_store_dir);
    let store = FsArtifactStore::new(store_dir.clone());
    let backend = EcdsaBackend::with_store(FsArtifactStore::new(store_dir));

    let result = verify_resource(&objs, &opts, &store, &backend, &KubectlCluster).await?;

    if result.verified {
        tracing::info!(signer = %result.signer, "resources verified");
    } else {
        tracing::warn!("resources not verified");
    }
    println!("{result}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kubesigil_flags_are_partitioned_out() {
        let args: Vec<String> = [
            "configmap",
            "cm1",
            "-n",
            "ns1",
            "-i",
            "registry.local/app:v1",
            "--key",
            "/keys/pub.pem",
            "--use-cache",
            "-o",
            "wide",
        ]
        .iter()
        .map(ToString::to_string)
        .collect();

        let split = split_args(&args);
        assert_eq!(split.image.as_deref(), Some("registry.local/app:v1"));
        assert_eq!(split.key.as_deref(), Some("/keys/pub.pem"));
        assert!(split.use_cache);
        assert_eq!(split.kubectl_args, ["configmap", "cm1", "-n", "ns1", "-o", "wide"]);
    }

    #[test]
    fn plain_selectors_pass_through() {
        let args: Vec<String> = ["deployments", "--all-namespaces"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let split = split_args(&args);
        assert!(split.image.is_none());
        assert_eq!(split.kubectl_args, ["deployments", "--all-namespaces"]);
    }
}
