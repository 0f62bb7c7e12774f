//! The `kubesigil verify` subcommand.
//!
//! Verifies a manifest file against its signed copy. The result —
//! verified or not — is data printed as JSON; the exit code is non-zero
//! only when the pipeline itself fails (bad input, unreachable store).

use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::Result;
use kubesigil_core::artifact::FsArtifactStore;
use kubesigil_core::config::VerifyOption;
use kubesigil_core::signing::EcdsaBackend;
use kubesigil_core::verify::verify_manifest;

/// Arguments for `kubesigil verify`.
#[derive(Args)]
pub struct VerifyArgs {
    /// Manifest file to verify.
    #[arg(short = 'f', long = "filename", value_name = "PATH")]
    pub filename: PathBuf,

    /// Image reference of the signed artifact (discovered from the
    /// manifest's annotations when omitted).
    #[arg(short, long, value_name = "IMAGE")]
    pub image: Option<String>,

    /// Verification key (keyless mode when omitted).
    #[arg(short, long, value_name = "PATH")]
    pub key: Option<PathBuf>,

    /// Verification config file (signers, ignoreFields, cache).
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Cache fetched manifests and verify results.
    #[arg(long)]
    pub use_cache: bool,

    /// Cache directory.
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Artifact store directory.
    #[arg(long, value_name = "DIR")]
    pub store_dir: Option<PathBuf>,
}

/// Merge the config file (if any) with the flags; flags win.
pub fn build_options(args: &VerifyArgs) -> Result<VerifyOption> {
    let mut opts = match &args.config {
        Some(path) => VerifyOption::from_yaml_file(path)?,
        None => VerifyOption::default(),
    };
    if args.image.is_some() {
        opts.image_ref = args.image.clone();
    }
    if let Some(key) = &args.key {
        opts.key_path = Some(key.display().to_string());
    }
    if args.use_cache {
        opts.use_cache = true;
    }
    if args.cache_dir.is_some() {
        opts.cache_dir.clone_from(&args.cache_dir);
    }
    Ok(opts)
}

/// Execute the verify command.
pub async fn execute(args: VerifyArgs) -> Result<()> {
    let manifest = std::fs::read(&args.filename)?;
    let opts = build_options(&args)?;

    let store_dir = args
        .store_dir
        .clone()
        .unwrap_or_else(super::default_store_dir);
    let store = FsArtifactStore::new(store_dir.clone());
    let backend = EcdsaBackend::with_store(FsArtifactStore::new(store_dir));

    let result = verify_manifest(&manifest, &opts, &store, &backend).await?;

    if result.verified {
        tracing::info!(signer = %result.signer, "manifest verified");
    } else {
        tracing::warn!("manifest not verified");
    }
    println!("{result}");
    Ok(())
}
