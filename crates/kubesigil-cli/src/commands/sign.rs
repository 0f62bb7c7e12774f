//! The `kubesigil sign` subcommand.
//!
//! Packages the input manifests, signs the canonical blob, and writes
//! the annotation-signed manifest (optionally pushing the artifact to
//! the store as well).

use std::path::PathBuf;

use clap::Args;
use color_eyre::eyre::Result;
use kubesigil_core::artifact::FsArtifactStore;
use kubesigil_core::sign::{SignOption, sign_manifest};
use kubesigil_core::signing::EcdsaBackend;

/// Arguments for `kubesigil sign`.
#[derive(Args)]
pub struct SignArgs {
    /// Manifest file or directory of manifests to sign.
    #[arg(short = 'f', long = "filename", value_name = "PATH")]
    pub filename: PathBuf,

    /// Push the signed artifact under this image reference.
    #[arg(short, long, value_name = "IMAGE")]
    pub image: Option<String>,

    /// Signing key (generated on first use).
    #[arg(short, long, value_name = "PATH")]
    pub key: Option<PathBuf>,

    /// Write the signed manifest here instead of stdout.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Artifact store directory.
    #[arg(long, value_name = "DIR")]
    pub store_dir: Option<PathBuf>,
}

/// Execute the sign command.
pub async fn execute(args: SignArgs) -> Result<()> {
    let store_dir = args.store_dir.unwrap_or_else(super::default_store_dir);
    let store = FsArtifactStore::new(store_dir);
    let backend = EcdsaBackend::new();

    let opts = SignOption {
        image_ref: args.image,
        key_path: args.key.unwrap_or_else(super::default_key_path),
    };

    let signed = sign_manifest(&args.filename, &opts, &store, &backend).await?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, &signed)?;
            tracing::info!(path = %path.display(), "wrote signed manifest");
        }
        None => print!("{}", String::from_utf8_lossy(&signed)),
    }
    Ok(())
}
