//! kubesigil CLI — sign and verify Kubernetes YAML manifests.
//!
//! Manifests are packaged into an artifact, signed, and verified
//! against the signed copy — as files or as live cluster resources.

mod commands;
mod kubectl;

use clap::Parser;
use color_eyre::eyre::Result;

/// kubesigil — sign and verify Kubernetes YAML manifests.
///
/// Signed content travels as an artifact in a store or embedded in the
/// manifest's own annotations; verification reconstructs the signed
/// copy and checks both content and signature.
#[derive(Parser)]
#[command(name = "kubesigil", version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (repeat for more detail: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Output logs as JSON (for machine consumption).
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Sign a manifest file or directory of manifests.
    Sign(commands::sign::SignArgs),
    /// Verify a manifest file against its signed copy.
    Verify(commands::verify::VerifyArgs),
    /// Verify live cluster resources against their signed manifests.
    VerifyResource(commands::verify_resource::VerifyResourceArgs),
}

/// Each `-v` widens the log filter one notch; `--json-logs` swaps the
/// human formatter for line-delimited JSON.
fn init_logging(verbosity: u8, json: bool) {
    const LEVELS: [&str; 4] = ["warn", "info", "debug", "trace"];
    let level = LEVELS[usize::from(verbosity).min(LEVELS.len() - 1)];

    let builder = tracing_subscriber::fmt()
        .with_env_filter(level)
        .with_target(true)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    match cli.command {
        Commands::Sign(args) => commands::sign::execute(args).await,
        Commands::Verify(args) => commands::verify::execute(args).await,
        Commands::VerifyResource(args) => commands::verify_resource::execute(args).await,
    }
}
