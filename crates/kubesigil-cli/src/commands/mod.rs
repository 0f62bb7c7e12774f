//! CLI subcommands.

pub mod sign;
pub mod verify;
pub mod verify_resource;

use std::path::PathBuf;

/// Default artifact store: `~/.local/share/kubesigil/store` (or a temp
/// fallback when no home directory resolves).
pub fn default_store_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "kubesigil", "kubesigil").map_or_else(
        || std::env::temp_dir().join("kubesigil/store"),
        |dirs| dirs.data_dir().join("store"),
    )
}

/// Default signing key: `~/.config/kubesigil/keys/signing.pem`.
pub fn default_key_path() -> PathBuf {
    directories::ProjectDirs::from("dev", "kubesigil", "kubesigil").map_or_else(
        || std::env::temp_dir().join("kubesigil/keys/signing.pem"),
        |dirs| dirs.config_dir().join("keys/signing.pem"),
    )
}
