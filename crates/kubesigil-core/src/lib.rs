//! Verification engine for signed Kubernetes manifests.
//!
//! `kubesigil-core` reconciles three representations of the "same"
//! manifest — the YAML a human wrote, the YAML inside a signed
//! artifact, and a live cluster object mutated by admission and
//! defaulting — and decides semantic equivalence under controlled
//! masks, then checks the cryptographic signature. The registry and the
//! cluster stay behind the [`artifact::ArtifactStore`] and
//! [`cluster::ClusterClient`] seams; signature primitives behind
//! [`signing::SigningBackend`].

pub mod annotations;
pub mod artifact;
pub mod cache;
pub mod cluster;
pub mod config;
pub mod error;
pub mod fetch;
pub mod resource;
pub mod sign;
pub mod signing;
pub mod verify;
pub mod yamls;

pub use error::SigilError;
pub use verify::{VerifyResult, verify_manifest};
