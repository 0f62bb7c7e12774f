//! Signing backend: ECDSA P-256 signing and verification.
//!
//! Keys are PEM-wrapped PKCS#8 (private) or SPKI (public) files on
//! disk, created with owner-only permissions. Keyless-style
//! verification reads the signer's X.509 certificate instead of a key
//! file; the signer name is the certificate's first RFC 822 (email)
//! subject-alternative name, and stays empty for raw-key verification.

use std::path::Path;

use aws_lc_rs::rand::SystemRandom;
use aws_lc_rs::signature::{
    ECDSA_P256_SHA256_ASN1, ECDSA_P256_SHA256_ASN1_SIGNING, EcdsaKeyPair, KeyPair, UnparsedPublicKey,
};
use x509_cert::Certificate;
use x509_cert::der::Decode;
use x509_cert::der::oid::AssociatedOid;
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::SubjectAltName;

use crate::artifact::ArtifactStore;
use crate::error::SigilError;

/// The fixed size of the SPKI ASN.1 header for P-256 keys.
const P256_SPKI_HEADER_LEN: usize = 26;

/// Verifies and produces detached signatures.
///
/// `verify_*` return `Ok((false, _))` for a signature that simply does
/// not check out; `Err` is reserved for structural failures (missing
/// material, unparseable keys). Callers map errors to an unverified
/// result.
#[expect(async_fn_in_trait, reason = "not a public extension point")]
pub trait SigningBackend: Send + Sync {
    /// Verify the signature attached to an image artifact. Returns
    /// (verified, signer name).
    async fn verify_image(
        &self,
        image_ref: &str,
        key_path: Option<&str>,
    ) -> Result<(bool, String), SigilError>;

    /// Verify a detached signature over `message`. The certificate, if
    /// present, supplies both the verifying key (keyless mode) and the
    /// signer name; `key_path` takes precedence when given.
    async fn verify_blob(
        &self,
        message: &[u8],
        signature: &[u8],
        cert_pem: Option<&[u8]>,
        key_path: Option<&str>,
    ) -> Result<(bool, String), SigilError>;

    /// Produce a detached signature over `payload` with the key at
    /// `key_path` (generated on first use).
    async fn sign_blob(&self, payload: &[u8], key_path: &Path) -> Result<Vec<u8>, SigilError>;
}

/// ECDSA P-256 backend over `aws-lc-rs`.
///
/// Image verification needs somewhere to find the blob and its detached
/// signature, so it is only available when constructed with a store;
/// keyless *image* verification (certificate discovery in a registry)
/// belongs to a registry-integrated backend and is not provided here.
pub struct EcdsaBackend<S> {
    store: Option<S>,
}

impl EcdsaBackend<crate::artifact::FsArtifactStore> {
    /// A backend for blob operations only.
    pub const fn new() -> Self {
        Self { store: None }
    }
}

impl Default for EcdsaBackend<crate::artifact::FsArtifactStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ArtifactStore> EcdsaBackend<S> {
    /// A backend that can also verify and sign image artifacts held in
    /// `store`.
    pub const fn with_store(store: S) -> Self {
        Self { store: Some(store) }
    }

    /// Sign the artifact blob for `image_ref` and attach the signature
    /// to the store.
    pub async fn sign_image(&self, image_ref: &str, key_path: &Path) -> Result<(), SigilError> {
        let store = self.store.as_ref().ok_or_else(|| {
            SigilError::Signature("image signing requires an artifact store".to_owned())
        })?;
        let blob = store.pull(image_ref).await?;
        let sig = self.sign_blob(&blob, key_path).await?;
        store.push_signature(image_ref, &sig).await
    }
}

impl<S: ArtifactStore> SigningBackend for EcdsaBackend<S> {
    async fn verify_image(
        &self,
        image_ref: &str,
        key_path: Option<&str>,
    ) -> Result<(bool, String), SigilError> {
        let store = self.store.as_ref().ok_or_else(|| {
            SigilError::Signature("image verification requires an artifact store".to_owned())
        })?;
        let key_path = key_path.ok_or_else(|| {
            SigilError::Signature(
                "keyless image verification requires a registry-integrated backend".to_owned(),
            )
        })?;

        let blob = store.pull(image_ref).await?;
        let signature = store.pull_signature(image_ref).await?.ok_or_else(|| {
            SigilError::Signature(format!("no signature attached to `{image_ref}`"))
        })?;

        let verified = verify_with_key_file(&blob, &signature, Path::new(key_path))?;
        // Key-based verification leaves the signer anonymous.
        Ok((verified, String::new()))
    }

    async fn verify_blob(
        &self,
        message: &[u8],
        signature: &[u8],
        cert_pem: Option<&[u8]>,
        key_path: Option<&str>,
    ) -> Result<(bool, String), SigilError> {
        if let Some(key_path) = key_path {
            let verified = verify_with_key_file(message, signature, Path::new(key_path))?;
            return Ok((verified, String::new()));
        }

        let cert_pem = cert_pem.filter(|c| !c.is_empty()).ok_or_else(|| {
            SigilError::Signature("no public key or certificate available".to_owned())
        })?;
        let cert = parse_certificate(cert_pem)?;
        let signer = signer_name_from_cert(&cert);
        let spki_point = cert
            .tbs_certificate
            .subject_public_key_info
            .subject_public_key
            .as_bytes()
            .ok_or_else(|| {
                SigilError::Signature("certificate public key has unused bits".to_owned())
            })?
            .to_vec();

        let key = UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, spki_point);
        Ok((key.verify(message, signature).is_ok(), signer))
    }

    async fn sign_blob(&self, payload: &[u8], key_path: &Path) -> Result<Vec<u8>, SigilError> {
        let key_pair = load_or_generate_key(key_path)?;
        let rng = SystemRandom::new();
        let sig = key_pair
            .sign(&rng, payload)
            .map_err(|e| SigilError::Signature(format!("ECDSA sign failed: {e}")))?;
        Ok(sig.as_ref().to_vec())
    }
}

/// Verify `signature` over `message` with the PEM public key at
/// `key_path`.
fn verify_with_key_file(
    message: &[u8],
    signature: &[u8],
    key_path: &Path,
) -> Result<bool, SigilError> {
    let pem = std::fs::read_to_string(key_path)
        .map_err(|e| SigilError::Key(format!("failed to read key file {}: {e}", key_path.display())))?;
    let spki_der = pem_to_der(&pem)
        .ok_or_else(|| SigilError::Key(format!("invalid PEM in {}", key_path.display())))?;

    if spki_der.len() <= P256_SPKI_HEADER_LEN {
        return Err(SigilError::Key("public key DER too short for SPKI".to_owned()));
    }
    let raw_point = &spki_der[P256_SPKI_HEADER_LEN..];

    let key = UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, raw_point);
    Ok(key.verify(message, signature).is_ok())
}

/// Load the PKCS#8 signing key at `key_path`, generating (mode `0o600`)
/// when the file does not exist.
pub fn load_or_generate_key(key_path: &Path) -> Result<EcdsaKeyPair, SigilError> {
    let rng = SystemRandom::new();

    if key_path.exists() {
        let pem = std::fs::read_to_string(key_path)
            .map_err(|e| SigilError::Key(format!("failed to read key file: {e}")))?;
        let der = pem_to_der(&pem)
            .ok_or_else(|| SigilError::Key("invalid PEM key file".to_owned()))?;
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &der)
            .map_err(|e| SigilError::Key(format!("failed to parse PKCS#8 key: {e}")))?;
        tracing::debug!(path = %key_path.display(), "loaded signing key");
        return Ok(key_pair);
    }

    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
        .map_err(|e| SigilError::Key(format!("failed to generate key: {e}")))?;
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref())
        .map_err(|e| SigilError::Key(format!("failed to load generated key: {e}")))?;

    if let Some(parent) = key_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| SigilError::Key(format!("failed to create key directory: {e}")))?;
    }
    std::fs::write(key_path, der_to_pem(pkcs8.as_ref(), "PRIVATE KEY"))
        .map_err(|e| SigilError::Key(format!("failed to write key file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(key_path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| SigilError::Key(format!("failed to set key permissions: {e}")))?;
    }

    // The public half lands alongside as `<key>.pub` for verifiers.
    let pub_path = key_path.with_file_name(format!(
        "{}.pub",
        key_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("signing.pem")
    ));
    std::fs::write(&pub_path, public_key_pem(&key_pair))
        .map_err(|e| SigilError::Key(format!("failed to write public key file: {e}")))?;

    tracing::info!(path = %key_path.display(), "generated new signing key");
    Ok(key_pair)
}

/// The SPKI PEM of the public half of a signing key.
pub fn public_key_pem(key_pair: &EcdsaKeyPair) -> String {
    der_to_pem(&encode_p256_spki(key_pair.public_key().as_ref()), "PUBLIC KEY")
}

/// Parse a PEM certificate (first block of a chain).
fn parse_certificate(pem: &[u8]) -> Result<Certificate, SigilError> {
    let text = std::str::from_utf8(pem)
        .map_err(|_| SigilError::Signature("certificate is not UTF-8 PEM".to_owned()))?;
    let der = pem_to_der(text)
        .ok_or_else(|| SigilError::Signature("failed to decode certificate PEM".to_owned()))?;
    Certificate::from_der(&der)
        .map_err(|e| SigilError::Signature(format!("failed to parse certificate: {e}")))
}

/// First RFC 822 (email) subject-alternative name, or empty.
pub fn signer_name_from_cert(cert: &Certificate) -> String {
    let Some(extensions) = &cert.tbs_certificate.extensions else {
        return String::new();
    };
    for ext in extensions {
        if ext.extn_id != SubjectAltName::OID {
            continue;
        }
        let Ok(san) = SubjectAltName::from_der(ext.extn_value.as_bytes()) else {
            continue;
        };
        for name in san.0 {
            if let GeneralName::Rfc822Name(email) = name {
                return email.to_string();
            }
        }
    }
    String::new()
}

// ── PEM helpers ──────────────────────────────────────────────────────

/// PEM wraps its base64 body at this column.
const PEM_LINE_WIDTH: usize = 64;

/// Render DER bytes as a PEM block with the given label.
pub fn der_to_pem(der: &[u8], label: &str) -> String {
    use base64::Engine;

    let body = base64::engine::general_purpose::STANDARD.encode(der);
    let mut pem = String::with_capacity(body.len() + body.len() / PEM_LINE_WIDTH + 2 * label.len() + 32);
    pem.push_str("-----BEGIN ");
    pem.push_str(label);
    pem.push_str("-----\n");
    let mut rest = body.as_str();
    while !rest.is_empty() {
        let split = rest.len().min(PEM_LINE_WIDTH);
        let (line, tail) = rest.split_at(split);
        pem.push_str(line);
        pem.push('\n');
        rest = tail;
    }
    pem.push_str("-----END ");
    pem.push_str(label);
    pem.push_str("-----\n");
    pem
}

/// Decode the first PEM block's body to DER; `None` when no block is
/// present, the body is empty, or the base64 does not decode.
pub fn pem_to_der(pem: &str) -> Option<Vec<u8>> {
    use base64::Engine;

    let body: String = pem
        .lines()
        .map(str::trim)
        .skip_while(|line| !line.starts_with("-----BEGIN "))
        .skip(1)
        .take_while(|line| !line.starts_with("-----END "))
        .collect();

    let der = base64::engine::general_purpose::STANDARD.decode(body).ok()?;
    (!der.is_empty()).then_some(der)
}

/// Wrap a raw P-256 public key (uncompressed point, 65 bytes) in
/// `SubjectPublicKeyInfo` DER.
///
/// ```text
/// SEQUENCE {
///   SEQUENCE { OID id-ecPublicKey, OID prime256v1 }
///   BIT STRING <0 unused bits> <point>
/// }
/// ```
#[expect(
    clippy::cast_possible_truncation,
    reason = "a P-256 SPKI is 91 bytes; every length fits one DER length octet"
)]
pub fn encode_p256_spki(point: &[u8]) -> Vec<u8> {
    // AlgorithmIdentifier for id-ecPublicKey over prime256v1, pre-encoded.
    const ALG_ID: [u8; 21] = [
        0x30, 0x13, // SEQUENCE, 19 bytes
        0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, // 1.2.840.10045.2.1
        0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, // 1.2.840.10045.3.1.7
    ];

    // BIT STRING content: one unused-bits octet, then the point.
    let bits_len = point.len() + 1;
    let seq_len = ALG_ID.len() + 2 + bits_len;

    let mut spki = Vec::with_capacity(2 + seq_len);
    spki.extend_from_slice(&[0x30, seq_len as u8]);
    spki.extend_from_slice(&ALG_ID);
    spki.extend_from_slice(&[0x03, bits_len as u8, 0x00]);
    spki.extend_from_slice(point);
    spki
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::FsArtifactStore;

    fn write_keypair(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
        let priv_path = dir.join("signing.pem");
        let key_pair = load_or_generate_key(&priv_path).expect("keygen");
        let pub_path = dir.join("public.pem");
        std::fs::write(&pub_path, public_key_pem(&key_pair)).expect("write pub");
        (priv_path, pub_path)
    }

    #[tokio::test]
    async fn sign_then_verify_blob_with_key() {
        let dir = tempfile::tempdir().unwrap();
        let (priv_path, pub_path) = write_keypair(dir.path());
        let backend = EcdsaBackend::new();

        let sig = backend.sign_blob(b"payload", &priv_path).await.unwrap();
        let (ok, signer) = backend
            .verify_blob(b"payload", &sig, None, pub_path.to_str())
            .await
            .unwrap();
        assert!(ok);
        assert!(signer.is_empty(), "keyed verification is anonymous");
    }

    #[tokio::test]
    async fn tampered_payload_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (priv_path, pub_path) = write_keypair(dir.path());
        let backend = EcdsaBackend::new();

        let sig = backend.sign_blob(b"payload", &priv_path).await.unwrap();
        let (ok, _) = backend
            .verify_blob(b"tampered", &sig, None, pub_path.to_str())
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn wrong_key_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (priv_path, _) = write_keypair(dir.path());
        let other = tempfile::tempdir().unwrap();
        let (_, other_pub) = write_keypair(other.path());
        let backend = EcdsaBackend::new();

        let sig = backend.sign_blob(b"payload", &priv_path).await.unwrap();
        let (ok, _) = backend
            .verify_blob(b"payload", &sig, None, other_pub.to_str())
            .await
            .unwrap();
        assert!(!ok);
    }

    #[tokio::test]
    async fn missing_material_is_an_error() {
        let backend = EcdsaBackend::new();
        let result = backend.verify_blob(b"payload", b"sig", None, None).await;
        assert!(matches!(result, Err(SigilError::Signature(_))));
    }

    #[tokio::test]
    async fn image_sign_and_verify_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let (priv_path, pub_path) = write_keypair(dir.path());

        let store = FsArtifactStore::new(dir.path().join("store"));
        store.push("registry.local/app:v1", b"blob").await.unwrap();

        let backend = EcdsaBackend::with_store(store);
        backend
            .sign_image("registry.local/app:v1", &priv_path)
            .await
            .unwrap();

        let (ok, signer) = backend
            .verify_image("registry.local/app:v1", pub_path.to_str())
            .await
            .unwrap();
        assert!(ok);
        assert!(signer.is_empty());
    }

    #[tokio::test]
    async fn unsigned_image_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (_, pub_path) = write_keypair(dir.path());
        let store = FsArtifactStore::new(dir.path().join("store"));
        store.push("registry.local/app:v1", b"blob").await.unwrap();

        let backend = EcdsaBackend::with_store(store);
        let result = backend
            .verify_image("registry.local/app:v1", pub_path.to_str())
            .await;
        assert!(matches!(result, Err(SigilError::Signature(_))));
    }

    #[test]
    fn key_generation_reload_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys/signing.pem");

        let first = load_or_generate_key(&path).expect("generate");
        assert!(path.exists());
        assert!(
            dir.path().join("keys/signing.pem.pub").exists(),
            "public half written alongside"
        );
        let second = load_or_generate_key(&path).expect("reload");
        assert_eq!(public_key_pem(&first), public_key_pem(&second));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn pem_round_trip() {
        let data = b"some der bytes";
        let pem = der_to_pem(data, "TEST");
        assert_eq!(pem_to_der(&pem).unwrap(), data);
        assert!(pem_to_der("no markers here").is_none());
        assert!(pem_to_der("-----BEGIN X-----\n-----END X-----\n").is_none());
    }
}
