//! Detached Ed25519 signing of the deploy policy file.
//!
//! The signer refuses to write anything unless the key it holds matches the public key
//! committed next to the policy, and its own signature verifies against that key.

use std::path::{Path, PathBuf};

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use tracing::info;
use zeroize::Zeroizing;

use evidence_core::error::{EvidenceError, Result};
use evidence_core::{
    fsio, sha256_hex, Config, PolicyFileRef, PolicyProvenance, ProvenanceVerification,
};

pub const PROVENANCE_VERSION: &str = "1.0.0";

/// Policy file, detached signature and public key, relative to `root`.
#[derive(Clone, Debug)]
pub struct PolicyPackage {
    pub root: PathBuf,
    pub policy_file: String,
    pub signature_path: String,
    pub public_key_path: String,
}

impl PolicyPackage {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            root: cfg.source_root(),
            policy_file: cfg.policy.policy_file.clone(),
            signature_path: cfg.policy.signature_path.clone(),
            public_key_path: cfg.policy.public_key_path.clone(),
        }
    }

    pub fn policy_path(&self) -> PathBuf {
        self.root.join(&self.policy_file)
    }

    pub fn signature_file(&self) -> PathBuf {
        self.root.join(&self.signature_path)
    }

    pub fn public_key_file(&self) -> PathBuf {
        self.root.join(&self.public_key_path)
    }
}

fn decode_fixed<const N: usize>(what: &str, text: &str) -> Result<Zeroizing<[u8; N]>> {
    let raw = Zeroizing::new(
        hex::decode(text.trim())
            .map_err(|e| EvidenceError::signature(format!("{what} is not hex: {e}")))?,
    );
    if raw.len() != N {
        return Err(EvidenceError::signature(format!(
            "{what} must be {N} bytes, got {}",
            raw.len()
        )));
    }
    let mut out = Zeroizing::new([0u8; N]);
    out.copy_from_slice(&raw);
    Ok(out)
}

/// Reads a hex-encoded Ed25519 public key file.
pub fn read_public_key(path: &Path) -> Result<VerifyingKey> {
    let text = String::from_utf8(fsio::read_bytes(path)?)
        .map_err(|_| EvidenceError::signature(format!("{} is not utf-8", path.display())))?;
    let bytes = decode_fixed::<32>("public key", &text)?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| EvidenceError::signature(format!("invalid public key: {e}")))
}

/// Strict verification of a hex-encoded detached signature.
pub fn verify_detached(key: &VerifyingKey, message: &[u8], signature_hex: &str) -> Result<()> {
    let bytes = decode_fixed::<64>("signature", signature_hex)?;
    let signature = Signature::from_bytes(&bytes);
    key.verify_strict(message, &signature).map_err(|_| {
        EvidenceError::signature("signature does not verify against the stored public key")
    })
}

pub struct PolicySigner {
    key: SigningKey,
}

impl PolicySigner {
    /// Parses a hex Ed25519 seed. The intermediate buffers are zeroized.
    pub fn from_hex(seed_hex: &str) -> Result<Self> {
        let seed = decode_fixed::<32>("signing key", seed_hex)?;
        Ok(Self {
            key: SigningKey::from_bytes(&seed),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let seed = cfg
            .policy
            .signing_key
            .as_deref()
            .ok_or_else(|| EvidenceError::signature("POLICY_SIGNING_KEY is not set"))?;
        Self::from_hex(seed)
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.key.verifying_key().as_bytes())
    }

    /// Signs the package's policy file and writes the signature plus the provenance record.
    pub fn sign(
        &self,
        package: &PolicyPackage,
        policy_input_sha256: &str,
        source_url: &str,
        provenance_path: &Path,
    ) -> Result<PolicyProvenance> {
        let stored = read_public_key(&package.public_key_file())?;
        let derived = self.key.verifying_key();
        if stored != derived {
            return Err(EvidenceError::signature(format!(
                "derived public key {} does not match stored key {}",
                hex::encode(derived.as_bytes()),
                hex::encode(stored.as_bytes())
            )));
        }

        let policy = fsio::read_bytes(&package.policy_path())?;
        let digest = sha256_hex(&policy);
        let signature_hex = hex::encode(self.key.sign(&policy).to_bytes());
        verify_detached(&stored, &policy, &signature_hex)?;

        fsio::write_bytes(&package.signature_file(), format!("{signature_hex}\n").as_bytes())?;

        let provenance = PolicyProvenance {
            version: PROVENANCE_VERSION.to_string(),
            policy: PolicyFileRef {
                file_path: package.policy_file.clone(),
                sha256: digest,
                signature_path: package.signature_path.clone(),
                public_key_path: package.public_key_path.clone(),
            },
            policy_input_sha256: policy_input_sha256.to_string(),
            source_url: source_url.to_string(),
            verification: ProvenanceVerification {
                checksum_verified: true,
                signature_verified: true,
            },
        };
        fsio::write_json_atomic(provenance_path, &provenance)?;
        info!(
            policy = %package.policy_file,
            sha256 = %provenance.policy.sha256,
            path = %provenance_path.display(),
            "signed policy"
        );
        Ok(provenance)
    }
}
