use std::path::Path;

use tracing::{info, warn};

use evidence_core::error::{EvidenceError, Result};
use evidence_core::{fsio, is_sha256_hex, sha256_file, PolicyProvenance, ProvenanceVerification};

use crate::signer::{read_public_key, verify_detached};

/// Reads a provenance record and checks its shape.
pub fn load(path: &Path) -> Result<PolicyProvenance> {
    let provenance: PolicyProvenance = fsio::read_json(path)?;
    validate(&provenance)?;
    Ok(provenance)
}

pub fn validate(p: &PolicyProvenance) -> Result<()> {
    for (field, value) in [
        ("version", &p.version),
        ("policy.filePath", &p.policy.file_path),
        ("policy.signaturePath", &p.policy.signature_path),
        ("policy.publicKeyPath", &p.policy.public_key_path),
        ("sourceUrl", &p.source_url),
    ] {
        if value.trim().is_empty() {
            return Err(EvidenceError::shape(field, "must be a non-empty string"));
        }
    }
    for (field, value) in [
        ("policy.sha256", &p.policy.sha256),
        ("policyInputSha256", &p.policy_input_sha256),
    ] {
        if !is_sha256_hex(value) {
            return Err(EvidenceError::shape(
                field,
                format!("`{value}` is not a sha256 hex digest"),
            ));
        }
    }
    Ok(())
}

/// Re-checks a provenance record against the policy package under `root`.
///
/// The checksum is always recomputed. The detached signature is verified only when both
/// the signature and public key files are present; the returned flags say what ran.
pub fn confirm(p: &PolicyProvenance, root: &Path) -> Result<ProvenanceVerification> {
    let policy_path = root.join(&p.policy.file_path);
    let actual = sha256_file(&policy_path)?;
    if actual != p.policy.sha256 {
        return Err(EvidenceError::integrity(&p.policy.file_path, &p.policy.sha256, actual));
    }

    let sig_path = root.join(&p.policy.signature_path);
    let key_path = root.join(&p.policy.public_key_path);
    let signature_verified = if sig_path.is_file() && key_path.is_file() {
        let key = read_public_key(&key_path)?;
        let sig = String::from_utf8(fsio::read_bytes(&sig_path)?)
            .map_err(|_| EvidenceError::signature(format!("{} is not utf-8", sig_path.display())))?;
        verify_detached(&key, &fsio::read_bytes(&policy_path)?, &sig)?;
        true
    } else {
        warn!(
            signature = %sig_path.display(),
            key = %key_path.display(),
            "policy signature or key not present; signature not re-verified"
        );
        false
    };

    info!(policy = %p.policy.file_path, signature_verified, "policy provenance confirmed");
    Ok(ProvenanceVerification {
        checksum_verified: true,
        signature_verified,
    })
}

/// Checks that `policyInputSha256` is the digest of the policy input file on disk.
pub fn confirm_input(p: &PolicyProvenance, policy_input: &Path) -> Result<()> {
    let actual = sha256_file(policy_input)?;
    if actual != p.policy_input_sha256 {
        return Err(EvidenceError::integrity(
            policy_input.display().to_string(),
            &p.policy_input_sha256,
            actual,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::{PolicyPackage, PolicySigner};
    use evidence_core::sha256_hex;
    use tempfile::tempdir;

    const SEED: &str = "0303030303030303030303030303030303030303030303030303030303030303";

    fn signed(root: &Path) -> PolicyProvenance {
        let signer = PolicySigner::from_hex(SEED).unwrap();
        std::fs::create_dir_all(root.join("policy")).unwrap();
        std::fs::write(root.join("policy/deploy.rego"), "package deploy\n").unwrap();
        std::fs::write(root.join("policy/key.pub"), signer.public_key_hex()).unwrap();
        let pkg = PolicyPackage {
            root: root.to_path_buf(),
            policy_file: "policy/deploy.rego".into(),
            signature_path: "policy/deploy.rego.sig".into(),
            public_key_path: "policy/key.pub".into(),
        };
        signer
            .sign(&pkg, &sha256_hex(b"input"), "https://example.invalid", &root.join("prov.json"))
            .unwrap()
    }

    #[test]
    fn load_and_confirm_signed_package() {
        let dir = tempdir().unwrap();
        signed(dir.path());
        let p = load(&dir.path().join("prov.json")).unwrap();
        let v = confirm(&p, dir.path()).unwrap();
        assert!(v.checksum_verified && v.signature_verified);
    }

    #[test]
    fn edited_policy_fails_checksum() {
        let dir = tempdir().unwrap();
        let p = signed(dir.path());
        let policy = dir.path().join("policy/deploy.rego");
        std::fs::write(policy, "package deploy\nallow := true\n").unwrap();
        let err = confirm(&p, dir.path()).unwrap_err();
        assert_eq!(err.kind(), "integrity");
    }

    #[test]
    fn missing_signature_file_is_reported_not_fatal() {
        let dir = tempdir().unwrap();
        let p = signed(dir.path());
        std::fs::remove_file(dir.path().join("policy/deploy.rego.sig")).unwrap();
        assert!(!confirm(&p, dir.path()).unwrap().signature_verified);
    }

    #[test]
    fn bad_digest_is_a_shape_error() {
        let dir = tempdir().unwrap();
        let mut p = signed(dir.path());
        p.policy_input_sha256 = "nope".into();
        match validate(&p).unwrap_err() {
            EvidenceError::Shape { field, .. } => assert_eq!(field, "policyInputSha256"),
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn policy_input_digest_is_rechecked() {
        let dir = tempdir().unwrap();
        let p = signed(dir.path());
        let input = dir.path().join("policy-input.json");
        std::fs::write(&input, "input").unwrap();
        confirm_input(&p, &input).unwrap();

        std::fs::write(&input, "input with an extra fact").unwrap();
        assert_eq!(confirm_input(&p, &input).unwrap_err().kind(), "integrity");
    }
}
