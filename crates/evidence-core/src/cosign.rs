//! Image signature re-verification commands, derived only from the images and the repo.

use crate::model::{ImageRef, ImageSet, VerificationCommand};

pub const COSIGN: &str = "cosign";
pub const OIDC_ISSUER: &str = "https://token.actions.githubusercontent.com";

fn cosign_command(
    id: String,
    description: String,
    mut argv: Vec<String>,
    image: &ImageRef,
    repo: &str,
) -> VerificationCommand {
    argv.extend([
        "--certificate-identity-regexp".to_string(),
        format!("^https://github.com/{repo}/"),
        "--certificate-oidc-issuer".to_string(),
        OIDC_ISSUER.to_string(),
        image.pinned(),
    ]);
    let command = argv
        .iter()
        .map(|a| if a.contains(['^', ' ']) { format!("'{a}'") } else { a.clone() })
        .collect::<Vec<_>>()
        .join(" ");
    VerificationCommand {
        id,
        description,
        command,
        argv,
    }
}

/// `cosign verify` and `cosign verify-attestation` for both images, pinned by digest.
pub fn verification_commands(images: &ImageSet, repo: &str) -> Vec<VerificationCommand> {
    let mut out = Vec::with_capacity(4);
    for (label, image) in [("api", &images.api), ("worker", &images.worker)] {
        out.push(cosign_command(
            format!("cosign-verify-{label}"),
            format!("Verify the keyless signature of the {label} image"),
            vec![COSIGN.to_string(), "verify".to_string()],
            image,
            repo,
        ));
        out.push(cosign_command(
            format!("cosign-verify-attestation-{label}"),
            format!("Verify the SLSA provenance attestation of the {label} image"),
            vec![
                COSIGN.to_string(),
                "verify-attestation".to_string(),
                "--type".to_string(),
                "slsaprovenance".to_string(),
            ],
            image,
            repo,
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_pin_digests_and_scope_identity_to_repo() {
        let images = ImageSet {
            api: ImageRef {
                image: "ghcr.io/acme/api".into(),
                digest: "sha256:aaa".into(),
            },
            worker: ImageRef {
                image: "ghcr.io/acme/worker".into(),
                digest: "sha256:bbb".into(),
            },
        };
        let cmds = verification_commands(&images, "acme/app");
        assert_eq!(cmds.len(), 4);
        let attest = &cmds[1];
        assert_eq!(attest.id, "cosign-verify-attestation-api");
        assert_eq!(&attest.argv[..4], ["cosign", "verify-attestation", "--type", "slsaprovenance"]);
        assert_eq!(attest.argv.last().unwrap(), "ghcr.io/acme/api@sha256:aaa");
        assert!(attest.command.contains("'^https://github.com/acme/app/'"));
        assert!(cmds[3].argv.contains(&"ghcr.io/acme/worker@sha256:bbb".to_string()));
    }
}
