use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tempfile::tempdir;

use evidence_core::{
    CiRunRecord, DeployRunRecord, ImageRef, ImageSet, IngestRecord, JobRecord, PolicyFileRef,
    PolicyProvenance, ProvenanceVerification, SourceRef, SuiteType, TestManifest,
    DEFAULT_REQUIRED_DEPLOY_JOBS,
};
use evidence_publish::{compose_and_publish, ComposeInputs, ComposeOptions};
use evidence_tests::{run_suite, AssertionDefinition, Matcher, ProducerOptions, TestDefinition};
use evidence_verify::{DirSource, PublicVerifier, SignatureMode};

const COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";

fn def(
    test_id: &'static str,
    suite: SuiteType,
    needles: &[(&'static str, &'static str)],
) -> TestDefinition {
    TestDefinition {
        test_id,
        source_path: "app/flows.test.ts",
        suite,
        verification_command: "npm test",
        assertions: needles
            .iter()
            .map(|&(id, needle)| AssertionDefinition {
                assertion_id: id,
                name: id,
                file_path: "app/flows.ts",
                matcher: Matcher::Includes(needle),
                expected: needle,
            })
            .collect(),
    }
}

fn ingest() -> IngestRecord {
    IngestRecord {
        schema_version: "1.0.0".into(),
        verified_at: "2026-06-01T12:00:00.000Z".into(),
        source: SourceRef {
            repo: "safety-platform/guardian-app".into(),
            git_ref: "refs/heads/main".into(),
            commit_sha: COMMIT.into(),
        },
        environment: "production".into(),
        ci: CiRunRecord {
            run_id: 31,
            artifact_name: "compliance-evidence".into(),
            policy_artifact_name: "policy-bundle".into(),
            head_sha: COMMIT.into(),
            conclusion: "success".into(),
            html_url: "https://github.com/safety-platform/guardian-app/actions/runs/31".into(),
        },
        deploy: DeployRunRecord {
            run_id: 32,
            workflow_name: "Deploy".into(),
            run_number: "4".into(),
            head_sha: COMMIT.into(),
            conclusion: "success".into(),
            html_url: "https://github.com/safety-platform/guardian-app/actions/runs/32".into(),
            jobs: DEFAULT_REQUIRED_DEPLOY_JOBS
                .iter()
                .map(|name| JobRecord {
                    name: name.to_string(),
                    status: "completed".into(),
                    conclusion: Some("success".into()),
                    started_at: None,
                    completed_at: None,
                    html_url: None,
                })
                .collect(),
        },
        images: ImageSet {
            api: ImageRef {
                image: "ghcr.io/safety-platform/api".into(),
                digest: "sha256:aaaa".into(),
            },
            worker: ImageRef {
                image: "ghcr.io/safety-platform/worker".into(),
                digest: "sha256:bbbb".into(),
            },
        },
        artifacts: vec![],
    }
}

fn provenance() -> PolicyProvenance {
    PolicyProvenance {
        version: "1.0.0".into(),
        policy: PolicyFileRef {
            file_path: "policy/deploy.rego".into(),
            sha256: "a".repeat(64),
            signature_path: "policy/deploy.rego.sig".into(),
            public_key_path: "policy/policy-signing.pub".into(),
        },
        policy_input_sha256: "b".repeat(64),
        source_url: "https://github.com/safety-platform/guardian-app/blob/main/policy/deploy.rego"
            .into(),
        verification: ProvenanceVerification {
            checksum_verified: true,
            signature_verified: false,
        },
    }
}

/// Produces both suites into `<root>/public` and publishes `current/evidence.json`.
fn publish_tree(root: &Path) {
    let checkout = root.join("checkout");
    std::fs::create_dir_all(checkout.join("app")).unwrap();
    std::fs::write(
        checkout.join("app/flows.ts"),
        "startSosFlow();\nnotifyGuardians();\nbuildTtlIndex();\n",
    )
    .unwrap();

    let suites = [
        def(
            "sos-e2e",
            SuiteType::E2e,
            &[("sos-start", "startSosFlow("), ("sos-notify", "notifyGuardians(")],
        ),
        def("ttl-indexes-api-unit", SuiteType::Unit, &[("ttl-build", "buildTtlIndex(")]),
    ];
    let mut entries = Vec::new();
    for d in suites {
        let opts = ProducerOptions {
            suite: d.suite,
            source_root: checkout.clone(),
            bundle_root: root.join("public"),
            tests_dir: "current/tests".into(),
            run_id: "31".into(),
            commit_sha: COMMIT.into(),
            job_name: format!("compliance-{}", d.suite.as_str()),
            workflow_path: ".github/workflows/compliance.yml".into(),
            job_passed: true,
        };
        entries.extend(run_suite(&[d], &opts).unwrap().manifest.test_evidence);
    }

    let inputs = ComposeInputs {
        ingest: ingest(),
        manifest: TestManifest {
            generated_at: "2026-06-01T11:59:00.000Z".into(),
            test_evidence: entries,
        },
        provenance: provenance(),
    };
    let opts = ComposeOptions {
        publication_root: root.join("public"),
        required_test_ids: vec!["sos-e2e".into(), "ttl-indexes-api-unit".into()],
        required_jobs: DEFAULT_REQUIRED_DEPLOY_JOBS.iter().map(|s| s.to_string()).collect(),
    };
    compose_and_publish(&inputs, &opts).unwrap();
}

fn edit_evidence(root: &Path, edit: impl FnOnce(&mut Value)) {
    let path = root.join("public/current/evidence.json");
    let mut doc: Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    edit(&mut doc);
    std::fs::write(&path, serde_json::to_vec_pretty(&doc).unwrap()).unwrap();
}

fn verify(root: &Path) -> evidence_core::Result<evidence_verify::VerifyReport> {
    let source = DirSource::new(root.join("public"));
    PublicVerifier::new(&source)
        .with_signature_mode(SignatureMode::Skip)
        .verify()
}

#[test]
fn test_published_tree_verifies() {
    let dir = tempdir().unwrap();
    publish_tree(dir.path());

    let report = verify(dir.path()).unwrap();
    assert_eq!(report.tests, 2);
    assert_eq!(report.artifacts, 4);
    assert_eq!(report.assertions, 3);
    assert!(!report.signatures_checked);
}

#[test]
fn test_tampered_artifact_is_detected() {
    let dir = tempdir().unwrap();
    publish_tree(dir.path());
    let junit = dir.path().join("public/current/tests/sos-e2e.junit.xml");
    std::fs::write(junit, "<testsuite/>").unwrap();

    let err = verify(dir.path()).unwrap_err();
    assert_eq!(err.kind(), "integrity");
    assert!(err.to_string().contains("current/tests/sos-e2e.junit.xml"));
}

#[test]
fn test_summary_that_disagrees_with_entries_is_rejected() {
    let dir = tempdir().unwrap();
    publish_tree(dir.path());
    edit_evidence(dir.path(), |doc| {
        doc["assertionSummary"]["total"] = json!(4);
        doc["assertionSummary"]["passed"] = json!(4);
    });

    let err = verify(dir.path()).unwrap_err();
    assert_eq!(err.kind(), "integrity");
    assert!(err.to_string().contains("assertionSummary"));
}

#[test]
fn test_schema_violation_is_a_shape_error() {
    let dir = tempdir().unwrap();
    publish_tree(dir.path());
    edit_evidence(dir.path(), |doc| {
        doc["deploy"]["conclusion"] = json!("failure");
    });

    assert_eq!(verify(dir.path()).unwrap_err().kind(), "shape");
}

#[test]
fn test_missing_schema_stops_verification() {
    let dir = tempdir().unwrap();
    publish_tree(dir.path());
    std::fs::remove_file(dir.path().join("public/current/schema/evidence.schema.json")).unwrap();

    assert_eq!(verify(dir.path()).unwrap_err().kind(), "io");
}

#[test]
fn test_evidence_from_another_commit_is_rejected() {
    let dir = tempdir().unwrap();
    publish_tree(dir.path());
    edit_evidence(dir.path(), |doc| {
        doc["source"]["commitSha"] = json!("f".repeat(40));
    });

    let err = verify(dir.path()).unwrap_err();
    assert_eq!(err.kind(), "integrity");
    assert!(err.to_string().contains("sos-e2e.sourceCommitSha"));
}

#[test]
fn test_published_commands_are_never_executed() {
    let dir = tempdir().unwrap();
    publish_tree(dir.path());
    let marker = dir.path().join("marker");
    edit_evidence(dir.path(), |doc| {
        let touch = format!("touch {}", marker.display());
        doc["verificationCommands"][0]["argv"] = json!(["sh", "-c", touch]);
    });

    let source = DirSource::new(dir.path().join("public"));
    let err = PublicVerifier::new(&source)
        .with_cosign(dir.path().join("no-such-cosign"))
        .verify()
        .unwrap_err();
    assert_eq!(err.kind(), "integrity");
    assert!(err.to_string().contains("verificationCommands.cosign-verify-api"));
    assert!(!marker.exists());
}

#[cfg(unix)]
fn fake_cosign(dir: &Path, name: &str, log: &Path, exit_code: i32) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    let script = format!("#!/bin/sh\necho \"$@\" >> '{}'\nexit {exit_code}\n", log.display());
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

#[cfg(unix)]
#[test]
fn test_signatures_run_rebuilt_commands_through_cosign() {
    let dir = tempdir().unwrap();
    publish_tree(dir.path());
    let source = DirSource::new(dir.path().join("public"));

    let log = dir.path().join("cosign.log");
    let cosign = fake_cosign(dir.path(), "cosign-ok", &log, 0);
    let report = PublicVerifier::new(&source).with_cosign(&cosign).verify().unwrap();
    assert!(report.signatures_checked);

    let calls = std::fs::read_to_string(&log).unwrap();
    let calls: Vec<&str> = calls.lines().collect();
    assert_eq!(calls.len(), 5, "{calls:?}");
    assert_eq!(calls[0], "version");
    let identity =
        "--certificate-identity-regexp ^https://github.com/safety-platform/guardian-app/";
    assert!(calls[1].starts_with(&format!("verify {identity}")));
    assert!(calls[1].ends_with("ghcr.io/safety-platform/api@sha256:aaaa"));
    assert!(calls[2].starts_with("verify-attestation --type slsaprovenance"));
    assert!(calls[4].ends_with("ghcr.io/safety-platform/worker@sha256:bbbb"));

    let failing_log = dir.path().join("failing.log");
    let failing = fake_cosign(dir.path(), "cosign-fail", &failing_log, 1);
    let err = PublicVerifier::new(&source).with_cosign(&failing).verify().unwrap_err();
    assert_eq!(err.kind(), "signature");
}
