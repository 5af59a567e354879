use std::collections::HashMap;
use std::path::Path;

use evidence_core::{
    fsio, sha256_hex, ArtifactFormat, CheckStatus, CiRunRecord, Config, DeployRunRecord,
    EvidenceError, HistoryIndex, ImageRef, ImageSet, IngestRecord, JobRecord, SourceRef, SuiteType,
    TestManifest, DEFAULT_REQUIRED_DEPLOY_JOBS,
};
use evidence_policy::{PolicyPackage, PolicySigner};
use evidence_publish::{compose, compose_and_publish, snapshot, ComposeInputs, ComposeOptions};
use evidence_tests::{run_suite, AssertionDefinition, Matcher, ProducerOptions, TestDefinition};
use tempfile::tempdir;

const COMMIT: &str = "def456def456def456def456def456def456def4";
const SEED: &str = "0404040404040404040404040404040404040404040404040404040404040404";
const POLICY_INPUT: &[u8] = b"policy input";

fn assertion(id: &'static str, needle: &'static str) -> AssertionDefinition {
    AssertionDefinition {
        assertion_id: id,
        name: id,
        file_path: "app/source.ts",
        matcher: Matcher::Includes(needle),
        expected: needle,
    }
}

fn write_checkout(root: &Path) {
    let src = root.join("checkout");
    std::fs::create_dir_all(src.join("app")).unwrap();
    std::fs::create_dir_all(src.join("policy")).unwrap();
    std::fs::write(
        src.join("app/source.ts"),
        concat!(
            "const DEFAULT_DECISION = 'deny';\n",
            "export function analyzePermissions() {}\n",
            "resolveSyncConflict();\nencryptPayload();\nreplayQueue();\n",
        ),
    )
    .unwrap();
    std::fs::write(src.join("policy/deploy.rego"), "package deploy\n").unwrap();
    let signer = PolicySigner::from_hex(SEED).unwrap();
    std::fs::write(src.join("policy/policy-signing.pub"), signer.public_key_hex()).unwrap();
}

/// Both producers write straight into the publication root; entries are concatenated the
/// way the aggregator would, without its pass/fail gate.
fn produce(root: &Path, sync_third_needle: &'static str) -> TestManifest {
    let unit = TestDefinition {
        test_id: "permission-analyzer-unit",
        source_path: "app/source.test.ts",
        suite: SuiteType::Unit,
        verification_command: "npm test -- permission-analyzer",
        assertions: vec![
            assertion("pa-default-deny", "DEFAULT_DECISION = 'deny'"),
            assertion("pa-entrypoint", "export function analyzePermissions("),
        ],
    };
    let e2e = TestDefinition {
        test_id: "device-sync-e2e",
        source_path: "app/sync.e2e.ts",
        suite: SuiteType::E2e,
        verification_command: "npm run e2e -- device-sync",
        assertions: vec![
            assertion("ds-conflict", "resolveSyncConflict("),
            assertion("ds-replay", "replayQueue("),
            assertion("ds-encrypt", sync_third_needle),
        ],
    };

    let mut entries = Vec::new();
    for (suite, def) in [(SuiteType::Unit, unit), (SuiteType::E2e, e2e)] {
        let opts = ProducerOptions {
            suite,
            source_root: root.join("checkout"),
            bundle_root: root.join("public"),
            tests_dir: "current/tests".into(),
            run_id: "101".into(),
            commit_sha: COMMIT.into(),
            job_name: format!("compliance-{}", suite.as_str()),
            workflow_path: ".github/workflows/compliance.yml".into(),
            job_passed: true,
        };
        entries.extend(run_suite(&[def], &opts).unwrap().manifest.test_evidence);
    }
    TestManifest {
        generated_at: "2026-05-01T10:00:00.000Z".into(),
        test_evidence: entries,
    }
}

fn ingest() -> IngestRecord {
    IngestRecord {
        schema_version: "1.0.0".into(),
        verified_at: "2026-05-01T10:05:00.000Z".into(),
        source: SourceRef {
            repo: "safety-platform/guardian-app".into(),
            git_ref: "refs/heads/main".into(),
            commit_sha: COMMIT.into(),
        },
        environment: "production".into(),
        ci: CiRunRecord {
            run_id: 101,
            artifact_name: "compliance-evidence".into(),
            policy_artifact_name: "policy-bundle".into(),
            head_sha: COMMIT.into(),
            conclusion: "success".into(),
            html_url: "https://github.com/safety-platform/guardian-app/actions/runs/101".into(),
        },
        deploy: DeployRunRecord {
            run_id: 202,
            workflow_name: "Deploy".into(),
            run_number: "17".into(),
            head_sha: COMMIT.into(),
            conclusion: "success".into(),
            html_url: "https://github.com/safety-platform/guardian-app/actions/runs/202".into(),
            jobs: DEFAULT_REQUIRED_DEPLOY_JOBS
                .iter()
                .map(|name| JobRecord {
                    name: name.to_string(),
                    status: "completed".into(),
                    conclusion: Some("success".into()),
                    started_at: Some("2026-05-01T09:50:00Z".into()),
                    completed_at: Some("2026-05-01T09:55:00Z".into()),
                    html_url: None,
                })
                .collect(),
        },
        images: ImageSet {
            api: ImageRef {
                image: "ghcr.io/safety-platform/api".into(),
                digest: "sha256:1111".into(),
            },
            worker: ImageRef {
                image: "ghcr.io/safety-platform/worker".into(),
                digest: "sha256:2222".into(),
            },
        },
        artifacts: vec![],
    }
}

fn inputs(root: &Path, sync_third_needle: &'static str) -> (ComposeInputs, ComposeOptions) {
    write_checkout(root);
    let manifest = produce(root, sync_third_needle);
    let package = PolicyPackage {
        root: root.join("checkout"),
        policy_file: "policy/deploy.rego".into(),
        signature_path: "policy/deploy.rego.sig".into(),
        public_key_path: "policy/policy-signing.pub".into(),
    };
    let provenance = PolicySigner::from_hex(SEED)
        .unwrap()
        .sign(
            &package,
            &sha256_hex(POLICY_INPUT),
            "https://github.com/safety-platform/guardian-app/blob/main/policy/deploy.rego",
            &root.join("public/current/policy/policy-provenance.json"),
        )
        .unwrap();
    let opts = ComposeOptions {
        publication_root: root.join("public"),
        required_test_ids: vec!["permission-analyzer-unit".into(), "device-sync-e2e".into()],
        required_jobs: DEFAULT_REQUIRED_DEPLOY_JOBS.iter().map(|s| s.to_string()).collect(),
    };
    (
        ComposeInputs {
            ingest: ingest(),
            manifest,
            provenance,
        },
        opts,
    )
}

#[test]
fn test_five_passing_assertions_compose_and_publish() {
    let dir = tempdir().unwrap();
    let (inputs, opts) = inputs(dir.path(), "encryptPayload(");
    let (doc, path) = compose_and_publish(&inputs, &opts).unwrap();

    assert_eq!(doc.assertion_summary.total, 5);
    assert_eq!(doc.assertion_summary.passed, 5);
    assert_eq!(doc.assertion_summary.failed, 0);
    let check = doc.checks.iter().find(|c| c.id == "test-assertions").unwrap();
    assert_eq!(check.status, CheckStatus::Passed);
    assert_eq!(doc.verification_commands.len(), 4);

    assert!(path.ends_with("current/evidence.json"));
    assert!(dir.path().join("public/current/schema/evidence.schema.json").is_file());
    let on_disk: evidence_core::EvidenceDocument =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(on_disk, doc);
}

#[test]
fn test_failed_assertion_writes_no_evidence() {
    let dir = tempdir().unwrap();
    let (inputs, opts) = inputs(dir.path(), "uploadWithoutEncryption(");
    let err = compose_and_publish(&inputs, &opts).unwrap_err();
    match err {
        EvidenceError::AssertionFailed { test_id, assertion_id } => {
            assert_eq!(test_id, "device-sync-e2e");
            assert_eq!(assertion_id, "ds-encrypt");
        }
        other => panic!("expected assertion failure, got {other}"),
    }
    assert!(!dir.path().join("public/current/evidence.json").exists());
}

#[test]
fn test_tampered_artifact_is_an_integrity_error() {
    let dir = tempdir().unwrap();
    let (inputs, opts) = inputs(dir.path(), "encryptPayload(");
    let junit = dir.path().join("public/current/tests/permission-analyzer-unit.junit.xml");
    std::fs::write(&junit, "<testsuite/>").unwrap();

    let err = compose(&inputs, &opts).unwrap_err();
    assert_eq!(err.kind(), "integrity");
    let msg = err.to_string();
    assert!(msg.contains("permission-analyzer-unit.junit.xml"));
    assert!(msg.contains("expected=") && msg.contains("actual="));
}

#[test]
fn test_failed_deploy_job_blocks_composition() {
    let dir = tempdir().unwrap();
    let (mut inputs, opts) = inputs(dir.path(), "encryptPayload(");
    inputs.ingest.deploy.jobs[1].conclusion = Some("failure".into());
    assert_eq!(compose(&inputs, &opts).unwrap_err().kind(), "remote-verification");
}

#[test]
fn test_snapshot_twice_keeps_one_index_entry() {
    let dir = tempdir().unwrap();
    let (inputs, opts) = inputs(dir.path(), "encryptPayload(");
    let (mut doc, _) = compose_and_publish(&inputs, &opts).unwrap();
    doc.generated_at = "2026-05-01T10:10:00.000Z".into();

    let first = snapshot(&opts.publication_root, &doc).unwrap();
    let second = snapshot(&opts.publication_root, &doc).unwrap();
    assert_eq!(first.snapshot, "20260501T101000Z-def456def456");
    assert_eq!(first, second);

    let index: HistoryIndex = serde_json::from_slice(
        &std::fs::read(dir.path().join("public/history/index.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(index.snapshots.len(), 1);
    assert!(dir
        .path()
        .join("public/history/20260501T101000Z-def456def456/evidence.json")
        .is_file());

    let mut later = doc.clone();
    later.generated_at = "2026-05-02T08:00:00.000Z".into();
    later.source.commit_sha = "abc123abc123abc123".into();
    snapshot(&opts.publication_root, &later).unwrap();
    let index: HistoryIndex = serde_json::from_slice(
        &std::fs::read(dir.path().join("public/history/index.json")).unwrap(),
    )
    .unwrap();
    let names: Vec<&str> = index.snapshots.iter().map(|s| s.snapshot.as_str()).collect();
    assert_eq!(names, vec!["20260502T080000Z-abc123abc123", "20260501T101000Z-def456def456"]);
}

#[test]
fn test_artifact_outside_publication_root_is_rejected() {
    let dir = tempdir().unwrap();
    let (mut inputs, opts) = inputs(dir.path(), "encryptPayload(");
    let outside = dir.path().join("outside/permission-analyzer-unit.junit.xml");
    std::fs::create_dir_all(outside.parent().unwrap()).unwrap();
    std::fs::write(&outside, "<testsuite/>").unwrap();

    let entry = &mut inputs.manifest.test_evidence[0];
    assert_eq!(entry.test_id, "permission-analyzer-unit");
    let junit = entry
        .artifacts
        .iter_mut()
        .find(|a| a.format == ArtifactFormat::Junit)
        .unwrap();
    junit.path = outside.display().to_string();
    junit.sha256 = sha256_hex(b"<testsuite/>");

    match compose(&inputs, &opts).unwrap_err() {
        EvidenceError::Shape { field, .. } => {
            assert_eq!(field, "permission-analyzer-unit.artifacts.path")
        }
        other => panic!("expected shape error, got {other}"),
    }
}

#[test]
fn test_evidence_from_another_commit_is_an_integrity_error() {
    let dir = tempdir().unwrap();
    let (mut inputs, opts) = inputs(dir.path(), "encryptPayload(");
    let newer = "f".repeat(40);
    inputs.ingest.source.commit_sha = newer.clone();
    inputs.ingest.ci.head_sha = newer.clone();
    inputs.ingest.deploy.head_sha = newer;

    let err = compose_and_publish(&inputs, &opts).unwrap_err();
    assert_eq!(err.kind(), "integrity");
    assert!(err.to_string().contains("permission-analyzer-unit.sourceCommitSha"));
    assert!(!dir.path().join("public/current/evidence.json").exists());

    inputs.ingest = ingest();
    inputs.ingest.ci.run_id = 999;
    let err = compose(&inputs, &opts).unwrap_err();
    assert!(err.to_string().contains("permission-analyzer-unit.runId: expected=999 actual=101"));
}

#[test]
fn test_inputs_load_rechecks_policy_provenance() {
    let dir = tempdir().unwrap();
    let (inputs, _) = inputs(dir.path(), "encryptPayload(");
    let vars: HashMap<String, String> = [
        ("EVIDENCE_PUBLICATION_ROOT", dir.path().join("public")),
        ("EVIDENCE_SOURCE_ROOT", dir.path().join("checkout")),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.display().to_string()))
    .collect();
    let cfg = Config::from_map(&vars).unwrap();
    fsio::write_json_atomic(&cfg.ingest_record_path(), &inputs.ingest).unwrap();
    fsio::write_json_atomic(&cfg.merged_manifest_path(), &inputs.manifest).unwrap();
    std::fs::write(cfg.policy_input_path(), POLICY_INPUT).unwrap();

    let loaded = ComposeInputs::load(&cfg).unwrap();
    assert!(loaded.provenance.verification.checksum_verified);
    assert!(loaded.provenance.verification.signature_verified);
    assert_eq!(loaded.manifest, inputs.manifest);

    std::fs::write(cfg.policy_input_path(), b"policy input, edited after signing").unwrap();
    assert_eq!(ComposeInputs::load(&cfg).unwrap_err().kind(), "integrity");

    std::fs::write(cfg.policy_input_path(), POLICY_INPUT).unwrap();
    let policy = dir.path().join("checkout/policy/deploy.rego");
    std::fs::write(policy, "package deploy\nallow := true\n").unwrap();
    assert_eq!(ComposeInputs::load(&cfg).unwrap_err().kind(), "integrity");
}
