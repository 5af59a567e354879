use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{info, warn};

use evidence_core::error::{EvidenceError, Result};
use evidence_core::cosign::verification_commands;
use evidence_core::validate::{
    require_passing, require_source_binding, require_successful_deploy, require_test_ids,
    require_unique_test_ids, validate_entry_shape,
};
use evidence_core::{
    fsio, sha256_file, time, ArtifactFormat, AssertionSummary, CheckStatus, Config, EvidenceCheck,
    EvidenceDocument, IngestRecord, PolicyProvenance, TestEvidenceEntry, TestManifest, TestsSection,
    EVIDENCE_SCHEMA_VERSION,
};
use evidence_policy::provenance;

use crate::schema::publish_schema;

#[derive(Clone, Debug)]
pub struct ComposeOptions {
    /// Artifact paths in the manifest are relative to this root.
    pub publication_root: PathBuf,
    pub required_test_ids: Vec<String>,
    pub required_jobs: Vec<String>,
}

impl ComposeOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            publication_root: cfg.publication_root(),
            required_test_ids: cfg.requirements.test_ids.clone(),
            required_jobs: cfg.requirements.deploy_jobs.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ComposeInputs {
    pub ingest: IngestRecord,
    pub manifest: TestManifest,
    pub provenance: PolicyProvenance,
}

impl ComposeInputs {
    /// Reads the ingest record, merged manifest and provenance record from their
    /// configured locations, then re-checks the provenance against the policy package
    /// under the source root and the policy input it claims to cover.
    pub fn load(cfg: &Config) -> Result<Self> {
        let mut record = provenance::load(&cfg.provenance_path())?;
        record.verification = provenance::confirm(&record, &cfg.source_root())?;
        provenance::confirm_input(&record, &cfg.policy_input_path())?;
        Ok(Self {
            ingest: fsio::read_json(&cfg.ingest_record_path())?,
            manifest: fsio::read_json(&cfg.merged_manifest_path())?,
            provenance: record,
        })
    }
}

/// Builds the evidence document. Nothing is written; see [`publish`].
pub fn compose(inputs: &ComposeInputs, opts: &ComposeOptions) -> Result<EvidenceDocument> {
    require_successful_deploy(&inputs.ingest, &opts.required_jobs)?;
    provenance::validate(&inputs.provenance)?;

    let entries = &inputs.manifest.test_evidence;
    require_unique_test_ids(entries)?;
    for entry in entries {
        validate_entry_shape(entry)?;
    }
    require_test_ids(entries, &opts.required_test_ids)?;
    require_source_binding(entries, &inputs.ingest.source.commit_sha, inputs.ingest.ci.run_id)?;

    let summary = AssertionSummary::from_entries(entries);
    if summary.failed > 0 {
        warn!(
            failed = summary.failed,
            total = summary.total,
            "assertions failed; refusing to compose"
        );
    }
    for entry in entries {
        require_passing(entry)?;
    }

    for entry in entries {
        check_artifacts(entry, &opts.publication_root)?;
    }

    let checks = vec![
        deploy_jobs_check(&inputs.ingest, &opts.required_jobs),
        assertions_check(&summary),
    ];

    let doc = EvidenceDocument {
        schema_version: EVIDENCE_SCHEMA_VERSION.to_string(),
        generated_at: time::now_rfc3339(),
        source: inputs.ingest.source.clone(),
        environment: inputs.ingest.environment.clone(),
        ci: inputs.ingest.ci.clone(),
        deploy: inputs.ingest.deploy.clone(),
        images: inputs.ingest.images.clone(),
        tests: TestsSection {
            required_test_ids: opts.required_test_ids.clone(),
            evidence: entries.clone(),
        },
        assertion_summary: summary,
        policy: inputs.provenance.clone(),
        checks,
        verification_commands: verification_commands(
            &inputs.ingest.images,
            &inputs.ingest.source.repo,
        ),
    };
    info!(
        tests = doc.tests.evidence.len(),
        assertions = doc.assertion_summary.total,
        commit = %doc.source.commit_sha,
        "composed evidence document"
    );
    Ok(doc)
}

/// Rehashes every artifact and, for JSON artifacts, checks the embedded test id and result.
fn check_artifacts(entry: &TestEvidenceEntry, publication_root: &Path) -> Result<()> {
    for artifact in &entry.artifacts {
        let path = publication_root.join(&artifact.path);
        let actual = sha256_file(&path)?;
        if actual != artifact.sha256 {
            return Err(EvidenceError::integrity(&artifact.path, &artifact.sha256, actual));
        }
        if artifact.format != ArtifactFormat::Json {
            continue;
        }
        let doc: Value = fsio::read_json(&path)?;
        let embedded_id = doc.get("testId").and_then(Value::as_str).unwrap_or_default();
        if embedded_id != entry.test_id {
            return Err(EvidenceError::integrity(
                format!("{}:testId", artifact.path),
                &entry.test_id,
                embedded_id,
            ));
        }
        let embedded_result = doc.get("result").and_then(Value::as_str).unwrap_or_default();
        if embedded_result != entry.result.as_str() {
            return Err(EvidenceError::integrity(
                format!("{}:result", artifact.path),
                entry.result.as_str(),
                embedded_result,
            ));
        }
    }
    Ok(())
}

fn deploy_jobs_check(ingest: &IngestRecord, required_jobs: &[String]) -> EvidenceCheck {
    let actual = required_jobs
        .iter()
        .map(|name| {
            let conclusion = ingest
                .deploy
                .jobs
                .iter()
                .find(|j| &j.name == name)
                .and_then(|j| j.conclusion.as_deref())
                .unwrap_or("missing");
            format!("{name}={conclusion}")
        })
        .collect::<Vec<_>>()
        .join(", ");
    EvidenceCheck {
        id: "deploy-required-jobs".to_string(),
        name: "Required deploy jobs concluded successfully".to_string(),
        status: CheckStatus::Passed,
        expected: "every required job concluded success".to_string(),
        actual,
    }
}

fn assertions_check(summary: &AssertionSummary) -> EvidenceCheck {
    EvidenceCheck {
        id: "test-assertions".to_string(),
        name: "All test assertions passed".to_string(),
        status: if summary.failed == 0 {
            CheckStatus::Passed
        } else {
            CheckStatus::Failed
        },
        expected: "failed == 0".to_string(),
        actual: format!(
            "total={} passed={} failed={}",
            summary.total, summary.passed, summary.failed
        ),
    }
}

/// Writes `current/evidence.json` atomically and the schema beside it.
pub fn publish(doc: &EvidenceDocument, publication_root: &Path) -> Result<PathBuf> {
    let current = publication_root.join("current");
    let path = current.join("evidence.json");
    publish_schema(&current)?;
    fsio::write_json_atomic(&path, doc)?;
    info!(path = %path.display(), "published evidence");
    Ok(path)
}

/// Composes and, only if every check holds, publishes.
pub fn compose_and_publish(
    inputs: &ComposeInputs,
    opts: &ComposeOptions,
) -> Result<(EvidenceDocument, PathBuf)> {
    let doc = compose(inputs, opts)?;
    let path = publish(&doc, &opts.publication_root)?;
    Ok((doc, path))
}
