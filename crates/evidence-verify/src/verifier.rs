use std::path::PathBuf;
use std::process::Command;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use evidence_core::cosign::{verification_commands, COSIGN};
use evidence_core::error::{EvidenceError, Result};
use evidence_core::validate::{
    require_passing, require_source_binding, require_test_ids, require_unique_test_ids,
    validate_entry_shape,
};
use evidence_core::{
    sha256_hex, ArtifactFormat, AssertionSummary, EvidenceDocument, TestArtifactDocument,
    TestEvidenceEntry, VerificationCommand,
};

use crate::source::EvidenceSource;
use crate::toolcheck::cosign_available;

pub const EVIDENCE_PATH: &str = "current/evidence.json";
pub const EVIDENCE_SCHEMA_PATH: &str = "current/schema/evidence.schema.json";

/// Built-in schema for per-test JSON artifacts. Stricter than the published one: every
/// assertion must have passed.
pub const TEST_ARTIFACT_SCHEMA: &str = include_str!("../schemas/test-artifact.schema.json");

/// Schema errors reported per document before giving up.
const MAX_SCHEMA_ERRORS: usize = 5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SignatureMode {
    /// Run the cosign commands when cosign can be launched, skip with a warning otherwise.
    #[default]
    Auto,
    Skip,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub tests: usize,
    pub artifacts: usize,
    pub assertions: usize,
    pub signatures_checked: bool,
}

/// Re-checks a published evidence tree using nothing but what was published.
///
/// The published `verificationCommands` are never executed. They are rebuilt from the
/// document's images and repo, must match the published list exactly, and only the
/// rebuilt argv is run, with `cosign` resolved by the verifier.
pub struct PublicVerifier<'a> {
    source: &'a dyn EvidenceSource,
    signatures: SignatureMode,
    cosign: PathBuf,
}

impl<'a> PublicVerifier<'a> {
    pub fn new(source: &'a dyn EvidenceSource) -> Self {
        Self {
            source,
            signatures: SignatureMode::Auto,
            cosign: PathBuf::from(COSIGN),
        }
    }

    /// Uses `program` in place of `cosign` from `$PATH`.
    pub fn with_cosign(mut self, program: impl Into<PathBuf>) -> Self {
        self.cosign = program.into();
        self
    }

    pub fn with_signature_mode(mut self, mode: SignatureMode) -> Self {
        self.signatures = mode;
        self
    }

    pub fn verify(&self) -> Result<VerifyReport> {
        info!(source = %self.source.describe(), "verifying published evidence");

        let raw = self.fetch_json(EVIDENCE_PATH)?;
        let schema = self.fetch_json(EVIDENCE_SCHEMA_PATH)?;
        check_schema(&schema, &raw, EVIDENCE_PATH)?;
        let doc: EvidenceDocument = from_value(raw, EVIDENCE_PATH)?;
        check_document(&doc)?;

        let artifact_schema: Value = serde_json::from_str(TEST_ARTIFACT_SCHEMA)
            .map_err(|e| EvidenceError::json("built-in test artifact schema", e))?;
        let mut artifacts = 0;
        for entry in &doc.tests.evidence {
            artifacts += self.check_artifacts(entry, &artifact_schema)?;
        }

        check_summary(&doc)?;

        let commands = verification_commands(&doc.images, &doc.source.repo);
        check_commands(&doc.verification_commands, &commands)?;

        let signatures_checked = match self.signatures {
            SignatureMode::Skip => {
                debug!("signature re-verification disabled");
                false
            }
            SignatureMode::Auto if cosign_available(&self.cosign) => {
                for cmd in &commands {
                    self.run_cosign(cmd)?;
                }
                true
            }
            SignatureMode::Auto => {
                warn!(
                    cosign = %self.cosign.display(),
                    "cosign not found; skipping image signature verification"
                );
                false
            }
        };

        let report = VerifyReport {
            tests: doc.tests.evidence.len(),
            artifacts,
            assertions: doc.assertion_summary.total,
            signatures_checked,
        };
        info!(
            tests = report.tests,
            artifacts = report.artifacts,
            assertions = report.assertions,
            signatures = report.signatures_checked,
            "published evidence verified"
        );
        Ok(report)
    }

    /// Runs a rebuilt command with its `cosign` argv[0] replaced by the configured program.
    fn run_cosign(&self, cmd: &VerificationCommand) -> Result<()> {
        let args = cmd.argv.get(1..).ok_or_else(|| {
            EvidenceError::shape(format!("verificationCommands.{}.argv", cmd.id), "is empty")
        })?;
        info!(id = %cmd.id, "running verification command");
        let status = Command::new(&self.cosign).args(args).status().map_err(|e| {
            let program = self.cosign.display();
            EvidenceError::signature(format!("{}: failed to launch {program}: {e}", cmd.id))
        })?;
        if !status.success() {
            return Err(EvidenceError::signature(format!("{} exited with {status}", cmd.id)));
        }
        Ok(())
    }

    fn fetch_json(&self, rel_path: &str) -> Result<Value> {
        let bytes = self.source.fetch(rel_path)?;
        serde_json::from_slice(&bytes).map_err(|e| EvidenceError::shape(rel_path, e.to_string()))
    }

    fn check_artifacts(&self, entry: &TestEvidenceEntry, artifact_schema: &Value) -> Result<usize> {
        for artifact in &entry.artifacts {
            let bytes = self.source.fetch(&artifact.path)?;
            let actual = sha256_hex(&bytes);
            if actual != artifact.sha256 {
                return Err(EvidenceError::integrity(&artifact.path, &artifact.sha256, actual));
            }
            if artifact.format != ArtifactFormat::Json {
                continue;
            }

            let value: Value =
                serde_json::from_slice(&bytes).map_err(|e| {
                    EvidenceError::shape(&artifact.path, e.to_string())
                })?;
            check_schema(artifact_schema, &value, &artifact.path)?;
            let doc: TestArtifactDocument = from_value(value, &artifact.path)?;
            if doc.test_id != entry.test_id {
                return Err(EvidenceError::integrity(
                    format!("{}:testId", artifact.path),
                    &entry.test_id,
                    &doc.test_id,
                ));
            }
            if let Some(failed) = doc.assertions.iter().find(|a| !a.status.is_passed()) {
                return Err(EvidenceError::AssertionFailed {
                    test_id: doc.test_id.clone(),
                    assertion_id: failed.assertion_id.clone(),
                });
            }
            debug!(path = %artifact.path, "artifact verified");
        }
        Ok(entry.artifacts.len())
    }
}

fn from_value<T: DeserializeOwned>(value: Value, subject: &str) -> Result<T> {
    serde_json::from_value(value).map_err(|e| EvidenceError::shape(subject, e.to_string()))
}

/// Validates `instance` against `schema`, with `format` keywords enforced.
pub fn check_schema(schema: &Value, instance: &Value, subject: &str) -> Result<()> {
    let validator = jsonschema::options()
        .should_validate_formats(true)
        .build(schema)
        .map_err(|e| EvidenceError::shape(format!("{subject} schema"), e.to_string()))?;
    let errors: Vec<String> = validator
        .iter_errors(instance)
        .take(MAX_SCHEMA_ERRORS)
        .map(|e| e.to_string())
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(EvidenceError::shape(subject, errors.join("; ")))
    }
}

fn check_document(doc: &EvidenceDocument) -> Result<()> {
    let entries = &doc.tests.evidence;
    require_unique_test_ids(entries)?;
    for entry in entries {
        validate_entry_shape(entry)?;
        require_passing(entry)?;
    }
    require_test_ids(entries, &doc.tests.required_test_ids)?;
    require_source_binding(entries, &doc.source.commit_sha, doc.ci.run_id)
}

/// The published commands must be exactly the ones derived from the published images.
fn check_commands(
    published: &[VerificationCommand],
    expected: &[VerificationCommand],
) -> Result<()> {
    if published.len() != expected.len() {
        return Err(EvidenceError::integrity(
            "verificationCommands",
            format!("{} commands", expected.len()),
            format!("{} commands", published.len()),
        ));
    }
    for (published, expected) in published.iter().zip(expected) {
        if published != expected {
            return Err(EvidenceError::integrity(
                format!("verificationCommands.{}", expected.id),
                &expected.command,
                &published.command,
            ));
        }
    }
    Ok(())
}

fn check_summary(doc: &EvidenceDocument) -> Result<()> {
    let summary = &doc.assertion_summary;
    if summary.passed > summary.total {
        return Err(EvidenceError::integrity(
            "assertionSummary",
            format!("passed <= total ({})", summary.total),
            format!("passed={}", summary.passed),
        ));
    }
    if summary.failed != 0 {
        return Err(EvidenceError::integrity("assertionSummary.failed", 0, summary.failed));
    }
    let recomputed = AssertionSummary::from_entries(&doc.tests.evidence);
    if &recomputed != summary {
        return Err(EvidenceError::integrity(
            "assertionSummary",
            format!(
                "total={} passed={} failed={}",
                recomputed.total, recomputed.passed, recomputed.failed
            ),
            format!("total={} passed={} failed={}", summary.total, summary.passed, summary.failed),
        ));
    }
    Ok(())
}
