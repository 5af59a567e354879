use serde::{Deserialize, Serialize};

pub const EVIDENCE_SCHEMA_VERSION: &str = "1.0.0";
pub const INGEST_SCHEMA_VERSION: &str = "1.0.0";
pub const ARTIFACT_SCHEMA_VERSION: &str = "1.0.0";
pub const POLICY_INPUT_SCHEMA_VERSION: &str = "1.0.0";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SuiteType {
    Unit,
    E2e,
}

impl SuiteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuiteType::Unit => "unit",
            SuiteType::E2e => "e2e",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
}

impl TestStatus {
    pub fn from_passed(passed: bool) -> Self {
        if passed {
            TestStatus::Passed
        } else {
            TestStatus::Failed
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, TestStatus::Passed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatcherType {
    Includes,
    Regex,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    Json,
    Junit,
}

/// An evaluated assertion, as recorded in manifests and test artifacts.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestAssertion {
    pub assertion_id: String,
    pub name: String,
    pub file_path: String,
    pub matcher_type: MatcherType,
    pub matcher: String,
    pub expected: String,
    pub status: TestStatus,
    pub actual: String,
    pub verified_at: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestArtifact {
    pub format: ArtifactFormat,
    pub path: String,
    pub sha256: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestEvidenceEntry {
    pub test_id: String,
    pub source_path: String,
    pub suite_type: SuiteType,
    pub result: TestStatus,
    pub workflow_path: String,
    pub run_id: String,
    pub job_name: String,
    pub source_commit_sha: String,
    pub executed_at: String,
    pub artifacts: Vec<TestArtifact>,
    pub verification_command: String,
    pub assertions: Vec<TestAssertion>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestManifest {
    pub generated_at: String,
    pub test_evidence: Vec<TestEvidenceEntry>,
}

/// The sanitized per-test JSON artifact written next to the JUnit report.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestArtifactDocument {
    pub schema_version: String,
    pub test_id: String,
    pub suite_type: SuiteType,
    pub result: TestStatus,
    pub source_path: String,
    pub source_commit_sha: String,
    pub run_id: String,
    pub job_name: String,
    pub workflow_path: String,
    pub executed_at: String,
    pub assertions: Vec<TestAssertion>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestAssertionCounts {
    pub test_id: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AssertionSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub by_test: Vec<TestAssertionCounts>,
}

impl AssertionSummary {
    /// Single pass over every assertion of every entry.
    pub fn from_entries(entries: &[TestEvidenceEntry]) -> Self {
        let mut summary = AssertionSummary::default();
        for entry in entries {
            let mut counts = TestAssertionCounts {
                test_id: entry.test_id.clone(),
                ..Default::default()
            };
            for assertion in &entry.assertions {
                counts.total += 1;
                if assertion.status.is_passed() {
                    counts.passed += 1;
                } else {
                    counts.failed += 1;
                }
            }
            summary.total += counts.total;
            summary.passed += counts.passed;
            summary.failed += counts.failed;
            summary.by_test.push(counts);
        }
        summary
    }
}

// ---------------------------------------------------------------------------
// Dispatch + ingest
// ---------------------------------------------------------------------------

/// Canonical (flat) dispatch payload announcing a finished deploy.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DispatchPayload {
    pub source_repo: String,
    pub source_ref: String,
    pub source_commit_sha: String,
    pub environment: String,
    pub ci_run_id: String,
    pub ci_artifact_name: String,
    pub policy_artifact_name: String,
    pub deploy_run_id: String,
    pub deploy_workflow_name: String,
    pub deploy_run_number: String,
    pub api_image: String,
    pub api_digest: String,
    pub worker_image: String,
    pub worker_digest: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub repo: String,
    #[serde(rename = "ref")]
    pub git_ref: String,
    pub commit_sha: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CiRunRecord {
    pub run_id: u64,
    pub artifact_name: String,
    pub policy_artifact_name: String,
    pub head_sha: String,
    pub conclusion: String,
    pub html_url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

impl JobRecord {
    pub fn succeeded(&self) -> bool {
        self.conclusion.as_deref() == Some("success")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeployRunRecord {
    pub run_id: u64,
    pub workflow_name: String,
    pub run_number: String,
    pub head_sha: String,
    pub conclusion: String,
    pub html_url: String,
    pub jobs: Vec<JobRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    pub image: String,
    pub digest: String,
}

impl ImageRef {
    /// `image@digest`, the immutable reference handed to the signing tool.
    pub fn pinned(&self) -> String {
        format!("{}@{}", self.image, self.digest)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageSet {
    pub api: ImageRef,
    pub worker: ImageRef,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RunArtifactRecord {
    pub name: String,
    pub id: u64,
    pub expired: bool,
    pub size_in_bytes: u64,
}

/// Verified view of a dispatch payload plus live CI platform state.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IngestRecord {
    pub schema_version: String,
    pub verified_at: String,
    pub source: SourceRef,
    pub environment: String,
    pub ci: CiRunRecord,
    pub deploy: DeployRunRecord,
    pub images: ImageSet,
    pub artifacts: Vec<RunArtifactRecord>,
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyFileRef {
    pub file_path: String,
    pub sha256: String,
    pub signature_path: String,
    pub public_key_path: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceVerification {
    pub checksum_verified: bool,
    pub signature_verified: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyProvenance {
    pub version: String,
    pub policy: PolicyFileRef,
    pub policy_input_sha256: String,
    pub source_url: String,
    pub verification: ProvenanceVerification,
}

// ---------------------------------------------------------------------------
// Evidence document
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Passed,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceCheck {
    pub id: String,
    pub name: String,
    pub status: CheckStatus,
    pub expected: String,
    pub actual: String,
}

/// An externally executable command a consumer can run to re-check signatures.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationCommand {
    pub id: String,
    pub description: String,
    pub command: String,
    pub argv: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TestsSection {
    pub required_test_ids: Vec<String>,
    pub evidence: Vec<TestEvidenceEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceDocument {
    pub schema_version: String,
    pub generated_at: String,
    pub source: SourceRef,
    pub environment: String,
    pub ci: CiRunRecord,
    pub deploy: DeployRunRecord,
    pub images: ImageSet,
    pub tests: TestsSection,
    pub assertion_summary: AssertionSummary,
    pub policy: PolicyProvenance,
    pub checks: Vec<EvidenceCheck>,
    pub verification_commands: Vec<VerificationCommand>,
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub snapshot: String,
    pub generated_at: String,
    pub source_ref: String,
    pub source_commit_sha: String,
    pub ci_run_id: u64,
    pub deploy_run_id: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryIndex {
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub snapshots: Vec<HistoryEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assertion(id: &str, status: TestStatus) -> TestAssertion {
        TestAssertion {
            assertion_id: id.into(),
            name: id.into(),
            file_path: "src/a.ts".into(),
            matcher_type: MatcherType::Includes,
            matcher: "x".into(),
            expected: "contains x".into(),
            status,
            actual: "found".into(),
            verified_at: "2026-01-01T00:00:00Z".into(),
        }
    }

    fn entry(id: &str, assertions: Vec<TestAssertion>) -> TestEvidenceEntry {
        TestEvidenceEntry {
            test_id: id.into(),
            source_path: "src/a.test.ts".into(),
            suite_type: SuiteType::Unit,
            result: TestStatus::Passed,
            workflow_path: ".github/workflows/compliance-unit.yml".into(),
            run_id: "1".into(),
            job_name: "unit".into(),
            source_commit_sha: "abc".into(),
            executed_at: "2026-01-01T00:00:00Z".into(),
            artifacts: vec![],
            verification_command: "npm test".into(),
            assertions,
        }
    }

    #[test]
    fn summary_counts_per_test_and_total() {
        let entries = vec![
            entry(
                "a",
                vec![assertion("1", TestStatus::Passed), assertion("2", TestStatus::Passed)],
            ),
            entry(
                "b",
                vec![assertion("1", TestStatus::Passed), assertion("2", TestStatus::Failed)],
            ),
        ];
        let summary = AssertionSummary::from_entries(&entries);
        assert_eq!((summary.total, summary.passed, summary.failed), (4, 3, 1));
        assert_eq!(summary.by_test[1].test_id, "b");
        assert_eq!(summary.by_test[1].failed, 1);
    }

    #[test]
    fn enums_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&SuiteType::E2e).unwrap(), "\"e2e\"");
        assert_eq!(serde_json::to_string(&ArtifactFormat::Junit).unwrap(), "\"junit\"");
        let src: SourceRef =
            serde_json::from_str(r#"{"repo":"o/r","ref":"main","commitSha":"abc"}"#).unwrap();
        assert_eq!(src.git_ref, "main");
    }
}
