use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use evidence_core::error::Result;
use evidence_core::{
    fsio, sha256_hex, time, AssertionSummary, CiRunRecord, ImageSet, IngestRecord, SourceRef,
    TestManifest, POLICY_INPUT_SCHEMA_VERSION,
};

/// The document handed to the external policy engine.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyInput {
    pub schema_version: String,
    pub generated_at: String,
    pub source: SourceRef,
    pub environment: String,
    pub ci: CiRunRecord,
    pub deploy: PolicyDeploy,
    pub images: ImageSet,
    pub tests: PolicyTests,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDeploy {
    pub run_id: u64,
    pub conclusion: String,
    pub required_jobs: Vec<RequiredJobStatus>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequiredJobStatus {
    pub name: String,
    /// `None` when the job is absent from the deploy run.
    pub conclusion: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTests {
    pub required_test_ids: Vec<String>,
    pub present_test_ids: Vec<String>,
    pub assertion_summary: AssertionSummary,
}

/// Collects facts only; pass/fail decisions belong to the policy engine.
pub fn build_policy_input(
    ingest: &IngestRecord,
    manifest: &TestManifest,
    required_test_ids: &[String],
    required_jobs: &[String],
) -> PolicyInput {
    let required_jobs = required_jobs
        .iter()
        .map(|name| RequiredJobStatus {
            name: name.clone(),
            conclusion: ingest
                .deploy
                .jobs
                .iter()
                .find(|j| &j.name == name)
                .and_then(|j| j.conclusion.clone()),
        })
        .collect();

    let mut present: Vec<String> =
        manifest.test_evidence.iter().map(|e| e.test_id.clone()).collect();
    present.sort();
    present.dedup();

    PolicyInput {
        schema_version: POLICY_INPUT_SCHEMA_VERSION.to_string(),
        generated_at: time::now_rfc3339(),
        source: ingest.source.clone(),
        environment: ingest.environment.clone(),
        ci: ingest.ci.clone(),
        deploy: PolicyDeploy {
            run_id: ingest.deploy.run_id,
            conclusion: ingest.deploy.conclusion.clone(),
            required_jobs,
        },
        images: ingest.images.clone(),
        tests: PolicyTests {
            required_test_ids: required_test_ids.to_vec(),
            present_test_ids: present,
            assertion_summary: AssertionSummary::from_entries(&manifest.test_evidence),
        },
    }
}

/// Writes the input and returns the SHA-256 of the exact bytes written.
pub fn write_policy_input(path: &Path, input: &PolicyInput) -> Result<String> {
    let bytes = fsio::to_pretty_bytes(input)?;
    fsio::write_bytes(path, &bytes)?;
    let digest = sha256_hex(&bytes);
    info!(path = %path.display(), sha256 = %digest, "wrote policy input");
    Ok(digest)
}
