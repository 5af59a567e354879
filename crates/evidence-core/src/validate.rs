//! Structural rules for test evidence, shared by the aggregator and the composer so
//! neither has to trust that the other already ran.

use std::collections::HashSet;
use std::path::{Component, Path};

use crate::error::{EvidenceError, RemoteViolation, Result, RunKind};
use crate::hashing::is_sha256_hex;
use crate::model::{
    ArtifactFormat, IngestRecord, JobRecord, TestArtifact, TestEvidenceEntry, TestStatus,
};
use crate::time::parse_timestamp;

fn require_non_empty(test_id: &str, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        let field = if test_id.is_empty() {
            field.to_string()
        } else {
            format!("{test_id}.{field}")
        };
        return Err(EvidenceError::shape(field, "must be a non-empty string"));
    }
    Ok(())
}

/// Artifact paths are joined onto a root directory, so they must stay below it:
/// forward slashes only, no root, no `.`/`..`, and the file named after the test.
fn check_artifact_path(test_id: &str, artifact: &TestArtifact) -> Result<()> {
    let field = format!("{test_id}.artifacts.path");
    let path = artifact.path.as_str();
    if path.contains('\\') || path.contains("//") || path.ends_with('/') {
        return Err(EvidenceError::shape(
            field,
            format!("`{path}` is not a forward-slash relative path"),
        ));
    }
    if !Path::new(path).components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(EvidenceError::shape(field, format!("`{path}` escapes the publication root")));
    }
    let expected_name = match artifact.format {
        ArtifactFormat::Json => format!("{test_id}.json"),
        ArtifactFormat::Junit => format!("{test_id}.junit.xml"),
    };
    let file_name = path.rsplit('/').next().unwrap_or(path);
    if file_name != expected_name {
        return Err(EvidenceError::shape(
            field,
            format!("`{path}` must be named `{expected_name}`"),
        ));
    }
    Ok(())
}

/// Shape checks only: required strings, timestamps, non-empty arrays, unique assertion ids.
/// Pass/fail policy lives in [`require_passing`].
pub fn validate_entry_shape(entry: &TestEvidenceEntry) -> Result<()> {
    require_non_empty("", "testId", &entry.test_id)?;
    let id = entry.test_id.as_str();
    for (field, value) in [
        ("sourcePath", &entry.source_path),
        ("workflowPath", &entry.workflow_path),
        ("runId", &entry.run_id),
        ("jobName", &entry.job_name),
        ("sourceCommitSha", &entry.source_commit_sha),
        ("executedAt", &entry.executed_at),
        ("verificationCommand", &entry.verification_command),
    ] {
        require_non_empty(id, field, value)?;
    }
    parse_timestamp(&format!("{id}.executedAt"), &entry.executed_at)?;

    if entry.assertions.is_empty() {
        return Err(EvidenceError::completeness(format!("test `{id}` has no assertions")));
    }
    if entry.artifacts.is_empty() {
        return Err(EvidenceError::completeness(format!("test `{id}` has no artifacts")));
    }

    for artifact in &entry.artifacts {
        require_non_empty(id, "artifacts.path", &artifact.path)?;
        check_artifact_path(id, artifact)?;
        if !is_sha256_hex(&artifact.sha256) {
            return Err(EvidenceError::shape(
                format!("{id}.artifacts.sha256"),
                format!("`{}` is not a lowercase sha256 hex digest", artifact.sha256),
            ));
        }
    }

    let mut seen = HashSet::new();
    for assertion in &entry.assertions {
        require_non_empty(id, "assertions.assertionId", &assertion.assertion_id)?;
        let aid = assertion.assertion_id.as_str();
        for (field, value) in [
            ("name", &assertion.name),
            ("filePath", &assertion.file_path),
            ("matcher", &assertion.matcher),
            ("expected", &assertion.expected),
            ("verifiedAt", &assertion.verified_at),
        ] {
            require_non_empty(id, &format!("assertions.{aid}.{field}"), value)?;
        }
        parse_timestamp(&format!("{id}.assertions.{aid}.verifiedAt"), &assertion.verified_at)?;
        if !seen.insert(aid) {
            return Err(EvidenceError::duplicate("assertionId", format!("{id}/{aid}")));
        }
    }
    Ok(())
}

/// Fails on the first failed assertion, then on a failed result with all assertions passing
/// (the job-level outcome forced it).
pub fn require_passing(entry: &TestEvidenceEntry) -> Result<()> {
    if let Some(failed) = entry.assertions.iter().find(|a| a.status == TestStatus::Failed) {
        return Err(EvidenceError::AssertionFailed {
            test_id: entry.test_id.clone(),
            assertion_id: failed.assertion_id.clone(),
        });
    }
    if entry.result != TestStatus::Passed {
        return Err(EvidenceError::TestFailed {
            test_id: entry.test_id.clone(),
        });
    }
    Ok(())
}

pub fn require_unique_test_ids(entries: &[TestEvidenceEntry]) -> Result<()> {
    let mut seen = HashSet::new();
    for entry in entries {
        if !seen.insert(entry.test_id.as_str()) {
            return Err(EvidenceError::duplicate("testId", entry.test_id.clone()));
        }
    }
    Ok(())
}

/// Every required id must be present; the error names the first missing one.
pub fn require_test_ids(entries: &[TestEvidenceEntry], required: &[String]) -> Result<()> {
    let present: HashSet<&str> = entries.iter().map(|e| e.test_id.as_str()).collect();
    let missing: Vec<&str> = required
        .iter()
        .map(String::as_str)
        .filter(|id| !present.contains(id))
        .collect();
    if !missing.is_empty() {
        return Err(EvidenceError::completeness(format!(
            "required test ids missing: {}",
            missing.join(", ")
        )));
    }
    Ok(())
}

/// Every required job must be present and concluded `success`. Returns all violations.
pub fn job_violations(jobs: &[JobRecord], required: &[String]) -> Vec<RemoteViolation> {
    let mut violations = Vec::new();
    for name in required {
        match jobs.iter().find(|j| &j.name == name) {
            None => violations.push(RemoteViolation::RequiredJobMissing { job: name.clone() }),
            Some(job) if !job.succeeded() => violations.push(RemoteViolation::RequiredJobFailed {
                job: name.clone(),
                conclusion: job.conclusion.clone().unwrap_or_else(|| job.status.clone()),
            }),
            Some(_) => {}
        }
    }
    violations
}

/// Every entry must have been produced for the verified commit by the verified CI run.
pub fn require_source_binding(
    entries: &[TestEvidenceEntry],
    commit_sha: &str,
    ci_run_id: u64,
) -> Result<()> {
    let run_id = ci_run_id.to_string();
    for entry in entries {
        if entry.source_commit_sha != commit_sha {
            return Err(EvidenceError::integrity(
                format!("{}.sourceCommitSha", entry.test_id),
                commit_sha,
                &entry.source_commit_sha,
            ));
        }
        if entry.run_id != run_id {
            return Err(EvidenceError::integrity(
                format!("{}.runId", entry.test_id),
                &run_id,
                &entry.run_id,
            ));
        }
    }
    Ok(())
}

/// Re-checks an ingest record read back from disk: successful deploy, every required job green.
pub fn require_successful_deploy(record: &IngestRecord, required_jobs: &[String]) -> Result<()> {
    let mut violations = Vec::new();
    if record.deploy.conclusion != "success" {
        violations.push(RemoteViolation::RunNotSuccessful {
            run: RunKind::Deploy,
            conclusion: record.deploy.conclusion.clone(),
        });
    }
    violations.extend(job_violations(&record.deploy.jobs, required_jobs));
    if violations.is_empty() {
        Ok(())
    } else {
        Err(EvidenceError::RemoteVerification { violations })
    }
}
