//! Dispatch payload parsing.
//!
//! The canonical shape is a flat camelCase object. The older nested shape
//! (`source`/`ci`/`deploy`/`images`) is still emitted by some senders and is
//! normalized into the flat one on read.

use std::path::Path;

use serde_json::{Map, Value};
use tracing::info;

use evidence_core::error::{EvidenceError, Result};
use evidence_core::{fsio, DispatchPayload};

const FLAT_FIELDS: [&str; 14] = [
    "sourceRepo",
    "sourceRef",
    "sourceCommitSha",
    "environment",
    "ciRunId",
    "ciArtifactName",
    "policyArtifactName",
    "deployRunId",
    "deployWorkflowName",
    "deployRunNumber",
    "apiImage",
    "apiDigest",
    "workerImage",
    "workerDigest",
];

/// The only fields senders may emit as JSON numbers, in both shapes.
const NUMERIC_FIELDS: [&str; 6] = [
    "ciRunId",
    "deployRunId",
    "deployRunNumber",
    "ci.runId",
    "deploy.runId",
    "deploy.runNumber",
];

pub fn load_payload(path: &Path) -> Result<DispatchPayload> {
    let bytes = fsio::read_bytes(path)?;
    parse_payload(&bytes)
}

pub fn parse_payload(bytes: &[u8]) -> Result<DispatchPayload> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| EvidenceError::shape("payload", e.to_string()))?;
    let payload = normalize(&value)?;
    validate_payload(&payload)?;
    Ok(payload)
}

/// Maps either accepted shape to the flat one. Numeric run ids and run numbers are
/// stringified.
pub fn normalize(value: &Value) -> Result<DispatchPayload> {
    let obj = value
        .as_object()
        .ok_or_else(|| EvidenceError::shape("payload", "must be a JSON object"))?;

    if obj.contains_key("sourceRepo") {
        return from_flat(obj);
    }
    if obj.get("source").is_some_and(Value::is_object) {
        info!("normalizing nested dispatch payload to flat shape");
        return from_nested(value);
    }
    Err(EvidenceError::shape(
        "sourceRepo",
        "missing (neither flat nor nested payload shape recognized)",
    ))
}

fn scalar(field: &str, value: Option<&Value>) -> Result<String> {
    match value {
        None | Some(Value::Null) => Err(EvidenceError::shape(field, "missing")),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) if NUMERIC_FIELDS.contains(&field) => Ok(n.to_string()),
        Some(other) => Err(EvidenceError::shape(
            field,
            format!("expected string, got {}", type_name(other)),
        )),
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn from_flat(obj: &Map<String, Value>) -> Result<DispatchPayload> {
    let get = |key: &str| scalar(key, obj.get(key));
    Ok(DispatchPayload {
        source_repo: get("sourceRepo")?,
        source_ref: get("sourceRef")?,
        source_commit_sha: get("sourceCommitSha")?,
        environment: get("environment")?,
        ci_run_id: get("ciRunId")?,
        ci_artifact_name: get("ciArtifactName")?,
        policy_artifact_name: get("policyArtifactName")?,
        deploy_run_id: get("deployRunId")?,
        deploy_workflow_name: get("deployWorkflowName")?,
        deploy_run_number: get("deployRunNumber")?,
        api_image: get("apiImage")?,
        api_digest: get("apiDigest")?,
        worker_image: get("workerImage")?,
        worker_digest: get("workerDigest")?,
    })
}

fn from_nested(root: &Value) -> Result<DispatchPayload> {
    // Dotted path lookup; the dotted path doubles as the error field name.
    let get = |path: &str| {
        let mut cur = Some(root);
        for part in path.split('.') {
            cur = cur.and_then(|v| v.get(part));
        }
        scalar(path, cur)
    };
    Ok(DispatchPayload {
        source_repo: get("source.repo")?,
        source_ref: get("source.ref")?,
        source_commit_sha: get("source.commitSha")?,
        environment: get("environment")?,
        ci_run_id: get("ci.runId")?,
        ci_artifact_name: get("ci.artifactName")?,
        policy_artifact_name: get("ci.policyArtifactName")?,
        deploy_run_id: get("deploy.runId")?,
        deploy_workflow_name: get("deploy.workflowName")?,
        deploy_run_number: get("deploy.runNumber")?,
        api_image: get("images.api.image")?,
        api_digest: get("images.api.digest")?,
        worker_image: get("images.worker.image")?,
        worker_digest: get("images.worker.digest")?,
    })
}

/// Positive integer run id.
pub fn parse_run_id(field: &str, value: &str) -> Result<u64> {
    match value.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(EvidenceError::shape(field, format!("`{value}` is not a positive integer"))),
    }
}

pub fn validate_payload(p: &DispatchPayload) -> Result<()> {
    let values = [
        &p.source_repo,
        &p.source_ref,
        &p.source_commit_sha,
        &p.environment,
        &p.ci_run_id,
        &p.ci_artifact_name,
        &p.policy_artifact_name,
        &p.deploy_run_id,
        &p.deploy_workflow_name,
        &p.deploy_run_number,
        &p.api_image,
        &p.api_digest,
        &p.worker_image,
        &p.worker_digest,
    ];
    for (field, value) in FLAT_FIELDS.iter().zip(values) {
        if value.trim().is_empty() {
            return Err(EvidenceError::shape(*field, "must be a non-empty string"));
        }
    }
    parse_run_id("ciRunId", &p.ci_run_id)?;
    parse_run_id("deployRunId", &p.deploy_run_id)?;
    Ok(())
}
