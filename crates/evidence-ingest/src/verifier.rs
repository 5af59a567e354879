use tracing::{info, warn};

use evidence_core::error::{EvidenceError, RemoteViolation, Result, RunKind};
use evidence_core::validate::job_violations;
use evidence_core::{
    time, CiRunRecord, Config, DeployRunRecord, DispatchPayload, ImageRef, ImageSet, IngestRecord,
    RunArtifactRecord, SourceRef, INGEST_SCHEMA_VERSION,
};

use crate::payload::{parse_run_id, validate_payload};
use crate::platform::{CiPlatform, RemoteRun};

/// Checks a dispatch claim against live CI platform state.
pub struct SourceRunVerifier<'a> {
    platform: &'a dyn CiPlatform,
    expected_repo: String,
    required_jobs: Vec<String>,
}

fn fail(violations: Vec<RemoteViolation>) -> EvidenceError {
    for v in &violations {
        warn!(violation = %v, "source run verification");
    }
    EvidenceError::RemoteVerification { violations }
}

fn concluded(run: &RemoteRun) -> String {
    run.conclusion.clone().unwrap_or_else(|| run.status.clone())
}

impl<'a> SourceRunVerifier<'a> {
    pub fn new(
        platform: &'a dyn CiPlatform,
        expected_repo: impl Into<String>,
        required_jobs: Vec<String>,
    ) -> Self {
        Self {
            platform,
            expected_repo: expected_repo.into(),
            required_jobs,
        }
    }

    pub fn from_config(platform: &'a dyn CiPlatform, cfg: &Config) -> Self {
        Self::new(platform, cfg.github.expected_repo(), cfg.requirements.deploy_jobs.clone())
    }

    /// Verifies the claim. A deploy head-sha mismatch stops immediately; everything after it
    /// is collected so one run reports every violation.
    pub fn verify(&self, payload: &DispatchPayload) -> Result<IngestRecord> {
        validate_payload(payload)?;

        if payload.source_repo != self.expected_repo {
            return Err(fail(vec![RemoteViolation::SourceRepoMismatch {
                expected: self.expected_repo.clone(),
                actual: payload.source_repo.clone(),
            }]));
        }

        let deploy_id = parse_run_id("deployRunId", &payload.deploy_run_id)?;
        let ci_id = parse_run_id("ciRunId", &payload.ci_run_id)?;

        let deploy = self.platform.workflow_run(deploy_id)?.ok_or_else(|| {
            fail(vec![RemoteViolation::RunNotFound {
                run: RunKind::Deploy,
                run_id: deploy_id,
            }])
        })?;

        if deploy.head_sha != payload.source_commit_sha {
            return Err(fail(vec![RemoteViolation::HeadShaMismatch {
                run: RunKind::Deploy,
                expected: payload.source_commit_sha.clone(),
                actual: deploy.head_sha,
            }]));
        }

        let mut violations = Vec::new();
        if deploy.conclusion.as_deref() != Some("success") {
            violations.push(RemoteViolation::RunNotSuccessful {
                run: RunKind::Deploy,
                conclusion: concluded(&deploy),
            });
        }

        let jobs = self.platform.run_jobs(deploy_id)?;
        violations.extend(job_violations(&jobs, &self.required_jobs));

        let mut ci_record = None;
        let mut artifacts = Vec::new();
        match self.platform.workflow_run(ci_id)? {
            None => violations.push(RemoteViolation::RunNotFound {
                run: RunKind::Ci,
                run_id: ci_id,
            }),
            Some(ci) if ci.head_sha != payload.source_commit_sha => {
                violations.push(RemoteViolation::HeadShaMismatch {
                    run: RunKind::Ci,
                    expected: payload.source_commit_sha.clone(),
                    actual: ci.head_sha,
                });
            }
            Some(ci) => {
                if ci.conclusion.as_deref() != Some("success") {
                    violations.push(RemoteViolation::RunNotSuccessful {
                        run: RunKind::Ci,
                        conclusion: concluded(&ci),
                    });
                }
                let available = self.platform.run_artifacts(ci_id)?;
                for name in [&payload.ci_artifact_name, &payload.policy_artifact_name] {
                    match available.iter().find(|a| &a.name == name) {
                        None => {
                            violations.push(RemoteViolation::ArtifactMissing { name: name.clone() })
                        }
                        Some(a) if a.expired => {
                            violations.push(RemoteViolation::ArtifactExpired { name: name.clone() })
                        }
                        Some(a) => artifacts.push(a.clone()),
                    }
                }
                ci_record = Some(ci);
            }
        }

        if !violations.is_empty() {
            return Err(fail(violations));
        }
        let Some(ci) = ci_record else {
            return Err(fail(vec![RemoteViolation::RunNotFound {
                run: RunKind::Ci,
                run_id: ci_id,
            }]));
        };

        let record = build_record(payload, &deploy, jobs, &ci, artifacts);
        info!(
            repo = %record.source.repo,
            commit = %record.source.commit_sha,
            deploy_run = record.deploy.run_id,
            ci_run = record.ci.run_id,
            "source run verified"
        );
        Ok(record)
    }
}

fn build_record(
    payload: &DispatchPayload,
    deploy: &RemoteRun,
    jobs: Vec<evidence_core::JobRecord>,
    ci: &RemoteRun,
    artifacts: Vec<RunArtifactRecord>,
) -> IngestRecord {
    IngestRecord {
        schema_version: INGEST_SCHEMA_VERSION.to_string(),
        verified_at: time::now_rfc3339(),
        source: SourceRef {
            repo: payload.source_repo.clone(),
            git_ref: payload.source_ref.clone(),
            commit_sha: payload.source_commit_sha.clone(),
        },
        environment: payload.environment.clone(),
        ci: CiRunRecord {
            run_id: ci.id,
            artifact_name: payload.ci_artifact_name.clone(),
            policy_artifact_name: payload.policy_artifact_name.clone(),
            head_sha: ci.head_sha.clone(),
            conclusion: concluded(ci),
            html_url: ci.html_url.clone(),
        },
        deploy: DeployRunRecord {
            run_id: deploy.id,
            workflow_name: payload.deploy_workflow_name.clone(),
            run_number: deploy.run_number.to_string(),
            head_sha: deploy.head_sha.clone(),
            conclusion: concluded(deploy),
            html_url: deploy.html_url.clone(),
            jobs,
        },
        images: ImageSet {
            api: ImageRef {
                image: payload.api_image.clone(),
                digest: payload.api_digest.clone(),
            },
            worker: ImageRef {
                image: payload.worker_image.clone(),
                digest: payload.worker_digest.clone(),
            },
        },
        artifacts,
    }
}
