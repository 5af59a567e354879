use std::path::{Path, PathBuf};

use regex::RegexBuilder;
use tracing::{info, warn};

use evidence_core::error::Result;
use evidence_core::{
    fsio, sha256_hex, time, ArtifactFormat, Config, MatcherType, SuiteType, TestArtifact,
    TestArtifactDocument, TestAssertion, TestEvidenceEntry, TestManifest, TestStatus,
    ARTIFACT_SCHEMA_VERSION, PRODUCER_MANIFEST_FILE,
};

use crate::catalog::{AssertionDefinition, Matcher, TestDefinition};
use crate::junit;

const MAX_ACTUAL_CHARS: usize = 240;

#[derive(Clone, Debug)]
pub struct ProducerOptions {
    pub suite: SuiteType,
    pub source_root: PathBuf,
    /// The job's own output directory; nothing else writes here.
    pub bundle_root: PathBuf,
    /// Artifact directory relative to `bundle_root`.
    pub tests_dir: String,
    pub run_id: String,
    pub commit_sha: String,
    pub job_name: String,
    pub workflow_path: String,
    /// Job-level outcome. `false` forces every test to `failed`.
    pub job_passed: bool,
}

impl ProducerOptions {
    pub fn from_config(cfg: &Config, suite: SuiteType) -> Self {
        let (default_job, workflow_path) = match suite {
            SuiteType::Unit => ("compliance-unit", cfg.run.unit_workflow_path.clone()),
            SuiteType::E2e => ("compliance-e2e", cfg.run.e2e_workflow_path.clone()),
        };
        Self {
            suite,
            source_root: cfg.source_root(),
            bundle_root: cfg.output_dir(),
            tests_dir: cfg.paths.tests_dir.clone(),
            run_id: cfg.run.ci_run_id.clone(),
            commit_sha: cfg.run.commit_sha.clone(),
            job_name: cfg.run.job_name.clone().unwrap_or_else(|| default_job.to_string()),
            workflow_path,
            job_passed: cfg.run.job_passed(),
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        producer_manifest_path(&self.bundle_root)
    }
}

pub fn producer_manifest_path(bundle_root: &Path) -> PathBuf {
    bundle_root.join("tests").join(PRODUCER_MANIFEST_FILE)
}

#[derive(Debug)]
pub struct ProducerOutput {
    pub manifest: TestManifest,
    pub manifest_path: PathBuf,
}

impl ProducerOutput {
    pub fn failed_tests(&self) -> Vec<&str> {
        self.manifest
            .test_evidence
            .iter()
            .filter(|e| e.result == TestStatus::Failed)
            .map(|e| e.test_id.as_str())
            .collect()
    }
}

fn normalize_path(p: &str) -> String {
    p.replace('\\', "/").trim_start_matches("./").to_string()
}

/// Strips control characters and bounds the length of recorded match text.
pub fn sanitize_actual(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.chars().count() <= MAX_ACTUAL_CHARS {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(MAX_ACTUAL_CHARS).collect();
    out.push_str("...");
    out
}

/// Evaluates one definition. Unreadable files and bad patterns become failed assertions.
pub fn evaluate(def: &AssertionDefinition, source_root: &Path, verified_at: &str) -> TestAssertion {
    let (matcher_type, matcher) = match def.matcher {
        Matcher::Includes(m) => (MatcherType::Includes, m),
        Matcher::Regex(p) => (MatcherType::Regex, p),
    };

    let (passed, actual) = match std::fs::read_to_string(source_root.join(def.file_path)) {
        Err(e) => (
            false,
            format!("unable to read {}: {}", normalize_path(def.file_path), e.kind()),
        ),
        Ok(text) => match def.matcher {
            Matcher::Includes(needle) => {
                if text.contains(needle) {
                    (true, format!("found `{}`", sanitize_actual(needle)))
                } else {
                    (false, format!("`{}` not found", sanitize_actual(needle)))
                }
            }
            Matcher::Regex(pattern) => match RegexBuilder::new(pattern).multi_line(true).build() {
                Err(e) => (false, format!("invalid pattern: {e}")),
                Ok(re) => match re.find(&text) {
                    Some(m) => (true, sanitize_actual(m.as_str())),
                    None => (false, "no match".to_string()),
                },
            },
        },
    };

    TestAssertion {
        assertion_id: def.assertion_id.to_string(),
        name: def.name.to_string(),
        file_path: normalize_path(def.file_path),
        matcher_type,
        matcher: matcher.to_string(),
        expected: def.expected.to_string(),
        status: TestStatus::from_passed(passed),
        actual,
        verified_at: verified_at.to_string(),
    }
}

/// Runs every definition of the suite, writes JSON + JUnit artifacts per test and the job
/// manifest. A failed assertion never stops the run; it is recorded and the aggregator
/// rejects it later.
pub fn run_suite(definitions: &[TestDefinition], opts: &ProducerOptions) -> Result<ProducerOutput> {
    let mut entries = Vec::with_capacity(definitions.len());

    for def in definitions.iter().filter(|d| d.suite == opts.suite) {
        let executed_at = time::now_rfc3339();
        let assertions: Vec<TestAssertion> = def
            .assertions
            .iter()
            .map(|a| evaluate(a, &opts.source_root, &time::now_rfc3339()))
            .collect();
        let all_passed = assertions.iter().all(|a| a.status.is_passed());
        let result = TestStatus::from_passed(all_passed && opts.job_passed);

        let doc = TestArtifactDocument {
            schema_version: ARTIFACT_SCHEMA_VERSION.to_string(),
            test_id: def.test_id.to_string(),
            suite_type: def.suite,
            result,
            source_path: normalize_path(def.source_path),
            source_commit_sha: opts.commit_sha.clone(),
            run_id: opts.run_id.clone(),
            job_name: opts.job_name.clone(),
            workflow_path: normalize_path(&opts.workflow_path),
            executed_at: executed_at.clone(),
            assertions: assertions.clone(),
        };

        let tests_dir = normalize_path(&opts.tests_dir);
        let tests_dir = tests_dir.trim_end_matches('/');
        let json_rel = format!("{tests_dir}/{}.json", def.test_id);
        let junit_rel = format!("{tests_dir}/{}.junit.xml", def.test_id);

        let json_bytes = fsio::to_pretty_bytes(&doc)?;
        fsio::write_bytes(&opts.bundle_root.join(&json_rel), &json_bytes)?;
        let junit_bytes = junit::render(&doc).into_bytes();
        fsio::write_bytes(&opts.bundle_root.join(&junit_rel), &junit_bytes)?;

        if result.is_passed() {
            info!(test_id = def.test_id, assertions = assertions.len(), "test passed");
        } else if !all_passed {
            let failed: Vec<&str> = assertions
                .iter()
                .filter(|a| !a.status.is_passed())
                .map(|a| a.assertion_id.as_str())
                .collect();
            warn!(test_id = def.test_id, failed = ?failed, "test failed");
        } else {
            warn!(test_id = def.test_id, "test forced to failed by job outcome");
        }

        entries.push(TestEvidenceEntry {
            test_id: def.test_id.to_string(),
            source_path: doc.source_path.clone(),
            suite_type: def.suite,
            result,
            workflow_path: doc.workflow_path.clone(),
            run_id: opts.run_id.clone(),
            job_name: opts.job_name.clone(),
            source_commit_sha: opts.commit_sha.clone(),
            executed_at,
            artifacts: vec![
                TestArtifact {
                    format: ArtifactFormat::Json,
                    path: json_rel,
                    sha256: sha256_hex(&json_bytes),
                },
                TestArtifact {
                    format: ArtifactFormat::Junit,
                    path: junit_rel,
                    sha256: sha256_hex(&junit_bytes),
                },
            ],
            verification_command: def.verification_command.to_string(),
            assertions,
        });
    }

    let manifest = TestManifest {
        generated_at: time::now_rfc3339(),
        test_evidence: entries,
    };
    let manifest_path = opts.manifest_path();
    fsio::write_json_atomic(&manifest_path, &manifest)?;
    info!(
        suite = opts.suite.as_str(),
        tests = manifest.test_evidence.len(),
        path = %manifest_path.display(),
        "wrote test evidence manifest"
    );

    Ok(ProducerOutput { manifest, manifest_path })
}
