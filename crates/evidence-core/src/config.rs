use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EvidenceError, Result};

pub const DEFAULT_REQUIRED_TEST_IDS: [&str; 4] = [
    "permission-analyzer-unit",
    "ttl-indexes-api-unit",
    "sos-e2e",
    "device-sync-e2e",
];

pub const DEFAULT_REQUIRED_DEPLOY_JOBS: [&str; 4] = [
    "Sign and attest images",
    "Deploy API",
    "Deploy worker",
    "Finalize healthcheck",
];

pub const PRODUCER_MANIFEST_FILE: &str = "compliance-test-evidence-manifest.json";

/// What the aggregator does when two manifests carry the same test id.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    #[default]
    Fatal,
    /// Legacy behavior; every overwrite is logged.
    LastWriteWins,
}

impl DuplicatePolicy {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim() {
            "fatal" => Ok(DuplicatePolicy::Fatal),
            "last-write-wins" => Ok(DuplicatePolicy::LastWriteWins),
            other => Err(EvidenceError::shape(
                "EVIDENCE_DUPLICATE_POLICY",
                format!("unknown policy `{other}` (expected fatal | last-write-wins)"),
            )),
        }
    }
}

/// Pipeline configuration: built-in defaults, then an optional TOML file
/// (`EVIDENCE_CONFIG`), then environment variables.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub run: RunConfig,
    pub paths: PathsConfig,
    pub requirements: RequirementsConfig,
    pub github: GitHubConfig,
    pub policy: PolicyConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub ci_run_id: String,
    pub commit_sha: String,
    pub job_name: Option<String>,
    /// `success` passes; anything else forces every produced test to `failed`.
    pub job_status: String,
    pub unit_workflow_path: String,
    pub e2e_workflow_path: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            ci_run_id: "local".to_string(),
            commit_sha: "0000000000000000000000000000000000000000".to_string(),
            job_name: None,
            job_status: "success".to_string(),
            unit_workflow_path: ".github/workflows/compliance-unit.yml".to_string(),
            e2e_workflow_path: ".github/workflows/compliance-e2e.yml".to_string(),
        }
    }
}

impl RunConfig {
    pub fn job_passed(&self) -> bool {
        self.job_status.trim().eq_ignore_ascii_case("success")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub source_root: String,
    pub output_dir: String,
    /// Relative to a bundle or publication root.
    pub tests_dir: String,
    pub manifest_root: String,
    pub manifest_path: Option<String>,
    pub publication_root: String,
    pub dispatch_payload: String,
    pub verify_base: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source_root: ".".to_string(),
            output_dir: "evidence-out".to_string(),
            tests_dir: "current/tests".to_string(),
            manifest_root: "downloaded-evidence".to_string(),
            manifest_path: None,
            publication_root: "public-evidence".to_string(),
            dispatch_payload: "dispatch-payload.json".to_string(),
            verify_base: "public-evidence".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RequirementsConfig {
    pub test_ids: Vec<String>,
    pub deploy_jobs: Vec<String>,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for RequirementsConfig {
    fn default() -> Self {
        Self {
            test_ids: DEFAULT_REQUIRED_TEST_IDS.iter().map(|s| s.to_string()).collect(),
            deploy_jobs: DEFAULT_REQUIRED_DEPLOY_JOBS.iter().map(|s| s.to_string()).collect(),
            duplicate_policy: DuplicatePolicy::Fatal,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitHubConfig {
    pub api_url: String,
    pub owner: String,
    pub repo: String,
    /// Never read from or written to the config file.
    #[serde(skip)]
    pub token: Option<String>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            owner: "safety-platform".to_string(),
            repo: "guardian-app".to_string(),
            token: None,
        }
    }
}

impl fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("api_url", &self.api_url)
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl GitHubConfig {
    pub fn expected_repo(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub policy_file: String,
    pub signature_path: String,
    pub public_key_path: String,
    pub source_url: Option<String>,
    /// Hex Ed25519 seed; env only.
    #[serde(skip)]
    pub signing_key: Option<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            policy_file: "policy/deploy.rego".to_string(),
            signature_path: "policy/deploy.rego.sig".to_string(),
            public_key_path: "policy/policy-signing.pub".to_string(),
            source_url: None,
            signing_key: None,
        }
    }
}

impl fmt::Debug for PolicyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyConfig")
            .field("policy_file", &self.policy_file)
            .field("signature_path", &self.signature_path)
            .field("public_key_path", &self.public_key_path)
            .field("source_url", &self.source_url)
            .field("signing_key", &self.signing_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn expand(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] over an arbitrary variable source, so tests never touch
    /// the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = match lookup("EVIDENCE_CONFIG").filter(|p| !p.trim().is_empty()) {
            Some(path) => Self::load_from(&expand(&path))?,
            None => Self::default(),
        };
        cfg.apply_env(&lookup)?;
        Ok(cfg)
    }

    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).map_err(|e| EvidenceError::io(path, e))?;
        debug!(path = %path.display(), "loading config file");
        toml::from_str(&s)
            .map_err(|e| EvidenceError::shape(path.display().to_string(), e.to_string()))
    }

    fn apply_env(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("GITHUB_RUN_ID") {
            self.run.ci_run_id = v;
        }
        if let Some(v) = get("GITHUB_SHA") {
            self.run.commit_sha = v;
        }
        if let Some(v) = get("EVIDENCE_JOB_NAME") {
            self.run.job_name = Some(v);
        }
        if let Some(v) = get("EVIDENCE_JOB_STATUS") {
            self.run.job_status = v;
        }
        if let Some(v) = get("EVIDENCE_UNIT_WORKFLOW_PATH") {
            self.run.unit_workflow_path = v;
        }
        if let Some(v) = get("EVIDENCE_E2E_WORKFLOW_PATH") {
            self.run.e2e_workflow_path = v;
        }

        if let Some(v) = get("EVIDENCE_SOURCE_ROOT") {
            self.paths.source_root = v;
        }
        if let Some(v) = get("EVIDENCE_OUTPUT_DIR") {
            self.paths.output_dir = v;
        }
        if let Some(v) = get("EVIDENCE_TESTS_DIR") {
            self.paths.tests_dir = v;
        }
        if let Some(v) = get("EVIDENCE_MANIFEST_ROOT") {
            self.paths.manifest_root = v;
        }
        if let Some(v) = get("EVIDENCE_MANIFEST_PATH") {
            self.paths.manifest_path = Some(v);
        }
        if let Some(v) = get("EVIDENCE_PUBLICATION_ROOT") {
            self.paths.publication_root = v;
        }
        if let Some(v) = get("DISPATCH_PAYLOAD_PATH") {
            self.paths.dispatch_payload = v;
        }
        if let Some(v) = get("EVIDENCE_VERIFY_BASE") {
            self.paths.verify_base = v;
        }

        if let Some(v) = get("REQUIRED_TEST_IDS") {
            self.requirements.test_ids = split_list(&v);
        }
        if let Some(v) = get("REQUIRED_DEPLOY_JOBS") {
            self.requirements.deploy_jobs = split_list(&v);
        }
        if let Some(v) = get("EVIDENCE_DUPLICATE_POLICY") {
            self.requirements.duplicate_policy = DuplicatePolicy::parse(&v)?;
        }

        if let Some(v) = get("GITHUB_API_URL") {
            self.github.api_url = v;
        }
        if let Some(v) = get("EVIDENCE_GITHUB_TOKEN").or_else(|| get("GITHUB_TOKEN")) {
            self.github.token = Some(v);
        }
        if let Some(v) = get("SOURCE_REPO_OWNER") {
            self.github.owner = v;
        }
        if let Some(v) = get("SOURCE_REPO_NAME") {
            self.github.repo = v;
        }

        if let Some(v) = get("POLICY_FILE") {
            self.policy.policy_file = v;
        }
        if let Some(v) = get("POLICY_SIGNATURE_PATH") {
            self.policy.signature_path = v;
        }
        if let Some(v) = get("POLICY_PUBLIC_KEY_PATH") {
            self.policy.public_key_path = v;
        }
        if let Some(v) = get("POLICY_SOURCE_URL") {
            self.policy.source_url = Some(v);
        }
        if let Some(v) = get("POLICY_SIGNING_KEY") {
            self.policy.signing_key = Some(v);
        }

        if self.requirements.test_ids.is_empty() {
            return Err(EvidenceError::shape("REQUIRED_TEST_IDS", "must list at least one test id"));
        }
        Ok(())
    }

    pub fn source_root(&self) -> PathBuf {
        expand(&self.paths.source_root)
    }

    pub fn output_dir(&self) -> PathBuf {
        expand(&self.paths.output_dir)
    }

    pub fn manifest_root(&self) -> PathBuf {
        expand(&self.paths.manifest_root)
    }

    pub fn publication_root(&self) -> PathBuf {
        expand(&self.paths.publication_root)
    }

    pub fn current_dir(&self) -> PathBuf {
        self.publication_root().join("current")
    }

    pub fn merged_manifest_path(&self) -> PathBuf {
        match &self.paths.manifest_path {
            Some(p) => expand(p),
            None => self
                .publication_root()
                .join(&self.paths.tests_dir)
                .join("test-evidence-manifest.json"),
        }
    }

    pub fn dispatch_payload_path(&self) -> PathBuf {
        expand(&self.paths.dispatch_payload)
    }

    pub fn ingest_record_path(&self) -> PathBuf {
        self.current_dir().join("source-run.json")
    }

    pub fn policy_input_path(&self) -> PathBuf {
        self.current_dir().join("policy").join("policy-input.json")
    }

    pub fn provenance_path(&self) -> PathBuf {
        self.current_dir().join("policy").join("policy-provenance.json")
    }

    pub fn evidence_path(&self) -> PathBuf {
        self.current_dir().join("evidence.json")
    }

    pub fn policy_source_url(&self) -> String {
        self.policy
            .source_url
            .clone()
            .unwrap_or_else(|| {
                format!(
                    "https://github.com/{}/blob/{}/{}",
                    self.github.expected_repo(),
                    self.run.commit_sha,
                    self.policy.policy_file
                )
            })
    }
}
