use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use evidence_core::error::Result;
use evidence_core::{JobRecord, RunArtifactRecord};

/// A workflow run as reported by the CI platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteRun {
    pub id: u64,
    pub name: String,
    pub run_number: u64,
    pub head_sha: String,
    pub status: String,
    /// Absent while the run is still in progress.
    pub conclusion: Option<String>,
    pub html_url: String,
}

/// Read-only view of the CI platform used by the source-run verifier.
pub trait CiPlatform {
    /// `Ok(None)` when the run does not exist.
    fn workflow_run(&self, run_id: u64) -> Result<Option<RemoteRun>>;
    fn run_jobs(&self, run_id: u64) -> Result<Vec<JobRecord>>;
    fn run_artifacts(&self, run_id: u64) -> Result<Vec<RunArtifactRecord>>;
}

/// In-memory platform for tests. Records every call so tests can assert what was not fetched.
#[derive(Default)]
pub struct MemoryCiPlatform {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    runs: HashMap<u64, RemoteRun>,
    jobs: HashMap<u64, Vec<JobRecord>>,
    artifacts: HashMap<u64, Vec<RunArtifactRecord>>,
    calls: Vec<String>,
}

impl MemoryCiPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_run(&self, run: RemoteRun) {
        self.lock().runs.insert(run.id, run);
    }

    pub fn insert_jobs(&self, run_id: u64, jobs: Vec<JobRecord>) {
        self.lock().jobs.insert(run_id, jobs);
    }

    pub fn insert_artifacts(&self, run_id: u64, artifacts: Vec<RunArtifactRecord>) {
        self.lock().artifacts.insert(run_id, artifacts);
    }

    /// Calls in order, formatted as `run:<id>`, `jobs:<id>`, `artifacts:<id>`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }
}

impl CiPlatform for MemoryCiPlatform {
    fn workflow_run(&self, run_id: u64) -> Result<Option<RemoteRun>> {
        let mut inner = self.lock();
        inner.calls.push(format!("run:{run_id}"));
        Ok(inner.runs.get(&run_id).cloned())
    }

    fn run_jobs(&self, run_id: u64) -> Result<Vec<JobRecord>> {
        let mut inner = self.lock();
        inner.calls.push(format!("jobs:{run_id}"));
        Ok(inner.jobs.get(&run_id).cloned().unwrap_or_default())
    }

    fn run_artifacts(&self, run_id: u64) -> Result<Vec<RunArtifactRecord>> {
        let mut inner = self.lock();
        inner.calls.push(format!("artifacts:{run_id}"));
        Ok(inner.artifacts.get(&run_id).cloned().unwrap_or_default())
    }
}
