use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use evidence_core::error::{EvidenceError, Result};
use evidence_core::{Config, JobRecord, RunArtifactRecord};

use crate::platform::{CiPlatform, RemoteRun};

const PER_PAGE: usize = 100;
const USER_AGENT: &str = concat!("evidence-ingest/", env!("CARGO_PKG_VERSION"));

/// GitHub Actions REST client scoped to one repository.
pub struct GitHubClient {
    http: Client,
    api_url: String,
    owner: String,
    repo: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct RunResponse {
    id: u64,
    #[serde(default)]
    name: Option<String>,
    run_number: u64,
    head_sha: String,
    status: String,
    conclusion: Option<String>,
    html_url: String,
}

#[derive(Deserialize)]
struct JobResponse {
    name: String,
    status: String,
    conclusion: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
    html_url: Option<String>,
}

#[derive(Deserialize)]
struct JobsPage {
    total_count: usize,
    jobs: Vec<JobResponse>,
}

#[derive(Deserialize)]
struct ArtifactResponse {
    id: u64,
    name: String,
    expired: bool,
    size_in_bytes: u64,
}

#[derive(Deserialize)]
struct ArtifactsPage {
    total_count: usize,
    artifacts: Vec<ArtifactResponse>,
}

impl GitHubClient {
    pub fn new(
        api_url: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        token: Option<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| EvidenceError::transport(format!("building http client: {e}")))?;
        Ok(Self {
            http,
            api_url: api_url.into(),
            owner: owner.into(),
            repo: repo.into(),
            token,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(
            cfg.github.api_url.clone(),
            cfg.github.owner.clone(),
            cfg.github.repo.clone(),
            cfg.github.token.clone(),
        )
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/actions/{}",
            self.api_url.trim_end_matches('/'),
            self.owner,
            self.repo,
            path
        )
    }

    fn get(&self, url: &str) -> Result<Response> {
        debug!(%url, "GET");
        let mut req = self
            .http
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        req.send()
            .map_err(|e| EvidenceError::transport(format!("GET {url}: {e}")))
    }

    fn decode<T: DeserializeOwned>(url: &str, resp: Response) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(EvidenceError::transport(format!(
                "GET {url}: status {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }
        resp.json()
            .map_err(|e| EvidenceError::transport(format!("decoding {url}: {e}")))
    }

    fn paged<P: DeserializeOwned, T>(
        &self,
        path: &str,
        split: impl Fn(P) -> (usize, Vec<T>),
    ) -> Result<Vec<T>> {
        let mut out = Vec::new();
        let mut page = 1;
        loop {
            let url = self.url(&format!("{path}?per_page={PER_PAGE}&page={page}"));
            let resp = self.get(&url)?;
            let (total, items) = split(Self::decode(&url, resp)?);
            let fetched = items.len();
            out.extend(items);
            if fetched == 0 || out.len() >= total {
                break;
            }
            page += 1;
        }
        Ok(out)
    }
}

impl CiPlatform for GitHubClient {
    fn workflow_run(&self, run_id: u64) -> Result<Option<RemoteRun>> {
        let url = self.url(&format!("runs/{run_id}"));
        let resp = self.get(&url)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let run: RunResponse = Self::decode(&url, resp)?;
        Ok(Some(RemoteRun {
            id: run.id,
            name: run.name.unwrap_or_default(),
            run_number: run.run_number,
            head_sha: run.head_sha,
            status: run.status,
            conclusion: run.conclusion,
            html_url: run.html_url,
        }))
    }

    fn run_jobs(&self, run_id: u64) -> Result<Vec<JobRecord>> {
        let jobs =
            self.paged(&format!("runs/{run_id}/jobs"), |p: JobsPage| (p.total_count, p.jobs))?;
        Ok(jobs
            .into_iter()
            .map(|j| JobRecord {
                name: j.name,
                status: j.status,
                conclusion: j.conclusion,
                started_at: j.started_at,
                completed_at: j.completed_at,
                html_url: j.html_url,
            })
            .collect())
    }

    fn run_artifacts(&self, run_id: u64) -> Result<Vec<RunArtifactRecord>> {
        let artifacts = self.paged(&format!("runs/{run_id}/artifacts"), |p: ArtifactsPage| {
            (p.total_count, p.artifacts)
        })?;
        Ok(artifacts
            .into_iter()
            .map(|a| RunArtifactRecord {
                name: a.name,
                id: a.id,
                expired: a.expired,
                size_in_bytes: a.size_in_bytes,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_repo_scoped() {
        let client = GitHubClient::new("https://api.github.com/", "acme", "app", None).unwrap();
        assert_eq!(
            client.url("runs/42/jobs?per_page=100&page=1"),
            "https://api.github.com/repos/acme/app/actions/runs/42/jobs?per_page=100&page=1"
        );
    }

    #[test]
    fn api_pages_deserialize() {
        let jobs: JobsPage = serde_json::from_str(
            r#"{"total_count":1,"jobs":[{"name":"Deploy API","status":"completed","conclusion":"success",
               "started_at":"2026-01-01T00:00:00Z","completed_at":null,"html_url":"https://x"}]}"#,
        )
        .unwrap();
        assert_eq!(jobs.jobs[0].conclusion.as_deref(), Some("success"));
        assert!(jobs.jobs[0].completed_at.is_none());

        let run: RunResponse = serde_json::from_str(
            r#"{"id":7,"name":"Deploy","run_number":3,"head_sha":"abc","status":"completed",
               "conclusion":null,"html_url":"https://x","extra":true}"#,
        )
        .unwrap();
        assert_eq!(run.run_number, 3);
        assert!(run.conclusion.is_none());
    }
}
