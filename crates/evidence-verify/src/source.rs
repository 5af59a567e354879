use std::path::PathBuf;

use reqwest::blocking::Client;
use tracing::debug;

use evidence_core::error::{EvidenceError, Result};
use evidence_core::fsio;

/// Where published evidence is read from. Paths are relative to the publication root,
/// always with forward slashes.
pub trait EvidenceSource {
    fn fetch(&self, rel_path: &str) -> Result<Vec<u8>>;

    /// Human readable location, for logs.
    fn describe(&self) -> String;
}

/// A static site serving the publication root.
pub struct HttpSource {
    client: Client,
    base_url: String,
}

impl HttpSource {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("evidence-verify/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EvidenceError::transport(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, rel_path: &str) -> String {
        format!("{}/{}", self.base_url, rel_path.trim_start_matches('/'))
    }
}

impl EvidenceSource for HttpSource {
    fn fetch(&self, rel_path: &str) -> Result<Vec<u8>> {
        let url = self.url(rel_path);
        debug!(%url, "fetching");
        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| EvidenceError::transport(format!("GET {url}: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(EvidenceError::transport(format!("GET {url}: HTTP {status}")));
        }
        let body = resp
            .bytes()
            .map_err(|e| EvidenceError::transport(format!("GET {url}: {e}")))?;
        Ok(body.to_vec())
    }

    fn describe(&self) -> String {
        self.base_url.clone()
    }
}

/// A local copy of the publication root.
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl EvidenceSource for DirSource {
    fn fetch(&self, rel_path: &str) -> Result<Vec<u8>> {
        fsio::read_bytes(&self.root.join(rel_path.trim_start_matches('/')))
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

/// `http://` and `https://` bases are fetched over the network; anything else is a directory.
pub fn source_from_base(base: &str) -> Result<Box<dyn EvidenceSource>> {
    if base.starts_with("http://") || base.starts_with("https://") {
        Ok(Box::new(HttpSource::new(base)?))
    } else {
        let expanded = shellexpand::tilde(base).into_owned();
        Ok(Box::new(DirSource::new(expanded)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_urls_join_without_double_slashes() {
        let src = HttpSource::new("https://acme.github.io/evidence/").unwrap();
        assert_eq!(
            src.url("/current/evidence.json"),
            "https://acme.github.io/evidence/current/evidence.json"
        );
    }

    #[test]
    fn base_selects_source_kind() {
        assert!(source_from_base("https://x.invalid").unwrap().describe().starts_with("https://"));
        assert_eq!(source_from_base("public-evidence").unwrap().describe(), "public-evidence");
    }

    #[test]
    fn dir_source_reports_missing_files_as_io() {
        let dir = tempfile::tempdir().unwrap();
        let err = DirSource::new(dir.path()).fetch("current/evidence.json").unwrap_err();
        assert_eq!(err.kind(), "io");
    }
}
