use std::path::{Path, PathBuf};

use tracing::debug;

use evidence_core::error::Result;
use evidence_core::fsio;

/// JSON schema of `evidence.json`, published next to it for independent verifiers.
pub const EVIDENCE_SCHEMA: &str = include_str!("../schemas/evidence.schema.json");

pub fn schema_path(current_dir: &Path) -> PathBuf {
    current_dir.join("schema").join("evidence.schema.json")
}

pub fn publish_schema(current_dir: &Path) -> Result<PathBuf> {
    let path = schema_path(current_dir);
    fsio::write_bytes(&path, EVIDENCE_SCHEMA.as_bytes())?;
    debug!(path = %path.display(), "published evidence schema");
    Ok(path)
}
