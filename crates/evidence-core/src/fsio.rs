use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{EvidenceError, Result};

pub fn read_bytes(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| EvidenceError::io(path, e))
}

/// Reads and parses a JSON document; parse failures are reported as shape errors.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = read_bytes(path)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| EvidenceError::shape(path.display().to_string(), e.to_string()))
}

pub fn to_pretty_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut bytes =
        serde_json::to_vec_pretty(value).map_err(|e| EvidenceError::json("serialize", e))?;
    bytes.push(b'\n');
    Ok(bytes)
}

pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| EvidenceError::io(parent, e))?;
        }
    }
    Ok(())
}

pub fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    ensure_parent(path)?;
    std::fs::write(path, bytes).map_err(|e| EvidenceError::io(path, e))
}

/// Writes to a sibling temp file then renames, so readers never observe a partial document.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = to_pretty_bytes(value)?;
    ensure_parent(path)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    std::fs::write(&tmp, &bytes).map_err(|e| EvidenceError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| EvidenceError::io(path, e))
}

pub fn copy_file(from: &Path, to: &Path) -> Result<()> {
    ensure_parent(to)?;
    std::fs::copy(from, to).map_err(|e| EvidenceError::io(from, e))?;
    Ok(())
}
