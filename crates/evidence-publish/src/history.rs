use std::path::{Path, PathBuf};

use tracing::info;
use walkdir::WalkDir;

use evidence_core::error::{EvidenceError, Result};
use evidence_core::{fsio, time, EvidenceDocument, HistoryEntry, HistoryIndex};

const COMMIT_PREFIX: usize = 12;

/// `<YYYYMMDDTHHMMSSZ>-<first 12 chars of the commit>`, from the document's `generatedAt`.
pub fn snapshot_name(doc: &EvidenceDocument) -> Result<String> {
    let ts = time::parse_timestamp("generatedAt", &doc.generated_at)?;
    let commit = doc.source.commit_sha.trim();
    if commit.is_empty() || !commit.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(EvidenceError::shape(
            "source.commitSha",
            format!("`{commit}` cannot be used in a snapshot name"),
        ));
    }
    let short: String = commit.chars().take(COMMIT_PREFIX).collect();
    Ok(format!("{}-{}", time::compact_stamp(&ts), short.to_ascii_lowercase()))
}

pub fn index_path(publication_root: &Path) -> PathBuf {
    publication_root.join("history").join("index.json")
}

/// A missing index is an empty one.
pub fn load_index(path: &Path) -> Result<HistoryIndex> {
    if !path.exists() {
        return Ok(HistoryIndex::default());
    }
    fsio::read_json(path)
}

fn mirror(from: &Path, to: &Path) -> Result<usize> {
    if to.exists() {
        std::fs::remove_dir_all(to).map_err(|e| EvidenceError::io(to, e))?;
    }
    let mut copied = 0;
    for entry in WalkDir::new(from).sort_by_file_name() {
        let entry =
            entry.map_err(|e| EvidenceError::io(from, std::io::Error::other(e.to_string())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| EvidenceError::io(entry.path(), std::io::Error::other(e.to_string())))?;
        fsio::copy_file(entry.path(), &to.join(rel))?;
        copied += 1;
    }
    Ok(copied)
}

/// Archives `current/` under `history/<name>/` and records it in the index, newest first.
/// Re-running with the same document replaces the snapshot and keeps one index entry.
pub fn snapshot(publication_root: &Path, doc: &EvidenceDocument) -> Result<HistoryEntry> {
    let current = publication_root.join("current");
    if !current.join("evidence.json").is_file() {
        return Err(EvidenceError::completeness(format!(
            "{} has no evidence.json; nothing to snapshot",
            current.display()
        )));
    }

    let name = snapshot_name(doc)?;
    let target = publication_root.join("history").join(&name);
    let files = mirror(&current, &target)?;

    let entry = HistoryEntry {
        snapshot: name,
        generated_at: doc.generated_at.clone(),
        source_ref: doc.source.git_ref.clone(),
        source_commit_sha: doc.source.commit_sha.clone(),
        ci_run_id: doc.ci.run_id,
        deploy_run_id: doc.deploy.run_id,
    };

    let idx_path = index_path(publication_root);
    let mut index = load_index(&idx_path)?;
    index.snapshots.retain(|s| s.snapshot != entry.snapshot);
    index.snapshots.insert(0, entry.clone());
    index.updated_at = time::now_rfc3339();
    fsio::write_json_atomic(&idx_path, &index)?;

    info!(
        snapshot = %entry.snapshot,
        files,
        total = index.snapshots.len(),
        "archived evidence snapshot"
    );
    Ok(entry)
}
