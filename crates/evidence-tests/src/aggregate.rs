use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use evidence_core::error::{EvidenceError, Result};
use evidence_core::validate::{
    require_passing, require_test_ids, require_unique_test_ids, validate_entry_shape,
};
use evidence_core::{
    fsio, sha256_file, time, Config, DuplicatePolicy, TestEvidenceEntry, TestManifest,
    PRODUCER_MANIFEST_FILE,
};

#[derive(Clone, Debug)]
pub struct MergeOptions {
    pub search_root: PathBuf,
    pub publication_root: PathBuf,
    pub output_path: PathBuf,
    pub required_test_ids: Vec<String>,
    pub duplicate_policy: DuplicatePolicy,
}

impl MergeOptions {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            search_root: cfg.manifest_root(),
            publication_root: cfg.publication_root(),
            output_path: cfg.merged_manifest_path(),
            required_test_ids: cfg.requirements.test_ids.clone(),
            duplicate_policy: cfg.requirements.duplicate_policy,
        }
    }
}

/// All producer manifests under `root`, in lexicographic path order.
pub fn discover_manifests(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(EvidenceError::completeness(format!(
            "manifest search root {} does not exist",
            root.display()
        )));
    }
    let mut found = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
            EvidenceError::io(path, std::io::Error::other(e.to_string()))
        })?;
        if entry.file_type().is_file() && entry.file_name() == PRODUCER_MANIFEST_FILE {
            found.push(entry.into_path());
        }
    }
    found.sort();
    Ok(found)
}

/// Artifact paths in a producer manifest are relative to the directory holding its `tests/`.
fn bundle_root_of(manifest_path: &Path) -> PathBuf {
    let parent = manifest_path.parent().unwrap_or_else(|| Path::new("."));
    if parent.file_name().is_some_and(|n| n == "tests") {
        parent.parent().unwrap_or(parent).to_path_buf()
    } else {
        parent.to_path_buf()
    }
}

fn load_manifest(path: &Path) -> Result<TestManifest> {
    let manifest: TestManifest = fsio::read_json(path)?;
    time::parse_timestamp(&format!("{}:generatedAt", path.display()), &manifest.generated_at)?;
    Ok(manifest)
}

/// Full per-manifest validation: unique ids, shape of every entry, every assertion passed.
pub fn validate_entries(entries: &[TestEvidenceEntry]) -> Result<()> {
    require_unique_test_ids(entries)?;
    for entry in entries {
        validate_entry_shape(entry)?;
        require_passing(entry)?;
    }
    Ok(())
}

struct Merged {
    entry: TestEvidenceEntry,
    bundle_root: PathBuf,
    source: PathBuf,
}

/// Merges every producer manifest under the search root into one manifest.
///
/// Precondition: both producer jobs have finished and their bundles sit under
/// `search_root`. Producers never share a directory, so this is the only place their
/// outputs meet; the orchestrator enforces the ordering.
pub fn merge_manifests(opts: &MergeOptions) -> Result<TestManifest> {
    let paths = discover_manifests(&opts.search_root)?;
    if paths.is_empty() {
        return Err(EvidenceError::completeness(format!(
            "no {} found under {}",
            PRODUCER_MANIFEST_FILE,
            opts.search_root.display()
        )));
    }

    let mut merged: Vec<Merged> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for path in &paths {
        debug!(path = %path.display(), "reading producer manifest");
        let manifest = load_manifest(path)?;
        validate_entries(&manifest.test_evidence)?;
        let bundle_root = bundle_root_of(path);

        for entry in manifest.test_evidence {
            match index.get(&entry.test_id) {
                Some(&pos) => match opts.duplicate_policy {
                    DuplicatePolicy::Fatal => {
                        warn!(
                            test_id = %entry.test_id,
                            first = %merged[pos].source.display(),
                            second = %path.display(),
                            "test id reported by two manifests"
                        );
                        return Err(EvidenceError::duplicate("testId", entry.test_id));
                    }
                    DuplicatePolicy::LastWriteWins => {
                        warn!(
                            test_id = %entry.test_id,
                            replaced = %merged[pos].source.display(),
                            kept = %path.display(),
                            "duplicate test id overwritten (last-write-wins override)"
                        );
                        merged[pos] = Merged {
                            entry,
                            bundle_root: bundle_root.clone(),
                            source: path.clone(),
                        };
                    }
                },
                None => {
                    index.insert(entry.test_id.clone(), merged.len());
                    merged.push(Merged {
                        entry,
                        bundle_root: bundle_root.clone(),
                        source: path.clone(),
                    });
                }
            }
        }
    }

    let entries: Vec<TestEvidenceEntry> = merged.iter().map(|m| m.entry.clone()).collect();
    require_test_ids(&entries, &opts.required_test_ids)?;

    for m in &merged {
        for artifact in &m.entry.artifacts {
            let from = m.bundle_root.join(&artifact.path);
            let to = opts.publication_root.join(&artifact.path);
            if !from.is_file() {
                return Err(EvidenceError::completeness(format!(
                    "artifact {} for test `{}` missing from bundle {}",
                    artifact.path,
                    m.entry.test_id,
                    m.bundle_root.display()
                )));
            }
            if same_file(&from, &to) {
                continue;
            }
            fsio::copy_file(&from, &to)?;
        }
    }

    let out = TestManifest {
        generated_at: time::now_rfc3339(),
        test_evidence: entries,
    };
    fsio::write_json_atomic(&opts.output_path, &out)?;
    info!(
        manifests = paths.len(),
        tests = out.test_evidence.len(),
        path = %opts.output_path.display(),
        "merged test evidence manifests"
    );
    Ok(out)
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Re-checks a merged manifest: structure, pass status, required ids, and artifact hashes
/// under the publication root.
pub fn validate_manifest(
    path: &Path,
    required: &[String],
    publication_root: &Path,
) -> Result<TestManifest> {
    let manifest = load_manifest(path)?;
    validate_entries(&manifest.test_evidence)?;
    require_test_ids(&manifest.test_evidence, required)?;
    for entry in &manifest.test_evidence {
        for artifact in &entry.artifacts {
            let actual = sha256_file(&publication_root.join(&artifact.path))?;
            if actual != artifact.sha256 {
                return Err(EvidenceError::integrity(&artifact.path, &artifact.sha256, actual));
            }
        }
    }
    info!(tests = manifest.test_evidence.len(), path = %path.display(), "manifest valid");
    Ok(manifest)
}
