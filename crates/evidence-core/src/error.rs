use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = EvidenceError> = std::result::Result<T, E>;

/// Every failure the pipeline can report. None of these are retried inside a stage.
#[derive(Debug, Error)]
pub enum EvidenceError {
    /// A payload, manifest or record is missing a required field or has the wrong type.
    #[error("shape error: field `{field}`: {reason}")]
    Shape { field: String, reason: String },

    /// Recorded and recomputed values disagree.
    #[error("integrity error: {subject}: expected={expected} actual={actual}")]
    Integrity {
        subject: String,
        expected: String,
        actual: String,
    },

    #[error("duplicate {kind}: {id}")]
    Duplicate { kind: String, id: String },

    #[error("completeness error: {what}")]
    Completeness { what: String },

    #[error("assertion failed: test `{test_id}` assertion `{assertion_id}`")]
    AssertionFailed { test_id: String, assertion_id: String },

    #[error("test `{test_id}` reported result=failed")]
    TestFailed { test_id: String },

    #[error("remote verification failed: {}", join_violations(.violations))]
    RemoteVerification { violations: Vec<RemoteViolation> },

    #[error("signature error: {reason}")]
    Signature { reason: String },

    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid json in {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("remote request failed: {reason}")]
    Transport { reason: String },
}

impl EvidenceError {
    pub fn shape(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Shape {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn integrity(
        subject: impl Into<String>,
        expected: impl fmt::Display,
        actual: impl fmt::Display,
    ) -> Self {
        Self::Integrity {
            subject: subject.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn duplicate(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Duplicate {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn completeness(what: impl Into<String>) -> Self {
        Self::Completeness { what: what.into() }
    }

    pub fn signature(reason: impl Into<String>) -> Self {
        Self::Signature { reason: reason.into() }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Json {
            context: context.into(),
            source,
        }
    }

    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport { reason: reason.into() }
    }

    /// Short category name, used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Shape { .. } => "shape",
            Self::Integrity { .. } => "integrity",
            Self::Duplicate { .. } => "duplicate",
            Self::Completeness { .. } => "completeness",
            Self::AssertionFailed { .. } | Self::TestFailed { .. } => "assertion",
            Self::RemoteVerification { .. } => "remote-verification",
            Self::Signature { .. } => "signature",
            Self::Io { .. } => "io",
            Self::Json { .. } => "json",
            Self::Transport { .. } => "transport",
        }
    }
}

/// One concrete reason the CI platform state does not back the dispatch claim.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RemoteViolation {
    #[error("source repo mismatch: expected={expected} actual={actual}")]
    SourceRepoMismatch { expected: String, actual: String },

    #[error("{run} run {run_id} not found")]
    RunNotFound { run: RunKind, run_id: u64 },

    #[error("{run} run head-sha mismatch: expected={expected} actual={actual}")]
    HeadShaMismatch {
        run: RunKind,
        expected: String,
        actual: String,
    },

    #[error("{run} run did not conclude successfully: conclusion={conclusion}")]
    RunNotSuccessful { run: RunKind, conclusion: String },

    #[error("required deploy job `{job}` is missing")]
    RequiredJobMissing { job: String },

    #[error("required deploy job `{job}` did not succeed: conclusion={conclusion}")]
    RequiredJobFailed { job: String, conclusion: String },

    #[error("required artifact `{name}` is missing on ci run")]
    ArtifactMissing { name: String },

    #[error("required artifact `{name}` has expired on ci run")]
    ArtifactExpired { name: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunKind {
    Ci,
    Deploy,
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunKind::Ci => f.write_str("ci"),
            RunKind::Deploy => f.write_str("deploy"),
        }
    }
}

fn join_violations(violations: &[RemoteViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_message_carries_expected_and_actual() {
        let err = EvidenceError::integrity("current/tests/sos-e2e.json", "aa", "bb");
        assert_eq!(
            err.to_string(),
            "integrity error: current/tests/sos-e2e.json: expected=aa actual=bb"
        );
        assert_eq!(err.kind(), "integrity");
    }

    #[test]
    fn remote_verification_lists_every_violation() {
        let err = EvidenceError::RemoteVerification {
            violations: vec![
                RemoteViolation::RequiredJobMissing { job: "Deploy API".into() },
                RemoteViolation::RequiredJobFailed {
                    job: "Deploy worker".into(),
                    conclusion: "failure".into(),
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("`Deploy API` is missing"));
        assert!(msg.contains("`Deploy worker` did not succeed: conclusion=failure"));
    }
}
