//! Failure taxonomy for the edit orchestrator
//!
//! Every variant here is caught at the per-job boundary and recorded on the
//! job that hit it; none of them abort the scheduler or other workers. The
//! one run-level failure is `Planning` when every seed file fails to plan.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// File content could not be fetched from source control.
    #[error("failed to fetch {path}: {reason}")]
    Fetch { path: String, reason: String },

    /// The completion call failed or returned unusable output.
    #[error("generation failed: {0}")]
    Generation(String),

    /// The revision marker went stale between fetch and commit. Surfaced as a
    /// normal failed job, never retried automatically.
    #[error("commit conflict on {path}: the file changed since it was read")]
    CommitConflict { path: String },

    /// Any write failure other than a stale revision.
    #[error("failed to commit {path}: {reason}")]
    Commit { path: String, reason: String },

    /// The planning phase produced nothing usable across all seeds.
    #[error("planning failed: {0}")]
    Planning(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_is_distinct_from_commit() {
        let conflict = OrchestratorError::CommitConflict {
            path: "src/lib.rs".to_string(),
        };
        let commit = OrchestratorError::Commit {
            path: "src/lib.rs".to_string(),
            reason: "boom".to_string(),
        };
        assert!(matches!(conflict, OrchestratorError::CommitConflict { .. }));
        assert!(conflict.to_string().contains("conflict"));
        assert!(!commit.to_string().contains("conflict"));
    }
}
