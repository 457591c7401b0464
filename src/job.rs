//! Job model and run-scoped event board
//!
//! A job is one target file in one run. The board owns the canonical state
//! and fans every change out to subscribers as events; during a run, exactly
//! one pipeline holds each job, so state transitions never race.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Identifies a job within a run: "{repo}:{path}".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId {
    pub repo: String,
    pub path: String,
}

impl JobId {
    pub fn new(repo: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repo, self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Generating,
    Committing,
    Success,
    Skipped,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Skipped | Self::Failed)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Generating => "generating",
            Self::Committing => "committing",
            Self::Success => "success",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

/// How a job came to exist: editing a file that already exists, or creating
/// one from an expansion blueprint.
#[derive(Debug, Clone)]
pub enum JobOrigin {
    Edit,
    Blueprint {
        seed_path: String,
        description: String,
    },
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub origin: JobOrigin,
    /// Accumulated streamed output while generating; the final candidate once
    /// generation completes.
    pub content: String,
    pub error: Option<String>,
    /// Revision marker of the commit this job produced, if it committed.
    pub committed_revision: Option<String>,
}

impl Job {
    pub fn edit(repo: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: JobId::new(repo, path),
            status: JobStatus::Queued,
            origin: JobOrigin::Edit,
            content: String::new(),
            error: None,
            committed_revision: None,
        }
    }

    pub fn blueprint(
        repo: impl Into<String>,
        path: impl Into<String>,
        seed_path: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: JobId::new(repo, path),
            status: JobStatus::Queued,
            origin: JobOrigin::Blueprint {
                seed_path: seed_path.into(),
                description: description.into(),
            },
            content: String::new(),
            error: None,
            committed_revision: None,
        }
    }
}

/// Terminal-state counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub success: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.success + self.skipped + self.failed
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} skipped, {} failed",
            self.success, self.skipped, self.failed
        )
    }
}

/// Notifications emitted by the board as jobs progress.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Status {
        id: JobId,
        status: JobStatus,
        error: Option<String>,
    },
    /// A streamed chunk of generated content.
    Fragment { id: JobId, text: String },
    /// A commit landed; emitted just before the Success status. Carries the
    /// exact content that was committed so an external view of the file can
    /// refresh from the event alone.
    Committed {
        id: JobId,
        content: String,
        revision: String,
    },
    RunComplete { summary: RunSummary },
}

#[derive(Default)]
struct BoardState {
    jobs: Vec<Job>,
    index: HashMap<JobId, usize>,
    subscribers: Vec<UnboundedSender<JobEvent>>,
}

/// Shared store for one run's jobs. Interior mutability so pipelines can
/// update from worker tasks; the lock is never held across an await.
#[derive(Default)]
pub struct JobBoard {
    state: Mutex<BoardState>,
}

impl JobBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, jobs: Vec<Job>) {
        let mut state = self.state.lock().unwrap();
        for job in jobs {
            let slot = state.jobs.len();
            state.index.insert(job.id.clone(), slot);
            state.jobs.push(job);
        }
    }

    pub fn subscribe(&self) -> UnboundedReceiver<JobEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().unwrap().subscribers.push(tx);
        rx
    }

    pub fn snapshot(&self) -> Vec<Job> {
        self.state.lock().unwrap().jobs.clone()
    }

    pub fn job(&self, id: &JobId) -> Option<Job> {
        let state = self.state.lock().unwrap();
        state.index.get(id).map(|&i| state.jobs[i].clone())
    }

    pub fn set_status(&self, id: &JobId, status: JobStatus) {
        let mut state = self.state.lock().unwrap();
        if let Some(&i) = state.index.get(id) {
            state.jobs[i].status = status.clone();
        }
        Self::emit(
            &mut state,
            JobEvent::Status {
                id: id.clone(),
                status,
                error: None,
            },
        );
    }

    pub fn append_fragment(&self, id: &JobId, text: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(&i) = state.index.get(id) {
            state.jobs[i].content.push_str(text);
        }
        Self::emit(
            &mut state,
            JobEvent::Fragment {
                id: id.clone(),
                text: text.to_string(),
            },
        );
    }

    /// Replace accumulated content with the normalized candidate.
    pub fn set_content(&self, id: &JobId, content: String) {
        let mut state = self.state.lock().unwrap();
        if let Some(&i) = state.index.get(id) {
            state.jobs[i].content = content;
        }
    }

    pub fn fail(&self, id: &JobId, error: String) {
        let mut state = self.state.lock().unwrap();
        if let Some(&i) = state.index.get(id) {
            state.jobs[i].status = JobStatus::Failed;
            state.jobs[i].error = Some(error.clone());
        }
        Self::emit(
            &mut state,
            JobEvent::Status {
                id: id.clone(),
                status: JobStatus::Failed,
                error: Some(error),
            },
        );
    }

    /// Record a successful commit: stores the new revision, emits Committed
    /// with the job's final content, then the Success status.
    pub fn record_commit(&self, id: &JobId, revision: String) {
        let mut state = self.state.lock().unwrap();
        let mut content = String::new();
        if let Some(&i) = state.index.get(id) {
            state.jobs[i].status = JobStatus::Success;
            state.jobs[i].committed_revision = Some(revision.clone());
            content = state.jobs[i].content.clone();
        }
        Self::emit(
            &mut state,
            JobEvent::Committed {
                id: id.clone(),
                content,
                revision,
            },
        );
        Self::emit(
            &mut state,
            JobEvent::Status {
                id: id.clone(),
                status: JobStatus::Success,
                error: None,
            },
        );
    }

    pub fn is_complete(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.jobs.iter().all(|j| j.status.is_terminal())
    }

    pub fn summary(&self) -> RunSummary {
        let state = self.state.lock().unwrap();
        let mut summary = RunSummary::default();
        for job in &state.jobs {
            match job.status {
                JobStatus::Success => summary.success += 1,
                JobStatus::Skipped => summary.skipped += 1,
                JobStatus::Failed => summary.failed += 1,
                _ => {}
            }
        }
        summary
    }

    /// Emit the final RunComplete event and drop all subscribers.
    pub fn complete_run(&self) -> RunSummary {
        let summary = self.summary();
        let mut state = self.state.lock().unwrap();
        Self::emit(
            &mut state,
            JobEvent::RunComplete {
                summary: summary.clone(),
            },
        );
        state.subscribers.clear();
        summary
    }

    fn emit(state: &mut BoardState, event: JobEvent) {
        state
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_display() {
        let id = JobId::new("owner/repo", "src/lib.rs");
        assert_eq!(id.to_string(), "owner/repo:src/lib.rs");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Generating.is_terminal());
        assert!(!JobStatus::Committing.is_terminal());
        assert!(JobStatus::Success.is_terminal());
        assert!(JobStatus::Skipped.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_board_tracks_status_and_summary() {
        let board = JobBoard::new();
        board.attach(vec![
            Job::edit("o/r", "a.rs"),
            Job::edit("o/r", "b.rs"),
            Job::edit("o/r", "c.rs"),
        ]);
        assert!(!board.is_complete());

        let a = JobId::new("o/r", "a.rs");
        let b = JobId::new("o/r", "b.rs");
        let c = JobId::new("o/r", "c.rs");
        board.record_commit(&a, "sha1".to_string());
        board.set_status(&b, JobStatus::Skipped);
        board.fail(&c, "boom".to_string());

        assert!(board.is_complete());
        let summary = board.summary();
        assert_eq!(summary.success, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.to_string(), "1 succeeded, 1 skipped, 1 failed");

        let job = board.job(&a).unwrap();
        assert_eq!(job.committed_revision.as_deref(), Some("sha1"));
    }

    #[test]
    fn test_fragments_accumulate_in_order() {
        let board = JobBoard::new();
        board.attach(vec![Job::edit("o/r", "a.rs")]);
        let id = JobId::new("o/r", "a.rs");
        board.append_fragment(&id, "hello ");
        board.append_fragment(&id, "world");
        assert_eq!(board.job(&id).unwrap().content, "hello world");
    }

    #[test]
    fn test_subscriber_sees_committed_before_success() {
        let board = JobBoard::new();
        board.attach(vec![Job::edit("o/r", "a.rs")]);
        let mut rx = board.subscribe();
        let id = JobId::new("o/r", "a.rs");
        board.set_content(&id, "final body".to_string());
        board.record_commit(&id, "sha9".to_string());

        match rx.try_recv().unwrap() {
            JobEvent::Committed {
                content, revision, ..
            } => {
                assert_eq!(content, "final body");
                assert_eq!(revision, "sha9");
            }
            other => panic!("expected Committed, got {:?}", other),
        }
        match rx.try_recv().unwrap() {
            JobEvent::Status { status, .. } => assert_eq!(status, JobStatus::Success),
            other => panic!("expected Status, got {:?}", other),
        }
    }

    #[test]
    fn test_complete_run_notifies_and_drops_subscribers() {
        let board = JobBoard::new();
        board.attach(vec![Job::edit("o/r", "a.rs")]);
        board.set_status(&JobId::new("o/r", "a.rs"), JobStatus::Skipped);
        let mut rx = board.subscribe();
        let summary = board.complete_run();
        assert_eq!(summary.skipped, 1);

        // skip the earlier events, last one must be RunComplete then closed
        let mut last = None;
        while let Ok(event) = rx.try_recv() {
            last = Some(event);
        }
        assert!(matches!(last, Some(JobEvent::RunComplete { .. })));
    }
}
