//! Run-level orchestration
//!
//! Ties the pieces together: builds the job set, drains it through the
//! bounded scheduler, and handles the run-scoped source-control ceremony
//! (branching and pull requests for bulk runs). One orchestrator instance
//! drives one run.

use crate::expand::{self, Blueprint};
use crate::github::{PullRequest, SourceControl};
use crate::job::{Job, JobBoard, JobStatus, RunSummary};
use crate::llm::Completion;
use crate::pipeline::{run_job, PipelineContext};
use crate::scheduler::{self, DEFAULT_CONCURRENCY};
use crate::util::{epoch_secs, slug, truncate};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct EditRequest {
    pub repo: String,
    pub branch: String,
    pub instruction: String,
    pub paths: Vec<String>,
}

pub struct ExpandRequest {
    pub repo: String,
    pub branch: String,
    pub goal: String,
    pub seeds: Vec<String>,
}

/// Result of a bulk run: the working branch, the terminal counts, and the
/// pull request if any commit landed.
#[derive(Debug)]
pub struct BulkOutcome {
    pub branch: String,
    pub summary: RunSummary,
    pub pull_request: Option<PullRequest>,
}

/// Result of an expansion run, including the seeds that failed to plan.
#[derive(Debug)]
pub struct ExpandOutcome {
    pub summary: RunSummary,
    pub seed_failures: Vec<(String, String)>,
}

pub struct Orchestrator<G, C> {
    gateway: Arc<G>,
    completion: Arc<C>,
    pub board: Arc<JobBoard>,
    concurrency: usize,
    cancel: CancellationToken,
}

impl<G: SourceControl + 'static, C: Completion + 'static> Orchestrator<G, C> {
    pub fn new(gateway: G, completion: C) -> Self {
        Self {
            gateway: Arc::new(gateway),
            completion: Arc::new(completion),
            board: Arc::new(JobBoard::new()),
            concurrency: DEFAULT_CONCURRENCY,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Token shared with the runner; cancel it to stop dequeuing new jobs.
    /// Jobs already in flight finish normally.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Edit the given files in place on `branch`, one job per file.
    pub async fn multi_file_edit(&self, req: EditRequest) -> RunSummary {
        let jobs = dedup_paths(req.paths)
            .into_iter()
            .map(|path| Job::edit(&req.repo, path))
            .collect();
        self.board.attach(jobs);
        self.run(&req.branch, &req.instruction).await
    }

    /// Edit the given files on a fresh working branch cut from `req.branch`,
    /// opening a pull request back into it if any commit lands.
    pub async fn bulk_edit(&self, req: EditRequest) -> anyhow::Result<BulkOutcome> {
        let branches = self.gateway.list_branches(&req.repo).await?;
        let base_sha = branches
            .iter()
            .find(|b| b.name == req.branch)
            .map(|b| b.commit.sha.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("base branch '{}' not found in {}", req.branch, req.repo)
            })?;

        let work_branch = format!("fanout/{}-{}", slug(&req.instruction, 32), epoch_secs());
        self.gateway
            .create_branch(&req.repo, &work_branch, &base_sha)
            .await?;

        let jobs = dedup_paths(req.paths)
            .into_iter()
            .map(|path| Job::edit(&req.repo, path))
            .collect();
        self.board.attach(jobs);
        let summary = self.run(&work_branch, &req.instruction).await;

        let pull_request = if summary.success > 0 {
            let title = truncate(&req.instruction, 72);
            let body = format!(
                "Applied across {} file(s): {}\n\n{}",
                summary.total(),
                req.instruction,
                summary
            );
            Some(
                self.gateway
                    .create_pull_request(&req.repo, &title, &body, &work_branch, &req.branch)
                    .await?,
            )
        } else {
            None
        };

        Ok(BulkOutcome {
            branch: work_branch,
            summary,
            pull_request,
        })
    }

    /// Plan new files from the seeds, then generate and commit each planned
    /// file in place on `branch`.
    pub async fn expand(&self, req: ExpandRequest) -> anyhow::Result<ExpandOutcome> {
        let outcome = expand::plan(
            self.gateway.as_ref(),
            self.completion.as_ref(),
            &req.repo,
            &req.branch,
            &req.goal,
            &req.seeds,
        )
        .await?;

        let jobs = outcome
            .blueprints
            .into_iter()
            .map(|Blueprint { path, seed_path, description }| {
                Job::blueprint(&req.repo, path, seed_path, description)
            })
            .collect();
        self.board.attach(jobs);
        let summary = self.run(&req.branch, &req.goal).await;

        Ok(ExpandOutcome {
            summary,
            seed_failures: outcome.seed_failures,
        })
    }

    async fn run(&self, branch: &str, instruction: &str) -> RunSummary {
        let queued: Vec<Job> = self
            .board
            .snapshot()
            .into_iter()
            .filter(|j| j.status == JobStatus::Queued)
            .collect();

        let ctx = PipelineContext {
            gateway: Arc::clone(&self.gateway),
            completion: Arc::clone(&self.completion),
            board: Arc::clone(&self.board),
            branch: branch.to_string(),
            instruction: instruction.to_string(),
        };
        scheduler::drain(queued, self.concurrency, self.cancel.clone(), move |job| {
            run_job(ctx.clone(), job)
        })
        .await;

        // Anything still non-terminal was either never dequeued (cancel) or
        // its worker died before reaching a terminal write.
        let cancelled = self.cancel.is_cancelled();
        for job in self.board.snapshot() {
            if !job.status.is_terminal() {
                let reason = if cancelled && job.status == JobStatus::Queued {
                    "cancelled before start"
                } else {
                    "pipeline ended without a result"
                };
                self.board.fail(&job.id, reason.to_string());
            }
        }
        self.board.complete_run()
    }
}

fn dedup_paths(paths: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    paths
        .into_iter()
        .filter(|p| seen.insert(p.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobId;
    use crate::testing::{MockCompletion, MockGateway};

    #[tokio::test]
    async fn test_multi_file_edit_mixed_outcomes() {
        let gateway = MockGateway::new();
        gateway.seed_file("a.rs", "unchanged\n", "s1");
        gateway.seed_file("b.rs", "old b", "s2");
        gateway.seed_file("c.rs", "old c", "s3");
        let completion = MockCompletion::with_reply(|p| {
            if p.user.contains("File: a.rs") {
                Ok("unchanged".to_string())
            } else {
                Ok("rewritten".to_string())
            }
        });
        let orch = Orchestrator::new(gateway, completion);
        let summary = orch
            .multi_file_edit(EditRequest {
                repo: "o/r".to_string(),
                branch: "main".to_string(),
                instruction: "tidy".to_string(),
                paths: vec!["a.rs".into(), "b.rs".into(), "c.rs".into()],
            })
            .await;

        assert_eq!(summary.success, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(orch.gateway.commits().len(), 2);
    }

    #[tokio::test]
    async fn test_failures_stay_isolated_per_file() {
        let gateway = MockGateway::new();
        gateway.seed_file("good.rs", "old", "s1");
        // bad.rs is never seeded, so its fetch fails
        let completion = MockCompletion::fixed("new content");
        let orch = Orchestrator::new(gateway, completion);
        let summary = orch
            .multi_file_edit(EditRequest {
                repo: "o/r".to_string(),
                branch: "main".to_string(),
                instruction: "tidy".to_string(),
                paths: vec!["good.rs".into(), "bad.rs".into()],
            })
            .await;

        assert_eq!(summary.success, 1);
        assert_eq!(summary.failed, 1);
        let failed = orch.board.job(&JobId::new("o/r", "bad.rs")).unwrap();
        assert!(failed.error.is_some());
    }

    #[tokio::test]
    async fn test_bulk_edit_creates_branch_and_pr() {
        let gateway = MockGateway::new();
        gateway.seed_branch("main", "head-sha");
        gateway.seed_file("a.rs", "old", "s1");
        let completion = MockCompletion::fixed("new");
        let orch = Orchestrator::new(gateway, completion);
        let outcome = orch
            .bulk_edit(EditRequest {
                repo: "o/r".to_string(),
                branch: "main".to_string(),
                instruction: "Add header".to_string(),
                paths: vec!["a.rs".into()],
            })
            .await
            .unwrap();

        assert!(outcome.branch.starts_with("fanout/add-header-"));
        assert_eq!(outcome.summary.success, 1);
        let pr = outcome.pull_request.unwrap();
        assert_eq!(pr.number, 1);

        assert_eq!(orch.gateway.created_branches(), vec![outcome.branch.clone()]);
        let commits = orch.gateway.commits();
        assert_eq!(commits[0].branch, outcome.branch);
        let prs = orch.gateway.pull_requests();
        assert_eq!(prs[0].1, outcome.branch);
        assert_eq!(prs[0].2, "main");
    }

    #[tokio::test]
    async fn test_bulk_edit_without_commits_opens_no_pr() {
        let gateway = MockGateway::new();
        gateway.seed_branch("main", "head-sha");
        gateway.seed_file("a.rs", "same\n", "s1");
        let completion = MockCompletion::fixed("same");
        let orch = Orchestrator::new(gateway, completion);
        let outcome = orch
            .bulk_edit(EditRequest {
                repo: "o/r".to_string(),
                branch: "main".to_string(),
                instruction: "noop".to_string(),
                paths: vec!["a.rs".into()],
            })
            .await
            .unwrap();

        assert_eq!(outcome.summary.skipped, 1);
        assert!(outcome.pull_request.is_none());
        assert!(orch.gateway.pull_requests().is_empty());
    }

    #[tokio::test]
    async fn test_bulk_edit_missing_base_branch_errors() {
        let gateway = MockGateway::new();
        let completion = MockCompletion::fixed("x");
        let orch = Orchestrator::new(gateway, completion);
        let err = orch
            .bulk_edit(EditRequest {
                repo: "o/r".to_string(),
                branch: "ghost".to_string(),
                instruction: "x".to_string(),
                paths: vec!["a.rs".into()],
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn test_expand_plans_and_commits_new_files() {
        let gateway = MockGateway::new();
        gateway.seed_file("src/seed.rs", "seed body", "s1");
        let completion = MockCompletion::with_reply(|p| {
            if p.system.contains("software architect") {
                Ok(r#"{"files": [{"filePath": "grown.rs", "description": "d"}]}"#.to_string())
            } else {
                Ok("grown file body".to_string())
            }
        });
        let orch = Orchestrator::new(gateway, completion);
        let outcome = orch
            .expand(ExpandRequest {
                repo: "o/r".to_string(),
                branch: "main".to_string(),
                goal: "grow the module".to_string(),
                seeds: vec!["src/seed.rs".to_string()],
            })
            .await
            .unwrap();

        assert_eq!(outcome.summary.success, 1);
        assert!(outcome.seed_failures.is_empty());
        let commits = orch.gateway.commits();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].path, "src/grown.rs");
        assert!(commits[0].revision.is_none());
        assert_eq!(commits[0].message, "fanout: add src/grown.rs");
    }

    #[tokio::test]
    async fn test_cancelled_run_fails_leftover_jobs() {
        let gateway = MockGateway::new();
        gateway.seed_file("a.rs", "old", "s1");
        gateway.seed_file("b.rs", "old", "s2");
        let completion = MockCompletion::fixed("new");
        let orch = Orchestrator::new(gateway, completion);
        orch.cancel_token().cancel();

        let summary = orch
            .multi_file_edit(EditRequest {
                repo: "o/r".to_string(),
                branch: "main".to_string(),
                instruction: "tidy".to_string(),
                paths: vec!["a.rs".into(), "b.rs".into()],
            })
            .await;

        assert_eq!(summary.failed, 2);
        let job = orch.board.job(&JobId::new("o/r", "a.rs")).unwrap();
        assert!(job.error.unwrap().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_duplicate_paths_collapse_to_one_job() {
        let gateway = MockGateway::new();
        gateway.seed_file("a.rs", "old", "s1");
        let completion = MockCompletion::fixed("new");
        let orch = Orchestrator::new(gateway, completion);
        let summary = orch
            .multi_file_edit(EditRequest {
                repo: "o/r".to_string(),
                branch: "main".to_string(),
                instruction: "tidy".to_string(),
                paths: vec!["a.rs".into(), "a.rs".into()],
            })
            .await;
        assert_eq!(summary.total(), 1);
    }
}
