//! Per-job pipeline: fetch, generate, normalize, commit
//!
//! Each job runs this end to end inside its own scheduler slot. The pipeline
//! only ever touches its own job on the board, reports terminal failures
//! through `JobBoard::fail`, and never lets an error cross into another job.

use crate::error::OrchestratorError;
use crate::github::{CommitRequest, SourceControl};
use crate::job::{Job, JobBoard, JobOrigin, JobStatus};
use crate::llm::parse::normalize_candidate;
use crate::llm::Completion;
use crate::prompt;
use std::sync::Arc;

/// Whether a candidate identical to the fetched content is a skip or not.
/// Edits compare against the file they read; blueprint jobs have no prior
/// content to compare against, so they commit anything non-empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitPolicy {
    SkipIfUnchanged,
    AlwaysUnlessEmpty,
}

/// Everything a job needs that is shared across the run.
pub struct PipelineContext<G, C> {
    pub gateway: Arc<G>,
    pub completion: Arc<C>,
    pub board: Arc<JobBoard>,
    pub branch: String,
    /// The user's edit instruction, or the expansion goal for blueprint runs.
    pub instruction: String,
}

impl<G, C> Clone for PipelineContext<G, C> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            completion: Arc::clone(&self.completion),
            board: Arc::clone(&self.board),
            branch: self.branch.clone(),
            instruction: self.instruction.clone(),
        }
    }
}

/// Run one job to a terminal state. Never returns an error; failures land on
/// the board against this job alone.
pub async fn run_job<G: SourceControl, C: Completion>(ctx: PipelineContext<G, C>, job: Job) {
    let id = job.id.clone();
    if let Err(e) = execute(&ctx, job).await {
        ctx.board.fail(&id, e.to_string());
    }
}

async fn execute<G: SourceControl, C: Completion>(
    ctx: &PipelineContext<G, C>,
    job: Job,
) -> Result<(), OrchestratorError> {
    let id = job.id.clone();
    ctx.board.set_status(&id, JobStatus::Generating);

    // Fetch the source material and build the prompt. Edits read the target
    // file itself; blueprint jobs read their seed file for context.
    let (prompt, policy, revision, message) = match &job.origin {
        JobOrigin::Edit => {
            let snapshot = ctx
                .gateway
                .get_file(&id.repo, &id.path, &ctx.branch)
                .await?;
            let prompt = prompt::edit_file(&ctx.instruction, &id.path, &snapshot.content);
            let message = prompt::edit_commit_message(&ctx.instruction, &id.path);
            (
                prompt,
                CommitPolicy::SkipIfUnchanged,
                Some((snapshot.revision, snapshot.content)),
                message,
            )
        }
        JobOrigin::Blueprint {
            seed_path,
            description,
        } => {
            let seed = ctx
                .gateway
                .get_file(&id.repo, seed_path, &ctx.branch)
                .await?;
            let prompt = prompt::new_file(
                &ctx.instruction,
                seed_path,
                &seed.content,
                description,
                &id.path,
            );
            let message = prompt::new_file_commit_message(&id.path);
            (prompt, CommitPolicy::AlwaysUnlessEmpty, None, message)
        }
    };

    let board = Arc::clone(&ctx.board);
    let fragment_id = id.clone();
    let mut sink = move |text: &str| board.append_fragment(&fragment_id, text);
    let raw = ctx
        .completion
        .complete_streaming(&prompt, &mut sink)
        .await?;

    let candidate = normalize_candidate(&raw);
    if candidate.is_empty() {
        return Err(OrchestratorError::Generation(
            "AI returned empty content".to_string(),
        ));
    }

    if policy == CommitPolicy::SkipIfUnchanged {
        if let Some((_, ref original)) = revision {
            if candidate.trim() == original.trim() {
                ctx.board.set_status(&id, JobStatus::Skipped);
                return Ok(());
            }
        }
    }

    ctx.board.set_content(&id, candidate.clone());
    ctx.board.set_status(&id, JobStatus::Committing);

    let request = CommitRequest {
        repo: id.repo.clone(),
        branch: ctx.branch.clone(),
        path: id.path.clone(),
        content: candidate,
        message,
        revision: revision.map(|(sha, _)| sha),
    };
    let new_revision = ctx.gateway.put_file(&request).await?;
    ctx.board.record_commit(&id, new_revision);
    Ok(())
}
