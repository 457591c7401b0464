//! Test doubles for the gateway and completion seams.

use crate::error::OrchestratorError;
use crate::github::{
    BranchInfo, CommitRef, CommitRequest, FileSnapshot, PullRequest, RepoDescriptor,
    SourceControl, TreeNode,
};
use crate::llm::client::{Completion, FragmentSink};
use crate::prompt::Prompt;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

type ReplyFn = Box<dyn Fn(&Prompt) -> Result<String, OrchestratorError> + Send + Sync>;

/// In-memory stand-in for GitHub: a flat path -> (content, revision) map with
/// the same optimistic-concurrency behavior as the real contents API.
#[derive(Default)]
pub struct MockGateway {
    files: Mutex<HashMap<String, (String, String)>>,
    commits: Mutex<Vec<CommitRequest>>,
    branches: Mutex<Vec<BranchInfo>>,
    created_branches: Mutex<Vec<String>>,
    pull_requests: Mutex<Vec<(String, String, String)>>,
    /// When set, every read bumps the stored revision afterwards, so any
    /// commit built from that read hits a conflict.
    bump_after_read: AtomicBool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_file(&self, path: &str, content: &str, revision: &str) {
        self.files.lock().unwrap().insert(
            path.to_string(),
            (content.to_string(), revision.to_string()),
        );
    }

    pub fn seed_branch(&self, name: &str, head_sha: &str) {
        self.branches.lock().unwrap().push(BranchInfo {
            name: name.to_string(),
            commit: CommitRef {
                sha: head_sha.to_string(),
            },
        });
    }

    pub fn set_bump_after_read(&self, on: bool) {
        self.bump_after_read.store(on, Ordering::SeqCst);
    }

    pub fn commits(&self) -> Vec<CommitRequest> {
        self.commits.lock().unwrap().clone()
    }

    pub fn created_branches(&self) -> Vec<String> {
        self.created_branches.lock().unwrap().clone()
    }

    pub fn pull_requests(&self) -> Vec<(String, String, String)> {
        self.pull_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceControl for MockGateway {
    async fn list_repositories(&self) -> anyhow::Result<Vec<RepoDescriptor>> {
        Ok(Vec::new())
    }

    async fn list_tree(&self, _repo: &str, _branch: &str) -> anyhow::Result<Vec<TreeNode>> {
        let files = self.files.lock().unwrap();
        Ok(files
            .keys()
            .map(|path| TreeNode {
                path: path.clone(),
                kind: "blob".to_string(),
                size: None,
            })
            .collect())
    }

    async fn get_file(
        &self,
        _repo: &str,
        path: &str,
        _branch: &str,
    ) -> Result<FileSnapshot, OrchestratorError> {
        let mut files = self.files.lock().unwrap();
        let (content, revision) = files
            .get(path)
            .cloned()
            .ok_or_else(|| OrchestratorError::Fetch {
                path: path.to_string(),
                reason: "not found".to_string(),
            })?;
        if self.bump_after_read.load(Ordering::SeqCst) {
            if let Some(entry) = files.get_mut(path) {
                entry.1 = format!("{}-moved", entry.1);
            }
        }
        Ok(FileSnapshot {
            path: path.to_string(),
            content,
            revision,
        })
    }

    async fn put_file(&self, req: &CommitRequest) -> Result<String, OrchestratorError> {
        let mut files = self.files.lock().unwrap();
        if let Some(expected) = &req.revision {
            let current = files.get(&req.path).map(|(_, rev)| rev.clone());
            if current.as_ref() != Some(expected) {
                return Err(OrchestratorError::CommitConflict {
                    path: req.path.clone(),
                });
            }
        }
        let mut commits = self.commits.lock().unwrap();
        let new_revision = format!("commit-{}", commits.len() + 1);
        files.insert(
            req.path.clone(),
            (req.content.clone(), new_revision.clone()),
        );
        commits.push(req.clone());
        Ok(new_revision)
    }

    async fn list_branches(&self, _repo: &str) -> anyhow::Result<Vec<BranchInfo>> {
        Ok(self.branches.lock().unwrap().clone())
    }

    async fn create_branch(&self, _repo: &str, name: &str, from_sha: &str) -> anyhow::Result<()> {
        self.created_branches.lock().unwrap().push(name.to_string());
        self.branches.lock().unwrap().push(BranchInfo {
            name: name.to_string(),
            commit: CommitRef {
                sha: from_sha.to_string(),
            },
        });
        Ok(())
    }

    async fn create_pull_request(
        &self,
        _repo: &str,
        title: &str,
        _body: &str,
        head: &str,
        base: &str,
    ) -> anyhow::Result<PullRequest> {
        let mut prs = self.pull_requests.lock().unwrap();
        prs.push((title.to_string(), head.to_string(), base.to_string()));
        Ok(PullRequest {
            number: prs.len() as u64,
            url: format!("https://example.test/pull/{}", prs.len()),
        })
    }
}

/// Scripted completion: a reply function plus an optional chunk size for
/// exercising the streaming path.
pub struct MockCompletion {
    reply: ReplyFn,
    chunk_size: usize,
}

impl MockCompletion {
    pub fn fixed(reply: &str) -> Self {
        let reply = reply.to_string();
        Self {
            reply: Box::new(move |_| Ok(reply.clone())),
            chunk_size: 0,
        }
    }

    pub fn with_reply(
        f: impl Fn(&Prompt) -> Result<String, OrchestratorError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            reply: Box::new(f),
            chunk_size: 0,
        }
    }

    /// Stream replies in `n`-character fragments instead of one shot.
    pub fn with_chunk_size(mut self, n: usize) -> Self {
        self.chunk_size = n;
        self
    }
}

#[async_trait]
impl Completion for MockCompletion {
    async fn complete(&self, prompt: &Prompt) -> Result<String, OrchestratorError> {
        (self.reply)(prompt)
    }

    async fn complete_streaming(
        &self,
        prompt: &Prompt,
        on_fragment: FragmentSink<'_>,
    ) -> Result<String, OrchestratorError> {
        let full = (self.reply)(prompt)?;
        if self.chunk_size == 0 {
            if !full.is_empty() {
                on_fragment(&full);
            }
        } else {
            let chars: Vec<char> = full.chars().collect();
            for chunk in chars.chunks(self.chunk_size) {
                let piece: String = chunk.iter().collect();
                on_fragment(&piece);
            }
        }
        Ok(full)
    }

    async fn complete_structured(&self, prompt: &Prompt) -> Result<String, OrchestratorError> {
        (self.reply)(prompt)
    }
}
