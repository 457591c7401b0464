//! Expansion planning: turn seed files into new-file blueprints
//!
//! For each seed file, an architect prompt asks for a bounded JSON plan of
//! new files to create in the seed's directory. Seeds fail independently; the
//! run only aborts when every seed fails to produce a plan.

use crate::error::OrchestratorError;
use crate::github::SourceControl;
use crate::llm::parse::{extract_json_object, fix_json_issues};
use crate::llm::Completion;
use crate::prompt::{self, MAX_PLAN_FILES};
use serde::Deserialize;
use std::collections::HashSet;

/// One planned new file, with its path already resolved repo-relative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blueprint {
    pub path: String,
    pub seed_path: String,
    pub description: String,
}

/// What planning produced: blueprints from the seeds that worked plus the
/// per-seed failures that did not abort the run.
#[derive(Debug, Default)]
pub struct PlanOutcome {
    pub blueprints: Vec<Blueprint>,
    pub seed_failures: Vec<(String, String)>,
}

#[derive(Deserialize)]
struct PlanJson {
    files: Vec<PlanItemJson>,
}

#[derive(Deserialize)]
struct PlanItemJson {
    #[serde(rename = "filePath", alias = "file_path", alias = "path")]
    file_path: String,
    #[serde(default)]
    description: String,
}

/// Plan new files for every seed. Returns `Planning` only when no seed yields
/// a usable plan.
pub async fn plan<G: SourceControl, C: Completion>(
    gateway: &G,
    completion: &C,
    repo: &str,
    branch: &str,
    goal: &str,
    seeds: &[String],
) -> Result<PlanOutcome, OrchestratorError> {
    let mut outcome = PlanOutcome::default();
    let mut seen: HashSet<String> = seeds.iter().cloned().collect();

    for seed_path in seeds {
        let planned = plan_one(gateway, completion, repo, branch, goal, seed_path).await;
        match planned {
            Ok(blueprints) => {
                for bp in blueprints {
                    if seen.insert(bp.path.clone()) {
                        outcome.blueprints.push(bp);
                    }
                }
            }
            Err(e) => outcome.seed_failures.push((seed_path.clone(), e.to_string())),
        }
    }

    if outcome.blueprints.is_empty() {
        let detail = outcome
            .seed_failures
            .iter()
            .map(|(path, reason)| format!("{}: {}", path, reason))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(OrchestratorError::Planning(format!(
            "architect failed to produce a plan for any seed file ({})",
            detail
        )));
    }
    Ok(outcome)
}

async fn plan_one<G: SourceControl, C: Completion>(
    gateway: &G,
    completion: &C,
    repo: &str,
    branch: &str,
    goal: &str,
    seed_path: &str,
) -> Result<Vec<Blueprint>, OrchestratorError> {
    let seed = gateway.get_file(repo, seed_path, branch).await?;
    let prompt = prompt::plan_files(goal, seed_path, &seed.content);
    let raw = completion.complete_structured(&prompt).await?;
    parse_plan(&raw, seed_path)
}

/// Parse the architect's JSON reply into blueprints anchored at the seed's
/// directory. Tolerates fenced or chatty replies and mild JSON damage.
pub fn parse_plan(raw: &str, seed_path: &str) -> Result<Vec<Blueprint>, OrchestratorError> {
    let json = extract_json_object(raw)
        .ok_or_else(|| OrchestratorError::Planning("reply contained no JSON object".to_string()))?;

    let parsed: PlanJson = serde_json::from_str(json)
        .or_else(|_| serde_json::from_str(&fix_json_issues(json)))
        .map_err(|e| OrchestratorError::Planning(format!("unparseable plan: {}", e)))?;

    if parsed.files.is_empty() {
        return Err(OrchestratorError::Planning(
            "plan listed no files".to_string(),
        ));
    }

    let mut blueprints = Vec::new();
    for item in parsed.files.into_iter().take(MAX_PLAN_FILES) {
        let rel = item.file_path.trim();
        if rel.is_empty() {
            continue;
        }
        blueprints.push(Blueprint {
            path: resolve_relative(seed_path, rel),
            seed_path: seed_path.to_string(),
            description: item.description,
        });
    }
    if blueprints.is_empty() {
        return Err(OrchestratorError::Planning(
            "plan listed only empty paths".to_string(),
        ));
    }
    Ok(blueprints)
}

/// Resolve a plan path relative to the seed file's directory, repo-relative.
/// "." and ".." are honored; ".." never climbs above the repo root.
fn resolve_relative(seed_path: &str, rel: &str) -> String {
    let mut parts: Vec<&str> = match seed_path.rsplit_once('/') {
        Some((dir, _)) => dir.split('/').collect(),
        None => Vec::new(),
    };
    for component in rel.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    parts.join("/")
}
