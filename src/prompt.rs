//! Prompt templates for the edit and expansion pipelines
//!
//! The content contracts in the edit prompt (keep imports, export new
//! top-level constructs) are load-bearing: downstream repositories break in
//! confusing ways when a model silently drops an import, so the wording here
//! should not be reworded casually.

use crate::util::truncate;

/// Upper bound on blueprint items requested (and accepted) per seed file.
pub const MAX_PLAN_FILES: usize = 8;

/// Cap on seed file content embedded in a planning prompt.
const MAX_SEED_CHARS: usize = 12_000;

/// A system/user prompt pair.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Directive prompt for rewriting one existing file under an instruction.
pub fn edit_file(instruction: &str, path: &str, original: &str) -> Prompt {
    let system = "You are a code editing assistant. You rewrite one file at a time.\n\
         Output ONLY the complete replacement file content. No explanations, \
         no markdown fences, no commentary.\n\
         Do not remove any existing import or dependency declarations.\n\
         Any new top-level construct you introduce must be exported."
        .to_string();

    let user = format!(
        "File: {path}\n\nInstruction: {instruction}\n\nCurrent content:\n{original}"
    );

    Prompt { system, user }
}

/// Prompt for generating a brand-new file planned from a seed file.
pub fn new_file(
    goal: &str,
    seed_path: &str,
    seed_content: &str,
    description: &str,
    new_path: &str,
) -> Prompt {
    let system = "You are a code generation assistant. You write one complete new file.\n\
         Output ONLY the full file content. No explanations, no markdown fences, \
         no commentary."
        .to_string();

    let user = format!(
        "Goal: {goal}\n\nCreate the file {new_path}, planned alongside {seed_path}.\n\
         Purpose of this file: {description}\n\nContent of {seed_path} for context:\n{}",
        clip(seed_content, MAX_SEED_CHARS)
    );

    Prompt { system, user }
}

/// Planning prompt: ask for a bounded list of new-file blueprints anchored to
/// one seed file's directory.
pub fn plan_files(goal: &str, seed_path: &str, seed_content: &str) -> Prompt {
    let system = format!(
        "You are a software architect. Given a goal and one existing file, \
         propose the new files to create next to it.\n\
         Respond with a JSON object of exactly this shape:\n\
         {{\"files\": [{{\"filePath\": \"relative/path.ext\", \"description\": \"what it does\"}}]}}\n\
         Paths are relative to the seed file's directory. Propose at most {MAX_PLAN_FILES} \
         files. Output ONLY the JSON object."
    );

    let user = format!(
        "Goal: {goal}\n\nSeed file: {seed_path}\n\nSeed content:\n{}",
        clip(seed_content, MAX_SEED_CHARS)
    );

    Prompt { system, user }
}

/// Commit message for an AI edit to an existing file.
pub fn edit_commit_message(instruction: &str, path: &str) -> String {
    format!("fanout: {} ({})", truncate(instruction, 60), path)
}

/// Commit message for a planned new file.
pub fn new_file_commit_message(path: &str) -> String {
    format!("fanout: add {}", path)
}

/// Keep beginning and end of oversized content, marking the cut.
fn clip(content: &str, max_chars: usize) -> String {
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let head: String = content.chars().take(max_chars / 2).collect();
    let tail_rev: String = content.chars().rev().take(max_chars / 2).collect();
    let tail: String = tail_rev.chars().rev().collect();
    format!("{}\n\n... [truncated] ...\n\n{}", head, tail)
}
