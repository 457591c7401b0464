//! fanout: fan one AI edit instruction across many repository files.
//!
//! The core loop: pick files, send each one to a model with the same
//! instruction, stream the replacement content back, and commit every changed
//! file with optimistic concurrency. A bounded scheduler keeps at most a
//! handful of generations in flight; each file succeeds, skips, or fails on
//! its own. Expansion runs invert the flow: plan new files from seed files,
//! then generate and commit each planned file.

pub mod config;
pub mod error;
pub mod expand;
pub mod github;
pub mod job;
pub mod llm;
pub mod orchestrator;
pub mod pipeline;
pub mod prompt;
pub mod scheduler;
pub mod util;

#[cfg(test)]
mod testing;
