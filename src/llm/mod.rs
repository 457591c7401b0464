//! Completion gateway: client and response normalization.

pub mod client;
pub mod parse;

pub use client::{Completion, FragmentSink, OpenRouterClient};
