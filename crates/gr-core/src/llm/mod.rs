//! LLM completion client and wire types
//!
//! Supports OpenAI-compatible chat completions and the Claude Messages API.

mod client;
mod types;

pub use client::{CompletionClient, CompletionOutcome, LlmClient};
pub use types::*;
