//! gr-core: group-relay core library
//!
//! Configuration loading, the shared error type and the LLM completion
//! client used by the channel crates.

pub mod config;
pub mod error;
pub mod llm;

pub use config::{Config, FacebookConfig, LlmConfig, LlmProvider, ServerConfig};
pub use error::{Error, Result};
pub use llm::{CompletionClient, CompletionOutcome, LlmClient};
