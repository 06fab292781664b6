//! Provider collaborators for the learning core
//!
//! The LLM provider is called by the evolution engine and by retraining
//! executors; it is never implemented here beyond a thin HTTP client.

pub mod llm;

pub use llm::{GenerateOptions, LlmClient, LlmConfig, LlmProvider};
