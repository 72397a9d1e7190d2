//! llm-client: Shared library for talking to a local Ollama instance
//!
//! Provides:
//! - Configuration loading (droid.toml)
//! - Ollama chat API client with tool-calling support

pub mod config;
pub mod ollama;

pub use config::Config;
pub use ollama::{
    ChatBackend, ChatMessage, ChatResponse, FunctionCall, FunctionDefinition, OllamaClient,
    ResponseMessage, Role, ToolCall, ToolDefinition,
};
