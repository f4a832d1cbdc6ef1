//! Chat-completion client surface shared by the Codex telemetry crates.
mod openai;
pub mod retry;
mod types;

pub use openai::{OpenAiClient, OpenAiConfig};
pub use types::{
    AiError, ChatRequest, ChatResponse, ChatUsage, LlmClient, Message, MessageRole,
    StreamDeltaHandler,
};
