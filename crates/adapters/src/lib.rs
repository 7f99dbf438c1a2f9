//! Concrete `LlmClient`/`CliClient` implementations that talk to the real
//! OpenAI Responses API and the `codex` CLI.

pub mod codex;
pub mod llm;

pub use codex::CodexAdapter;
pub use llm::OpenAiAdapter;
