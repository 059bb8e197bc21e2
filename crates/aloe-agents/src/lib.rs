//! Capabilities that talk to the outside world: the reasoning service,
//! the ticket tracker, the wiki and the log store.

pub mod actions;
pub mod capability;
pub mod clients;
pub mod llm;
pub mod prompts;
pub mod source;

pub use actions::doc::ConfluenceAgent;
pub use actions::filters::FilterAgent;
pub use actions::jira::JiraDraftAgent;
pub use capability::{LlmClassifier, LlmDecision, LlmRefiner};
pub use clients::{ConfluenceClient, JiraClient};
pub use llm::{ChatModel, LlmClient, LlmError, LlmUsage};
