pub mod artifacts;
pub mod client;
pub mod completion;
pub mod error;
pub mod orchestrator;
pub mod parser;
pub mod prompts;
pub mod retry;
pub mod schema;
pub mod telemetry;
pub mod window;
pub mod workers;

pub mod test_support;

pub use artifacts::ArtifactStore;
pub use client::{AgentClient, AgentSettings, Completeness, InvocationOptions, Structured};
pub use completion::{
    CompletionEndpoint, CompletionRequest, CompletionResponse, HttpCompletionEndpoint, TokenUsage,
};
pub use error::{AgentError, FieldIssue, RunFailure};
pub use orchestrator::Orchestrator;
pub use parser::{decode, validate, Decoded, Strategy, ValidationFailure};
pub use retry::{RetryBudget, RetryDecision};
pub use schema::{clean_schema, contract_schema, tool_schema, ToolSchema};
pub use telemetry::{CallOutcome, CallRecord, ChannelSink, MemorySink, TelemetrySink, TracingSink};
pub use window::ConversationWindow;
pub use workers::{StageOutput, Worker, WorkerContext};
