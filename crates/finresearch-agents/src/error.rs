use std::fmt;
use std::time::Duration;

use finresearch_models::{RunAggregate, StageName};
use thiserror::Error;

/// One field-level validation failure.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FieldIssue {
    /// Dotted path to the field, e.g. `risks_opportunities.risks[2]`.
    pub path: String,
    pub problem: String,
}

impl FieldIssue {
    pub fn new(path: impl Into<String>, problem: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            problem: problem.into(),
        }
    }
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.problem)
        } else {
            write!(f, "{}: {}", self.path, self.problem)
        }
    }
}

fn join_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Completion transport error: {0}")]
    Transport(String),

    #[error("Completion timed out after {0:?}")]
    Timeout(Duration),

    #[error("No structured data found in reply (length={})", .raw.len())]
    DecodeExhausted { raw: String },

    #[error("Reply failed {contract} validation: {}", join_issues(.issues))]
    Validation {
        contract: String,
        issues: Vec<FieldIssue>,
        raw: String,
    },

    #[error("Stage {stage} failed: {source}")]
    StageFailure {
        stage: StageName,
        #[source]
        source: Box<AgentError>,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persist(String),

    #[error("Data error: {0}")]
    Data(#[from] finresearch_data::DataError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Transport-class errors are eligible for stage retry.
    pub fn is_transport(&self) -> bool {
        matches!(self, AgentError::Transport(_) | AgentError::Timeout(_))
    }

    /// The error that caused a stage failure, or `self`.
    pub fn root(&self) -> &AgentError {
        match self {
            AgentError::StageFailure { source, .. } => source.root(),
            other => other,
        }
    }
}

/// A run that ended without completing. The aggregate has already been
/// persisted (or a persistence error was logged).
#[derive(Error, Debug)]
#[error("Run {} for {} ended {}: {error}", .aggregate.run_id, .aggregate.subject, .aggregate.status)]
pub struct RunFailure {
    pub aggregate: Box<RunAggregate>,
    #[source]
    pub error: AgentError,
}
