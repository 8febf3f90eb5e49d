use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Plan,
    Collect,
    Research,
    Analyze,
    Report,
    FactCheck,
}

impl StageName {
    pub const ALL: [StageName; 6] = [
        StageName::Plan,
        StageName::Collect,
        StageName::Research,
        StageName::Analyze,
        StageName::Report,
        StageName::FactCheck,
    ];

    /// Key of the stage output in `RunAggregate::results`.
    pub fn key(&self) -> &'static str {
        match self {
            StageName::Plan => "plan",
            StageName::Collect => "collect",
            StageName::Research => "research",
            StageName::Analyze => "analyze",
            StageName::Report => "report",
            StageName::FactCheck => "fact_check",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StageName::Plan => "PLAN",
            StageName::Collect => "COLLECT",
            StageName::Research => "RESEARCH",
            StageName::Analyze => "ANALYZE",
            StageName::Report => "REPORT",
            StageName::FactCheck => "FACTCHECK",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Ok,
    Partial,
    Failed,
}

/// Immutable record of one completed (or failed) stage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageRecord {
    pub name: StageName,
    /// Prior stages whose outputs were threaded into this stage's input.
    pub inputs: Vec<StageName>,
    pub subject: String,
    pub output: serde_json::Value,
    pub status: StageStatus,
    pub attempts: u32,
    pub elapsed_ms: u64,
    /// Degradation notes; non-empty for partial stages.
    #[serde(default)]
    pub notes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Partial,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunFailureInfo {
    pub stage: StageName,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactPaths {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_path: Option<String>,
    pub results_path: String,
}

/// Everything known about one pipeline run. Persisted at run end on every path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunAggregate {
    pub run_id: Uuid,
    pub subject: String,
    pub started_at: DateTime<Utc>,
    /// Stage records in execution order. Outputs live only here.
    #[serde(default)]
    pub stages: Vec<StageRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailureInfo>,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<ArtifactPaths>,
}

impl RunAggregate {
    pub fn start(subject: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            subject: subject.into(),
            started_at: Utc::now(),
            stages: vec![],
            report: None,
            status: RunStatus::Running,
            failure: None,
            elapsed_ms: 0,
            artifacts: None,
        }
    }

    pub fn push_stage(&mut self, record: StageRecord) {
        self.stages.push(record);
    }

    /// Output of `name`, unless the stage failed or never ran.
    pub fn result(&self, name: StageName) -> Option<&serde_json::Value> {
        self.stages
            .iter()
            .rev()
            .find(|s| s.name == name && s.status != StageStatus::Failed)
            .map(|s| &s.output)
    }

    /// Stage key -> output, for every stage that did not fail.
    pub fn results(&self) -> BTreeMap<&'static str, &serde_json::Value> {
        StageName::ALL
            .iter()
            .filter_map(|name| self.result(*name).map(|output| (name.key(), output)))
            .collect()
    }

    pub fn stage(&self, name: StageName) -> Option<&StageRecord> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn has_partial_stage(&self) -> bool {
        self.stages.iter().any(|s| s.status == StageStatus::Partial)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id,
            subject: self.subject.clone(),
            status: self.status,
            started_at: self.started_at,
            elapsed_ms: self.elapsed_ms,
            failed_stage: self.failure.as_ref().map(|f| f.stage),
            error: self.failure.as_ref().map(|f| f.error.clone()),
            results_path: self.artifacts.as_ref().map(|a| a.results_path.clone()),
        }
    }
}

/// One row of the run ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub subject: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<StageName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results_path: Option<String>,
}

/// Table backing the run ledger.
///
/// ```sql
/// CREATE TABLE IF NOT EXISTS runs (
///     run_id        TEXT PRIMARY KEY,
///     subject       TEXT NOT NULL,
///     status        TEXT NOT NULL,
///     started_at    TEXT NOT NULL,
///     elapsed_ms    INTEGER NOT NULL,
///     failed_stage  TEXT,
///     error         TEXT,
///     results_path  TEXT
/// );
/// ```
pub const RUNS_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS runs (
    run_id        TEXT PRIMARY KEY,
    subject       TEXT NOT NULL,
    status        TEXT NOT NULL,
    started_at    TEXT NOT NULL,
    elapsed_ms    INTEGER NOT NULL,
    failed_stage  TEXT,
    error         TEXT,
    results_path  TEXT
);
CREATE INDEX IF NOT EXISTS idx_runs_subject ON runs(subject);
CREATE INDEX IF NOT EXISTS idx_runs_started ON runs(started_at);
";
