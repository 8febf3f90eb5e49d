//! The six pipeline workers.
//!
//! Each worker owns one `AgentClient`, and with it one conversation window.
//! Workers are built fresh for every run from a shared `WorkerContext`.

mod analyst;
mod collector;
mod fact_checker;
mod planner;
mod researcher;
mod writer;

use std::sync::Arc;

use async_trait::async_trait;
use finresearch_data::{MarketData, WebSearch};
use finresearch_models::{
    AgentsConfig, AnalysisResults, CollectedData, DataConfig, Dataset, ReportDraft, ResearchPlan,
    ResearchResults,
};
use serde::Serialize;

use crate::client::{AgentClient, AgentSettings};
use crate::completion::CompletionEndpoint;
use crate::error::AgentError;
use crate::telemetry::TelemetrySink;

pub use analyst::Analyst;
pub use collector::DataCollector;
pub use fact_checker::{ensure_sources, validate_data, FactChecker};
pub use planner::Planner;
pub use researcher::{research_queries, ResearchQuery, Researcher};
pub use writer::{compile_report, ReportWriter};

/// A worker's result plus the notes explaining any degradation.
///
/// Non-empty notes mark the stage `partial`.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput<T> {
    pub value: T,
    pub notes: Vec<String>,
}

impl<T> StageOutput<T> {
    pub fn new(value: T, notes: Vec<String>) -> Self {
        Self { value, notes }
    }

    pub fn is_partial(&self) -> bool {
        !self.notes.is_empty()
    }
}

/// One pipeline stage.
#[async_trait]
pub trait Worker: Send {
    type Input: Send + Sync;
    type Output: Serialize + Send;

    fn name(&self) -> &str;

    /// A single attempt. Transport errors propagate so the caller can retry.
    async fn process(
        &mut self,
        input: &Self::Input,
    ) -> Result<StageOutput<Self::Output>, AgentError>;
}

/// Everything a worker needs to build its client and reach its collaborators.
#[derive(Clone)]
pub struct WorkerContext {
    pub endpoint: Arc<dyn CompletionEndpoint>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub settings: AgentSettings,
    pub market: Arc<dyn MarketData>,
    pub search: Arc<dyn WebSearch>,
    pub agents: AgentsConfig,
    pub data: DataConfig,
}

impl WorkerContext {
    pub fn client(&self, name: &str, role: &str) -> AgentClient {
        AgentClient::new(
            name,
            role,
            self.endpoint.clone(),
            self.settings.clone(),
            self.telemetry.clone(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct PlanInput {
    pub subject: String,
}

#[derive(Debug, Clone)]
pub struct CollectInput {
    pub subject: String,
    pub plan: ResearchPlan,
}

#[derive(Debug, Clone)]
pub struct ResearchInput {
    pub subject: String,
    pub plan: ResearchPlan,
    pub company_profile: Dataset,
}

#[derive(Debug, Clone)]
pub struct AnalyzeInput {
    pub subject: String,
    pub plan: ResearchPlan,
    pub data: CollectedData,
    pub research: ResearchResults,
}

#[derive(Debug, Clone)]
pub struct ReportInput {
    pub subject: String,
    pub plan: ResearchPlan,
    pub company_profile: Dataset,
    pub analysis: AnalysisResults,
    pub research: ResearchResults,
}

#[derive(Debug, Clone)]
pub struct FactCheckInput {
    pub subject: String,
    pub report: ReportDraft,
    pub data: CollectedData,
    pub analysis: AnalysisResults,
    pub research: ResearchResults,
}

/// Company name from the first profile row, if the profile was fetched.
pub(crate) fn profile_name(profile: &Dataset) -> Option<String> {
    profile
        .rows()
        .first()
        .and_then(|row| row.get("companyName"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::test_support::{MemorySink, ScriptedEndpoint, StaticMarketData, StaticSearch};

    pub fn context(endpoint: ScriptedEndpoint) -> (WorkerContext, Arc<ScriptedEndpoint>) {
        context_with(endpoint, StaticMarketData::new(), StaticSearch::new())
    }

    pub fn context_with(
        endpoint: ScriptedEndpoint,
        market: StaticMarketData,
        search: StaticSearch,
    ) -> (WorkerContext, Arc<ScriptedEndpoint>) {
        let endpoint = Arc::new(endpoint);
        let ctx = WorkerContext {
            endpoint: endpoint.clone(),
            telemetry: Arc::new(MemorySink::new()),
            settings: AgentSettings::default(),
            market: Arc::new(market),
            search: Arc::new(search),
            agents: AgentsConfig::default(),
            data: DataConfig::default(),
        };
        (ctx, endpoint)
    }

    #[test]
    fn notes_mark_partial() {
        assert!(!StageOutput::new(1, vec![]).is_partial());
        assert!(StageOutput::new(1, vec!["x".to_string()]).is_partial());
    }

    #[test]
    fn profile_name_skips_blank() {
        let profile = Dataset::ok(
            serde_json::json!([{"companyName": " "}]),
            finresearch_models::SourceAttribution::now("t", "profile/ACME"),
        );
        assert_eq!(profile_name(&profile), None);
        assert_eq!(profile_name(&Dataset::failed("404")), None);
    }
}
