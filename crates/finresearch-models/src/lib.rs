pub mod attribution;
pub mod config;
pub mod contracts;
pub mod message;
pub mod payloads;
pub mod run;

pub use attribution::SourceAttribution;
pub use config::{
    AgentsConfig, DataConfig, FinResearchConfig, LlmConfig, OutputConfig, RetryConfig,
};
pub use contracts::{
    AnalystInsights, CitationReview, Contract, DataCollectionPlan, OutlineSection,
    ReportOutline, ResearchAnalysis, ResearchPlan, RisksOpportunities,
};
pub use message::{ChatMessage, Role};
pub use payloads::{
    AnalysisResults, BalanceSheetMetrics, CashFlowMetrics, CitationQuality, CitationSummary,
    CollectedData, CompetitorSummary, DataValidation, Dataset, FactCheckResult, FinancialMetrics,
    IncomeMetrics, IndicatorSummary, MarketSnapshot, PlanOutput, ReportDraft, ReportSection,
    ResearchFinding, ResearchResults, SearchHit, Trend,
};
pub use run::{
    ArtifactPaths, RunAggregate, RunFailureInfo, RunStatus, RunSummary, StageName, StageRecord,
    StageStatus,
};
