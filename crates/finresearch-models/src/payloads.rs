use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::attribution::SourceAttribution;
use crate::contracts::{
    AnalystInsights, CitationReview, DataCollectionPlan, ResearchAnalysis, ResearchPlan,
};

/// One market-data response: records plus attribution, or an inline error marker.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Dataset {
    /// Raw records as returned by the provider (usually an array of objects).
    #[serde(default)]
    pub records: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceAttribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Dataset {
    pub fn ok(records: serde_json::Value, source: SourceAttribution) -> Self {
        Self {
            records,
            source: Some(source),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            records: serde_json::Value::Null,
            source: None,
            error: Some(error.into()),
        }
    }

    /// True when the fetch succeeded and returned at least one record.
    pub fn is_available(&self) -> bool {
        if self.error.is_some() {
            return false;
        }
        match &self.records {
            serde_json::Value::Null => false,
            serde_json::Value::Array(items) => !items.is_empty(),
            serde_json::Value::Object(map) => !map.is_empty(),
            _ => true,
        }
    }

    /// Records as a slice of rows; a single object is treated as one row.
    pub fn rows(&self) -> Vec<&serde_json::Value> {
        match &self.records {
            serde_json::Value::Array(items) => items.iter().collect(),
            serde_json::Value::Object(_) => vec![&self.records],
            _ => vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub link: String,
    pub snippet: String,
    pub source: String,
}

/// PLAN stage output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanOutput {
    pub plan: ResearchPlan,
    pub company_profile: Dataset,
}

/// COLLECT stage output: every dataset keyed by name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectedData {
    pub subject: String,
    pub data_plan: DataCollectionPlan,
    #[serde(default)]
    pub datasets: BTreeMap<String, Dataset>,
    /// Competitor ticker -> dataset name -> dataset.
    #[serde(default)]
    pub competitors: BTreeMap<String, BTreeMap<String, Dataset>>,
}

impl CollectedData {
    /// A dataset by name, only when it holds records.
    pub fn dataset(&self, name: &str) -> Option<&Dataset> {
        self.datasets.get(name).filter(|d| d.is_available())
    }

    /// All attributions carried by the collected datasets, subject first.
    pub fn sources(&self) -> Vec<&SourceAttribution> {
        self.datasets
            .values()
            .chain(self.competitors.values().flat_map(|m| m.values()))
            .filter_map(|d| d.source.as_ref())
            .collect()
    }
}

/// One web search issued by the researcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchFinding {
    /// Research topic, e.g. "company_overview".
    pub topic: String,
    pub query: String,
    #[serde(default)]
    pub hits: Vec<SearchHit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceAttribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// RESEARCH stage output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResearchResults {
    pub subject: String,
    pub company_name: String,
    #[serde(default)]
    pub findings: Vec<ResearchFinding>,
    pub analysis: ResearchAnalysis,
}

impl ResearchResults {
    pub fn sources(&self) -> Vec<&SourceAttribution> {
        self.findings
            .iter()
            .filter_map(|f| f.source.as_ref())
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IncomeMetrics {
    pub revenue: Option<Decimal>,
    pub net_income: Option<Decimal>,
    pub revenue_growth: Option<Decimal>,
    pub net_income_growth: Option<Decimal>,
    pub gross_margin: Option<Decimal>,
    pub operating_margin: Option<Decimal>,
    pub profit_margin: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BalanceSheetMetrics {
    pub total_assets: Option<Decimal>,
    pub total_liabilities: Option<Decimal>,
    pub current_ratio: Option<Decimal>,
    pub debt_to_assets: Option<Decimal>,
    pub equity_ratio: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CashFlowMetrics {
    pub operating_cash_flow: Option<Decimal>,
    pub capital_expenditure: Option<Decimal>,
    pub free_cash_flow: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
}

/// Summary of one technical indicator series. Failed or empty series carry
/// only `error`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IndicatorSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_value: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_value: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recent_trend: Option<Trend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IndicatorSummary {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Computed ratios. A section is `None` when its statement was not collected.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FinancialMetrics {
    pub income: Option<IncomeMetrics>,
    pub balance_sheet: Option<BalanceSheetMetrics>,
    pub cash_flow: Option<CashFlowMetrics>,
    /// Indicator name (e.g. "rsi") -> summary.
    #[serde(default)]
    pub technical: BTreeMap<String, IndicatorSummary>,
}

/// Peer company summary built from its profile and latest key metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CompetitorSummary {
    pub company_name: Option<String>,
    pub sector: Option<String>,
    pub market_cap: Option<Decimal>,
    /// Latest key-metrics row as returned by the provider.
    #[serde(default)]
    pub key_metrics: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Provider data passed through to analysis and writing without computation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MarketSnapshot {
    /// Latest key-metrics row, `null` when unavailable.
    #[serde(default)]
    pub key_metrics: serde_json::Value,
    /// Latest financial-ratios row, `null` when unavailable.
    #[serde(default)]
    pub financial_ratios: serde_json::Value,
    pub latest_close: Option<Decimal>,
    #[serde(default)]
    pub competitors: BTreeMap<String, CompetitorSummary>,
}

/// ANALYZE stage output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResults {
    pub subject: String,
    pub metrics: FinancialMetrics,
    #[serde(default)]
    pub market: MarketSnapshot,
    pub insights: AnalystInsights,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportSection {
    pub key: String,
    pub title: String,
    pub content: String,
}

/// REPORT stage output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportDraft {
    pub title: String,
    pub markdown: String,
    #[serde(default)]
    pub sections: Vec<ReportSection>,
}

/// Rule-based checks over the collected data.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataValidation {
    pub is_valid: bool,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CitationQuality {
    Good,
    Fair,
    Poor,
    #[default]
    Unknown,
}

impl CitationQuality {
    /// Good with no issues, fair under five, poor otherwise.
    pub fn grade(issue_count: usize) -> Self {
        match issue_count {
            0 => CitationQuality::Good,
            1..=4 => CitationQuality::Fair,
            _ => CitationQuality::Poor,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CitationSummary {
    pub quality: CitationQuality,
    pub uncited_count: usize,
    pub incorrect_count: usize,
    pub review: CitationReview,
}

/// FACTCHECK stage output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FactCheckResult {
    pub validation: DataValidation,
    pub citations: CitationSummary,
    /// Final report text with citations and a Sources section.
    pub improved_report: String,
}
