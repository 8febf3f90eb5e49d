//! Named data contracts for structured model output.
//!
//! Each contract is a plain serde struct whose JSON schema (via `schemars`)
//! is offered to the completion endpoint as a function signature and used
//! to validate the reply field by field.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A strongly-typed description of expected structured output.
pub trait Contract: JsonSchema + Serialize + DeserializeOwned + Send + 'static {
    /// Function name offered to the completion endpoint.
    const NAME: &'static str;
    /// Function description offered to the completion endpoint.
    const DESCRIPTION: &'static str;

    /// The contract's self-constructed default, used when a reply cannot be
    /// validated. `None` means the contract has no safe default and a
    /// validation failure must propagate.
    fn fallback() -> Option<Self> {
        None
    }
}

/// Research plan produced by the planner.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ResearchPlan {
    /// Stock ticker symbol.
    pub ticker: String,
    /// Name of the company.
    pub company_name: String,
    /// Research focus areas.
    #[serde(default)]
    pub key_areas: Vec<String>,
    /// Financial metrics to analyze.
    #[serde(default)]
    pub metrics: Vec<String>,
    /// Main competitors to research, as ticker symbols where known.
    #[serde(default)]
    pub competitors: Vec<String>,
    /// Industry-specific factors to investigate.
    #[serde(default)]
    pub industry_factors: Vec<String>,
    /// Key questions the research should answer.
    #[serde(default)]
    pub questions: Vec<String>,
    /// Recommended data sources.
    #[serde(default)]
    pub research_sources: Vec<String>,
}

impl Contract for ResearchPlan {
    const NAME: &'static str = "research_plan";
    const DESCRIPTION: &'static str =
        "Create a structured financial research plan for a company";

    fn fallback() -> Option<Self> {
        Some(Self::default())
    }
}

/// Which market data the collector should fetch.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct DataCollectionPlan {
    /// Statements to collect: income_statement, balance_sheet, cash_flow.
    #[serde(default)]
    pub financial_statements: Vec<String>,
    /// "annual" or "quarter".
    #[serde(default = "default_statement_period")]
    pub statement_period: String,
    /// Number of periods to collect.
    #[serde(default = "default_statement_limit")]
    pub statement_limit: u32,
    /// Technical indicators to fetch, e.g. sma, ema, rsi, macd.
    #[serde(default)]
    pub technical_indicators: Vec<String>,
    /// Extra datasets: key_metrics, financial_ratios, analyst_estimates.
    #[serde(default)]
    pub ratios_and_metrics: Vec<String>,
    /// Competitor tickers to collect summary data for.
    #[serde(default)]
    pub competitor_tickers: Vec<String>,
}

fn default_statement_period() -> String {
    "annual".to_string()
}

fn default_statement_limit() -> u32 {
    5
}

impl Default for DataCollectionPlan {
    fn default() -> Self {
        Self {
            financial_statements: vec![
                "income_statement".to_string(),
                "balance_sheet".to_string(),
                "cash_flow".to_string(),
            ],
            statement_period: default_statement_period(),
            statement_limit: default_statement_limit(),
            technical_indicators: ["sma", "ema", "rsi", "macd"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ratios_and_metrics: vec!["key_metrics".to_string(), "financial_ratios".to_string()],
            competitor_tickers: vec![],
        }
    }
}

impl Contract for DataCollectionPlan {
    const NAME: &'static str = "data_collection_plan";
    const DESCRIPTION: &'static str =
        "Decide which financial statements, indicators and metrics to collect";

    fn fallback() -> Option<Self> {
        Some(Self::default())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RisksOpportunities {
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub opportunities: Vec<String>,
}

/// Researcher's synthesis of web findings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ResearchAnalysis {
    /// Key market trends affecting the company.
    #[serde(default)]
    pub market_trends: Vec<String>,
    /// Analysis of the company's competitive position.
    pub competitive_position: String,
    /// Major risks and opportunities.
    #[serde(default)]
    pub risks_opportunities: RisksOpportunities,
    /// Recent events that may impact performance.
    #[serde(default)]
    pub recent_events: Vec<String>,
    /// Industry outlook and its effect on the company.
    pub industry_outlook: String,
}

impl Contract for ResearchAnalysis {
    const NAME: &'static str = "research_analysis";
    const DESCRIPTION: &'static str = "Summarize market research findings for a company";

    fn fallback() -> Option<Self> {
        Some(Self::default())
    }
}

/// Analyst's qualitative reading of the computed metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct AnalystInsights {
    /// Two or three sentence overall assessment.
    pub summary: String,
    /// Most significant financial trends.
    #[serde(default)]
    pub trends: Vec<String>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
    /// Specific risks visible in the financial data.
    #[serde(default)]
    pub risks: Vec<String>,
    /// Anomalies or red flags in the statements.
    #[serde(default)]
    pub anomalies: Vec<String>,
}

impl Contract for AnalystInsights {
    const NAME: &'static str = "financial_insights";
    const DESCRIPTION: &'static str =
        "Interpret computed financial metrics and research into analyst insights";

    fn fallback() -> Option<Self> {
        Some(Self::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct OutlineSection {
    /// Stable snake_case identifier, e.g. executive_summary.
    pub key: String,
    /// Section heading.
    pub title: String,
    /// Points the section must cover.
    #[serde(default)]
    pub key_points: Vec<String>,
}

impl OutlineSection {
    fn new(key: &str, title: &str, key_points: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            title: title.to_string(),
            key_points: key_points.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Report structure proposed by the writer before drafting sections.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ReportOutline {
    /// Report title.
    pub title: String,
    /// Ordered report sections.
    #[serde(default)]
    pub sections: Vec<OutlineSection>,
}

impl Default for ReportOutline {
    fn default() -> Self {
        Self {
            title: String::new(),
            sections: vec![
                OutlineSection::new(
                    "executive_summary",
                    "Executive Summary",
                    &[
                        "Overview of findings",
                        "Key investment highlights",
                        "Recommendation summary",
                    ],
                ),
                OutlineSection::new(
                    "financial_analysis",
                    "Financial Analysis",
                    &[
                        "Income statement analysis",
                        "Balance sheet analysis",
                        "Cash flow analysis",
                    ],
                ),
                OutlineSection::new(
                    "investment_recommendation",
                    "Investment Recommendation",
                    &["Rating", "Key factors", "Risks"],
                ),
            ],
        }
    }
}

impl Contract for ReportOutline {
    const NAME: &'static str = "report_outline";
    const DESCRIPTION: &'static str = "Propose the section structure of a research report";

    fn fallback() -> Option<Self> {
        Some(Self::default())
    }
}

/// Fact checker's review of claims in a drafted report.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CitationReview {
    #[serde(default)]
    pub properly_cited_claims: Vec<String>,
    /// Claims that should carry a citation but do not.
    #[serde(default)]
    pub uncited_claims: Vec<String>,
    /// Claims that contradict the underlying data.
    #[serde(default)]
    pub incorrect_claims: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl Contract for CitationReview {
    const NAME: &'static str = "citation_review";
    const DESCRIPTION: &'static str =
        "List the numerical claims in a report and whether each is cited and correct";

    fn fallback() -> Option<Self> {
        Some(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn research_plan_requires_identity_fields() {
        let missing: Result<ResearchPlan, _> =
            serde_json::from_value(serde_json::json!({"ticker": "ACME"}));
        assert!(missing.is_err());

        let plan: ResearchPlan = serde_json::from_value(serde_json::json!({
            "ticker": "ACME",
            "company_name": "Acme Corp"
        }))
        .unwrap();
        assert!(plan.key_areas.is_empty());
        assert!(plan.competitors.is_empty());
    }

    #[test]
    fn data_collection_plan_fills_defaults() {
        let plan: DataCollectionPlan =
            serde_json::from_value(serde_json::json!({"financial_statements": ["cash_flow"]}))
                .unwrap();
        assert_eq!(plan.statement_period, "annual");
        assert_eq!(plan.statement_limit, 5);
        assert_eq!(plan.financial_statements, vec!["cash_flow"]);
    }

    #[test]
    fn fallback_plan_collects_all_statements() {
        let plan = DataCollectionPlan::fallback().unwrap();
        assert_eq!(plan.financial_statements.len(), 3);
        assert!(plan.technical_indicators.contains(&"rsi".to_string()));
    }

    #[test]
    fn outline_fallback_has_sections() {
        let outline = ReportOutline::fallback().unwrap();
        assert_eq!(outline.sections.len(), 3);
        assert_eq!(outline.sections[0].key, "executive_summary");
    }

    #[test]
    fn contract_names_are_distinct() {
        let names = [
            ResearchPlan::NAME,
            DataCollectionPlan::NAME,
            ResearchAnalysis::NAME,
            AnalystInsights::NAME,
            ReportOutline::NAME,
            CitationReview::NAME,
        ];
        let mut sorted = names.to_vec();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), names.len());
    }
}
