use async_trait::async_trait;
use finresearch_data::{compute_metrics, market_snapshot};
use finresearch_models::{AnalysisResults, AnalystInsights, ResearchResults};
use tracing::info;

use super::{AnalyzeInput, StageOutput, Worker, WorkerContext};
use crate::client::AgentClient;
use crate::error::AgentError;
use crate::prompts::insights_prompt;

/// Computes financial metrics and asks for their interpretation.
pub struct Analyst {
    client: AgentClient,
}

impl Analyst {
    pub fn new(ctx: &WorkerContext) -> Self {
        Self {
            client: ctx.client(
                "Analyst",
                "a financial analyst who interprets company fundamentals",
            ),
        }
    }
}

fn research_summary(research: &ResearchResults) -> String {
    let analysis = &research.analysis;
    let mut lines = vec![];
    if !analysis.competitive_position.is_empty() {
        lines.push(format!("Competitive position: {}", analysis.competitive_position));
    }
    if !analysis.industry_outlook.is_empty() {
        lines.push(format!("Industry outlook: {}", analysis.industry_outlook));
    }
    if !analysis.market_trends.is_empty() {
        lines.push(format!("Market trends: {}", analysis.market_trends.join("; ")));
    }
    if !analysis.risks_opportunities.risks.is_empty() {
        lines.push(format!(
            "Risks: {}",
            analysis.risks_opportunities.risks.join("; ")
        ));
    }
    if lines.is_empty() {
        "No research summary available.".to_string()
    } else {
        lines.join("\n")
    }
}

#[async_trait]
impl Worker for Analyst {
    type Input = AnalyzeInput;
    type Output = AnalysisResults;

    fn name(&self) -> &str {
        self.client.name()
    }

    async fn process(
        &mut self,
        input: &AnalyzeInput,
    ) -> Result<StageOutput<AnalysisResults>, AgentError> {
        let subject = input.subject.as_str();
        let metrics = compute_metrics(&input.data);
        let market = market_snapshot(&input.data);
        info!(
            subject,
            income = metrics.income.is_some(),
            balance_sheet = metrics.balance_sheet.is_some(),
            cash_flow = metrics.cash_flow.is_some(),
            indicators = metrics.technical.len(),
            competitors = market.competitors.len(),
            "Metrics computed"
        );

        let structured = self
            .client
            .send_structured::<AnalystInsights>(&insights_prompt(
                subject,
                &metrics,
                &market,
                &research_summary(&input.research),
            ))
            .await?;
        let notes = structured.notes();

        Ok(StageOutput::new(
            AnalysisResults {
                subject: subject.to_string(),
                metrics,
                market,
                insights: structured.value,
            },
            notes,
        ))
    }
}
