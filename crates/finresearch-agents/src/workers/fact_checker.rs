use async_trait::async_trait;
use finresearch_models::{
    AnalysisResults, CitationQuality, CitationReview, CitationSummary, CollectedData,
    DataValidation, FactCheckResult, ResearchResults,
};
use tracing::{info, warn};

use super::{FactCheckInput, StageOutput, Worker, WorkerContext};
use crate::client::{AgentClient, InvocationOptions};
use crate::error::AgentError;
use crate::prompts::{add_citations_prompt, citation_review_prompt};

const REQUIRED_DATASETS: [&str; 4] = ["income_statement", "balance_sheet", "cash_flow", "stock_price"];

/// Checks the collected data and the report's citations.
pub struct FactChecker {
    client: AgentClient,
}

impl FactChecker {
    pub fn new(ctx: &WorkerContext) -> Self {
        Self {
            client: ctx.client(
                "FactChecker",
                "a meticulous fact checker who verifies financial claims and their sources",
            ),
        }
    }
}

/// Rule-based checks over the collected statements.
pub fn validate_data(data: &CollectedData, analysis: &AnalysisResults) -> DataValidation {
    let mut validation = DataValidation {
        is_valid: true,
        ..Default::default()
    };

    for name in REQUIRED_DATASETS {
        if data.dataset(name).is_none() {
            validation.issues.push(format!("Missing {name} data"));
            validation.is_valid = false;
        }
    }

    if let Some(income) = data.dataset("income_statement") {
        if analysis.metrics.income.is_none() {
            validation
                .warnings
                .push("Income statement present but no income metrics were computed".to_string());
        }
        for row in income.rows() {
            let revenue = row.get("revenue");
            let net_income = row.get("netIncome");
            match (
                revenue.and_then(|v| v.as_f64()),
                net_income.and_then(|v| v.as_f64()),
            ) {
                (Some(r), Some(n)) if r < n => {
                    validation.issues.push(format!(
                        "Data inconsistency: Revenue ({}) less than Net Income ({})",
                        revenue.map(|v| v.to_string()).unwrap_or_default(),
                        net_income.map(|v| v.to_string()).unwrap_or_default(),
                    ));
                    validation.is_valid = false;
                }
                (None, _) | (_, None) if revenue.is_some() && net_income.is_some() => {
                    validation
                        .warnings
                        .push("Could not validate income statement data structure".to_string());
                }
                _ => {}
            }
        }
    }

    validation
}

/// Every attribution carried by the run, deduplicated, data first.
fn collect_sources(data: &CollectedData, research: &ResearchResults) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    data.sources()
        .into_iter()
        .chain(research.sources())
        .map(|s| s.citation())
        .filter(|c| seen.insert(c.clone()))
        .collect()
}

/// Append a Sources section unless the report already has one.
pub fn ensure_sources(report: &str, sources: &[String]) -> String {
    if report.contains("## Sources") || report.contains("## References") {
        return report.to_string();
    }
    let mut out = report.trim_end().to_string();
    out.push_str("\n\n## Sources\n\n");
    if sources.is_empty() {
        out.push_str("No external sources were recorded for this report.\n");
    } else {
        for (i, source) in sources.iter().enumerate() {
            out.push_str(&format!("{}. {source}\n", i + 1));
        }
    }
    out
}

#[async_trait]
impl Worker for FactChecker {
    type Input = FactCheckInput;
    type Output = FactCheckResult;

    fn name(&self) -> &str {
        self.client.name()
    }

    async fn process(
        &mut self,
        input: &FactCheckInput,
    ) -> Result<StageOutput<FactCheckResult>, AgentError> {
        let subject = input.subject.as_str();
        let validation = validate_data(&input.data, &input.analysis);
        if !validation.is_valid {
            warn!(subject, issues = validation.issues.len(), "Data validation issues");
        }

        let sources = collect_sources(&input.data, &input.research);
        let report = input.report.markdown.as_str();

        let structured = self
            .client
            .send_structured::<CitationReview>(&citation_review_prompt(
                report,
                &input.data,
                &sources,
            ))
            .await?;
        let mut notes = structured.notes();
        let review = structured.value;

        let uncited_count = review.uncited_claims.len();
        let incorrect_count = review.incorrect_claims.len();
        let quality = CitationQuality::grade(uncited_count + incorrect_count);

        let cited = if quality == CitationQuality::Good {
            report.to_string()
        } else {
            match self
                .client
                .send_text_with(
                    &add_citations_prompt(report, &sources),
                    InvocationOptions::temperature(0.1),
                )
                .await
            {
                Ok(text) if !text.trim().is_empty() => text,
                Ok(_) => {
                    notes.push("add_citations: empty reply, keeping original report".to_string());
                    report.to_string()
                }
                Err(e) if e.is_transport() => return Err(e),
                Err(e) => {
                    warn!(subject, error = %e, "Citation rewrite failed");
                    notes.push(format!("add_citations: {e}"));
                    report.to_string()
                }
            }
        };

        info!(
            subject,
            quality = ?quality,
            uncited = uncited_count,
            incorrect = incorrect_count,
            sources = sources.len(),
            "Fact check complete"
        );

        Ok(StageOutput::new(
            FactCheckResult {
                validation,
                citations: CitationSummary {
                    quality,
                    uncited_count,
                    incorrect_count,
                    review,
                },
                improved_report: ensure_sources(&cited, &sources),
            },
            notes,
        ))
    }
}
