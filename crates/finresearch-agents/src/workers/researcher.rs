use std::sync::Arc;

use async_trait::async_trait;
use finresearch_data::WebSearch;
use finresearch_models::{
    Dataset, ResearchAnalysis, ResearchFinding, ResearchPlan, ResearchResults,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::{profile_name, ResearchInput, StageOutput, Worker, WorkerContext};
use crate::client::AgentClient;
use crate::error::AgentError;
use crate::prompts::research_analysis_prompt;

/// One planned web search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResearchQuery {
    pub topic: &'static str,
    pub query: String,
    pub max_results: usize,
}

/// Searches to issue, most important first.
///
/// Depth 1 covers the overview, recent performance and the industry; depth 2
/// adds recent news and depth 3 the competitor comparison.
pub fn research_queries(
    subject: &str,
    company_name: &str,
    plan: &ResearchPlan,
    profile: &Dataset,
    depth: u8,
    max_results: usize,
) -> Vec<ResearchQuery> {
    let industry = profile
        .rows()
        .first()
        .and_then(|row| row.get("industry"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| plan.industry_factors.first().cloned())
        .unwrap_or_else(|| "its".to_string());

    let mut queries = vec![
        ("company_overview", format!("{company_name} {subject} company overview financial"), 3),
        (
            "financial_performance",
            format!("{company_name} {subject} recent financial performance quarterly results"),
            5,
        ),
        (
            "industry_trends",
            format!("{industry} industry trends market analysis {company_name}"),
            3,
        ),
        ("recent_news", format!("{company_name} {subject} recent news events last 3 months"), 5),
    ];
    if !plan.competitors.is_empty() {
        let rivals = plan
            .competitors
            .iter()
            .take(3)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        queries.push((
            "competitors",
            format!("{company_name} vs {rivals} market comparison"),
            2,
        ));
    }

    let keep = usize::from(depth.max(1)) + 2;
    queries
        .into_iter()
        .take(keep)
        .map(|(topic, query, n)| ResearchQuery {
            topic,
            query,
            max_results: n.min(max_results.max(1)),
        })
        .collect()
}

/// Runs web searches and asks for a synthesis of the findings.
pub struct Researcher {
    client: AgentClient,
    search: Arc<dyn WebSearch>,
    depth: u8,
    max_results: usize,
    max_concurrent: usize,
}

impl Researcher {
    pub fn new(ctx: &WorkerContext) -> Self {
        Self {
            client: ctx.client(
                "Researcher",
                "a market research analyst who synthesizes news and industry findings",
            ),
            search: ctx.search.clone(),
            depth: ctx.agents.research_depth,
            max_results: ctx.agents.max_search_results,
            max_concurrent: ctx.agents.max_concurrent_fetches.max(1),
        }
    }

    async fn run_searches(&self, queries: Vec<ResearchQuery>) -> Vec<ResearchFinding> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut set = JoinSet::new();
        let mut pending: Vec<Option<ResearchFinding>> = Vec::with_capacity(queries.len());
        for (index, planned) in queries.into_iter().enumerate() {
            pending.push(Some(ResearchFinding {
                topic: planned.topic.to_string(),
                query: planned.query.clone(),
                hits: vec![],
                source: None,
                error: Some("search task failed".to_string()),
            }));
            let search = self.search.clone();
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let outcome = search.search(&planned.query, planned.max_results).await;
                (
                    index,
                    ResearchFinding {
                        topic: planned.topic.to_string(),
                        query: planned.query,
                        hits: outcome.hits,
                        source: outcome.source,
                        error: outcome.error,
                    },
                )
            });
        }

        // slots not filled by a finished task keep their failure marker
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, finding)) => pending[index] = Some(finding),
                Err(e) => warn!(error = %e, "Search task failed"),
            }
        }
        pending.into_iter().flatten().collect()
    }
}

#[async_trait]
impl Worker for Researcher {
    type Input = ResearchInput;
    type Output = ResearchResults;

    fn name(&self) -> &str {
        self.client.name()
    }

    async fn process(
        &mut self,
        input: &ResearchInput,
    ) -> Result<StageOutput<ResearchResults>, AgentError> {
        let subject = input.subject.as_str();
        let company_name = Some(input.plan.company_name.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| profile_name(&input.company_profile))
            .unwrap_or_else(|| subject.to_string());

        let queries = research_queries(
            subject,
            &company_name,
            &input.plan,
            &input.company_profile,
            self.depth,
            self.max_results,
        );
        let findings = self.run_searches(queries).await;

        let mut notes = vec![];
        for finding in &findings {
            if let Some(error) = &finding.error {
                warn!(subject, topic = %finding.topic, error = %error, "Search failed");
                notes.push(format!("search {}: {error}", finding.topic));
            }
        }

        let structured = self
            .client
            .send_structured::<ResearchAnalysis>(&research_analysis_prompt(
                subject,
                &company_name,
                &findings,
            ))
            .await?;
        notes.extend(structured.notes());

        info!(
            subject,
            searches = findings.len(),
            hits = findings.iter().map(|f| f.hits.len()).sum::<usize>(),
            "Research complete"
        );
        Ok(StageOutput::new(
            ResearchResults {
                subject: subject.to_string(),
                company_name,
                findings,
                analysis: structured.value,
            },
            notes,
        ))
    }
}
