use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use finresearch_data::{DataRequest, MarketData, StatementQuery};
use finresearch_models::{CollectedData, DataCollectionPlan, Dataset, ResearchPlan};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::{CollectInput, StageOutput, Worker, WorkerContext};
use crate::client::AgentClient;
use crate::error::AgentError;
use crate::prompts::data_plan_prompt;

const PRICE_HISTORY_DAYS: u32 = 365;
const INDICATOR_PERIOD: u32 = 14;
const MAX_COMPETITORS: usize = 3;

/// Decides what market data to pull, then fetches it concurrently.
pub struct DataCollector {
    client: AgentClient,
    market: Arc<dyn MarketData>,
    max_concurrent: usize,
    default_query: StatementQuery,
}

impl DataCollector {
    pub fn new(ctx: &WorkerContext) -> Self {
        Self {
            client: ctx.client(
                "DataCollector",
                "a financial data specialist who decides which market data to collect",
            ),
            market: ctx.market.clone(),
            max_concurrent: ctx.agents.max_concurrent_fetches.max(1),
            default_query: StatementQuery {
                period: ctx.data.statement_period.clone(),
                limit: ctx.data.statement_limit,
            },
        }
    }

    fn statement_query(&self, plan: &DataCollectionPlan) -> StatementQuery {
        let period = match plan.statement_period.trim().to_lowercase().as_str() {
            "quarter" | "quarterly" => "quarter".to_string(),
            "annual" | "year" | "yearly" => "annual".to_string(),
            _ => self.default_query.period.clone(),
        };
        let limit = if plan.statement_limit == 0 {
            self.default_query.limit
        } else {
            plan.statement_limit
        };
        StatementQuery { period, limit }
    }

    /// Requests for the subject, deduplicated by dataset name.
    fn subject_requests(
        &self,
        plan: &DataCollectionPlan,
        query: &StatementQuery,
        notes: &mut Vec<String>,
    ) -> Vec<DataRequest> {
        let mut requests = vec![DataRequest::StockPrice {
            days: PRICE_HISTORY_DAYS,
        }];
        for name in plan
            .financial_statements
            .iter()
            .chain(&plan.ratios_and_metrics)
        {
            match DataRequest::from_dataset_name(name.trim(), query) {
                Some(request) => requests.push(request),
                None => {
                    warn!(dataset = %name, "Unknown dataset in collection plan");
                    notes.push(format!("collection plan: unknown dataset '{name}' skipped"));
                }
            }
        }
        for indicator in &plan.technical_indicators {
            requests.push(DataRequest::TechnicalIndicator {
                name: indicator.trim().to_lowercase(),
                period: INDICATOR_PERIOD,
            });
        }

        let mut seen = BTreeSet::new();
        requests.retain(|r| seen.insert(r.dataset_name()));
        requests
    }
}

/// Competitor tickers from the data plan, else from the research plan.
fn competitor_tickers(
    subject: &str,
    data_plan: &DataCollectionPlan,
    plan: &ResearchPlan,
) -> Vec<String> {
    let candidates = if data_plan.competitor_tickers.is_empty() {
        &plan.competitors
    } else {
        &data_plan.competitor_tickers
    };
    let mut tickers: Vec<String> = candidates
        .iter()
        .map(|t| t.trim().to_uppercase())
        .filter(|t| looks_like_ticker(t) && t != subject)
        .collect();
    let mut seen = BTreeSet::new();
    tickers.retain(|t| seen.insert(t.clone()));
    tickers.truncate(MAX_COMPETITORS);
    tickers
}

fn looks_like_ticker(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 6
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

#[async_trait]
impl Worker for DataCollector {
    type Input = CollectInput;
    type Output = CollectedData;

    fn name(&self) -> &str {
        self.client.name()
    }

    async fn process(
        &mut self,
        input: &CollectInput,
    ) -> Result<StageOutput<CollectedData>, AgentError> {
        let subject = input.subject.as_str();
        let structured = self
            .client
            .send_structured::<DataCollectionPlan>(&data_plan_prompt(subject, &input.plan))
            .await?;
        let mut notes = structured.notes();
        let data_plan = structured.value;

        let query = self.statement_query(&data_plan);
        let requests = self.subject_requests(&data_plan, &query, &mut notes);
        let competitors = competitor_tickers(subject, &data_plan, &input.plan);

        let mut jobs: Vec<(Option<String>, DataRequest)> =
            requests.into_iter().map(|r| (None, r)).collect();
        let summary_query = StatementQuery {
            period: query.period.clone(),
            limit: 1,
        };
        for ticker in &competitors {
            jobs.push((Some(ticker.clone()), DataRequest::Profile));
            jobs.push((
                Some(ticker.clone()),
                DataRequest::KeyMetrics(summary_query.clone()),
            ));
        }

        debug!(
            subject,
            fetches = jobs.len(),
            concurrency = self.max_concurrent,
            "Collecting market data"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut set = JoinSet::new();
        let mut pending: BTreeMap<usize, (Option<String>, String)> = BTreeMap::new();
        for (index, (owner, request)) in jobs.into_iter().enumerate() {
            let market = self.market.clone();
            let semaphore = semaphore.clone();
            let ticker = owner.clone().unwrap_or_else(|| subject.to_string());
            pending.insert(index, (owner, request.dataset_name()));
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (index, market.fetch(&ticker, &request).await)
            });
        }

        let mut fetched: Vec<(Option<String>, String, Dataset)> = Vec::with_capacity(pending.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, dataset)) => {
                    if let Some((owner, name)) = pending.remove(&index) {
                        fetched.push((owner, name, dataset));
                    }
                }
                Err(e) => warn!(subject, error = %e, "Fetch task failed"),
            }
        }
        // whatever is still pending belongs to a task that panicked or was cancelled
        for (owner, name) in pending.into_values() {
            fetched.push((owner, name, Dataset::failed("fetch task failed")));
        }

        let mut datasets: BTreeMap<String, Dataset> = BTreeMap::new();
        let mut competitor_data: BTreeMap<String, BTreeMap<String, Dataset>> = BTreeMap::new();
        for (owner, name, dataset) in fetched {
            match owner {
                None => {
                    datasets.insert(name, dataset);
                }
                Some(ticker) => {
                    competitor_data
                        .entry(ticker)
                        .or_default()
                        .insert(name, dataset);
                }
            }
        }

        for (name, dataset) in &datasets {
            if let Some(error) = &dataset.error {
                warn!(subject, dataset = %name, error = %error, "Dataset unavailable");
                notes.push(format!("{name}: {error}"));
            }
        }
        for (ticker, sets) in &competitor_data {
            for (name, dataset) in sets {
                if let Some(error) = &dataset.error {
                    notes.push(format!("{ticker} {name}: {error}"));
                }
            }
        }

        info!(
            subject,
            datasets = datasets.len(),
            available = datasets.values().filter(|d| d.is_available()).count(),
            competitors = competitor_data.len(),
            "Market data collected"
        );

        Ok(StageOutput::new(
            CollectedData {
                subject: subject.to_string(),
                data_plan,
                datasets,
                competitors: competitor_data,
            },
            notes,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedEndpoint, StaticMarketData, StaticSearch};
    use crate::workers::tests::{context, context_with};
    use std::time::Duration;

    fn input(competitors: &[&str]) -> CollectInput {
        CollectInput {
            subject: "ACME".to_string(),
            plan: ResearchPlan {
                ticker: "ACME".to_string(),
                company_name: "Acme Corp".to_string(),
                competitors: competitors.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn collects_planned_datasets() {
        let (ctx, _) = context(ScriptedEndpoint::new().on_tool(
            "data_collection_plan",
            r#"{"financial_statements":["income_statement","balance_sheet"],
                "statement_period":"quarterly","statement_limit":4,
                "technical_indicators":["RSI"],"ratios_and_metrics":["key_metrics"],
                "competitor_tickers":["wid"]}"#,
        ));
        let mut collector = DataCollector::new(&ctx);

        let out = collector.process(&input(&[])).await.unwrap();
        assert!(!out.is_partial(), "{:?}", out.notes);

        let names: Vec<&str> = out.value.datasets.keys().map(String::as_str).collect();
        assert_eq!(
            names,
            vec![
                "balance_sheet",
                "income_statement",
                "indicator_rsi",
                "key_metrics",
                "stock_price"
            ]
        );
        let wid = &out.value.competitors["WID"];
        assert!(wid["profile"].is_available());
        assert!(wid.contains_key("key_metrics"));
    }

    #[tokio::test]
    async fn missing_statement_becomes_marker() {
        let market = StaticMarketData::new().missing("balance_sheet");
        let (ctx, _) = context_with(
            ScriptedEndpoint::new().on_tool("data_collection_plan", "no idea"),
            market,
            StaticSearch::new(),
        );
        let mut collector = DataCollector::new(&ctx);

        let out = collector.process(&input(&["Widget Industries", "WID"])).await.unwrap();
        let bs = &out.value.datasets["balance_sheet"];
        assert_eq!(bs.error.as_deref(), Some("404 Not Found"));
        assert!(out.value.dataset("balance_sheet").is_none());
        assert!(out.value.dataset("income_statement").is_some());
        assert!(out.notes.iter().any(|n| n == "balance_sheet: 404 Not Found"));
        // the free-text competitor name is not a ticker
        assert_eq!(out.value.competitors.keys().collect::<Vec<_>>(), vec!["WID"]);
    }

    #[tokio::test]
    async fn unknown_dataset_is_skipped() {
        let (ctx, _) = context(ScriptedEndpoint::new().on_tool(
            "data_collection_plan",
            r#"{"financial_statements":["income_statement","segment_revenue"]}"#,
        ));
        let mut collector = DataCollector::new(&ctx);

        let out = collector.process(&input(&[])).await.unwrap();
        assert!(out.value.datasets.contains_key("income_statement"));
        assert!(!out.value.datasets.contains_key("segment_revenue"));
        assert_eq!(out.notes.len(), 1);
    }

    #[tokio::test]
    async fn fetches_respect_concurrency_limit() {
        let (mut ctx, _) = context(ScriptedEndpoint::pipeline());
        let market = Arc::new(StaticMarketData::new().with_delay(Duration::from_millis(20)));
        ctx.market = market.clone();
        ctx.agents.max_concurrent_fetches = 2;
        let mut collector = DataCollector::new(&ctx);

        let out = collector.process(&input(&[])).await.unwrap();
        assert!(!out.is_partial(), "{:?}", out.notes);
        // stock price, three statements, key metrics, rsi, and two WID datasets
        assert_eq!(market.fetched().len(), 8);
        assert_eq!(market.peak_in_flight(), 2);
        assert_eq!(out.value.datasets.len(), 6);
        assert_eq!(out.value.competitors["WID"].len(), 2);
    }

    #[tokio::test]
    async fn panicked_fetch_leaves_a_marker() {
        let (ctx, _) = context_with(
            ScriptedEndpoint::pipeline(),
            StaticMarketData::new().panic_on("cash_flow"),
            StaticSearch::new(),
        );
        let mut collector = DataCollector::new(&ctx);

        let out = collector.process(&input(&[])).await.unwrap();
        let cash_flow = &out.value.datasets["cash_flow"];
        assert_eq!(cash_flow.error.as_deref(), Some("fetch task failed"));
        assert!(out.value.dataset("income_statement").is_some());
        assert!(out.notes.iter().any(|n| n == "cash_flow: fetch task failed"));
    }

    #[test]
    fn competitors_capped_and_deduplicated() {
        let plan = ResearchPlan {
            competitors: ["WID", "wid", "GIZ", "ACME", "FOO", "BAR"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            ..Default::default()
        };
        let data_plan = DataCollectionPlan::default();
        assert_eq!(
            competitor_tickers("ACME", &data_plan, &plan),
            vec!["WID", "GIZ", "FOO"]
        );
    }
}
