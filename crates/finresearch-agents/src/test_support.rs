//! Test doubles for the completion endpoint and the data collaborators.
//!
//! `ScriptedEndpoint` answers from a list of rules instead of a model, so
//! worker and orchestrator behaviour can be exercised deterministically.
//! `StaticMarketData` serves a small fixture company; `StaticSearch` returns
//! one canned hit per query.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use finresearch_data::{DataRequest, MarketData, SearchOutcome, WebSearch};
use finresearch_models::{Dataset, Role, SearchHit, SourceAttribution};

use crate::completion::{CompletionEndpoint, CompletionRequest, CompletionResponse};
use crate::error::AgentError;

pub use crate::telemetry::MemorySink;

enum Matcher {
    Tool(String),
    Prompt(String),
}

struct Rule {
    matcher: Matcher,
    reply: String,
}

#[derive(Default)]
struct FailurePlan {
    any: u32,
    by_tool: HashMap<String, u32>,
    by_prompt: Vec<(String, u32)>,
}

/// Rule-based stand-in for a completion endpoint.
///
/// The most recently added matching rule wins. A tool rule matches requests
/// that force that function; a prompt rule matches when the latest user
/// message contains the text. Replies that parse as JSON are returned as tool-call
/// arguments for tool requests, otherwise as reply text.
#[derive(Default)]
pub struct ScriptedEndpoint {
    rules: Vec<Rule>,
    default_text: Option<String>,
    delay: Option<Duration>,
    failures: Mutex<FailurePlan>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_tool(mut self, tool: &str, reply: impl Into<String>) -> Self {
        self.rules.push(Rule {
            matcher: Matcher::Tool(tool.to_string()),
            reply: reply.into(),
        });
        self
    }

    pub fn on_prompt(mut self, needle: &str, reply: impl Into<String>) -> Self {
        self.rules.push(Rule {
            matcher: Matcher::Prompt(needle.to_string()),
            reply: reply.into(),
        });
        self
    }

    /// Well-formed replies for every pipeline contract, and plain text for
    /// free-text calls. Citations come back clean, so no rewrite is asked for.
    pub fn pipeline() -> Self {
        Self::new()
            .on_tool(
                "research_plan",
                r#"{"ticker":"ACME","company_name":"Acme Corp","key_areas":["Margins","Order backlog"],"competitors":["WID"]}"#,
            )
            .on_tool(
                "data_collection_plan",
                r#"{"financial_statements":["income_statement","balance_sheet","cash_flow"],"statement_period":"annual","statement_limit":2,"technical_indicators":["rsi"],"ratios_and_metrics":["key_metrics"],"competitor_tickers":["WID"]}"#,
            )
            .on_tool(
                "research_analysis",
                r#"{"market_trends":["Factory automation"],"competitive_position":"Leading share in industrial presses","risks_opportunities":{"risks":["Steel prices"],"opportunities":["Export growth"]},"recent_events":["Record orders"],"industry_outlook":"Steady demand"}"#,
            )
            .on_tool(
                "financial_insights",
                r#"{"summary":"Revenue grew 20% with stable margins.","trends":["Rising revenue"],"strengths":["Pricing power"]}"#,
            )
            .on_tool(
                "report_outline",
                r#"{"title":"Acme Corp (ACME) Research Report","sections":[{"key":"executive_summary","title":"Executive Summary","key_points":["Overview"]},{"key":"financial_analysis","title":"Financial Analysis","key_points":["Growth"]}]}"#,
            )
            .on_tool(
                "citation_review",
                r#"{"properly_cited_claims":["Revenue of 1200"]}"#,
            )
            .default_text("Acme Corp grew revenue to 1200 in 2023.")
    }

    /// Reply used when no rule matches.
    pub fn default_text(mut self, reply: impl Into<String>) -> Self {
        self.default_text = Some(reply.into());
        self
    }

    /// Fail the next `n` calls, whatever they are, with a transport error.
    pub fn fail_times(self, n: u32) -> Self {
        if let Ok(mut plan) = self.failures.lock() {
            plan.any = n;
        }
        self
    }

    /// Fail the next `n` calls forcing `tool` with a transport error.
    pub fn fail_on_tool(self, tool: &str, n: u32) -> Self {
        if let Ok(mut plan) = self.failures.lock() {
            plan.by_tool.insert(tool.to_string(), n);
        }
        self
    }

    /// Fail the next `n` calls whose latest user message contains `needle`.
    pub fn fail_on_prompt(self, needle: &str, n: u32) -> Self {
        if let Ok(mut plan) = self.failures.lock() {
            plan.by_prompt.push((needle.to_string(), n));
        }
        self
    }

    /// Wait this long before answering every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    /// Number of calls that forced `tool`.
    pub fn tool_calls(&self, tool: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.tool.as_ref().is_some_and(|t| t.name == tool))
            .count()
    }

    fn should_fail(&self, tool: Option<&str>, prompt: &str) -> bool {
        let Ok(mut plan) = self.failures.lock() else {
            return false;
        };
        if plan.any > 0 {
            plan.any -= 1;
            return true;
        }
        if let Some(remaining) = tool.and_then(|t| plan.by_tool.get_mut(t)) {
            if *remaining > 0 {
                *remaining -= 1;
                return true;
            }
        }
        for (needle, remaining) in plan.by_prompt.iter_mut() {
            if *remaining > 0 && prompt.contains(needle.as_str()) {
                *remaining -= 1;
                return true;
            }
        }
        false
    }

    fn latest_prompt(request: &CompletionRequest) -> &str {
        request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    fn reply_for(&self, request: &CompletionRequest) -> Option<&str> {
        let tool = request.tool.as_ref().map(|t| t.name.as_str());
        let prompt = Self::latest_prompt(request);

        self.rules
            .iter()
            .rev()
            .find(|rule| match &rule.matcher {
                Matcher::Tool(name) => tool == Some(name.as_str()),
                Matcher::Prompt(needle) => prompt.contains(needle.as_str()),
            })
            .map(|rule| rule.reply.as_str())
            .or(self.default_text.as_deref())
    }
}

#[async_trait]
impl CompletionEndpoint for ScriptedEndpoint {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, AgentError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let tool = request.tool.as_ref().map(|t| t.name.clone());
        if self.should_fail(tool.as_deref(), Self::latest_prompt(&request)) {
            return Err(AgentError::Transport("scripted transport failure".to_string()));
        }

        let reply = self.reply_for(&request).ok_or_else(|| {
            AgentError::Transport(format!(
                "no scripted reply for {}",
                tool.as_deref().unwrap_or("text request")
            ))
        })?;

        let as_arguments =
            tool.is_some() && serde_json::from_str::<serde_json::Value>(reply).is_ok();
        Ok(if as_arguments {
            CompletionResponse {
                text: String::new(),
                tool_arguments: Some(reply.to_string()),
                usage: None,
            }
        } else {
            CompletionResponse {
                text: reply.to_string(),
                tool_arguments: None,
                usage: None,
            }
        })
    }
}

/// Fixture market data for a fictional company. The ticker only changes the
/// profile name and the attribution path.
#[derive(Default)]
pub struct StaticMarketData {
    missing: BTreeSet<String>,
    panics: BTreeSet<String>,
    delay: Option<Duration>,
    fetched: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Decrements the in-flight count when a fetch ends, however it ends.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer this dataset with a 404 marker.
    pub fn missing(mut self, dataset: &str) -> Self {
        self.missing.insert(dataset.to_string());
        self
    }

    /// Panic inside the fetch of this dataset, as a buggy client would.
    pub fn panic_on(mut self, dataset: &str) -> Self {
        self.panics.insert(dataset.to_string());
        self
    }

    /// Hold every fetch open for `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// `ticker/dataset` for every fetch, in call order.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().map(|f| f.clone()).unwrap_or_default()
    }

    /// Most fetches ever open at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn records(ticker: &str, request: &DataRequest) -> serde_json::Value {
        let company_name = if ticker == "ACME" {
            "Acme Corp".to_string()
        } else {
            format!("{ticker} Inc")
        };
        match request {
            DataRequest::Profile => serde_json::json!([{
                "symbol": ticker,
                "companyName": company_name,
                "sector": "Industrials",
                "industry": "Specialty Machinery",
                "description": "Acme Corp designs and manufactures industrial equipment.",
                "mktCap": 12_000_000_000u64
            }]),
            DataRequest::StockPrice { .. } => serde_json::json!({
                "symbol": ticker,
                "historical": [
                    {"date": "2024-03-01", "close": 104.2},
                    {"date": "2024-02-29", "close": 101.7}
                ]
            }),
            DataRequest::IncomeStatement(_) => serde_json::json!([
                {"date": "2023-12-31", "revenue": 1200, "netIncome": 150, "grossProfit": 480, "operatingIncome": 240},
                {"date": "2022-12-31", "revenue": 1000, "netIncome": 100, "grossProfit": 390, "operatingIncome": 180}
            ]),
            DataRequest::BalanceSheet(_) => serde_json::json!([{
                "date": "2023-12-31",
                "totalAssets": 5000,
                "totalLiabilities": 3000,
                "totalCurrentAssets": 1500,
                "totalCurrentLiabilities": 1000,
                "totalStockholdersEquity": 2000
            }]),
            DataRequest::CashFlow(_) => serde_json::json!([{
                "date": "2023-12-31",
                "netCashProvidedByOperatingActivities": 300,
                "capitalExpenditure": -80
            }]),
            DataRequest::KeyMetrics(_) => serde_json::json!([{"peRatio": 18.5, "roe": 0.075}]),
            DataRequest::FinancialRatios(_) => serde_json::json!([{"currentRatio": 1.5}]),
            DataRequest::AnalystEstimates(_) => serde_json::json!([{"estimatedRevenueAvg": 1300}]),
            DataRequest::TechnicalIndicator { name, .. } => {
                serde_json::json!([{"date": "2024-03-01", "indicator": name, "value": 55.2}])
            }
        }
    }
}

#[async_trait]
impl MarketData for StaticMarketData {
    async fn fetch(&self, ticker: &str, request: &DataRequest) -> Dataset {
        let name = request.dataset_name();
        if let Ok(mut fetched) = self.fetched.lock() {
            fetched.push(format!("{ticker}/{name}"));
        }
        let open = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak.fetch_max(open, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panics.contains(&name) {
            panic!("fixture fetch of {name} blew up");
        }
        if self.missing.contains(&name) {
            return Dataset::failed("404 Not Found");
        }
        Dataset::ok(
            Self::records(ticker, request),
            SourceAttribution::now("Static market data", request.path(ticker)),
        )
    }
}

/// Returns one hit per query, or an inline error when built with `failing`.
#[derive(Default)]
pub struct StaticSearch {
    fail: bool,
    panic_on: Option<String>,
    queries: Mutex<Vec<String>>,
}

impl StaticSearch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Panic on any query containing `needle`.
    pub fn panic_on(needle: &str) -> Self {
        Self {
            panic_on: Some(needle.to_string()),
            ..Self::default()
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl WebSearch for StaticSearch {
    async fn search(&self, query: &str, max_results: usize) -> SearchOutcome {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(query.to_string());
        }
        if self.panic_on.as_deref().is_some_and(|n| query.contains(n)) {
            panic!("fixture search for {query} blew up");
        }
        if self.fail {
            return SearchOutcome {
                error: Some("search unavailable".to_string()),
                ..SearchOutcome::default()
            };
        }
        let hits = vec![SearchHit {
            title: format!("Result for {query}"),
            link: "https://news.example.com/acme".to_string(),
            snippet: "Acme Corp reported record equipment orders.".to_string(),
            source: "Example News".to_string(),
        }];
        SearchOutcome {
            hits: hits.into_iter().take(max_results).collect(),
            source: Some(SourceAttribution::now("Static search", query)),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tool_schema;
    use finresearch_models::{ChatMessage, ResearchPlan};

    fn request(prompt: &str, tool: bool) -> CompletionRequest {
        CompletionRequest {
            model: "test".to_string(),
            messages: vec![ChatMessage::system("sys"), ChatMessage::user(prompt)],
            tool: tool.then(tool_schema::<ResearchPlan>),
            temperature: 0.0,
            max_tokens: 10,
        }
    }

    #[tokio::test]
    async fn rules_match_requests() {
        let endpoint = ScriptedEndpoint::new()
            .on_prompt("overview", "prompt reply")
            .on_tool("research_plan", r#"{"ticker":"ACME"}"#)
            .default_text("fallback");

        let plain = endpoint.complete(request("overview please", false)).await.unwrap();
        assert_eq!(plain.text, "prompt reply");

        let tool = endpoint.complete(request("plan", true)).await.unwrap();
        assert_eq!(tool.tool_arguments.as_deref(), Some(r#"{"ticker":"ACME"}"#));

        let other = endpoint.complete(request("anything", false)).await.unwrap();
        assert_eq!(other.text, "fallback");
        assert_eq!(endpoint.call_count(), 3);
        assert_eq!(endpoint.tool_calls("research_plan"), 1);
    }

    #[tokio::test]
    async fn later_rule_overrides_earlier() {
        let endpoint = ScriptedEndpoint::pipeline().on_tool("research_plan", "not json");
        let reply = endpoint.complete(request("plan", true)).await.unwrap();
        assert_eq!(reply.text, "not json");
        assert!(reply.tool_arguments.is_none());
    }

    #[tokio::test]
    async fn tool_failures_are_counted() {
        let endpoint = ScriptedEndpoint::new()
            .default_text("{}")
            .fail_on_tool("research_plan", 1);

        assert!(endpoint.complete(request("plan", true)).await.is_err());
        assert!(endpoint.complete(request("plan", true)).await.is_ok());
        assert!(endpoint.complete(request("text", false)).await.is_ok());
    }

    #[tokio::test]
    async fn unmatched_request_is_transport_error() {
        let endpoint = ScriptedEndpoint::new();
        let err = endpoint.complete(request("x", false)).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn static_market_data_marks_missing() {
        let market = StaticMarketData::new().missing("balance_sheet");
        let query = Default::default();
        let bs = market
            .fetch("ACME", &DataRequest::BalanceSheet(query))
            .await;
        assert_eq!(bs.error.as_deref(), Some("404 Not Found"));

        let profile = market.fetch("ACME", &DataRequest::Profile).await;
        assert!(profile.is_available());
        assert_eq!(market.fetched(), vec!["ACME/balance_sheet", "ACME/profile"]);
    }
}
