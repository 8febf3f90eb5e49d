use std::time::Duration;

use async_trait::async_trait;
use finresearch_models::{DataConfig, Dataset, SourceAttribution};

use crate::error::DataError;
use crate::memory::MemoryCache;

pub const FMP_ORIGIN: &str = "Financial Modeling Prep";

/// Statement period and depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementQuery {
    pub period: String,
    pub limit: u32,
}

impl Default for StatementQuery {
    fn default() -> Self {
        Self {
            period: "annual".to_string(),
            limit: 5,
        }
    }
}

/// One market-data request for a ticker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataRequest {
    Profile,
    /// Daily price history for the last `days` sessions.
    StockPrice { days: u32 },
    IncomeStatement(StatementQuery),
    BalanceSheet(StatementQuery),
    CashFlow(StatementQuery),
    KeyMetrics(StatementQuery),
    FinancialRatios(StatementQuery),
    AnalystEstimates(StatementQuery),
    TechnicalIndicator { name: String, period: u32 },
}

impl DataRequest {
    /// Build a request from a dataset name used in collection plans.
    pub fn from_dataset_name(name: &str, query: &StatementQuery) -> Option<Self> {
        let request = match name {
            "profile" => DataRequest::Profile,
            "stock_price" => DataRequest::StockPrice { days: 365 },
            "income_statement" => DataRequest::IncomeStatement(query.clone()),
            "balance_sheet" => DataRequest::BalanceSheet(query.clone()),
            "cash_flow" => DataRequest::CashFlow(query.clone()),
            "key_metrics" => DataRequest::KeyMetrics(query.clone()),
            "financial_ratios" => DataRequest::FinancialRatios(query.clone()),
            "analyst_estimates" => DataRequest::AnalystEstimates(query.clone()),
            _ => return None,
        };
        Some(request)
    }

    /// Key under which the result is stored in `CollectedData::datasets`.
    pub fn dataset_name(&self) -> String {
        match self {
            DataRequest::Profile => "profile".to_string(),
            DataRequest::StockPrice { .. } => "stock_price".to_string(),
            DataRequest::IncomeStatement(_) => "income_statement".to_string(),
            DataRequest::BalanceSheet(_) => "balance_sheet".to_string(),
            DataRequest::CashFlow(_) => "cash_flow".to_string(),
            DataRequest::KeyMetrics(_) => "key_metrics".to_string(),
            DataRequest::FinancialRatios(_) => "financial_ratios".to_string(),
            DataRequest::AnalystEstimates(_) => "analyst_estimates".to_string(),
            DataRequest::TechnicalIndicator { name, .. } => format!("indicator_{}", name),
        }
    }

    /// Endpoint path relative to the provider base URL.
    pub fn path(&self, ticker: &str) -> String {
        match self {
            DataRequest::Profile => format!("profile/{ticker}"),
            DataRequest::StockPrice { .. } => format!("historical-price-full/{ticker}"),
            DataRequest::IncomeStatement(_) => format!("income-statement/{ticker}"),
            DataRequest::BalanceSheet(_) => format!("balance-sheet-statement/{ticker}"),
            DataRequest::CashFlow(_) => format!("cash-flow-statement/{ticker}"),
            DataRequest::KeyMetrics(_) => format!("key-metrics/{ticker}"),
            DataRequest::FinancialRatios(_) => format!("ratios/{ticker}"),
            DataRequest::AnalystEstimates(_) => format!("analyst-estimates/{ticker}"),
            DataRequest::TechnicalIndicator { name, .. } => {
                let indicator = match name.to_lowercase().as_str() {
                    known @ ("sma" | "ema" | "wma" | "rsi" | "macd") => known.to_string(),
                    _ => "rsi".to_string(),
                };
                format!("technical_indicator/daily/{indicator}/{ticker}")
            }
        }
    }

    pub fn query(&self) -> Vec<(String, String)> {
        match self {
            DataRequest::Profile => vec![],
            DataRequest::StockPrice { days } => vec![("timeseries".to_string(), days.to_string())],
            DataRequest::IncomeStatement(q)
            | DataRequest::BalanceSheet(q)
            | DataRequest::CashFlow(q)
            | DataRequest::KeyMetrics(q)
            | DataRequest::FinancialRatios(q)
            | DataRequest::AnalystEstimates(q) => vec![
                ("period".to_string(), q.period.clone()),
                ("limit".to_string(), q.limit.to_string()),
            ],
            DataRequest::TechnicalIndicator { period, .. } => {
                vec![("period".to_string(), period.to_string())]
            }
        }
    }
}

/// Ticker-keyed market data source. Failures come back inline on the dataset.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn fetch(&self, ticker: &str, request: &DataRequest) -> Dataset;
}

/// REST client for the Financial Modeling Prep API.
pub struct FmpClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    cache: MemoryCache,
}

impl FmpClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
        cache: MemoryCache,
    ) -> Result<Self, DataError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            cache,
        })
    }

    /// Build from config, reading the API key from the configured environment variable.
    pub fn from_config(config: &DataConfig) -> Result<Self, DataError> {
        let api_key = std::env::var(&config.fmp_api_key_env).unwrap_or_else(|_| {
            tracing::warn!(
                env = %config.fmp_api_key_env,
                "Market data API key not set; requests will likely be rejected"
            );
            String::new()
        });
        Self::new(
            config.fmp_base_url.clone(),
            api_key,
            Duration::from_secs(config.timeout_seconds),
            MemoryCache::new(
                config.cache_capacity,
                Duration::from_secs(config.cache_ttl_seconds),
            ),
        )
    }

    fn cache_key(&self, path: &str, query: &[(String, String)]) -> String {
        let params: Vec<String> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
        format!("{}/{}?{}", self.base_url, path, params.join("&"))
    }

    async fn get_json(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<serde_json::Value, DataError> {
        let key = self.cache_key(path, query);
        if let Some(body) = self.cache.get(&key).await {
            tracing::debug!(endpoint = path, "Market data cache hit");
            return Ok(serde_json::from_str(&body)?);
        }

        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .query(query)
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DataError::Status {
                status: status.as_u16(),
                endpoint: path.to_string(),
            });
        }

        let body = response.text().await?;
        let value: serde_json::Value = serde_json::from_str(&body)?;
        if let Some(message) = value.get("Error Message").and_then(|m| m.as_str()) {
            return Err(DataError::Provider(message.to_string()));
        }

        self.cache.insert(key, body).await;
        Ok(value)
    }
}

#[async_trait]
impl MarketData for FmpClient {
    async fn fetch(&self, ticker: &str, request: &DataRequest) -> Dataset {
        let path = request.path(ticker);
        match self.get_json(&path, &request.query()).await {
            Ok(records) => Dataset::ok(records, SourceAttribution::now(FMP_ORIGIN, path)),
            Err(e) => {
                tracing::warn!(ticker, endpoint = %path, error = %e, "Market data fetch failed");
                Dataset::failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> FmpClient {
        FmpClient::new(
            server.uri(),
            "test-key",
            Duration::from_secs(5),
            MemoryCache::new(100, Duration::from_secs(60)),
        )
        .unwrap()
    }

    #[test]
    fn request_paths() {
        let q = StatementQuery::default();
        assert_eq!(
            DataRequest::BalanceSheet(q.clone()).path("ACME"),
            "balance-sheet-statement/ACME"
        );
        assert_eq!(
            DataRequest::TechnicalIndicator {
                name: "SMA".to_string(),
                period: 14
            }
            .path("ACME"),
            "technical_indicator/daily/sma/ACME"
        );
        assert_eq!(
            DataRequest::TechnicalIndicator {
                name: "stochastic".to_string(),
                period: 14
            }
            .path("ACME"),
            "technical_indicator/daily/rsi/ACME"
        );
        assert!(DataRequest::from_dataset_name("unknown", &q).is_none());
        assert_eq!(
            DataRequest::from_dataset_name("cash_flow", &q)
                .unwrap()
                .dataset_name(),
            "cash_flow"
        );
    }

    #[tokio::test]
    async fn fetch_attaches_attribution() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/income-statement/ACME"))
            .and(query_param("period", "annual"))
            .and(query_param("apikey", "test-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!([{"revenue": 1000, "netIncome": 100}])),
            )
            .mount(&server)
            .await;

        let ds = client(&server)
            .fetch("ACME", &DataRequest::IncomeStatement(StatementQuery::default()))
            .await;

        assert!(ds.is_available());
        let source = ds.source.unwrap();
        assert_eq!(source.origin, FMP_ORIGIN);
        assert_eq!(source.endpoint, "income-statement/ACME");
    }

    #[tokio::test]
    async fn not_found_becomes_inline_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/balance-sheet-statement/ACME"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let ds = client(&server)
            .fetch("ACME", &DataRequest::BalanceSheet(StatementQuery::default()))
            .await;

        assert!(!ds.is_available());
        assert!(ds.error.unwrap().contains("404"));
        assert!(ds.source.is_none());
    }

    #[tokio::test]
    async fn provider_error_message_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/profile/ACME"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"Error Message": "Invalid API KEY."})),
            )
            .mount(&server)
            .await;

        let ds = client(&server).fetch("ACME", &DataRequest::Profile).await;
        assert_eq!(
            ds.error.as_deref(),
            Some("Provider error: Invalid API KEY.")
        );
    }

    #[tokio::test]
    async fn second_fetch_served_from_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/profile/ACME"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!([{"symbol": "ACME"}])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client(&server);
        let first = client.fetch("ACME", &DataRequest::Profile).await;
        let second = client.fetch("ACME", &DataRequest::Profile).await;

        assert_eq!(first.records, second.records);
    }
}
