use std::time::Duration;

use async_trait::async_trait;
use finresearch_models::{DataConfig, SearchHit, SourceAttribution};
use serde::Deserialize;

use crate::error::DataError;

pub const SERPAPI_ORIGIN: &str = "SerpAPI web search";

/// Result of one web search. Errors are carried inline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOutcome {
    pub hits: Vec<SearchHit>,
    pub source: Option<SourceAttribution>,
    pub error: Option<String>,
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> SearchOutcome;
}

#[derive(Deserialize)]
struct SerpResponse {
    #[serde(default)]
    organic_results: Vec<OrganicResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct OrganicResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    link: String,
    #[serde(default)]
    snippet: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    displayed_link: Option<String>,
}

impl From<OrganicResult> for SearchHit {
    fn from(r: OrganicResult) -> Self {
        SearchHit {
            title: r.title,
            link: r.link,
            snippet: r.snippet,
            source: r.source.or(r.displayed_link).unwrap_or_default(),
        }
    }
}

/// Google results through SerpAPI.
pub struct SerpApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl SerpApiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DataError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    pub fn from_config(config: &DataConfig) -> Result<Self, DataError> {
        let api_key = std::env::var(&config.search_api_key_env).unwrap_or_default();
        Self::new(
            config.search_base_url.clone(),
            api_key,
            Duration::from_secs(config.timeout_seconds),
        )
    }

    async fn query(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, DataError> {
        if self.api_key.is_empty() {
            return Err(DataError::Config("search API key not configured".to_string()));
        }

        let response = self
            .http
            .get(&self.base_url)
            .query(&[
                ("q", query),
                ("engine", "google"),
                ("api_key", self.api_key.as_str()),
                ("num", &max_results.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DataError::Status {
                status: status.as_u16(),
                endpoint: "search".to_string(),
            });
        }

        let body: SerpResponse = response.json().await?;
        if let Some(error) = body.error {
            return Err(DataError::Provider(error));
        }

        Ok(body
            .organic_results
            .into_iter()
            .take(max_results)
            .map(SearchHit::from)
            .collect())
    }
}

#[async_trait]
impl WebSearch for SerpApiClient {
    async fn search(&self, query: &str, max_results: usize) -> SearchOutcome {
        match self.query(query, max_results).await {
            Ok(hits) => {
                tracing::debug!(query, hits = hits.len(), "Web search complete");
                SearchOutcome {
                    hits,
                    source: Some(SourceAttribution::now(SERPAPI_ORIGIN, query)),
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(query, error = %e, "Web search failed");
                SearchOutcome {
                    hits: vec![],
                    source: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn parses_organic_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("q", "ACME news"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "organic_results": [
                    {"title": "Acme beats", "link": "https://a.example", "snippet": "Q3", "source": "Reuters"},
                    {"title": "Acme guidance", "link": "https://b.example", "snippet": "FY", "displayed_link": "b.example"},
                    {"title": "Third", "link": "https://c.example", "snippet": ""}
                ]
            })))
            .mount(&server)
            .await;

        let client = SerpApiClient::new(server.uri(), "k", Duration::from_secs(5)).unwrap();
        let outcome = client.search("ACME news", 2).await;

        assert!(outcome.error.is_none());
        assert_eq!(outcome.hits.len(), 2);
        assert_eq!(outcome.hits[0].source, "Reuters");
        assert_eq!(outcome.hits[1].source, "b.example");
        assert_eq!(outcome.source.unwrap().endpoint, "ACME news");
    }

    #[tokio::test]
    async fn missing_key_is_inline_error() {
        let client = SerpApiClient::new("http://127.0.0.1:9", "", Duration::from_secs(1)).unwrap();
        let outcome = client.search("ACME", 5).await;

        assert!(outcome.hits.is_empty());
        assert!(outcome.error.unwrap().contains("not configured"));
    }

    #[tokio::test]
    async fn server_error_is_inline_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = SerpApiClient::new(server.uri(), "k", Duration::from_secs(5)).unwrap();
        let outcome = client.search("ACME", 5).await;
        assert!(outcome.error.unwrap().contains("500"));
    }
}
