use serde::{Deserialize, Serialize};

/// Top-level configuration for finresearch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FinResearchConfig {
    pub llm: LlmConfig,
    pub agents: AgentsConfig,
    pub retry: RetryConfig,
    pub data: DataConfig,
    pub output: OutputConfig,
}

/// Completion endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible API.
    pub api_base: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-call timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "gpt-4".to_string(),
            temperature: 0.2,
            max_tokens: 4000,
            timeout_seconds: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentsConfig {
    /// Non-system messages kept in each agent's conversation window.
    pub window_limit: usize,
    /// Concurrent market-data and search calls within one stage.
    pub max_concurrent_fetches: usize,
    /// 1 searches overview and news only; 3 adds performance, industry and competitors.
    pub research_depth: u8,
    pub max_search_results: usize,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            window_limit: 10,
            max_concurrent_fetches: 4,
            research_depth: 3,
            max_search_results: 10,
        }
    }
}

/// Stage retry budget for transport errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per stage, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

/// Market-data and web-search providers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DataConfig {
    pub fmp_base_url: String,
    pub fmp_api_key_env: String,
    pub search_base_url: String,
    pub search_api_key_env: String,
    pub statement_period: String,
    pub statement_limit: u32,
    pub timeout_seconds: u64,
    /// Maximum number of cached market-data responses.
    pub cache_capacity: u64,
    pub cache_ttl_seconds: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            fmp_base_url: "https://financialmodelingprep.com/api/v3".to_string(),
            fmp_api_key_env: "FMP_API_KEY".to_string(),
            search_base_url: "https://serpapi.com/search".to_string(),
            search_api_key_env: "SERPAPI_API_KEY".to_string(),
            statement_period: "annual".to_string(),
            statement_limit: 5,
            timeout_seconds: 30,
            cache_capacity: 1_000,
            cache_ttl_seconds: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory receiving `<SUBJECT>_analysis.md` and `<SUBJECT>_results.json`.
    pub reports_dir: String,
    /// SQLite run ledger. No ledger is kept when unset.
    pub ledger_path: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            reports_dir: "reports".to_string(),
            ledger_path: None,
        }
    }
}
