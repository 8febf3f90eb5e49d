//! finresearch - multi-agent financial research pipeline
//!
//! Plans, collects market data, searches the web, analyzes fundamentals,
//! writes a Markdown report and fact-checks its citations for one ticker
//! per run, using an OpenAI-compatible completion endpoint.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use finresearch::models::{FinResearchConfig, RunAggregate, RunStatus};
//! use finresearch::agents::{Orchestrator, ArtifactStore, CompletionEndpoint};
//! use finresearch::data::{FmpClient, SerpApiClient, RunLedger};
//! ```

pub use finresearch_agents as agents;
pub use finresearch_data as data;
pub use finresearch_models as models;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use finresearch_agents::{ArtifactStore, HttpCompletionEndpoint, Orchestrator, RunFailure};
use finresearch_data::{FmpClient, RunLedger, SerpApiClient};
use finresearch_models::{FinResearchConfig, RunAggregate, RunSummary};
use tokio_util::sync::CancellationToken;

/// Read a TOML config file. Missing sections take their defaults.
pub fn load_config(path: impl AsRef<Path>) -> Result<FinResearchConfig, anyhow::Error> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("Failed to parse config: {}", path.display()))
}

/// Build an Orchestrator wired to the configured live endpoints.
pub fn build_orchestrator(config: &FinResearchConfig) -> Result<Orchestrator, anyhow::Error> {
    let endpoint = HttpCompletionEndpoint::from_config(&config.llm)?;
    let market = FmpClient::from_config(&config.data)?;
    let search = SerpApiClient::from_config(&config.data)?;
    let store = ArtifactStore::from_config(&config.output)?;

    Ok(Orchestrator::new(
        config.clone(),
        Arc::new(endpoint),
        Arc::new(market),
        Arc::new(search),
        store,
    ))
}

/// Research one ticker. The run is persisted whether it succeeds or not.
pub async fn analyze(
    orchestrator: &Orchestrator,
    ticker: &str,
    cancel: CancellationToken,
) -> Result<RunAggregate, RunFailure> {
    orchestrator.run(ticker, cancel).await
}

/// Most recent runs recorded in the configured ledger.
pub fn history(config: &FinResearchConfig, limit: usize) -> Result<Vec<RunSummary>, anyhow::Error> {
    let path = config
        .output
        .ledger_path
        .as_deref()
        .context("No ledger_path configured under [output]")?;
    let ledger = RunLedger::open(path)?;
    Ok(ledger.recent(limit)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipped_config_matches_defaults() {
        let config: FinResearchConfig =
            toml::from_str(include_str!("../../../config/finresearch.toml")).unwrap();
        let mut expected = FinResearchConfig::default();
        expected.output.ledger_path = Some("reports/runs.db".to_string());
        assert_eq!(config, expected);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("finresearch.toml");
        std::fs::write(&path, "[retry]\nmax_attempts = 5\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.agents, FinResearchConfig::default().agents);
    }

    #[test]
    fn missing_config_names_the_path() {
        let err = load_config("/nonexistent/finresearch.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/finresearch.toml"));
    }

    #[test]
    fn history_requires_a_ledger() {
        let err = history(&FinResearchConfig::default(), 10).unwrap_err();
        assert!(err.to_string().contains("ledger_path"));
    }

    #[test]
    fn history_reads_recorded_runs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = FinResearchConfig::default();
        let path = dir.path().join("runs.db").display().to_string();
        config.output.ledger_path = Some(path.clone());

        let ledger = RunLedger::open(&path).unwrap();
        ledger.record(&RunAggregate::start("ACME").summary()).unwrap();
        drop(ledger);

        let runs = history(&config, 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].subject, "ACME");
    }
}
