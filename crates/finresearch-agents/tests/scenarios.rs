//! End-to-end pipeline scenarios.
//!
//! Each test drives the real orchestrator and workers against a scripted
//! completion endpoint and static market-data and search fakes, writing
//! artifacts into a temporary directory.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use finresearch_agents::test_support::{
    MemorySink, ScriptedEndpoint, StaticMarketData, StaticSearch,
};
use finresearch_agents::{AgentError, ArtifactStore, Orchestrator};
use finresearch_data::RunLedger;
use finresearch_models::{
    FinResearchConfig, RetryConfig, RunAggregate, RunStatus, StageName, StageStatus,
};
use tokio_util::sync::CancellationToken;

fn config(max_attempts: u32) -> FinResearchConfig {
    FinResearchConfig {
        retry: RetryConfig {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 10,
        },
        ..Default::default()
    }
}

fn build(
    endpoint: Arc<ScriptedEndpoint>,
    market: StaticMarketData,
    store: ArtifactStore,
    max_attempts: u32,
) -> Orchestrator {
    Orchestrator::new(
        config(max_attempts),
        endpoint,
        Arc::new(market),
        Arc::new(StaticSearch::new()),
        store,
    )
    .with_telemetry(Arc::new(MemorySink::new()))
}

fn saved_run(dir: &Path, subject: &str) -> RunAggregate {
    let path = dir.join(format!("{subject}_results.json"));
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn acme_without_balance_sheet_still_analyzes() {
    let dir = tempfile::tempdir().unwrap();
    let orch = build(
        Arc::new(ScriptedEndpoint::pipeline()),
        StaticMarketData::new().missing("balance_sheet"),
        ArtifactStore::new(dir.path()),
        3,
    );

    let run = orch.run("ACME", CancellationToken::new()).await.unwrap();
    assert_eq!(run.status, RunStatus::Partial);

    let collect = run.stage(StageName::Collect).unwrap();
    assert_eq!(collect.status, StageStatus::Partial);
    assert!(collect.notes.contains(&"balance_sheet: 404 Not Found".to_string()));
    assert_eq!(
        collect.output["datasets"]["balance_sheet"]["error"],
        "404 Not Found"
    );

    let analyze = run.stage(StageName::Analyze).unwrap();
    assert_eq!(analyze.status, StageStatus::Ok);
    assert!(run.result(StageName::Analyze).unwrap()["metrics"]["balance_sheet"].is_null());
    assert!(run.result(StageName::Analyze).unwrap()["metrics"]["income"]["revenue"].is_string());

    let issues = &run.result(StageName::FactCheck).unwrap()["validation"]["issues"];
    assert_eq!(issues[0], "Missing balance_sheet data");

    let saved = saved_run(dir.path(), "ACME");
    assert_eq!(saved.status, RunStatus::Partial);
    assert_eq!(saved.run_id, run.run_id);
}

#[tokio::test]
async fn fenced_plan_reply_is_partial_with_ticker_kept() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = ScriptedEndpoint::pipeline()
        .on_tool("research_plan", "Sure! ```json\n{\"ticker\":\"ACME\"}\n```");
    let orch = build(
        Arc::new(endpoint),
        StaticMarketData::new(),
        ArtifactStore::new(dir.path()),
        3,
    );

    let run = orch.run("ACME", CancellationToken::new()).await.unwrap();
    assert_eq!(run.status, RunStatus::Partial);

    let plan = run.stage(StageName::Plan).unwrap();
    assert_eq!(plan.status, StageStatus::Partial);
    assert_eq!(plan.attempts, 1);
    assert!(plan.notes.iter().any(|n| n.contains("company_name")));
    assert_eq!(plan.output["plan"]["ticker"], "ACME");
    assert_eq!(plan.output["plan"]["competitors"], serde_json::json!([]));

    // later stages still ran on the defaulted plan
    assert_eq!(run.stages.len(), 6);
    assert!(run.report.is_some());
}

#[tokio::test]
async fn exhausted_retries_fail_the_run_and_persist() {
    let dir = tempfile::tempdir().unwrap();
    let ledger_path = dir.path().join("runs.db");
    let ledger_path = ledger_path.to_str().unwrap();
    let endpoint = Arc::new(ScriptedEndpoint::pipeline().fail_on_tool("financial_insights", 10));
    let store = ArtifactStore::new(dir.path()).with_ledger(RunLedger::open(ledger_path).unwrap());
    let orch = build(endpoint.clone(), StaticMarketData::new(), store, 3);

    let failure = orch.run("ACME", CancellationToken::new()).await.unwrap_err();
    match &failure.error {
        AgentError::StageFailure { stage, source } => {
            assert_eq!(*stage, StageName::Analyze);
            assert!(source.is_transport());
        }
        other => panic!("expected StageFailure, got {other:?}"),
    }

    let run = &failure.aggregate;
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.failure.as_ref().unwrap().stage, StageName::Analyze);
    let analyze = run.stage(StageName::Analyze).unwrap();
    assert_eq!(analyze.status, StageStatus::Failed);
    assert_eq!(analyze.attempts, 3);
    assert!(run.stage(StageName::Report).is_none());
    assert!(run.result(StageName::Research).is_some());
    assert!(run.result(StageName::Analyze).is_none());
    assert_eq!(endpoint.tool_calls("financial_insights"), 3);

    let saved = saved_run(dir.path(), "ACME");
    assert_eq!(saved.status, RunStatus::Failed);
    assert!(!dir.path().join("ACME_analysis.md").exists());

    let rows = RunLedger::open(ledger_path).unwrap().for_subject("ACME").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].failed_stage, Some(StageName::Analyze));
}

#[tokio::test]
async fn sequential_runs_start_with_fresh_windows() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = Arc::new(ScriptedEndpoint::pipeline());
    let orch = build(
        endpoint.clone(),
        StaticMarketData::new(),
        ArtifactStore::new(dir.path()),
        3,
    );

    let first = orch.run("ACME", CancellationToken::new()).await.unwrap();
    let second = orch.run("ACME", CancellationToken::new()).await.unwrap();
    assert_ne!(first.run_id, second.run_id);

    let plan_requests: Vec<_> = endpoint
        .requests()
        .into_iter()
        .filter(|r| r.tool.as_ref().is_some_and(|t| t.name == "research_plan"))
        .collect();
    assert_eq!(plan_requests.len(), 2);
    for request in &plan_requests {
        // system prompt plus this run's prompt, nothing carried over
        assert_eq!(request.messages.len(), 2);
    }
    assert_eq!(plan_requests[0].messages, plan_requests[1].messages);
}

#[tokio::test]
async fn cancellation_persists_cancelled_run() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = ScriptedEndpoint::pipeline().with_delay(Duration::from_secs(5));
    let orch = build(
        Arc::new(endpoint),
        StaticMarketData::new(),
        ArtifactStore::new(dir.path()),
        3,
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let failure = orch.run("ACME", cancel).await.unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(matches!(failure.error, AgentError::Cancelled));

    let run = &failure.aggregate;
    assert_eq!(run.status, RunStatus::Cancelled);
    assert_eq!(run.failure.as_ref().unwrap().stage, StageName::Plan);
    assert!(run.stages.is_empty());

    let saved = saved_run(dir.path(), "ACME");
    assert_eq!(saved.status, RunStatus::Cancelled);
}

#[tokio::test]
async fn cancelled_before_start_runs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = Arc::new(ScriptedEndpoint::pipeline());
    let orch = build(
        endpoint.clone(),
        StaticMarketData::new(),
        ArtifactStore::new(dir.path()),
        3,
    );

    let cancel = CancellationToken::new();
    cancel.cancel();
    let failure = orch.run("ACME", cancel).await.unwrap_err();
    assert_eq!(failure.aggregate.status, RunStatus::Cancelled);
    assert_eq!(endpoint.call_count(), 0);
}
