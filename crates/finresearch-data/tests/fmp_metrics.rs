//! Market data fetched over HTTP flows into metrics, and runs survive a
//! ledger reopen.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use finresearch_data::{
    compute_metrics, DataRequest, FmpClient, MarketData, MemoryCache, RunLedger, StatementQuery,
};
use finresearch_models::{
    CollectedData, DataCollectionPlan, RunAggregate, RunFailureInfo, RunStatus, StageName,
};
use rust_decimal_macros::dec;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn provider() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/income-statement/ACME"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"date": "2023-12-31", "revenue": 1200, "netIncome": 150, "grossProfit": 480},
            {"date": "2022-12-31", "revenue": 1000, "netIncome": 100, "grossProfit": 390},
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/balance-sheet-statement/ACME"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/cash-flow-statement/ACME"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"date": "2023-12-31", "operatingCashFlow": 300, "capitalExpenditure": -80},
        ])))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn missing_balance_sheet_leaves_its_metrics_empty() {
    let server = provider().await;
    let market: Arc<dyn MarketData> = Arc::new(
        FmpClient::new(
            server.uri(),
            "test-key",
            Duration::from_secs(5),
            MemoryCache::new(100, Duration::from_secs(60)),
        )
        .unwrap(),
    );

    let query = StatementQuery::default();
    let requests = [
        DataRequest::IncomeStatement(query.clone()),
        DataRequest::BalanceSheet(query.clone()),
        DataRequest::CashFlow(query),
    ];
    let mut datasets = BTreeMap::new();
    for request in &requests {
        datasets.insert(request.dataset_name(), market.fetch("ACME", request).await);
    }

    let balance = &datasets["balance_sheet"];
    assert!(balance.error.as_deref().unwrap().contains("404"));
    assert!(balance.source.is_none());

    let data = CollectedData {
        subject: "ACME".to_string(),
        data_plan: DataCollectionPlan::default(),
        datasets,
        competitors: BTreeMap::new(),
    };
    let metrics = compute_metrics(&data);

    let income = metrics.income.unwrap();
    assert_eq!(income.revenue, Some(dec!(1200)));
    assert_eq!(income.revenue_growth, Some(dec!(20)));
    assert_eq!(income.gross_margin, Some(dec!(40)));
    assert!(metrics.balance_sheet.is_none());
    assert_eq!(metrics.cash_flow.unwrap().free_cash_flow, Some(dec!(220)));

    let sources: Vec<String> = data.sources().iter().map(|s| s.endpoint.clone()).collect();
    assert_eq!(
        sources,
        vec!["cash-flow-statement/ACME", "income-statement/ACME"]
    );
}

#[test]
fn ledger_rows_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runs.db");
    let path = path.to_str().unwrap();

    let mut failed = RunAggregate::start("ACME");
    failed.status = RunStatus::Failed;
    failed.failure = Some(RunFailureInfo {
        stage: StageName::Collect,
        error: "transport error".to_string(),
    });
    RunLedger::open(path).unwrap().record(&failed.summary()).unwrap();

    let rows = RunLedger::open(path).unwrap().recent(5).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].run_id, failed.run_id);
    assert_eq!(rows[0].failed_stage, Some(StageName::Collect));
    assert_eq!(rows[0].error.as_deref(), Some("transport error"));
}
