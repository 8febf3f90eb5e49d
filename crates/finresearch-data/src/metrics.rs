//! Ratio and trend calculations over raw statement records.
//!
//! Statement rows are expected newest first, as the provider returns them.
//! Growth rates and margins are percentages rounded to four decimal places.

use std::collections::BTreeMap;
use std::str::FromStr;

use finresearch_models::{
    BalanceSheetMetrics, CashFlowMetrics, CollectedData, CompetitorSummary, Dataset,
    FinancialMetrics, IncomeMetrics, IndicatorSummary, MarketSnapshot, Trend,
};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

const SCALE: u32 = 4;
const INDICATOR_PREFIX: &str = "indicator_";
/// Rows compared for an indicator's recent trend.
const RECENT_ROWS: usize = 5;
const NON_VALUE_COLUMNS: [&str; 8] = [
    "date", "symbol", "indicator", "open", "high", "low", "close", "volume",
];

/// Compute metrics from whichever statements were collected.
///
/// A statement that is absent or failed yields `None` for its section.
/// Every `indicator_*` dataset gets a technical summary, failed ones included.
pub fn compute_metrics(data: &CollectedData) -> FinancialMetrics {
    FinancialMetrics {
        income: data.dataset("income_statement").and_then(income_metrics),
        balance_sheet: data.dataset("balance_sheet").and_then(balance_sheet_metrics),
        cash_flow: data.dataset("cash_flow").and_then(cash_flow_metrics),
        technical: technical_metrics(data),
    }
}

/// Latest key metrics, ratios, close and competitor summaries, as collected.
pub fn market_snapshot(data: &CollectedData) -> MarketSnapshot {
    MarketSnapshot {
        key_metrics: latest_row(data.dataset("key_metrics")),
        financial_ratios: latest_row(data.dataset("financial_ratios")),
        latest_close: data
            .dataset("stock_price")
            .and_then(|ds| series_rows(ds).first().and_then(|row| field(row, "close"))),
        competitors: data
            .competitors
            .iter()
            .map(|(ticker, sets)| (ticker.clone(), competitor_summary(sets)))
            .collect(),
    }
}

fn latest_row(ds: Option<&Dataset>) -> serde_json::Value {
    ds.and_then(|ds| ds.rows().first().map(|row| (*row).clone()))
        .unwrap_or(serde_json::Value::Null)
}

fn competitor_summary(sets: &BTreeMap<String, Dataset>) -> CompetitorSummary {
    let profile = sets.get("profile").filter(|d| d.is_available());
    let profile_row = profile.and_then(|d| d.rows().first().copied());
    let text = |key: &str| {
        profile_row
            .and_then(|row| row.get(key))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };
    CompetitorSummary {
        company_name: text("companyName"),
        sector: text("sector"),
        market_cap: profile_row.and_then(|row| field(row, "mktCap")),
        key_metrics: latest_row(sets.get("key_metrics").filter(|d| d.is_available())),
        errors: sets
            .iter()
            .filter_map(|(name, ds)| ds.error.as_ref().map(|e| format!("{name}: {e}")))
            .collect(),
    }
}

fn technical_metrics(data: &CollectedData) -> BTreeMap<String, IndicatorSummary> {
    data.datasets
        .iter()
        .filter_map(|(name, ds)| {
            let indicator = name.strip_prefix(INDICATOR_PREFIX)?;
            Some((indicator.to_string(), indicator_summary(indicator, ds)))
        })
        .collect()
}

/// Rows of a time series, unwrapping a `{"historical": [...]}` envelope.
fn series_rows(ds: &Dataset) -> Vec<&serde_json::Value> {
    match ds.records.get("historical") {
        Some(serde_json::Value::Array(items)) => items.iter().collect(),
        _ => ds.rows(),
    }
}

/// The column holding the indicator value: its own name, then `value`, then
/// the first other numeric column.
fn value_column(indicator: &str, row: &serde_json::Value) -> Option<String> {
    [indicator, "value"]
        .into_iter()
        .find(|name| field(row, name).is_some())
        .map(str::to_string)
        .or_else(|| {
            row.as_object()?
                .keys()
                .find(|k| !NON_VALUE_COLUMNS.contains(&k.as_str()) && field(row, k).is_some())
                .cloned()
        })
}

fn indicator_summary(indicator: &str, ds: &Dataset) -> IndicatorSummary {
    if let Some(error) = &ds.error {
        return IndicatorSummary::failed(error.clone());
    }
    let rows = series_rows(ds);
    let Some(first) = rows.first() else {
        return IndicatorSummary::failed("No historical data available");
    };
    let Some(column) = value_column(indicator, first) else {
        return IndicatorSummary::failed("No value column found");
    };

    let values: Vec<Decimal> = rows.iter().filter_map(|row| field(row, &column)).collect();
    let Some(&latest) = values.first() else {
        return IndicatorSummary::failed("No values available");
    };
    let average = values
        .iter()
        .sum::<Decimal>()
        .checked_div(Decimal::from(values.len()))
        .map(|avg| avg.round_dp(SCALE));
    let oldest_recent = values[values.len().min(RECENT_ROWS) - 1];
    let recent_trend = if values.len() == 1 || latest > oldest_recent {
        Trend::Up
    } else {
        Trend::Down
    };

    IndicatorSummary {
        latest_value: Some(latest),
        average_value: average,
        recent_trend: Some(recent_trend),
        error: None,
    }
}

fn field(row: &serde_json::Value, name: &str) -> Option<Decimal> {
    match row.get(name)? {
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string())
            .ok()
            .or_else(|| n.as_f64().and_then(Decimal::from_f64)),
        serde_json::Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn first_field(row: &serde_json::Value, names: &[&str]) -> Option<Decimal> {
    names.iter().find_map(|name| field(row, name))
}

fn percent(numerator: Option<Decimal>, denominator: Option<Decimal>) -> Option<Decimal> {
    ratio(numerator, denominator)
        .and_then(|r| r.checked_mul(Decimal::ONE_HUNDRED))
        .map(|p| p.round_dp(SCALE))
}

fn ratio(numerator: Option<Decimal>, denominator: Option<Decimal>) -> Option<Decimal> {
    let (n, d) = (numerator?, denominator?);
    n.checked_div(d).map(|r| r.round_dp(SCALE))
}

/// Period-over-period change of the latest value, in percent.
fn growth(latest: Option<Decimal>, previous: Option<Decimal>) -> Option<Decimal> {
    let (latest, previous) = (latest?, previous?);
    percent(Some(latest - previous), Some(previous.abs()))
}

fn income_metrics(ds: &Dataset) -> Option<IncomeMetrics> {
    let rows = ds.rows();
    let latest = rows.first()?;
    let previous = rows.get(1);

    let revenue = field(latest, "revenue");
    let net_income = field(latest, "netIncome");
    Some(IncomeMetrics {
        revenue,
        net_income,
        revenue_growth: growth(revenue, previous.and_then(|p| field(p, "revenue"))),
        net_income_growth: growth(net_income, previous.and_then(|p| field(p, "netIncome"))),
        gross_margin: percent(field(latest, "grossProfit"), revenue),
        operating_margin: percent(field(latest, "operatingIncome"), revenue),
        profit_margin: percent(net_income, revenue),
    })
}

fn balance_sheet_metrics(ds: &Dataset) -> Option<BalanceSheetMetrics> {
    let rows = ds.rows();
    let latest = rows.first()?;

    let total_assets = field(latest, "totalAssets");
    let total_liabilities = field(latest, "totalLiabilities");
    Some(BalanceSheetMetrics {
        total_assets,
        total_liabilities,
        current_ratio: ratio(
            field(latest, "totalCurrentAssets"),
            field(latest, "totalCurrentLiabilities"),
        ),
        debt_to_assets: ratio(total_liabilities, total_assets),
        equity_ratio: ratio(field(latest, "totalStockholdersEquity"), total_assets),
    })
}

fn cash_flow_metrics(ds: &Dataset) -> Option<CashFlowMetrics> {
    let rows = ds.rows();
    let latest = rows.first()?;

    let operating = first_field(
        latest,
        &["netCashProvidedByOperatingActivities", "operatingCashFlow"],
    );
    let capex = field(latest, "capitalExpenditure");
    let free_cash_flow = field(latest, "freeCashFlow").or(match (operating, capex) {
        (Some(op), Some(capex)) => Some(op - capex.abs()),
        _ => None,
    });
    Some(CashFlowMetrics {
        operating_cash_flow: operating,
        capital_expenditure: capex,
        free_cash_flow,
    })
}
