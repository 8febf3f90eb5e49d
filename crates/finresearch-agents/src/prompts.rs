//! Prompt text for each worker. Pure functions of their inputs.

use finresearch_models::{
    CollectedData, Dataset, FinancialMetrics, MarketSnapshot, OutlineSection, ResearchFinding,
    ResearchPlan,
};

pub const DISCLAIMER: &str = "This report was generated with the assistance of AI and automated \
data analysis tools. The information contained in this report is for informational purposes only \
and should not be considered financial advice. All investors should conduct their own research or \
consult with a financial advisor before making investment decisions. The data used in this report \
comes from sources believed to be reliable, but accuracy cannot be guaranteed. Past performance is \
not indicative of future results.";

fn profile_field<'a>(profile: &'a Dataset, key: &str) -> Option<&'a str> {
    profile
        .rows()
        .first()
        .and_then(|row| row.get(key))
        .and_then(|v| v.as_str())
}

/// Compact JSON for embedding in prompts.
fn compact(value: &impl serde::Serialize) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

pub fn planner_prompt(subject: &str, profile: &Dataset) -> String {
    let name = profile_field(profile, "companyName").unwrap_or(subject);
    let sector = profile_field(profile, "sector").unwrap_or("unknown");
    let industry = profile_field(profile, "industry").unwrap_or("unknown");
    let description =
        profile_field(profile, "description").unwrap_or("No description available");

    format!(
        "Create a comprehensive financial research plan for {name} ({subject}), a company in the \
         {sector} sector and {industry} industry.\n\n\
         Company description: {description}\n\n\
         Cover:\n\
         1. Key financial analysis areas: the metrics and ratios that matter most for this industry.\n\
         2. Main competitors to compare against, as ticker symbols where possible.\n\
         3. Industry-specific factors to research.\n\
         4. Recent developments worth investigating (earnings, management, regulation).\n\
         5. The key questions the research must answer.\n\n\
         Set `ticker` to {subject} and `company_name` to the company's name."
    )
}

pub fn data_plan_prompt(subject: &str, plan: &ResearchPlan) -> String {
    format!(
        "Decide which market data to collect for {subject}.\n\n\
         Research plan:\n{}\n\n\
         Choose financial statements from: income_statement, balance_sheet, cash_flow.\n\
         Choose the statement period (annual or quarter) and how many periods to collect.\n\
         Choose technical indicators from: sma, ema, wma, rsi, macd.\n\
         Choose extra datasets from: key_metrics, financial_ratios, analyst_estimates.\n\
         List up to three competitor tickers to collect summary data for.",
        compact(plan)
    )
}

pub fn research_analysis_prompt(
    subject: &str,
    company_name: &str,
    findings: &[ResearchFinding],
) -> String {
    let mut body = String::new();
    for finding in findings {
        body.push_str(&format!("### {} ({})\n", finding.topic, finding.query));
        if let Some(error) = &finding.error {
            body.push_str(&format!("Search failed: {error}\n"));
        }
        for hit in &finding.hits {
            body.push_str(&format!("- {}: {} ({})\n", hit.title, hit.snippet, hit.source));
        }
        body.push('\n');
    }

    format!(
        "Analyze these web research findings about {company_name} ({subject}).\n\n\
         {body}\
         Identify the key market trends, the company's competitive position, major risks and \
         opportunities, recent events that may affect performance, and the industry outlook. \
         Base every statement on the findings above."
    )
}

pub fn insights_prompt(
    subject: &str,
    metrics: &FinancialMetrics,
    market: &MarketSnapshot,
    research_summary: &str,
) -> String {
    format!(
        "You are reviewing computed financial metrics for {subject}. Growth rates and margins are \
         percentages; missing sections mean the statement was unavailable. Technical indicators \
         give the latest value, the average and the recent trend.\n\n\
         Metrics:\n{}\n\n\
         Key metrics, ratios and peers:\n{}\n\n\
         Research summary:\n{research_summary}\n\n\
         Give an overall assessment in two or three sentences, the most significant trends, \
         strengths, weaknesses, risks visible in the data, and any anomalies or red flags. \
         Compare against the peers where their data allows. \
         Do not invent figures that are not in the metrics.",
        compact(metrics),
        compact(market)
    )
}

pub fn outline_prompt(subject: &str, company_name: &str, plan: &ResearchPlan) -> String {
    format!(
        "Propose the structure of an equity research report on {company_name} ({subject}).\n\n\
         Research plan:\n{}\n\n\
         Return a title and an ordered list of sections. Each section needs a snake_case key, a \
         heading, and the key points it must cover. Include an executive summary first and an \
         investment recommendation last.",
        compact(plan)
    )
}

pub fn section_prompt(
    subject: &str,
    company_name: &str,
    section: &OutlineSection,
    context: &str,
) -> String {
    let points = section
        .key_points
        .iter()
        .map(|p| format!("- {p}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Write the \"{}\" section of a research report on {company_name} ({subject}).\n\n\
         Cover these points:\n{points}\n\n\
         Available analysis:\n{context}\n\n\
         Write in clear professional markdown without a top-level heading. Use only figures \
         present in the analysis.",
        section.title
    )
}

pub fn citation_review_prompt(report: &str, data: &CollectedData, sources: &[String]) -> String {
    let available: Vec<&str> = data
        .datasets
        .iter()
        .filter(|(_, d)| d.is_available())
        .map(|(name, _)| name.as_str())
        .collect();
    format!(
        "Review the numerical claims and statements of fact in this financial report.\n\n\
         Datasets available: {}\n\
         Sources:\n{}\n\n\
         Report:\n{report}\n\n\
         List the claims that are properly cited, the claims that need a citation but have none, \
         the claims that contradict the data, and your recommendations.",
        available.join(", "),
        sources.join("\n")
    )
}

pub fn add_citations_prompt(report: &str, sources: &[String]) -> String {
    let numbered = sources
        .iter()
        .enumerate()
        .map(|(i, s)| format!("[{}] {s}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Add citations to this financial report. For each numerical claim or statement of fact, \
         add a bracketed reference such as \"Revenue increased by 12%[1]\".\n\n\
         Sources:\n{numbered}\n\n\
         Report:\n{report}\n\n\
         Keep the original formatting and structure. End with a \"## Sources\" section listing \
         every reference. Return the full report."
    )
}
