use async_trait::async_trait;
use chrono::Utc;
use finresearch_models::{ReportDraft, ReportOutline, ReportSection};
use tracing::{debug, info};

use super::{profile_name, ReportInput, StageOutput, Worker, WorkerContext};
use crate::client::AgentClient;
use crate::error::AgentError;
use crate::prompts::{outline_prompt, section_prompt, DISCLAIMER};

/// Drafts the report section by section.
pub struct ReportWriter {
    client: AgentClient,
}

impl ReportWriter {
    pub fn new(ctx: &WorkerContext) -> Self {
        Self {
            client: ctx.client(
                "ReportWriter",
                "a financial writer who produces clear equity research reports",
            ),
        }
    }
}

fn anchor(title: &str) -> String {
    title
        .trim()
        .to_lowercase()
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('-'),
            c if c.is_alphanumeric() || c == '-' || c == '_' => Some(c),
            _ => None,
        })
        .collect()
}

/// Assemble the final markdown: title, date, table of contents, sections and
/// the disclaimer.
pub fn compile_report(title: &str, date: &str, sections: &[ReportSection]) -> String {
    let mut out = format!("# {title}\n\n**Date:** {date}\n\n## Table of Contents\n\n");
    for section in sections {
        out.push_str(&format!("- [{}](#{})\n", section.title, anchor(&section.title)));
    }
    out.push_str("\n---\n\n");
    for section in sections {
        out.push_str(&format!(
            "## {}\n\n{}\n\n---\n\n",
            section.title,
            section.content.trim()
        ));
    }
    out.push_str(&format!("## Disclaimer\n\n{DISCLAIMER}\n"));
    out
}

fn analysis_context(input: &ReportInput) -> String {
    let context = serde_json::json!({
        "metrics": input.analysis.metrics,
        "market": input.analysis.market,
        "insights": input.analysis.insights,
        "research": input.research.analysis,
    });
    serde_json::to_string_pretty(&context).unwrap_or_default()
}

#[async_trait]
impl Worker for ReportWriter {
    type Input = ReportInput;
    type Output = ReportDraft;

    fn name(&self) -> &str {
        self.client.name()
    }

    async fn process(&mut self, input: &ReportInput) -> Result<StageOutput<ReportDraft>, AgentError> {
        let subject = input.subject.as_str();
        let company_name = Some(input.plan.company_name.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| profile_name(&input.company_profile))
            .unwrap_or_else(|| subject.to_string());

        let structured = self
            .client
            .send_structured::<ReportOutline>(&outline_prompt(subject, &company_name, &input.plan))
            .await?;
        let mut notes = structured.notes();
        let mut outline = structured.value;
        if outline.sections.is_empty() {
            notes.push("report_outline: no sections proposed, using the standard structure".to_string());
            outline.sections = ReportOutline::default().sections;
        }
        let title = if outline.title.trim().is_empty() {
            format!("{company_name} ({subject}) Financial Research Report")
        } else {
            outline.title.trim().to_string()
        };

        let context = analysis_context(input);
        let mut sections = Vec::with_capacity(outline.sections.len());
        for planned in &outline.sections {
            debug!(subject, section = %planned.key, "Writing section");
            let content = self
                .client
                .send_text(&section_prompt(subject, &company_name, planned, &context))
                .await?;
            sections.push(ReportSection {
                key: planned.key.clone(),
                title: planned.title.clone(),
                content,
            });
        }

        let date = Utc::now().format("%Y-%m-%d").to_string();
        let markdown = compile_report(&title, &date, &sections);
        info!(subject, sections = sections.len(), chars = markdown.len(), "Report drafted");

        Ok(StageOutput::new(
            ReportDraft {
                title,
                markdown,
                sections,
            },
            notes,
        ))
    }
}
