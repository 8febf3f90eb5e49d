use std::sync::Arc;

use async_trait::async_trait;
use finresearch_data::{DataRequest, MarketData};
use finresearch_models::{PlanOutput, ResearchPlan};
use tracing::{info, warn};

use super::{profile_name, PlanInput, StageOutput, Worker, WorkerContext};
use crate::client::AgentClient;
use crate::error::AgentError;
use crate::prompts::planner_prompt;

/// Fetches the company profile and drafts the research plan.
pub struct Planner {
    client: AgentClient,
    market: Arc<dyn MarketData>,
}

impl Planner {
    pub fn new(ctx: &WorkerContext) -> Self {
        Self {
            client: ctx.client(
                "Planner",
                "a financial research planner who designs equity research plans",
            ),
            market: ctx.market.clone(),
        }
    }
}

#[async_trait]
impl Worker for Planner {
    type Input = PlanInput;
    type Output = PlanOutput;

    fn name(&self) -> &str {
        self.client.name()
    }

    async fn process(&mut self, input: &PlanInput) -> Result<StageOutput<PlanOutput>, AgentError> {
        let subject = input.subject.as_str();
        let profile = self.market.fetch(subject, &DataRequest::Profile).await;

        let mut notes = vec![];
        if let Some(error) = &profile.error {
            warn!(subject, error = %error, "Company profile unavailable");
            notes.push(format!("profile: {error}"));
        }

        let structured = self
            .client
            .send_structured::<ResearchPlan>(&planner_prompt(subject, &profile))
            .await?;
        notes.extend(structured.notes());

        let mut plan = structured.value;
        if plan.ticker.trim().is_empty() {
            plan.ticker = subject.to_string();
        }
        if plan.company_name.trim().is_empty() {
            plan.company_name = profile_name(&profile).unwrap_or_else(|| subject.to_string());
        }

        info!(
            subject,
            company = %plan.company_name,
            competitors = plan.competitors.len(),
            "Research plan ready"
        );
        Ok(StageOutput::new(
            PlanOutput {
                plan,
                company_profile: profile,
            },
            notes,
        ))
    }
}
