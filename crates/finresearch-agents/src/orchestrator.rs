use std::sync::Arc;
use std::time::Instant;

use finresearch_data::{MarketData, WebSearch};
use finresearch_models::{
    FinResearchConfig, RunAggregate, RunFailureInfo, RunStatus, StageName, StageRecord,
    StageStatus,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::artifacts::ArtifactStore;
use crate::client::AgentSettings;
use crate::completion::CompletionEndpoint;
use crate::error::{AgentError, RunFailure};
use crate::retry::{RetryBudget, RetryDecision};
use crate::telemetry::{TelemetrySink, TracingSink};
use crate::workers::{
    Analyst, AnalyzeInput, CollectInput, DataCollector, FactCheckInput, FactChecker, PlanInput,
    Planner, ReportInput, ReportWriter, ResearchInput, Researcher, Worker, WorkerContext,
};

/// Runs the six-stage research pipeline for one subject at a time.
///
/// Stages run strictly in order. Transport errors are retried per stage with
/// the configured budget; partial stage output lets the run continue; any
/// other error stops the run. The run aggregate is persisted on every path.
pub struct Orchestrator {
    config: FinResearchConfig,
    endpoint: Arc<dyn CompletionEndpoint>,
    market: Arc<dyn MarketData>,
    search: Arc<dyn WebSearch>,
    telemetry: Arc<dyn TelemetrySink>,
    store: ArtifactStore,
}

impl Orchestrator {
    pub fn new(
        config: FinResearchConfig,
        endpoint: Arc<dyn CompletionEndpoint>,
        market: Arc<dyn MarketData>,
        search: Arc<dyn WebSearch>,
        store: ArtifactStore,
    ) -> Self {
        Self {
            config,
            endpoint,
            market,
            search,
            telemetry: Arc::new(TracingSink),
            store,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    fn context(&self) -> WorkerContext {
        WorkerContext {
            endpoint: self.endpoint.clone(),
            telemetry: self.telemetry.clone(),
            settings: AgentSettings::from_config(&self.config.llm, self.config.agents.window_limit),
            market: self.market.clone(),
            search: self.search.clone(),
            agents: self.config.agents.clone(),
            data: self.config.data.clone(),
        }
    }

    /// Run the full pipeline for `subject`.
    pub async fn run(
        &self,
        subject: &str,
        cancel: CancellationToken,
    ) -> Result<RunAggregate, RunFailure> {
        let start = Instant::now();
        let mut run = RunAggregate::start(subject.trim().to_uppercase());
        info!(run_id = %run.run_id, subject = %run.subject, "Starting research run");

        let outcome = self.execute(&mut run, &cancel).await;
        run.elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => {
                run.status = if run.has_partial_stage() {
                    RunStatus::Partial
                } else {
                    RunStatus::Completed
                };
                if let Err(e) = self.store.persist(&mut run).await {
                    error!(run_id = %run.run_id, error = %e, "Failed to persist run");
                    return Err(RunFailure {
                        aggregate: Box::new(run),
                        error: e,
                    });
                }
                info!(
                    run_id = %run.run_id,
                    subject = %run.subject,
                    status = %run.status,
                    elapsed_ms = run.elapsed_ms,
                    "Research run finished"
                );
                Ok(run)
            }
            Err(e) => {
                run.status = match e {
                    AgentError::Cancelled => RunStatus::Cancelled,
                    _ => RunStatus::Failed,
                };
                if let Err(persist) = self.store.persist(&mut run).await {
                    error!(run_id = %run.run_id, error = %persist, "Failed to persist partial run");
                }
                warn!(
                    run_id = %run.run_id,
                    subject = %run.subject,
                    status = %run.status,
                    elapsed_ms = run.elapsed_ms,
                    error = %e,
                    "Research run stopped"
                );
                Err(RunFailure {
                    aggregate: Box::new(run),
                    error: e,
                })
            }
        }
    }

    async fn execute(
        &self,
        run: &mut RunAggregate,
        cancel: &CancellationToken,
    ) -> Result<(), AgentError> {
        let ctx = self.context();
        let subject = run.subject.clone();

        let planned = self
            .run_stage(
                run,
                cancel,
                StageName::Plan,
                vec![],
                &mut Planner::new(&ctx),
                &PlanInput {
                    subject: subject.clone(),
                },
            )
            .await?;

        let collected = self
            .run_stage(
                run,
                cancel,
                StageName::Collect,
                vec![StageName::Plan],
                &mut DataCollector::new(&ctx),
                &CollectInput {
                    subject: subject.clone(),
                    plan: planned.plan.clone(),
                },
            )
            .await?;

        let research = self
            .run_stage(
                run,
                cancel,
                StageName::Research,
                vec![StageName::Plan],
                &mut Researcher::new(&ctx),
                &ResearchInput {
                    subject: subject.clone(),
                    plan: planned.plan.clone(),
                    company_profile: planned.company_profile.clone(),
                },
            )
            .await?;

        let analysis = self
            .run_stage(
                run,
                cancel,
                StageName::Analyze,
                vec![StageName::Plan, StageName::Collect, StageName::Research],
                &mut Analyst::new(&ctx),
                &AnalyzeInput {
                    subject: subject.clone(),
                    plan: planned.plan.clone(),
                    data: collected.clone(),
                    research: research.clone(),
                },
            )
            .await?;

        let report = self
            .run_stage(
                run,
                cancel,
                StageName::Report,
                vec![StageName::Plan, StageName::Analyze, StageName::Research],
                &mut ReportWriter::new(&ctx),
                &ReportInput {
                    subject: subject.clone(),
                    plan: planned.plan.clone(),
                    company_profile: planned.company_profile.clone(),
                    analysis: analysis.clone(),
                    research: research.clone(),
                },
            )
            .await?;
        run.report = Some(report.markdown.clone());

        let checked = self
            .run_stage(
                run,
                cancel,
                StageName::FactCheck,
                vec![
                    StageName::Report,
                    StageName::Collect,
                    StageName::Analyze,
                    StageName::Research,
                ],
                &mut FactChecker::new(&ctx),
                &FactCheckInput {
                    subject,
                    report,
                    data: collected,
                    analysis,
                    research,
                },
            )
            .await?;
        run.report = Some(checked.improved_report);

        Ok(())
    }

    /// One stage with retry and cancellation. Appends the stage record.
    async fn run_stage<W: Worker>(
        &self,
        run: &mut RunAggregate,
        cancel: &CancellationToken,
        stage: StageName,
        inputs: Vec<StageName>,
        worker: &mut W,
        input: &W::Input,
    ) -> Result<W::Output, AgentError> {
        let started = Instant::now();
        let worker_name = worker.name().to_string();
        let mut budget = RetryBudget::new(&self.config.retry);
        info!(subject = %run.subject, stage = %stage, worker = %worker_name, "Stage started");

        let result = loop {
            if cancel.is_cancelled() {
                break Err(AgentError::Cancelled);
            }
            let attempt = budget.begin_attempt();
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(AgentError::Cancelled),
                outcome = worker.process(input) => outcome,
            };

            match outcome {
                Ok(output) => break Ok(output),
                Err(e) if e.is_transport() => match budget.record_failure() {
                    RetryDecision::Retry { after } => {
                        warn!(
                            subject = %run.subject,
                            stage = %stage,
                            attempt,
                            retry_in_ms = after.as_millis() as u64,
                            error = %e,
                            "Stage attempt failed, retrying"
                        );
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break Err(AgentError::Cancelled),
                            _ = tokio::time::sleep(after) => {}
                        }
                    }
                    RetryDecision::Exhausted => {
                        warn!(
                            subject = %run.subject,
                            stage = %stage,
                            attempt,
                            error = %e,
                            "Stage attempt failed, retry budget exhausted"
                        );
                        break Err(e);
                    }
                },
                Err(e) => break Err(e),
            }
        };

        let result = result.and_then(|output| {
            let json = serde_json::to_value(&output.value)?;
            Ok((output, json))
        });
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let attempts = budget.attempts();

        match result {
            Ok((output, json)) => {
                let status = if output.is_partial() {
                    warn!(subject = %run.subject, stage = %stage, notes = ?output.notes, "Stage degraded");
                    StageStatus::Partial
                } else {
                    StageStatus::Ok
                };
                info!(
                    subject = %run.subject,
                    stage = %stage,
                    status = ?status,
                    attempts,
                    elapsed_ms,
                    "Stage finished"
                );
                run.push_stage(StageRecord {
                    name: stage,
                    inputs,
                    subject: run.subject.clone(),
                    output: json,
                    status,
                    attempts,
                    elapsed_ms,
                    notes: output.notes,
                    error: None,
                });
                Ok(output.value)
            }
            Err(AgentError::Cancelled) => {
                warn!(subject = %run.subject, stage = %stage, "Run cancelled during stage");
                run.failure = Some(RunFailureInfo {
                    stage,
                    error: AgentError::Cancelled.to_string(),
                });
                Err(AgentError::Cancelled)
            }
            Err(e) => {
                error!(
                    subject = %run.subject,
                    stage = %stage,
                    attempts,
                    elapsed_ms,
                    error = %e,
                    "Stage failed"
                );
                run.push_stage(StageRecord {
                    name: stage,
                    inputs,
                    subject: run.subject.clone(),
                    output: serde_json::Value::Null,
                    status: StageStatus::Failed,
                    attempts,
                    elapsed_ms,
                    notes: vec![],
                    error: Some(e.to_string()),
                });
                run.failure = Some(RunFailureInfo {
                    stage,
                    error: e.to_string(),
                });
                Err(AgentError::StageFailure {
                    stage,
                    source: Box::new(e),
                })
            }
        }
    }
}
