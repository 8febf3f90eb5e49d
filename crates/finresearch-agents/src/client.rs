use std::sync::Arc;
use std::time::Instant;

use finresearch_models::{ChatMessage, Contract, LlmConfig};
use serde_json::Value;
use tracing::{debug, warn};

use crate::completion::{CompletionEndpoint, CompletionRequest};
use crate::error::{AgentError, FieldIssue};
use crate::parser::{decode, validate};
use crate::schema::tool_schema;
use crate::telemetry::{approx_tokens, CallOutcome, CallRecord, TelemetrySink};
use crate::window::ConversationWindow;

/// Model parameters applied to every call unless overridden.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub window_limit: usize,
}

impl AgentSettings {
    pub fn from_config(llm: &LlmConfig, window_limit: usize) -> Self {
        Self {
            model: llm.model.clone(),
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
            window_limit,
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from_config(&LlmConfig::default(), 10)
    }
}

/// Per-call overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InvocationOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl InvocationOptions {
    pub fn temperature(temperature: f32) -> Self {
        Self {
            temperature: Some(temperature),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Completeness {
    Complete,
    /// The value is the contract fallback, with cleanly validated fields overlaid.
    Partial { issues: Vec<FieldIssue> },
}

/// A contract-validated reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Structured<C> {
    pub value: C,
    pub completeness: Completeness,
}

impl<C: Contract> Structured<C> {
    pub fn is_partial(&self) -> bool {
        matches!(self.completeness, Completeness::Partial { .. })
    }

    /// Human-readable degradation notes, empty when complete.
    pub fn notes(&self) -> Vec<String> {
        match &self.completeness {
            Completeness::Complete => vec![],
            Completeness::Partial { issues } => issues
                .iter()
                .map(|issue| format!("{}: {}", C::NAME, issue))
                .collect(),
        }
    }
}

/// Language-model client owned by one worker.
///
/// Holds the worker's conversation window. Every call appends the prompt and
/// the reply and is reported to the telemetry sink. Calls are single attempts.
pub struct AgentClient {
    name: String,
    window: ConversationWindow,
    endpoint: Arc<dyn CompletionEndpoint>,
    settings: AgentSettings,
    telemetry: Arc<dyn TelemetrySink>,
}

impl AgentClient {
    pub fn new(
        name: impl Into<String>,
        role: &str,
        endpoint: Arc<dyn CompletionEndpoint>,
        settings: AgentSettings,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let name = name.into();
        let system_prompt =
            format!("You are {name}, {role}. Always respond with JSON when appropriate.");
        Self {
            window: ConversationWindow::new(system_prompt, settings.window_limit),
            name,
            endpoint,
            settings,
            telemetry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn window(&self) -> &ConversationWindow {
        &self.window
    }

    pub fn reset(&mut self) {
        self.window.reset();
    }

    pub async fn send_text(&mut self, prompt: &str) -> Result<String, AgentError> {
        self.send_text_with(prompt, InvocationOptions::default())
            .await
    }

    /// Free-text call. On error the unanswered prompt stays in the window.
    pub async fn send_text_with(
        &mut self,
        prompt: &str,
        options: InvocationOptions,
    ) -> Result<String, AgentError> {
        self.window.push(ChatMessage::user(prompt));
        let request = self.request(options, None);
        let start = Instant::now();

        let result = self.endpoint.complete(request).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match result {
            Ok(response) => {
                self.window.push(ChatMessage::assistant(response.text.clone()));
                self.report(None, elapsed_ms, prompt, &response.text, CallOutcome::Ok);
                Ok(response.text)
            }
            Err(e) => {
                self.report(None, elapsed_ms, prompt, "", CallOutcome::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    pub async fn send_structured<C: Contract>(
        &mut self,
        prompt: &str,
    ) -> Result<Structured<C>, AgentError> {
        self.send_structured_with(prompt, InvocationOptions::default())
            .await
    }

    /// Contract-validated call.
    ///
    /// A reply that cannot be decoded or validated degrades to the contract's
    /// fallback (`Partial`); contracts without one raise `Validation`.
    pub async fn send_structured_with<C: Contract>(
        &mut self,
        prompt: &str,
        options: InvocationOptions,
    ) -> Result<Structured<C>, AgentError> {
        self.window.push(ChatMessage::user(prompt));
        let request = self.request(options, Some(tool_schema::<C>()));
        let start = Instant::now();

        let result = self.endpoint.complete(request).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.report(
                    Some(C::NAME),
                    elapsed_ms,
                    prompt,
                    "",
                    CallOutcome::Failed(e.to_string()),
                );
                return Err(e);
            }
        };

        let raw = response.structured_text().to_string();
        self.window.push(ChatMessage::assistant(raw.clone()));

        let outcome = match decode(&raw) {
            Ok(decoded) => {
                debug!(agent = %self.name, contract = C::NAME, strategy = ?decoded.strategy, "Decoded reply");
                match validate::<C>(&decoded.value) {
                    Ok(value) => Ok(Structured {
                        value,
                        completeness: Completeness::Complete,
                    }),
                    Err(failure) => {
                        Self::degrade::<C>(failure.issues, Some(failure.normalized), &raw)
                    }
                }
            }
            Err(_) => Self::degrade::<C>(
                vec![FieldIssue::new("", "no structured data found in reply")],
                None,
                &raw,
            ),
        };

        let call_outcome = match &outcome {
            Ok(s) if s.is_partial() => CallOutcome::Partial,
            Ok(_) => CallOutcome::Ok,
            Err(e) => CallOutcome::Failed(e.to_string()),
        };
        if let Ok(Structured {
            completeness: Completeness::Partial { issues },
            ..
        }) = &outcome
        {
            warn!(agent = %self.name, contract = C::NAME, issues = issues.len(), "Reply degraded to fallback");
        }
        self.report(Some(C::NAME), elapsed_ms, prompt, &raw, call_outcome);
        outcome
    }

    fn request(
        &self,
        options: InvocationOptions,
        tool: Option<crate::schema::ToolSchema>,
    ) -> CompletionRequest {
        CompletionRequest {
            model: self.settings.model.clone(),
            messages: self.window.messages().to_vec(),
            tool,
            temperature: options.temperature.unwrap_or(self.settings.temperature),
            max_tokens: options.max_tokens.unwrap_or(self.settings.max_tokens),
        }
    }

    fn degrade<C: Contract>(
        issues: Vec<FieldIssue>,
        normalized: Option<Value>,
        raw: &str,
    ) -> Result<Structured<C>, AgentError> {
        let Some(fallback) = C::fallback() else {
            return Err(AgentError::Validation {
                contract: C::NAME.to_string(),
                issues,
                raw: raw.to_string(),
            });
        };
        Ok(Structured {
            value: salvage(fallback, normalized, &issues),
            completeness: Completeness::Partial { issues },
        })
    }

    fn report(
        &self,
        contract: Option<&str>,
        duration_ms: u64,
        prompt: &str,
        reply: &str,
        outcome: CallOutcome,
    ) {
        self.telemetry.record(CallRecord {
            agent: self.name.clone(),
            contract: contract.map(str::to_string),
            duration_ms,
            prompt_tokens: approx_tokens(prompt),
            completion_tokens: approx_tokens(reply),
            outcome,
        });
    }
}

fn issue_touches(issue_path: &str, key: &str) -> bool {
    issue_path.is_empty()
        || issue_path == key
        || issue_path
            .strip_prefix(key)
            .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('['))
}

/// Overlay the top-level fields that validated cleanly onto the fallback.
fn salvage<C: Contract>(fallback: C, normalized: Option<Value>, issues: &[FieldIssue]) -> C {
    let Some(Value::Object(parsed)) = normalized else {
        return fallback;
    };
    let Ok(Value::Object(mut base)) = serde_json::to_value(&fallback) else {
        return fallback;
    };
    for (key, value) in parsed {
        if !issues.iter().any(|i| issue_touches(&i.path, &key)) {
            base.insert(key, value);
        }
    }
    serde_json::from_value(Value::Object(base)).unwrap_or(fallback)
}
