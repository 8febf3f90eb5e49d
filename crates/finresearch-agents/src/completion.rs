use std::time::Duration;

use async_trait::async_trait;
use finresearch_models::{ChatMessage, LlmConfig};
use serde_json::json;
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::schema::ToolSchema;

/// One outbound completion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// When set, the endpoint is forced to call this function.
    pub tool: Option<ToolSchema>,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionResponse {
    /// Assistant message text, empty when the reply was a tool call only.
    pub text: String,
    /// Raw argument text of the first tool call, if any.
    pub tool_arguments: Option<String>,
    pub usage: Option<TokenUsage>,
}

impl CompletionResponse {
    /// The text the decoder should see: tool-call arguments when present.
    pub fn structured_text(&self) -> &str {
        self.tool_arguments.as_deref().unwrap_or(&self.text)
    }
}

/// A hosted language-model completion endpoint. Mockable for testing.
#[async_trait]
pub trait CompletionEndpoint: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, AgentError>;
}

/// OpenAI-compatible `POST {api_base}/chat/completions`.
pub struct HttpCompletionEndpoint {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    timeout: Duration,
}

impl HttpCompletionEndpoint {
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AgentError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| AgentError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout,
        })
    }

    /// Build from config, reading the API key from the configured environment variable.
    pub fn from_config(config: &LlmConfig) -> Result<Self, AgentError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            AgentError::Config(format!("{} is not set", config.api_key_env))
        })?;
        Self::new(
            config.api_base.clone(),
            api_key,
            Duration::from_secs(config.timeout_seconds),
        )
    }

    fn build_body(request: &CompletionRequest) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages
            .iter()
            .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        });

        if let Some(tool) = &request.tool {
            body["tools"] = json!([tool.to_tool()]);
            body["tool_choice"] = tool.forced_choice();
        }

        body
    }

    fn parse_body(json: &serde_json::Value) -> Result<CompletionResponse, AgentError> {
        let message = json["choices"]
            .get(0)
            .map(|choice| &choice["message"])
            .ok_or_else(|| AgentError::Transport("Malformed completion: no choices".to_string()))?;

        let text = message["content"].as_str().unwrap_or_default().to_string();
        let tool_arguments = message["tool_calls"]
            .as_array()
            .and_then(|calls| calls.first())
            .map(|call| &call["function"]["arguments"])
            .and_then(|args| match args {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Null => None,
                other => Some(other.to_string()),
            });

        if text.is_empty() && tool_arguments.is_none() {
            return Err(AgentError::Transport(
                "Completion returned empty response".to_string(),
            ));
        }

        let usage = json["usage"].as_object().map(|u| TokenUsage {
            prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
            completion_tokens: u
                .get("completion_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
        });

        Ok(CompletionResponse {
            text,
            tool_arguments,
            usage,
        })
    }

    async fn send(&self, body: &serde_json::Value) -> Result<serde_json::Value, AgentError> {
        let url = format!("{}/chat/completions", self.api_base);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::Transport(format!("Request failed: {e}")))?;

        let status = response.status();
        if status.as_u16() == 429 {
            warn!("Completion endpoint rate limited");
            return Err(AgentError::Transport("Rate limited (429)".to_string()));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Completion endpoint returned error");
            return Err(AgentError::Transport(format!(
                "Endpoint returned {status}: {detail}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AgentError::Transport(format!("Malformed completion body: {e}")))
    }
}

#[async_trait]
impl CompletionEndpoint for HttpCompletionEndpoint {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, AgentError> {
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tool = request.tool.as_ref().map(|t| t.name.as_str()).unwrap_or("none"),
            "Invoking completion endpoint"
        );

        let body = Self::build_body(&request);
        let json = tokio::time::timeout(self.timeout, self.send(&body))
            .await
            .map_err(|_| AgentError::Timeout(self.timeout))??;

        Self::parse_body(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::tool_schema;
    use finresearch_models::ResearchPlan;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(tool: Option<ToolSchema>) -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4".to_string(),
            messages: vec![
                ChatMessage::system("You are Planner."),
                ChatMessage::user("Plan ACME"),
            ],
            tool,
            temperature: 0.2,
            max_tokens: 4000,
        }
    }

    #[test]
    fn body_forces_tool_choice() {
        let body = HttpCompletionEndpoint::build_body(&request(Some(tool_schema::<ResearchPlan>())));
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tool_choice"]["function"]["name"], "research_plan");
    }

    #[test]
    fn plain_body_has_no_tools() {
        let body = HttpCompletionEndpoint::build_body(&request(None));
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
        assert_eq!(body["max_tokens"], 4000);
    }

    #[tokio::test]
    async fn parses_tool_call_arguments() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(
                serde_json::json!({"tool_choice": {"function": {"name": "research_plan"}}}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{
                    "message": {
                        "content": null,
                        "tool_calls": [{
                            "id": "call_1",
                            "type": "function",
                            "function": {
                                "name": "research_plan",
                                "arguments": "{\"ticker\":\"ACME\",\"company_name\":\"Acme Corp\"}"
                            }
                        }]
                    }
                }],
                "usage": {"prompt_tokens": 42, "completion_tokens": 7}
            })))
            .mount(&server)
            .await;

        let endpoint =
            HttpCompletionEndpoint::new(server.uri(), "sk-test", Duration::from_secs(5)).unwrap();
        let response = endpoint
            .complete(request(Some(tool_schema::<ResearchPlan>())))
            .await
            .unwrap();

        assert!(response.text.is_empty());
        assert!(response.structured_text().contains("Acme Corp"));
        assert_eq!(response.usage.unwrap().prompt_tokens, 42);
    }

    #[tokio::test]
    async fn parses_plain_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "Revenue grew."}}]
            })))
            .mount(&server)
            .await;

        let endpoint =
            HttpCompletionEndpoint::new(server.uri(), "sk-test", Duration::from_secs(5)).unwrap();
        let response = endpoint.complete(request(None)).await.unwrap();
        assert_eq!(response.text, "Revenue grew.");
        assert_eq!(response.structured_text(), "Revenue grew.");
    }

    #[tokio::test]
    async fn server_error_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let endpoint =
            HttpCompletionEndpoint::new(server.uri(), "sk-test", Duration::from_secs(5)).unwrap();
        let err = endpoint.complete(request(None)).await.unwrap_err();
        assert!(err.is_transport());
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn rate_limit_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let endpoint =
            HttpCompletionEndpoint::new(server.uri(), "sk-test", Duration::from_secs(5)).unwrap();
        let err = endpoint.complete(request(None)).await.unwrap_err();
        assert!(matches!(err, AgentError::Transport(ref m) if m.contains("429")));
    }

    #[tokio::test]
    async fn malformed_body_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let endpoint =
            HttpCompletionEndpoint::new(server.uri(), "sk-test", Duration::from_secs(5)).unwrap();
        let err = endpoint.complete(request(None)).await.unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(3))
                    .set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let endpoint =
            HttpCompletionEndpoint::new(server.uri(), "sk-test", Duration::from_millis(200))
                .unwrap();
        let err = endpoint.complete(request(None)).await.unwrap_err();
        assert!(matches!(err, AgentError::Timeout(d) if d == Duration::from_millis(200)));
        assert_eq!(err.to_string(), "Completion timed out after 200ms");
    }
}
