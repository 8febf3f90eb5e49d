use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Ok,
    Partial,
    Failed(String),
}

/// One completion call as seen by an agent client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallRecord {
    pub agent: String,
    /// Contract name, or `None` for free-text calls.
    pub contract: Option<String>,
    pub duration_ms: u64,
    /// Word-count estimate of the prompt sent.
    pub prompt_tokens: usize,
    /// Word-count estimate of the reply.
    pub completion_tokens: usize,
    pub outcome: CallOutcome,
}

/// Rough token estimate used for telemetry only.
pub fn approx_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Receives call records. Must not fail or block the caller.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, record: CallRecord);
}

/// Emits each record as a structured tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn record(&self, record: CallRecord) {
        let contract = record.contract.as_deref().unwrap_or("text");
        match &record.outcome {
            CallOutcome::Failed(error) => tracing::warn!(
                agent = %record.agent,
                contract,
                duration_ms = record.duration_ms,
                prompt_tokens = record.prompt_tokens,
                error = %error,
                "Completion call failed"
            ),
            outcome => tracing::info!(
                agent = %record.agent,
                contract,
                duration_ms = record.duration_ms,
                prompt_tokens = record.prompt_tokens,
                completion_tokens = record.completion_tokens,
                partial = matches!(outcome, CallOutcome::Partial),
                "Completion call"
            ),
        }
    }
}

/// Forwards records over a bounded channel; drops them when the channel is full.
pub struct ChannelSink {
    tx: mpsc::Sender<CallRecord>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<CallRecord>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl TelemetrySink for ChannelSink {
    fn record(&self, record: CallRecord) {
        if let Err(e) = self.tx.try_send(record) {
            tracing::debug!(error = %e, "Telemetry record dropped");
        }
    }
}

/// Keeps every record in memory.
#[derive(Default, Clone)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<CallRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CallRecord> {
        self.records
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl TelemetrySink for MemorySink {
    fn record(&self, record: CallRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(agent: &str) -> CallRecord {
        CallRecord {
            agent: agent.to_string(),
            contract: None,
            duration_ms: 3,
            prompt_tokens: approx_tokens("what is the revenue"),
            completion_tokens: 0,
            outcome: CallOutcome::Ok,
        }
    }

    #[test]
    fn word_count_estimate() {
        assert_eq!(approx_tokens("  one two\nthree  "), 3);
        assert_eq!(approx_tokens(""), 0);
    }

    #[tokio::test]
    async fn channel_sink_drops_when_full() {
        let (sink, mut rx) = ChannelSink::new(1);
        sink.record(record("a"));
        sink.record(record("b"));

        assert_eq!(rx.recv().await.unwrap().agent, "a");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn memory_sink_keeps_order() {
        let sink = MemorySink::new();
        sink.record(record("a"));
        sink.record(record("b"));
        let agents: Vec<String> = sink.records().into_iter().map(|r| r.agent).collect();
        assert_eq!(agents, vec!["a", "b"]);
        TracingSink.record(record("c"));
    }
}
