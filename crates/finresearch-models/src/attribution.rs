use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where an externally fetched datum came from.
///
/// Attached to every market-data dataset and search finding. Pipeline stages
/// carry it along untouched; only the fact checker reads it, to build the
/// report's Sources section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceAttribution {
    /// Provider name, e.g. "Financial Modeling Prep".
    pub origin: String,
    /// Endpoint path or search query that produced the datum.
    pub endpoint: String,
    pub retrieved_at: DateTime<Utc>,
}

impl SourceAttribution {
    pub fn now(origin: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            endpoint: endpoint.into(),
            retrieved_at: Utc::now(),
        }
    }

    /// One-line citation used in rendered reports.
    pub fn citation(&self) -> String {
        format!(
            "{}: {} (retrieved {})",
            self.origin,
            self.endpoint,
            self.retrieved_at.format("%Y-%m-%d %H:%M UTC")
        )
    }
}
