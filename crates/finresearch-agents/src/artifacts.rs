use std::path::{Path, PathBuf};
use std::sync::Mutex;

use finresearch_data::RunLedger;
use finresearch_models::{ArtifactPaths, OutputConfig, RunAggregate};
use tracing::info;

use crate::error::AgentError;

/// Writes run outputs to the reports directory and the optional run ledger.
pub struct ArtifactStore {
    reports_dir: PathBuf,
    ledger: Option<Mutex<RunLedger>>,
}

impl ArtifactStore {
    pub fn new(reports_dir: impl Into<PathBuf>) -> Self {
        Self {
            reports_dir: reports_dir.into(),
            ledger: None,
        }
    }

    pub fn with_ledger(mut self, ledger: RunLedger) -> Self {
        self.ledger = Some(Mutex::new(ledger));
        self
    }

    /// Opens the ledger when a path is configured.
    pub fn from_config(config: &OutputConfig) -> Result<Self, AgentError> {
        let store = Self::new(&config.reports_dir);
        match &config.ledger_path {
            Some(path) => Ok(store.with_ledger(RunLedger::open(path)?)),
            None => Ok(store),
        }
    }

    pub fn reports_dir(&self) -> &Path {
        &self.reports_dir
    }

    /// Write `<SUBJECT>_analysis.md` (when a report exists) and
    /// `<SUBJECT>_results.json`, then record the run in the ledger.
    ///
    /// Sets `run.artifacts` before serializing, so the results file names
    /// itself.
    pub async fn persist(&self, run: &mut RunAggregate) -> Result<ArtifactPaths, AgentError> {
        tokio::fs::create_dir_all(&self.reports_dir)
            .await
            .map_err(|e| persist_error(&self.reports_dir, e))?;

        let stem = file_stem(&run.subject);
        let report_path = match &run.report {
            Some(report) => {
                let path = self.reports_dir.join(format!("{stem}_analysis.md"));
                tokio::fs::write(&path, report)
                    .await
                    .map_err(|e| persist_error(&path, e))?;
                Some(path)
            }
            None => None,
        };

        let results_path = self.reports_dir.join(format!("{stem}_results.json"));
        let paths = ArtifactPaths {
            report_path: report_path.map(|p| p.display().to_string()),
            results_path: results_path.display().to_string(),
        };
        run.artifacts = Some(paths.clone());

        let json = serde_json::to_vec_pretty(run)?;
        tokio::fs::write(&results_path, json)
            .await
            .map_err(|e| persist_error(&results_path, e))?;

        if let Some(ledger) = &self.ledger {
            let ledger = ledger
                .lock()
                .map_err(|_| AgentError::Persist("run ledger lock poisoned".to_string()))?;
            ledger.record(&run.summary())?;
        }

        info!(
            run_id = %run.run_id,
            subject = %run.subject,
            status = %run.status,
            results = %paths.results_path,
            "Run persisted"
        );
        Ok(paths)
    }
}

fn persist_error(path: &Path, e: std::io::Error) -> AgentError {
    AgentError::Persist(format!("{}: {e}", path.display()))
}

/// Subject as a safe file name component.
fn file_stem(subject: &str) -> String {
    let stem: String = subject
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "UNKNOWN".to_string()
    } else {
        stem
    }
}
