use std::str::FromStr;

use chrono::{DateTime, Utc};
use finresearch_models::run::RUNS_TABLE_DDL;
use finresearch_models::{RunStatus, RunSummary, StageName};
use rusqlite::Connection;
use uuid::Uuid;

use crate::error::DataError;

/// SQLite history of pipeline runs, one row per run.
pub struct RunLedger {
    conn: Connection,
}

impl RunLedger {
    /// Open (or create) the ledger database at `path`.
    pub fn open(path: &str) -> Result<Self, DataError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(RUNS_TABLE_DDL)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, DataError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(RUNS_TABLE_DDL)?;
        Ok(Self { conn })
    }

    /// Insert or replace the row for a run.
    pub fn record(&self, summary: &RunSummary) -> Result<(), DataError> {
        let failed_stage = summary.failed_stage.map(|s| s.key());
        self.conn.execute(
            "INSERT OR REPLACE INTO runs \
             (run_id, subject, status, started_at, elapsed_ms, failed_stage, error, results_path) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                summary.run_id.to_string(),
                summary.subject,
                summary.status.as_str(),
                summary.started_at.to_rfc3339(),
                summary.elapsed_ms as i64,
                failed_stage,
                summary.error,
                summary.results_path,
            ],
        )?;
        Ok(())
    }

    /// Most recent runs first.
    pub fn recent(&self, limit: usize) -> Result<Vec<RunSummary>, DataError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT run_id, subject, status, started_at, elapsed_ms, failed_stage, error, results_path \
             FROM runs ORDER BY started_at DESC LIMIT ?1",
        )?;

        let rows = stmt
            .query_map(rusqlite::params![limit as i64], |row| {
                Ok(RawRun {
                    run_id: row.get(0)?,
                    subject: row.get(1)?,
                    status: row.get(2)?,
                    started_at: row.get(3)?,
                    elapsed_ms: row.get(4)?,
                    failed_stage: row.get(5)?,
                    error: row.get(6)?,
                    results_path: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawRun::into_summary).collect()
    }

    /// Runs for one subject, most recent first.
    pub fn for_subject(&self, subject: &str) -> Result<Vec<RunSummary>, DataError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT run_id, subject, status, started_at, elapsed_ms, failed_stage, error, results_path \
             FROM runs WHERE subject = ?1 ORDER BY started_at DESC",
        )?;

        let rows = stmt
            .query_map(rusqlite::params![subject], |row| {
                Ok(RawRun {
                    run_id: row.get(0)?,
                    subject: row.get(1)?,
                    status: row.get(2)?,
                    started_at: row.get(3)?,
                    elapsed_ms: row.get(4)?,
                    failed_stage: row.get(5)?,
                    error: row.get(6)?,
                    results_path: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawRun::into_summary).collect()
    }
}

struct RawRun {
    run_id: String,
    subject: String,
    status: String,
    started_at: String,
    elapsed_ms: i64,
    failed_stage: Option<String>,
    error: Option<String>,
    results_path: Option<String>,
}

impl RawRun {
    fn into_summary(self) -> Result<RunSummary, DataError> {
        let run_id = Uuid::from_str(&self.run_id)
            .map_err(|e| DataError::Provider(format!("bad run id {}: {e}", self.run_id)))?;
        let started_at = DateTime::parse_from_rfc3339(&self.started_at)
            .map_err(|e| DataError::Provider(format!("bad timestamp {}: {e}", self.started_at)))?
            .with_timezone(&Utc);
        let status: RunStatus = serde_json::from_value(serde_json::Value::String(self.status))?;
        let failed_stage = self
            .failed_stage
            .map(|s| serde_json::from_value::<StageName>(serde_json::Value::String(s)))
            .transpose()?;

        Ok(RunSummary {
            run_id,
            subject: self.subject,
            status,
            started_at,
            elapsed_ms: self.elapsed_ms.max(0) as u64,
            failed_stage,
            error: self.error,
            results_path: self.results_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn summary(subject: &str, status: RunStatus, offset_secs: i64) -> RunSummary {
        RunSummary {
            run_id: Uuid::new_v4(),
            subject: subject.to_string(),
            status,
            started_at: Utc::now() - Duration::seconds(offset_secs),
            elapsed_ms: 1234,
            failed_stage: None,
            error: None,
            results_path: Some(format!("reports/{subject}_results.json")),
        }
    }

    #[test]
    fn record_and_read_back() {
        let ledger = RunLedger::open_in_memory().unwrap();
        let mut failed = summary("ACME", RunStatus::Failed, 0);
        failed.failed_stage = Some(StageName::FactCheck);
        failed.error = Some("stage FACTCHECK failed".to_string());
        ledger.record(&failed).unwrap();

        let rows = ledger.recent(10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].run_id, failed.run_id);
        assert_eq!(rows[0].status, RunStatus::Failed);
        assert_eq!(rows[0].failed_stage, Some(StageName::FactCheck));
        assert_eq!(rows[0].elapsed_ms, 1234);
    }

    #[test]
    fn recent_is_newest_first_and_limited() {
        let ledger = RunLedger::open_in_memory().unwrap();
        ledger.record(&summary("OLD", RunStatus::Completed, 300)).unwrap();
        ledger.record(&summary("MID", RunStatus::Partial, 200)).unwrap();
        ledger.record(&summary("NEW", RunStatus::Cancelled, 100)).unwrap();

        let rows = ledger.recent(2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].subject, "NEW");
        assert_eq!(rows[1].subject, "MID");
    }

    #[test]
    fn record_replaces_same_run() {
        let ledger = RunLedger::open_in_memory().unwrap();
        let mut run = summary("ACME", RunStatus::Running, 0);
        ledger.record(&run).unwrap();
        run.status = RunStatus::Completed;
        ledger.record(&run).unwrap();

        let rows = ledger.for_subject("ACME").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, RunStatus::Completed);
    }

    #[test]
    fn file_backed_ledger_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.db");
        let path = path.to_str().unwrap();
        {
            let ledger = RunLedger::open(path).unwrap();
            ledger.record(&summary("ACME", RunStatus::Completed, 0)).unwrap();
        }

        let reopened = RunLedger::open(path).unwrap();
        assert_eq!(reopened.recent(5).unwrap().len(), 1);
    }
}
