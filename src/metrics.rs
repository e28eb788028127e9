use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;
use rusqlite::{params, Connection};

use crate::db;
use crate::stages::StageReport;

pub fn new_run_id() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("run-{}", now)
}

/// Persist one stage run's aggregate counts, so batch history survives the
/// process.
pub fn record_run(conn: &Connection, run_id: &str, stage: &str, report: &StageReport) -> Result<()> {
    conn.execute(
        "INSERT INTO stage_runs (run_id, stage, claimed, succeeded, failed, empty, finished_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            run_id,
            stage,
            report.claimed as i64,
            report.succeeded as i64,
            report.failed as i64,
            report.empty as i64,
            db::now(),
        ],
    )?;
    Ok(())
}
