use anyhow::Result;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::db::{self, CaseClaim, CasePayload, CaseStage};
use crate::error::StageError;
use crate::parser::MISSING;
use crate::render::PageRenderer;

use super::{drain_spinner, StageReport};

const STAGE: CaseStage = CaseStage::Detail;

/// Detail stage: render each extracted decision's own page and store the
/// full HTML.
pub async fn run(
    conn: &Connection,
    renderer: &dyn PageRenderer,
    limit: Option<usize>,
) -> Result<StageReport> {
    let mut report = StageReport::default();
    let pb = drain_spinner(STAGE.name());

    while report.below(limit) {
        let Some(case) = db::claim_case(conn, STAGE)? else {
            break;
        };
        report.claimed += 1;
        info!(case = case.id, decision = %case.decision_id, stage = STAGE.name(), "claimed");

        match fetch(renderer, &case).await {
            Ok(html) => {
                commit_ok(conn, case.id, CasePayload::DetailHtml(html))?;
                info!(case = case.id, stage = STAGE.name(), "committed");
                report.succeeded += 1;
            }
            Err(e) => {
                commit_err(conn, case.id, &e)?;
                warn!(case = case.id, stage = STAGE.name(), error = %e, "failed");
                report.failed += 1;
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    Ok(report)
}

async fn fetch(renderer: &dyn PageRenderer, case: &CaseClaim) -> Result<String, StageError> {
    let url = case
        .case_url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty() && *u != MISSING)
        .ok_or(StageError::MissingField("case_url"))?;
    renderer.render(url).await
}

fn commit_ok(conn: &Connection, id: i64, payload: CasePayload) -> Result<()> {
    if !db::complete_case(conn, STAGE, id, &payload)? {
        warn!(case = id, stage = STAGE.name(), "commit rejected, case was reset while in flight");
    }
    Ok(())
}

fn commit_err(conn: &Connection, id: i64, error: &StageError) -> Result<()> {
    if !db::fail_case(conn, STAGE, id, &error.to_string())? {
        warn!(case = id, stage = STAGE.name(), "error commit rejected, case was reset while in flight");
    }
    Ok(())
}
