use anyhow::Result;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::db::{self, CasePayload, CaseStage};
use crate::error::StageError;
use crate::parser::detail::sanitize_case_html;

use super::{drain_spinner, StageReport};

const STAGE: CaseStage = CaseStage::Sanitize;

/// Sanitize stage: cut each stored case page down to the decision fragment.
/// Pure transformation, no collaborator round-trips.
pub fn run(conn: &Connection, limit: Option<usize>) -> Result<StageReport> {
    let mut report = StageReport::default();
    let pb = drain_spinner(STAGE.name());

    while report.below(limit) {
        let Some(case) = db::claim_case(conn, STAGE)? else {
            break;
        };
        report.claimed += 1;
        info!(case = case.id, decision = %case.decision_id, stage = STAGE.name(), "claimed");

        let outcome = case
            .case_html
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or(StageError::MissingField("case_html"))
            .and_then(sanitize_case_html);

        match outcome {
            Ok(clean) => {
                if !db::complete_case(conn, STAGE, case.id, &CasePayload::SanitizedHtml(clean))? {
                    warn!(case = case.id, stage = STAGE.name(), "commit rejected, case was reset while in flight");
                }
                info!(case = case.id, stage = STAGE.name(), "committed");
                report.succeeded += 1;
            }
            Err(e) => {
                if !db::fail_case(conn, STAGE, case.id, &e.to_string())? {
                    warn!(case = case.id, stage = STAGE.name(), "error commit rejected, case was reset while in flight");
                }
                warn!(case = case.id, stage = STAGE.name(), error = %e, "failed");
                report.failed += 1;
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    Ok(report)
}
