use anyhow::Result;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::db::{self, PageOutcome};
use crate::error::StageError;
use crate::parser::DecisionExtractor;

use super::{drain_spinner, StageReport};

/// Extract stage: claim captured pages, fan each into decision records, and
/// merge them into `cases` by natural key. Zero records is a legitimate
/// terminal outcome (`empty`), distinct from failure.
pub fn run(
    conn: &Connection,
    extractor: &dyn DecisionExtractor,
    limit: Option<usize>,
) -> Result<StageReport> {
    let mut report = StageReport::default();
    let pb = drain_spinner("extract");

    while report.below(limit) {
        let Some(page) = db::claim_raw_page(conn)? else {
            break;
        };
        report.claimed += 1;
        info!(page = page.id, term = %page.search_term, index = page.page_index, "claimed capture");

        let html = page
            .html
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty());
        let Some(html) = html else {
            let error = StageError::MissingField("html").to_string();
            commit(conn, page.id, &PageOutcome::Failed { error: error.clone() })?;
            warn!(page = page.id, error = %error, "extract failed");
            report.failed += 1;
            continue;
        };

        let records = extractor.extract(html);
        if records.is_empty() {
            commit(conn, page.id, &PageOutcome::Empty)?;
            info!(page = page.id, "capture held no decisions");
            report.empty += 1;
        } else {
            let counts = db::upsert_decisions(conn, page.id, &records)?;
            commit(
                conn,
                page.id,
                &PageOutcome::Extracted {
                    count: counts.persisted(),
                },
            )?;
            info!(
                page = page.id,
                inserted = counts.inserted,
                updated = counts.updated,
                skipped = counts.skipped,
                "extract committed"
            );
            report.succeeded += 1;
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    Ok(report)
}

fn commit(conn: &Connection, id: i64, outcome: &PageOutcome) -> Result<()> {
    if !db::finish_raw_page(conn, id, outcome)? {
        warn!(page = id, "commit rejected, page was reset while in flight");
    }
    Ok(())
}
