use anyhow::Result;
use rusqlite::Connection;
use tracing::{info, warn};

use crate::db::{self, CaseClaim, CasePayload, CaseStage};
use crate::error::StageError;
use crate::parser::detail::find_gateway_url;
use crate::render::FullTextResolver;

use super::{drain_spinner, StageReport};

const STAGE: CaseStage = CaseStage::Collect;

/// Collect stage: locate the full-text gateway link in the stored case page,
/// follow its redirect chain to the hosted document, and optionally download
/// it for size and checksum.
pub async fn run(
    conn: &Connection,
    resolver: &dyn FullTextResolver,
    base_url: &str,
    download: bool,
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

        match collect(resolver, base_url, download, &case).await {
            Ok(payload) => {
                if !db::complete_case(conn, STAGE, case.id, &payload)? {
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

async fn collect(
    resolver: &dyn FullTextResolver,
    base_url: &str,
    download: bool,
    case: &CaseClaim,
) -> Result<CasePayload, StageError> {
    let html = case
        .case_html
        .as_deref()
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or(StageError::MissingField("case_html"))?;

    let gateway_url =
        find_gateway_url(html, base_url).ok_or(StageError::SelectorMiss("full-text gateway link"))?;
    let full_text_url = resolver.resolve(&gateway_url).await?;

    let (bytes, sha256) = if download {
        let (len, digest) = resolver.download(&full_text_url).await?;
        (Some(len), Some(digest))
    } else {
        (None, None)
    };

    Ok(CasePayload::Artifact {
        gateway_url,
        full_text_url,
        bytes,
        sha256,
    })
}
