use std::path::Path;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::parser::DecisionRecord;

/// Statuses of a captured search-result page.
pub mod page_status {
    pub const NEW: &str = "new";
    pub const EXTRACTING: &str = "extracting";
    pub const EXTRACTED: &str = "extracted";
    pub const EMPTY: &str = "empty";
    pub const ERROR: &str = "extract_error";
}

/// The per-case stages that run the claim protocol against the `cases`
/// table. Each owns one input/running/success/error status quadruple and one
/// group of payload columns; the chain is linear: a stage's input status is
/// the previous stage's success status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseStage {
    Detail,
    Sanitize,
    Collect,
}

impl CaseStage {
    pub fn name(self) -> &'static str {
        match self {
            CaseStage::Detail => "fetch-detail",
            CaseStage::Sanitize => "sanitize",
            CaseStage::Collect => "collect",
        }
    }

    pub fn input_status(self) -> &'static str {
        match self {
            CaseStage::Detail => "extracted",
            CaseStage::Sanitize => "detail_fetched",
            CaseStage::Collect => "sanitized",
        }
    }

    pub fn running_status(self) -> &'static str {
        match self {
            CaseStage::Detail => "fetching_detail",
            CaseStage::Sanitize => "sanitizing",
            CaseStage::Collect => "collecting",
        }
    }

    pub fn success_status(self) -> &'static str {
        match self {
            CaseStage::Detail => "detail_fetched",
            CaseStage::Sanitize => "sanitized",
            CaseStage::Collect => "collected",
        }
    }

    pub fn error_status(self) -> &'static str {
        match self {
            CaseStage::Detail => "detail_error",
            CaseStage::Sanitize => "sanitize_error",
            CaseStage::Collect => "collect_error",
        }
    }

    fn claimed_at_column(self) -> &'static str {
        match self {
            CaseStage::Detail => "detail_claimed_at",
            CaseStage::Sanitize => "sanitize_claimed_at",
            CaseStage::Collect => "collect_claimed_at",
        }
    }

    fn completed_at_column(self) -> &'static str {
        match self {
            CaseStage::Detail => "detail_fetched_at",
            CaseStage::Sanitize => "sanitized_at",
            CaseStage::Collect => "collected_at",
        }
    }

    fn error_column(self) -> &'static str {
        match self {
            CaseStage::Detail => "detail_error_detail",
            CaseStage::Sanitize => "sanitize_error_detail",
            CaseStage::Collect => "collect_error_detail",
        }
    }
}

pub fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn open(path: &Path) -> Result<Connection> {
    let conn =
        Connection::open(path).with_context(|| format!("Failed to open database {:?}", path))?;
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA foreign_keys=ON;
         PRAGMA busy_timeout=5000;",
    )?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS raw_pages (
            id               INTEGER PRIMARY KEY,
            search_term      TEXT NOT NULL,
            page_index       INTEGER NOT NULL,
            page_url         TEXT NOT NULL,
            html             TEXT,
            status           TEXT NOT NULL DEFAULT 'new',
            error_detail     TEXT,
            extracted_count  INTEGER,
            claimed_at       TEXT,
            completed_at     TEXT,
            created_at       TEXT NOT NULL,
            last_modified_at TEXT NOT NULL,
            UNIQUE(search_term, page_index)
        );
        CREATE INDEX IF NOT EXISTS idx_raw_pages_status ON raw_pages(status);

        CREATE TABLE IF NOT EXISTS cases (
            id                    INTEGER PRIMARY KEY,
            decision_id           TEXT NOT NULL UNIQUE,
            source_page_id        INTEGER REFERENCES raw_pages(id),
            local_index           INTEGER,
            title                 TEXT,
            case_url              TEXT,
            judging_body          TEXT,
            rapporteur            TEXT,
            opinion_writer        TEXT,
            judgment_date         TEXT,
            publication_date      TEXT,
            case_class            TEXT,
            case_number           TEXT,
            full_text_mentions    INTEGER NOT NULL DEFAULT 0,
            indexing_mentions     INTEGER NOT NULL DEFAULT 0,
            status                TEXT NOT NULL DEFAULT 'extracted',

            case_html             TEXT,
            detail_claimed_at     TEXT,
            detail_fetched_at     TEXT,
            detail_error_detail   TEXT,

            case_html_clean       TEXT,
            sanitize_claimed_at   TEXT,
            sanitized_at          TEXT,
            sanitize_error_detail TEXT,

            gateway_url           TEXT,
            full_text_url         TEXT,
            artifact_bytes        INTEGER,
            artifact_sha256       TEXT,
            collect_claimed_at    TEXT,
            collected_at          TEXT,
            collect_error_detail  TEXT,

            first_extracted_at    TEXT,
            last_extracted_at     TEXT,
            created_at            TEXT NOT NULL,
            last_modified_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_cases_status ON cases(status);

        CREATE TABLE IF NOT EXISTS stage_runs (
            id          INTEGER PRIMARY KEY,
            run_id      TEXT NOT NULL,
            stage       TEXT NOT NULL,
            claimed     INTEGER NOT NULL,
            succeeded   INTEGER NOT NULL,
            failed      INTEGER NOT NULL,
            empty       INTEGER NOT NULL,
            finished_at TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

// ── Harvest ──

/// Record one captured search-result page. Re-capturing the same
/// (term, page) refreshes the HTML and puts the page back in front of the
/// extract stage; creation metadata survives.
pub fn insert_raw_page(
    conn: &Connection,
    search_term: &str,
    page_index: i64,
    page_url: &str,
    html: &str,
) -> Result<()> {
    let ts = now();
    conn.execute(
        "INSERT INTO raw_pages (search_term, page_index, page_url, html, status, created_at, last_modified_at)
         VALUES (?1, ?2, ?3, ?4, 'new', ?5, ?5)
         ON CONFLICT(search_term, page_index) DO UPDATE SET
             page_url = excluded.page_url,
             html = excluded.html,
             status = 'new',
             error_detail = NULL,
             extracted_count = NULL,
             claimed_at = NULL,
             completed_at = NULL,
             last_modified_at = excluded.last_modified_at",
        params![search_term, page_index, page_url, html, ts],
    )?;
    Ok(())
}

// ── Extract stage (raw_pages) ──

#[derive(Debug)]
pub struct RawPageClaim {
    pub id: i64,
    pub search_term: String,
    pub page_index: i64,
    pub html: Option<String>,
}

/// Atomically claim the oldest capture awaiting extraction: new -> extracting
/// in one statement, so no second worker can observe the same page as new.
pub fn claim_raw_page(conn: &Connection) -> Result<Option<RawPageClaim>> {
    let ts = now();
    let mut stmt = conn.prepare(
        "UPDATE raw_pages
            SET status = ?1, claimed_at = ?2, error_detail = NULL, last_modified_at = ?2
          WHERE id = (SELECT id FROM raw_pages WHERE status = ?3 ORDER BY id LIMIT 1)
      RETURNING id, search_term, page_index, html",
    )?;
    let claim = stmt
        .query_row(
            params![page_status::EXTRACTING, ts, page_status::NEW],
            |row| {
                Ok(RawPageClaim {
                    id: row.get(0)?,
                    search_term: row.get(1)?,
                    page_index: row.get(2)?,
                    html: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(claim)
}

/// Terminal outcome of one extract attempt.
#[derive(Debug)]
pub enum PageOutcome {
    Extracted { count: i64 },
    Empty,
    Failed { error: String },
}

/// Commit a terminal state for a claimed page. Guarded on the running status
/// so a forced reset racing the commit loses nothing; returns false when the
/// guard rejected the write.
pub fn finish_raw_page(conn: &Connection, id: i64, outcome: &PageOutcome) -> Result<bool> {
    let ts = now();
    let changed = match outcome {
        PageOutcome::Extracted { count } => conn.execute(
            "UPDATE raw_pages
                SET status = ?1, extracted_count = ?2, completed_at = ?3, last_modified_at = ?3
              WHERE id = ?4 AND status = ?5",
            params![page_status::EXTRACTED, count, ts, id, page_status::EXTRACTING],
        )?,
        PageOutcome::Empty => conn.execute(
            "UPDATE raw_pages
                SET status = ?1, extracted_count = 0, completed_at = ?2, last_modified_at = ?2
              WHERE id = ?3 AND status = ?4",
            params![page_status::EMPTY, ts, id, page_status::EXTRACTING],
        )?,
        PageOutcome::Failed { error } => conn.execute(
            "UPDATE raw_pages
                SET status = ?1, error_detail = ?2, completed_at = ?3, last_modified_at = ?3
              WHERE id = ?4 AND status = ?5",
            params![page_status::ERROR, error, ts, id, page_status::EXTRACTING],
        )?,
    };
    Ok(changed == 1)
}

// ── Upsert merger ──

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeCounts {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

impl MergeCounts {
    pub fn persisted(&self) -> i64 {
        (self.inserted + self.updated) as i64
    }
}

/// Fan the records derived from one capture into `cases`, keyed by the
/// natural decision id. Inserts create the row at the head of the case
/// chain; updates refresh only extraction-owned columns, leaving status and
/// downstream payloads where the pipeline put them. Records without a valid
/// key are counted and skipped.
pub fn upsert_decisions(
    conn: &Connection,
    source_page_id: i64,
    records: &[DecisionRecord],
) -> Result<MergeCounts> {
    let tx = conn.unchecked_transaction()?;
    let ts = now();
    let mut counts = MergeCounts::default();
    {
        let mut find = tx.prepare("SELECT id FROM cases WHERE decision_id = ?1")?;
        let mut insert = tx.prepare(
            "INSERT INTO cases (
                 decision_id, source_page_id, local_index, title, case_url,
                 judging_body, rapporteur, opinion_writer, judgment_date,
                 publication_date, case_class, case_number, full_text_mentions,
                 indexing_mentions, status, first_extracted_at, last_extracted_at,
                 created_at, last_modified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                     'extracted', ?15, ?15, ?15, ?15)",
        )?;
        let mut update = tx.prepare(
            "UPDATE cases SET
                 source_page_id = ?2, local_index = ?3, title = ?4, case_url = ?5,
                 judging_body = ?6, rapporteur = ?7, opinion_writer = ?8,
                 judgment_date = ?9, publication_date = ?10, case_class = ?11,
                 case_number = ?12, full_text_mentions = ?13, indexing_mentions = ?14,
                 last_extracted_at = ?15, last_modified_at = ?15
             WHERE id = ?1",
        )?;

        for r in records {
            let Some(key) = r.natural_key() else {
                counts.skipped += 1;
                continue;
            };
            let existing = find
                .query_row(params![key], |row| row.get::<_, i64>(0))
                .optional()?;
            match existing {
                Some(id) => {
                    update.execute(params![
                        id,
                        source_page_id,
                        r.local_index,
                        r.title,
                        r.case_url,
                        r.judging_body,
                        r.rapporteur,
                        r.opinion_writer,
                        r.judgment_date,
                        r.publication_date,
                        r.case_class,
                        r.case_number,
                        r.full_text_mentions,
                        r.indexing_mentions,
                        ts,
                    ])?;
                    counts.updated += 1;
                }
                None => {
                    insert.execute(params![
                        key,
                        source_page_id,
                        r.local_index,
                        r.title,
                        r.case_url,
                        r.judging_body,
                        r.rapporteur,
                        r.opinion_writer,
                        r.judgment_date,
                        r.publication_date,
                        r.case_class,
                        r.case_number,
                        r.full_text_mentions,
                        r.indexing_mentions,
                        ts,
                    ])?;
                    counts.inserted += 1;
                }
            }
        }
    }
    tx.commit()?;
    Ok(counts)
}

// ── Case stages ──

#[derive(Debug)]
pub struct CaseClaim {
    pub id: i64,
    pub decision_id: String,
    pub case_url: Option<String>,
    pub case_html: Option<String>,
}

/// Atomically claim the oldest case eligible for a stage: input status ->
/// running status plus claimed-at, in one conditional statement. The stage's
/// previous error is overwritten by NULL here. `None` means the stage has
/// drained.
pub fn claim_case(conn: &Connection, stage: CaseStage) -> Result<Option<CaseClaim>> {
    let ts = now();
    let sql = format!(
        "UPDATE cases
            SET status = ?1, {claimed} = ?2, {error} = NULL, last_modified_at = ?2
          WHERE id = (SELECT id FROM cases WHERE status = ?3 ORDER BY id LIMIT 1)
      RETURNING id, decision_id, case_url, case_html",
        claimed = stage.claimed_at_column(),
        error = stage.error_column(),
    );
    let mut stmt = conn.prepare(&sql)?;
    let claim = stmt
        .query_row(
            params![stage.running_status(), ts, stage.input_status()],
            |row| {
                Ok(CaseClaim {
                    id: row.get(0)?,
                    decision_id: row.get(1)?,
                    case_url: row.get(2)?,
                    case_html: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(claim)
}

/// Payload committed by a successful stage attempt. Each variant writes only
/// the columns its stage owns.
#[derive(Debug)]
pub enum CasePayload {
    DetailHtml(String),
    SanitizedHtml(String),
    Artifact {
        gateway_url: String,
        full_text_url: String,
        bytes: Option<i64>,
        sha256: Option<String>,
    },
}

/// Commit stage success: payload + completed-at + success status, guarded on
/// the running status. Returns false when the guard rejected the write (a
/// forced reset won the race).
pub fn complete_case(
    conn: &Connection,
    stage: CaseStage,
    id: i64,
    payload: &CasePayload,
) -> Result<bool> {
    let ts = now();
    let changed = match (stage, payload) {
        (CaseStage::Detail, CasePayload::DetailHtml(html)) => conn.execute(
            "UPDATE cases
                SET status = ?1, case_html = ?2, detail_fetched_at = ?3, last_modified_at = ?3
              WHERE id = ?4 AND status = ?5",
            params![stage.success_status(), html, ts, id, stage.running_status()],
        )?,
        (CaseStage::Sanitize, CasePayload::SanitizedHtml(html)) => conn.execute(
            "UPDATE cases
                SET status = ?1, case_html_clean = ?2, sanitized_at = ?3, last_modified_at = ?3
              WHERE id = ?4 AND status = ?5",
            params![stage.success_status(), html, ts, id, stage.running_status()],
        )?,
        (
            CaseStage::Collect,
            CasePayload::Artifact {
                gateway_url,
                full_text_url,
                bytes,
                sha256,
            },
        ) => conn.execute(
            "UPDATE cases
                SET status = ?1, gateway_url = ?2, full_text_url = ?3,
                    artifact_bytes = ?4, artifact_sha256 = ?5,
                    collected_at = ?6, last_modified_at = ?6
              WHERE id = ?7 AND status = ?8",
            params![
                stage.success_status(),
                gateway_url,
                full_text_url,
                bytes,
                sha256,
                ts,
                id,
                stage.running_status()
            ],
        )?,
        (stage, payload) => {
            anyhow::bail!("payload {:?} does not belong to stage {}", payload, stage.name())
        }
    };
    Ok(changed == 1)
}

/// Commit stage failure: error detail + completed-at + error status, same
/// guard as success.
pub fn fail_case(conn: &Connection, stage: CaseStage, id: i64, error: &str) -> Result<bool> {
    let ts = now();
    let sql = format!(
        "UPDATE cases
            SET status = ?1, {error_col} = ?2, {completed} = ?3, last_modified_at = ?3
          WHERE id = ?4 AND status = ?5",
        error_col = stage.error_column(),
        completed = stage.completed_at_column(),
    );
    let changed = conn.execute(
        &sql,
        params![stage.error_status(), error, ts, id, stage.running_status()],
    )?;
    Ok(changed == 1)
}

// ── Operator recovery ──

/// Return documents a crashed worker left in a stage's running status back
/// to its input status; with `include_errors`, error-state documents go back
/// too. The only sanctioned way out of an orphaned claim.
pub fn reset_case_stage(conn: &Connection, stage: CaseStage, include_errors: bool) -> Result<usize> {
    let ts = now();
    let mut reset = conn.execute(
        "UPDATE cases SET status = ?1, last_modified_at = ?2 WHERE status = ?3",
        params![stage.input_status(), ts, stage.running_status()],
    )?;
    if include_errors {
        reset += conn.execute(
            "UPDATE cases SET status = ?1, last_modified_at = ?2 WHERE status = ?3",
            params![stage.input_status(), ts, stage.error_status()],
        )?;
    }
    Ok(reset)
}

pub fn reset_extract_stage(conn: &Connection, include_errors: bool) -> Result<usize> {
    let ts = now();
    let mut reset = conn.execute(
        "UPDATE raw_pages SET status = ?1, last_modified_at = ?2 WHERE status = ?3",
        params![page_status::NEW, ts, page_status::EXTRACTING],
    )?;
    if include_errors {
        reset += conn.execute(
            "UPDATE raw_pages SET status = ?1, last_modified_at = ?2 WHERE status = ?3",
            params![page_status::NEW, ts, page_status::ERROR],
        )?;
    }
    Ok(reset)
}

// ── Stats ──

pub struct Stats {
    pub pages: Vec<(String, usize)>,
    pub pages_total: usize,
    pub cases: Vec<(String, usize)>,
    pub cases_total: usize,
}

pub fn get_stats(conn: &Connection) -> Result<Stats> {
    let by_status = |table: &str| -> Result<Vec<(String, usize)>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT status, COUNT(*) FROM {table} GROUP BY status ORDER BY status"
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    };

    let pages = by_status("raw_pages")?;
    let cases = by_status("cases")?;
    Ok(Stats {
        pages_total: pages.iter().map(|(_, n)| n).sum(),
        cases_total: cases.iter().map(|(_, n)| n).sum(),
        pages,
        cases,
    })
}
