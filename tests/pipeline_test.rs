use std::path::PathBuf;

use async_trait::async_trait;
use rusqlite::Connection;

use stf_scraper::config::Settings;
use stf_scraper::db::{self, CaseStage};
use stf_scraper::error::StageError;
use stf_scraper::parser::search::SelectorExtractor;
use stf_scraper::render::{FullTextResolver, PageRenderer};
use stf_scraper::stages;

const BASE: &str = "https://jurisprudencia.stf.jus.br";

fn settings(db_path: PathBuf) -> Settings {
    Settings {
        db_path,
        base_url: BASE.into(),
        page_size: 30,
        spider_api_key: None,
        request_timeout_secs: 60,
        user_agent: "test".into(),
    }
}

fn search_page(keys: &[&str]) -> String {
    let containers: String = keys
        .iter()
        .map(|k| {
            format!(
                "<div class=\"result-container\">\
                 <a class=\"mat-tooltip-trigger\" href=\"/pages/search/{k}/false\">\
                 <h4 class=\"ng-star-inserted\">ADI {k}</h4></a>\
                 <span>Relator: Min. TESTE</span>\
                 </div>"
            )
        })
        .collect();
    format!("<html><body>{containers}</body></html>")
}

fn case_page(key: &str) -> String {
    format!(
        "<html><body>\
         <app-search-detail><mat-tab-group>\
         <mat-tab-body><p>Ementa {key}</p></mat-tab-body>\
         </mat-tab-group></app-search-detail>\
         <a mattooltip=\"Inteiro teor\" href=\"/paginadorpub/paginador.jsp?docID={key}\">IT</a>\
         </body></html>"
    )
}

/// Serves search pages for search URLs and case pages otherwise; fails any
/// URL containing the poison marker.
struct FakeRenderer {
    keys: Vec<String>,
    fail_on: Option<String>,
}

#[async_trait]
impl PageRenderer for FakeRenderer {
    async fn render(&self, url: &str) -> Result<String, StageError> {
        if let Some(marker) = &self.fail_on {
            if url.contains(marker.as_str()) {
                return Err(StageError::Render(format!("navigation failed for {url}")));
            }
        }
        if url.contains("queryString") {
            let keys: Vec<&str> = self.keys.iter().map(String::as_str).collect();
            return Ok(search_page(&keys));
        }
        let key = url.split('/').rev().nth(1).unwrap_or("unknown");
        Ok(case_page(key))
    }
}

struct FakeResolver;

#[async_trait]
impl FullTextResolver for FakeResolver {
    async fn resolve(&self, gateway_url: &str) -> Result<String, StageError> {
        Ok(format!("{gateway_url}&resolved=pdf"))
    }

    async fn download(&self, _url: &str) -> Result<(i64, String), StageError> {
        Ok((1234, "deadbeef".repeat(8)))
    }
}

fn open_store(dir: &tempfile::TempDir) -> (PathBuf, Connection) {
    let path = dir.path().join("stf.sqlite");
    let conn = db::open(&path).unwrap();
    db::init_schema(&conn).unwrap();
    (path, conn)
}

fn seed_cases(conn: &Connection, keys: &[&str]) {
    db::insert_raw_page(conn, "seed", 1, "https://example.test", &search_page(keys)).unwrap();
    let extractor = SelectorExtractor::new(BASE).unwrap();
    let report = stages::extract::run(conn, &extractor, None).unwrap();
    assert_eq!(report.succeeded, 1);
}

fn case_status(conn: &Connection, key: &str) -> String {
    conn.query_row(
        "SELECT status FROM cases WHERE decision_id = ?1",
        [key],
        |r| r.get(0),
    )
    .unwrap()
}

#[test]
fn concurrent_claimers_one_wins() {
    let dir = tempfile::tempdir().unwrap();
    let (path, conn) = open_store(&dir);
    seed_cases(&conn, &["sjur1"]);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let path = path.clone();
            std::thread::spawn(move || {
                let conn = db::open(&path).unwrap();
                db::claim_case(&conn, CaseStage::Detail).unwrap().is_some()
            })
        })
        .collect();

    let wins = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(wins, 1);
}

#[tokio::test]
async fn error_isolation_one_bad_case_does_not_abort_the_drain() {
    let dir = tempfile::tempdir().unwrap();
    let (_path, conn) = open_store(&dir);
    let keys = ["sjur1", "sjur2", "sjur3", "sjur4", "sjur5"];
    seed_cases(&conn, &keys);

    let renderer = FakeRenderer {
        keys: keys.iter().map(|k| k.to_string()).collect(),
        fail_on: Some("sjur3".into()),
    };
    let report = stages::detail::run(&conn, &renderer, None).await.unwrap();
    assert_eq!(report.claimed, 5);
    assert_eq!(report.succeeded, 4);
    assert_eq!(report.failed, 1);

    for key in ["sjur1", "sjur2", "sjur4", "sjur5"] {
        assert_eq!(case_status(&conn, key), "detail_fetched");
    }
    assert_eq!(case_status(&conn, "sjur3"), "detail_error");
    let detail: Option<String> = conn
        .query_row(
            "SELECT detail_error_detail FROM cases WHERE decision_id = 'sjur3'",
            [],
            |r| r.get(0),
        )
        .unwrap();
    assert!(detail.unwrap().contains("render failed"));

    // Committed documents are gone from the stage's input; error documents
    // stay put until an operator resets them.
    let again = stages::detail::run(&conn, &renderer, None).await.unwrap();
    assert_eq!(again.claimed, 0);
}

#[tokio::test]
async fn single_shot_claims_exactly_one_in_insertion_order() {
    let dir = tempfile::tempdir().unwrap();
    let (_path, conn) = open_store(&dir);
    let keys = ["sjur1", "sjur2", "sjur3"];
    seed_cases(&conn, &keys);

    let renderer = FakeRenderer {
        keys: keys.iter().map(|k| k.to_string()).collect(),
        fail_on: None,
    };

    for expected in keys {
        let report = stages::detail::run(&conn, &renderer, Some(1)).await.unwrap();
        assert_eq!(report.claimed, 1);
        assert_eq!(case_status(&conn, expected), "detail_fetched");
    }
}

#[tokio::test]
async fn full_chain_harvest_to_collected() {
    let dir = tempfile::tempdir().unwrap();
    let (path, conn) = open_store(&dir);
    let keys = ["sjur10", "sjur11"];
    let renderer = FakeRenderer {
        keys: keys.iter().map(|k| k.to_string()).collect(),
        fail_on: None,
    };
    let cfg = settings(path);

    let harvest = stages::harvest::run(&conn, &renderer, &cfg, "uniao estavel", 1)
        .await
        .unwrap();
    assert_eq!(harvest.saved, 1);

    let extractor = SelectorExtractor::new(BASE).unwrap();
    let extract = stages::extract::run(&conn, &extractor, None).unwrap();
    assert_eq!(extract.succeeded, 1);

    let detail = stages::detail::run(&conn, &renderer, None).await.unwrap();
    assert_eq!(detail.succeeded, 2);

    let sanitize = stages::sanitize::run(&conn, None).unwrap();
    assert_eq!(sanitize.succeeded, 2);

    let collect = stages::collect::run(&conn, &FakeResolver, BASE, true, None)
        .await
        .unwrap();
    assert_eq!(collect.succeeded, 2);

    for key in keys {
        assert_eq!(case_status(&conn, key), "collected");
    }
    let (clean, full_text, bytes): (String, String, i64) = conn
        .query_row(
            "SELECT case_html_clean, full_text_url, artifact_bytes
               FROM cases WHERE decision_id = 'sjur10'",
            [],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .unwrap();
    assert!(clean.contains("Ementa sjur10"));
    assert!(full_text.contains("docID=sjur10"));
    assert!(full_text.ends_with("resolved=pdf"));
    assert_eq!(bytes, 1234);
}

#[tokio::test]
async fn empty_capture_lands_in_empty_not_error() {
    let dir = tempfile::tempdir().unwrap();
    let (_path, conn) = open_store(&dir);
    db::insert_raw_page(
        &conn,
        "nada",
        1,
        "https://example.test",
        "<html><body><p>Nenhum resultado encontrado</p></body></html>",
    )
    .unwrap();

    let extractor = SelectorExtractor::new(BASE).unwrap();
    let report = stages::extract::run(&conn, &extractor, None).unwrap();
    assert_eq!(report.empty, 1);
    assert_eq!(report.failed, 0);

    let status: String = conn
        .query_row("SELECT status FROM raw_pages WHERE search_term = 'nada'", [], |r| {
            r.get(0)
        })
        .unwrap();
    assert_eq!(status, "empty");
}
