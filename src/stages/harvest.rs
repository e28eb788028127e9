use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use tracing::{info, warn};
use url::Url;

use crate::config::Settings;
use crate::db;
use crate::render::PageRenderer;

/// Outcome of one harvest invocation.
#[derive(Debug, Default, Clone, Copy)]
pub struct HarvestReport {
    pub saved: usize,
    pub failed: usize,
}

/// Harvest stage: render the site's search-result pages for a query term and
/// store one capture per page, ready for the extract stage. A failed page
/// render is logged and skipped; there is no document to park in an error
/// state yet.
pub async fn run(
    conn: &Connection,
    renderer: &dyn PageRenderer,
    settings: &Settings,
    term: &str,
    pages: u32,
) -> Result<HarvestReport> {
    let mut report = HarvestReport::default();

    let pb = ProgressBar::new(pages as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
            .progress_chars("=> "),
    );

    for page in 1..=pages {
        let url = search_url(settings, term, page)?;
        match renderer.render(url.as_str()).await {
            Ok(html) => {
                db::insert_raw_page(conn, term, page as i64, url.as_str(), &html)?;
                info!(term, page, "capture saved");
                report.saved += 1;
            }
            Err(e) => {
                warn!(term, page, error = %e, "capture failed");
                report.failed += 1;
            }
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    Ok(report)
}

/// Search URL with the site's fixed filter parameters plus the per-run term
/// and page number.
fn search_url(settings: &Settings, term: &str, page: u32) -> Result<Url> {
    let mut url = Url::parse(&settings.base_url)?.join("/pages/search")?;
    url.query_pairs_mut()
        .append_pair("base", "acordaos")
        .append_pair("sinonimo", "true")
        .append_pair("plural", "true")
        .append_pair("radicais", "false")
        .append_pair("buscaExata", "true")
        .append_pair("pesquisa_inteiro_teor", "true")
        .append_pair("page", &page.to_string())
        .append_pair("pageSize", &settings.page_size.to_string())
        .append_pair("sort", "_score")
        .append_pair("sortBy", "desc")
        .append_pair("queryString", term);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings {
            db_path: "unused".into(),
            base_url: "https://jurisprudencia.stf.jus.br".into(),
            page_size: 30,
            spider_api_key: None,
            request_timeout_secs: 60,
            user_agent: "test".into(),
        }
    }

    #[test]
    fn search_url_carries_term_page_and_fixed_filters() {
        let url = search_url(&settings(), "homoafetiva", 2).unwrap();
        let s = url.as_str();
        assert!(s.starts_with("https://jurisprudencia.stf.jus.br/pages/search?"));
        assert!(s.contains("base=acordaos"));
        assert!(s.contains("queryString=homoafetiva"));
        assert!(s.contains("page=2"));
        assert!(s.contains("pageSize=30"));
    }
}
