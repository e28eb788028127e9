use scraper::{Html, Selector};
use url::Url;

use crate::error::StageError;

/// The tab body holding the decision content on a rendered case page.
const DETAIL_SELECTOR: &str = "app-search-detail mat-tab-group mat-tab-body";

/// Keep only the decision fragment of a rendered case page, wrapped in a
/// minimal document so it stores and renders on its own.
pub fn sanitize_case_html(html: &str) -> Result<String, StageError> {
    let doc = Html::parse_document(html);
    let selector = Selector::parse(DETAIL_SELECTOR).expect("fixed selector");

    let node = doc
        .select(&selector)
        .next()
        .ok_or(StageError::SelectorMiss(DETAIL_SELECTOR))?;

    Ok(format!(
        "<!doctype html>\n<html>\n  <head>\n    <meta charset=\"utf-8\" />\n  </head>\n  <body>\n{}\n  </body>\n</html>\n",
        node.html()
    ))
}

/// Find the full-text gateway URL in a case page: the anchor behind the
/// "Inteiro teor" control, or any link into the paginador servlet.
pub fn find_gateway_url(html: &str, base_url: &str) -> Option<String> {
    let doc = Html::parse_document(html);
    let anchors = Selector::parse("a").expect("fixed selector");
    let base = Url::parse(base_url).ok()?;

    let mut fallback = None;
    for a in doc.select(&anchors) {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let tooltip = a.value().attr("mattooltip").unwrap_or_default();
        if tooltip.eq_ignore_ascii_case("inteiro teor") {
            return base.join(href).ok().map(|u| u.to_string());
        }
        if fallback.is_none() && href.contains("paginador.jsp") {
            fallback = base.join(href).ok().map(|u| u.to_string());
        }
    }
    fallback
}
