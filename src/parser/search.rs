use rayon::prelude::*;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::{DecisionExtractor, DecisionRecord, MISSING};

/// CSS-selector extraction over the site's Angular search-result markup.
/// Each `div.result-container` holds one decision; the decision id is the
/// `sjur…` segment of the "Dados completos" link.
pub struct SelectorExtractor {
    base_url: Url,
    container: Selector,
    decision_link: Selector,
    title: Selector,
    anchor: Selector,
    labelled: Selector,
    paren_count: Regex,
    date: Regex,
    digits: Regex,
}

impl SelectorExtractor {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let sel = |s: &str| Selector::parse(s).map_err(|e| anyhow::anyhow!("bad selector {s}: {e}"));
        Ok(SelectorExtractor {
            base_url: Url::parse(base_url)?,
            container: sel("div.result-container")?,
            decision_link: sel("a.mat-tooltip-trigger")?,
            title: sel("h4.ng-star-inserted")?,
            anchor: sel("a")?,
            labelled: sel("h4, span, div")?,
            paren_count: Regex::new(r"\((\d+)\)")?,
            date: Regex::new(r"\d{2}/\d{2}/\d{4}")?,
            digits: Regex::new(r"\d+")?,
        })
    }

    fn parse_container(&self, fragment: &str, local_index: i64) -> DecisionRecord {
        let frag = Html::parse_fragment(fragment);
        let root = frag.root_element();

        let href = root
            .select(&self.decision_link)
            .next()
            .and_then(|a| a.value().attr("href"))
            .map(str::to_string);

        let decision_id = href
            .as_deref()
            .map(decision_id_from_href)
            .unwrap_or_else(|| MISSING.to_string());

        let case_url = href.as_deref().and_then(|h| self.absolutize(h));

        let title = root
            .select(&self.title)
            .next()
            .map(|h| squish(&h.text().collect::<String>()))
            .filter(|t| !t.is_empty());

        let case_class = self
            .query_param(root, "classe")
            .or_else(|| title.as_deref().and_then(|t| t.split_whitespace().next().map(str::to_string)));

        let case_number = self.query_param(root, "numeroProcesso").or_else(|| {
            title
                .as_deref()
                .and_then(|t| self.digits.find_iter(t).last().map(|m| m.as_str().to_string()))
        });

        DecisionRecord {
            local_index,
            decision_id,
            title,
            case_url,
            judging_body: self.labelled_value(root, "Órgão julgador"),
            rapporteur: self.labelled_value(root, "Relator"),
            opinion_writer: self.labelled_value(root, "Redator"),
            judgment_date: self.labelled_date(root, "Julgamento"),
            publication_date: self.labelled_date(root, "Publicação"),
            case_class,
            case_number,
            full_text_mentions: self.mention_count(root, "Inteiro teor"),
            indexing_mentions: self.mention_count(root, "Indexação"),
        }
    }

    /// Value after the "Label:" prefix, taken from the smallest element whose
    /// text carries the label (the big wrapper divs contain everything).
    fn labelled_value(&self, root: ElementRef, label: &str) -> Option<String> {
        let text = self.smallest_labelled_text(root, label)?;
        let (_, value) = text.split_once(':')?;
        let value = squish(value);
        if value.is_empty() {
            None
        } else {
            Some(value)
        }
    }

    /// Like `labelled_value`, with a dd/mm/yyyy fallback when the element
    /// carries a date but no colon-separated value.
    fn labelled_date(&self, root: ElementRef, label: &str) -> Option<String> {
        let text = self.smallest_labelled_text(root, label)?;
        if let Some((_, value)) = text.split_once(':') {
            if let Some(m) = self.date.find(value) {
                return Some(m.as_str().to_string());
            }
            let value = squish(value);
            if !value.is_empty() {
                return Some(value);
            }
        }
        self.date.find(&text).map(|m| m.as_str().to_string())
    }

    fn smallest_labelled_text(&self, root: ElementRef, label: &str) -> Option<String> {
        root.select(&self.labelled)
            .map(|el| el.text().collect::<String>())
            .filter(|t| t.contains(label))
            .min_by_key(|t| t.len())
    }

    fn mention_count(&self, root: ElementRef, label: &str) -> i64 {
        self.smallest_labelled_text(root, label)
            .and_then(|t| {
                self.paren_count
                    .captures(&t)
                    .and_then(|c| c[1].parse().ok())
            })
            .unwrap_or(0)
    }

    fn query_param(&self, root: ElementRef, key: &str) -> Option<String> {
        let marker = format!("{key}=");
        for a in root.select(&self.anchor) {
            let Some(href) = a.value().attr("href") else {
                continue;
            };
            if !href.contains(&marker) {
                continue;
            }
            if let Ok(url) = self.base_url.join(href) {
                if let Some((_, v)) = url.query_pairs().find(|(k, _)| k == key) {
                    return Some(v.into_owned());
                }
            }
        }
        None
    }

    fn absolutize(&self, href: &str) -> Option<String> {
        if href.starts_with("http") {
            return Some(href.to_string());
        }
        self.base_url.join(href).ok().map(|u| u.to_string())
    }
}

impl DecisionExtractor for SelectorExtractor {
    fn extract(&self, html: &str) -> Vec<DecisionRecord> {
        let doc = Html::parse_document(html);
        let fragments: Vec<String> = doc.select(&self.container).map(|c| c.html()).collect();
        fragments
            .par_iter()
            .enumerate()
            .map(|(i, frag)| self.parse_container(frag, (i + 1) as i64))
            .collect()
    }
}

/// Second-to-last raw path segment, preferring any segment starting with
/// "sjur" (the site's decision id prefix).
fn decision_id_from_href(href: &str) -> String {
    let parts: Vec<&str> = href.split('/').collect();
    if let Some(p) = parts.iter().rev().find(|p| p.starts_with("sjur")) {
        return p.to_string();
    }
    if parts.len() >= 2 {
        return parts[parts.len() - 2].to_string();
    }
    MISSING.to_string()
}

fn squish(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://jurisprudencia.stf.jus.br";

    fn container(body: &str) -> String {
        format!("<html><body><div class=\"result-container\">{body}</div></body></html>")
    }

    const FULL: &str = r#"
        <a class="mat-tooltip-trigger" href="/pages/search/sjur9999/false">
          <h4 class="ng-star-inserted">ADI 4277 / DF</h4>
        </a>
        <span>Órgão julgador: Tribunal Pleno</span>
        <div><span>Relator: Min. AYRES BRITTO</span></div>
        <span>Redator do acórdão: Min. LUIZ FUX</span>
        <span>Julgamento: 05/05/2011</span>
        <span>Publicação: 14/10/2011</span>
        <a href="https://portal.stf.jus.br/processos/listarProcessos.asp?classe=ADI&amp;numeroProcesso=4277">Acompanhamento</a>
        <span>Inteiro teor (3)</span>
        <span>Indexação (2)</span>
    "#;

    #[test]
    fn extracts_all_fields() {
        let ex = SelectorExtractor::new(BASE).unwrap();
        let records = ex.extract(&container(FULL));
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.local_index, 1);
        assert_eq!(r.decision_id, "sjur9999");
        assert_eq!(r.title.as_deref(), Some("ADI 4277 / DF"));
        assert_eq!(
            r.case_url.as_deref(),
            Some("https://jurisprudencia.stf.jus.br/pages/search/sjur9999/false")
        );
        assert_eq!(r.judging_body.as_deref(), Some("Tribunal Pleno"));
        assert_eq!(r.rapporteur.as_deref(), Some("Min. AYRES BRITTO"));
        assert_eq!(r.opinion_writer.as_deref(), Some("Min. LUIZ FUX"));
        assert_eq!(r.judgment_date.as_deref(), Some("05/05/2011"));
        assert_eq!(r.publication_date.as_deref(), Some("14/10/2011"));
        assert_eq!(r.case_class.as_deref(), Some("ADI"));
        assert_eq!(r.case_number.as_deref(), Some("4277"));
        assert_eq!(r.full_text_mentions, 3);
        assert_eq!(r.indexing_mentions, 2);
    }

    #[test]
    fn missing_link_yields_sentinel() {
        let ex = SelectorExtractor::new(BASE).unwrap();
        let records = ex.extract(&container("<span>Relator: X</span>"));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].decision_id, MISSING);
        assert!(records[0].natural_key().is_none());
    }

    #[test]
    fn decision_id_prefers_sjur_segment() {
        assert_eq!(decision_id_from_href("/pages/search/sjur123/false"), "sjur123");
        assert_eq!(decision_id_from_href("/a/b/c"), "b");
        assert_eq!(decision_id_from_href("/a/b/c/"), "c");
    }

    #[test]
    fn class_falls_back_to_title_word() {
        let ex = SelectorExtractor::new(BASE).unwrap();
        let html = container(
            r#"<a class="mat-tooltip-trigger" href="/pages/search/sjur1/false">
               <h4 class="ng-star-inserted">ADPF 132 / RJ</h4></a>"#,
        );
        let r = &ex.extract(&html)[0];
        assert_eq!(r.case_class.as_deref(), Some("ADPF"));
        assert_eq!(r.case_number.as_deref(), Some("132"));
    }

    #[test]
    fn multiple_containers_keep_document_order() {
        let ex = SelectorExtractor::new(BASE).unwrap();
        let html = "<html><body>\
             <div class=\"result-container\"><a class=\"mat-tooltip-trigger\" href=\"/x/sjur1/f\"></a></div>\
             <div class=\"result-container\"><a class=\"mat-tooltip-trigger\" href=\"/x/sjur2/f\"></a></div>\
             </body></html>";
        let records = ex.extract(html);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].local_index, 1);
        assert_eq!(records[0].decision_id, "sjur1");
        assert_eq!(records[1].local_index, 2);
        assert_eq!(records[1].decision_id, "sjur2");
    }

    #[test]
    fn no_containers_extracts_nothing() {
        let ex = SelectorExtractor::new(BASE).unwrap();
        assert!(ex.extract("<html><body><p>404</p></body></html>").is_empty());
    }
}
