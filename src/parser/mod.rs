pub mod detail;
pub mod search;

/// One decision extracted from a search-result container. Field values come
/// straight from the page; "N/A" marks a value the markup did not yield.
#[derive(Debug, Clone, Default)]
pub struct DecisionRecord {
    pub local_index: i64,
    pub decision_id: String,
    pub title: Option<String>,
    pub case_url: Option<String>,
    pub judging_body: Option<String>,
    pub rapporteur: Option<String>,
    pub opinion_writer: Option<String>,
    pub judgment_date: Option<String>,
    pub publication_date: Option<String>,
    pub case_class: Option<String>,
    pub case_number: Option<String>,
    pub full_text_mentions: i64,
    pub indexing_mentions: i64,
}

pub const MISSING: &str = "N/A";

impl DecisionRecord {
    /// The business key used for upsert deduplication. `None` when the
    /// extracted value is the missing sentinel or empty, which disqualifies
    /// the record from being persisted.
    pub fn natural_key(&self) -> Option<&str> {
        let key = self.decision_id.trim();
        if key.is_empty() || key == MISSING {
            None
        } else {
            Some(key)
        }
    }
}

/// Turns one captured search-result page into zero or more decision records.
/// Pure function of its input; tests feed synthetic HTML.
pub trait DecisionExtractor: Send + Sync {
    fn extract(&self, html: &str) -> Vec<DecisionRecord>;
}
