use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Runtime settings, loaded once in main and passed to the store and
/// collaborator constructors. Overridable via STF_* environment variables
/// (e.g. STF_DB_PATH, STF_SPIDER_API_KEY).
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db_path: PathBuf,
    pub base_url: String,
    pub page_size: u32,
    pub spider_api_key: Option<String>,
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

impl Settings {
    pub fn load() -> Result<Self> {
        config::Config::builder()
            .set_default("db_path", "data/stf.sqlite")?
            .set_default("base_url", "https://jurisprudencia.stf.jus.br")?
            .set_default("page_size", 30)?
            .set_default("request_timeout_secs", 60)?
            .set_default("user_agent", DEFAULT_USER_AGENT)?
            .add_source(config::Environment::with_prefix("STF").try_parsing(true))
            .build()
            .context("Failed to assemble configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }
}
