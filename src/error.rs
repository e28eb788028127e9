use thiserror::Error;

/// Per-document stage failure. Committed to the store as the stage's error
/// state; never aborts a drain loop. Store/setup failures use `anyhow` and
/// do abort the process.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("render failed: {0}")]
    Render(String),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("no match for selector '{0}'")]
    SelectorMiss(&'static str),
}
