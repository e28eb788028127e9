pub mod collect;
pub mod detail;
pub mod extract;
pub mod harvest;
pub mod sanitize;

use indicatif::{ProgressBar, ProgressStyle};

/// Aggregate counts for one batch invocation of a stage.
#[derive(Debug, Default, Clone, Copy)]
pub struct StageReport {
    pub claimed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub empty: usize,
}

impl StageReport {
    pub fn print(&self, stage: &str) {
        if self.empty > 0 {
            println!(
                "{}: {} claimed ({} ok, {} errors, {} empty).",
                stage, self.claimed, self.succeeded, self.failed, self.empty
            );
        } else {
            println!(
                "{}: {} claimed ({} ok, {} errors).",
                stage, self.claimed, self.succeeded, self.failed
            );
        }
    }

    /// True while a `--limit` bound (if any) has not been reached.
    pub fn below(&self, limit: Option<usize>) -> bool {
        limit.map_or(true, |n| self.claimed < n)
    }
}

/// Drain loops do not know how much work is queued up front.
pub(crate) fn drain_spinner(stage: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg} {pos}")
            .unwrap(),
    );
    pb.set_message(stage.to_string());
    pb
}
