use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};

use stf_scraper::config::Settings;
use stf_scraper::db::{self, CaseStage};
use stf_scraper::metrics;
use stf_scraper::parser::search::SelectorExtractor;
use stf_scraper::render::{ArtifactFetcher, SpiderRenderer};
use stf_scraper::stages;

#[derive(Parser)]
#[command(name = "stf_scraper", about = "STF jurisprudence pipeline over SQLite")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,
    /// Capture search-result pages for a query term
    Harvest {
        /// Query term submitted to the search page
        term: String,
        /// Number of result pages to capture
        #[arg(short = 'p', long, default_value = "1")]
        pages: u32,
    },
    /// Extract decision records from captured pages
    Extract {
        /// Max pages to process (default: drain)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Fetch each extracted decision's own page
    FetchDetail {
        /// Max cases to process (default: drain)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Reduce fetched case pages to the decision fragment
    Sanitize {
        /// Max cases to process (default: drain)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Resolve the full-text document for sanitized cases
    Collect {
        /// Max cases to process (default: drain)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Also download the document to record size and checksum
        #[arg(long)]
        download: bool,
    },
    /// Drain extract, fetch-detail, sanitize and collect in order
    Run {
        /// Also download full-text documents during collect
        #[arg(long)]
        download: bool,
    },
    /// Show per-status document counts
    Stats,
    /// Operator recovery: return claimed documents to their input status
    Reset {
        #[arg(long)]
        stage: ResetStage,
        /// Also return error-state documents for another attempt
        #[arg(long)]
        errors: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ResetStage {
    Extract,
    FetchDetail,
    Sanitize,
    Collect,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load()?;

    let conn = db::open(&settings.db_path)?;
    db::init_schema(&conn)?;
    let run_id = metrics::new_run_id();

    match cli.command {
        Commands::Init => {
            println!("Schema ready at {:?}.", settings.db_path);
        }
        Commands::Harvest { term, pages } => {
            let renderer = SpiderRenderer::new(&settings)?;
            let report = stages::harvest::run(&conn, &renderer, &settings, &term, pages).await?;
            println!(
                "Harvest: {} pages captured, {} failed.",
                report.saved, report.failed
            );
        }
        Commands::Extract { limit } => {
            let extractor = SelectorExtractor::new(&settings.base_url)?;
            let report = stages::extract::run(&conn, &extractor, limit)?;
            metrics::record_run(&conn, &run_id, "extract", &report)?;
            report.print("Extract");
        }
        Commands::FetchDetail { limit } => {
            let renderer = SpiderRenderer::new(&settings)?;
            let report = stages::detail::run(&conn, &renderer, limit).await?;
            metrics::record_run(&conn, &run_id, CaseStage::Detail.name(), &report)?;
            report.print("Fetch-detail");
        }
        Commands::Sanitize { limit } => {
            let report = stages::sanitize::run(&conn, limit)?;
            metrics::record_run(&conn, &run_id, CaseStage::Sanitize.name(), &report)?;
            report.print("Sanitize");
        }
        Commands::Collect { limit, download } => {
            let resolver = ArtifactFetcher::new(&settings)?;
            let report =
                stages::collect::run(&conn, &resolver, &settings.base_url, download, limit).await?;
            metrics::record_run(&conn, &run_id, CaseStage::Collect.name(), &report)?;
            report.print("Collect");
        }
        Commands::Run { download } => {
            let extractor = SelectorExtractor::new(&settings.base_url)?;
            let renderer = SpiderRenderer::new(&settings)?;
            let resolver = ArtifactFetcher::new(&settings)?;

            let report = stages::extract::run(&conn, &extractor, None)?;
            metrics::record_run(&conn, &run_id, "extract", &report)?;
            report.print("Extract");

            let report = stages::detail::run(&conn, &renderer, None).await?;
            metrics::record_run(&conn, &run_id, CaseStage::Detail.name(), &report)?;
            report.print("Fetch-detail");

            let report = stages::sanitize::run(&conn, None)?;
            metrics::record_run(&conn, &run_id, CaseStage::Sanitize.name(), &report)?;
            report.print("Sanitize");

            let report =
                stages::collect::run(&conn, &resolver, &settings.base_url, download, None).await?;
            metrics::record_run(&conn, &run_id, CaseStage::Collect.name(), &report)?;
            report.print("Collect");
        }
        Commands::Stats => {
            let stats = db::get_stats(&conn)?;
            println!("Captures ({} total):", stats.pages_total);
            for (status, count) in &stats.pages {
                println!("  {:<16} {}", status, count);
            }
            println!("Cases ({} total):", stats.cases_total);
            for (status, count) in &stats.cases {
                println!("  {:<16} {}", status, count);
            }
        }
        Commands::Reset { stage, errors } => {
            let reset = match stage {
                ResetStage::Extract => db::reset_extract_stage(&conn, errors)?,
                ResetStage::FetchDetail => db::reset_case_stage(&conn, CaseStage::Detail, errors)?,
                ResetStage::Sanitize => db::reset_case_stage(&conn, CaseStage::Sanitize, errors)?,
                ResetStage::Collect => db::reset_case_stage(&conn, CaseStage::Collect, errors)?,
            };
            println!("Reset {} documents to their input status.", reset);
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {:.1}s", elapsed.as_secs_f64());
    }

    Ok(())
}
