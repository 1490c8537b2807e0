//! Harvester CLI
//!
//! Local execution entry point for ingestion, scoring, fetching and crawling.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use harvester::{
    config,
    error::Result,
    models::{Config, PdfStatus},
    pipeline,
    services::IdentityResolver,
    storage::{Store, documents, visited},
    utils::{http::ReqwestClient, log as console},
};

/// Harvester - scholarly document ingestion and fetching
#[derive(Parser, Debug)]
#[command(
    name = "harvester",
    version,
    about = "Ingest, deduplicate, score and fetch scholarly documents"
)]
struct Cli {
    /// Directory holding config.toml and keyword lists; relative store paths
    /// resolve against it
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve candidate records from a JSON-Lines file into the store
    Ingest {
        /// One candidate record per line
        file: PathBuf,

        /// Also match on normalized title
        #[arg(long)]
        match_title: bool,
    },

    /// Score every document against the keyword lexicon
    Score,

    /// Download PDF artifacts for eligible documents
    Fetch {
        #[arg(long)]
        limit: Option<usize>,

        /// Comma-separated document ids
        #[arg(long, value_delimiter = ',')]
        ids: Option<Vec<i64>>,

        /// Refetch artifacts older than this many days
        #[arg(long)]
        since_days: Option<i64>,

        /// Only documents from this source
        #[arg(long)]
        source: Option<String>,

        /// Size cap in megabytes
        #[arg(long)]
        max_mb: Option<f64>,

        /// Preflight only, write nothing
        #[arg(long)]
        dry_run: bool,
    },

    /// Crawl seed sites for candidate pages
    Crawl {
        /// Seed URL (repeatable); defaults to crawler.seeds
        #[arg(long = "seed")]
        seeds: Vec<String>,

        #[arg(long)]
        max_pages: Option<usize>,

        #[arg(long)]
        max_depth: Option<u32>,

        /// Comma-separated relevance keywords
        #[arg(long, value_delimiter = ',')]
        keywords: Vec<String>,
    },

    /// Validate configuration files
    Validate,

    /// Show store statistics
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool, level: &str) {
    let level = if verbose { "debug" } else { level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
    console::init(level);
}

/// Resolve relative store paths against the storage directory.
fn anchor_paths(config: &mut Config, storage_dir: &std::path::Path) {
    let database = storage_dir.join(&config.store.database_path);
    config.store.database_path = database.to_string_lossy().to_string();
    let artifacts = storage_dir.join(&config.store.artifact_dir);
    config.store.artifact_dir = artifacts.to_string_lossy().to_string();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::Validate = cli.command {
        init_logging(cli.verbose, "info");
        pipeline::run_validate(&cli.storage_dir)?;
        return Ok(());
    }

    let mut config = config::load_all(&cli.storage_dir)?;
    init_logging(cli.verbose, &config.logging.level);
    anchor_paths(&mut config, &cli.storage_dir);
    log::info!("Loaded configuration from {}", cli.storage_dir.display());

    let store = Store::open(&config.store.database_path)?;

    match cli.command {
        Command::Ingest { file, match_title } => {
            let resolver = IdentityResolver::new(&config.resolver)
                .with_title_matching(config.resolver.match_title || match_title);
            pipeline::run_ingest(&store, &resolver, &file)?;
        }

        Command::Score => {
            pipeline::run_score(&store, &config.scoring).await?;
        }

        Command::Fetch {
            limit,
            ids,
            since_days,
            source,
            max_mb,
            dry_run,
        } => {
            let fetch = &mut config.fetcher;
            if let Some(limit) = limit {
                fetch.limit = limit;
            }
            if since_days.is_some() {
                fetch.since_days = since_days;
            }
            if source.is_some() {
                fetch.source = source;
            }
            if let Some(max_mb) = max_mb {
                fetch.max_mb = max_mb;
            }
            fetch.dry_run |= dry_run;
            config.validate()?;

            let client = ReqwestClient::new(&config.http)?;
            let selection = pipeline::selection_from_config(&config.fetcher, ids);
            pipeline::run_fetch(&store, &client, &config.store, &config.fetcher, &selection)
                .await?;
        }

        Command::Crawl {
            seeds,
            max_pages,
            max_depth,
            keywords,
        } => {
            if let Some(max_pages) = max_pages {
                config.crawler.max_pages = max_pages;
            }
            if let Some(max_depth) = max_depth {
                config.crawler.max_depth = max_depth;
            }
            if !keywords.is_empty() {
                config.crawler.keyword_patterns = keywords;
            }
            config.validate()?;

            let client = ReqwestClient::new(&config.http)?;
            pipeline::run_crawl(&config, &store, &client, &seeds).await?;
        }

        Command::Info => {
            let total = store.with_conn(documents::count)?;
            let urls = store.with_conn(visited::count)?;
            let docs = store.with_conn(documents::all)?;
            let with_artifact = docs.iter().filter(|d| d.has_artifact()).count();
            let failed = docs
                .iter()
                .filter(|d| {
                    d.pdf_status
                        .is_some_and(|s| !matches!(s, PdfStatus::Ok | PdfStatus::None | PdfStatus::DryRun))
                })
                .count();

            console::summary(
                "Store",
                &[
                    ("Database", config.store.database_path.clone()),
                    ("Documents", total.to_string()),
                    ("With artifact", with_artifact.to_string()),
                    ("Fetch failures", failed.to_string()),
                    ("Visited URLs", urls.to_string()),
                ],
            );

            let metrics_path = PathBuf::from(&config.store.artifact_dir)
                .join(pipeline::fetch::METRICS_FILE);
            if metrics_path.exists() {
                console::sub_item(&format!("Last fetch metrics: {}", metrics_path.display()));
            } else {
                console::sub_item("No fetch run recorded yet.");
            }
        }

        // Handled before the store is opened
        Command::Validate => {}
    }

    log::info!("Done!");

    Ok(())
}
