// src/pipeline/fetch.rs

//! Artifact fetching run with a persisted metrics report.

use crate::error::Result;
use crate::models::{FetcherConfig, RunMetrics, StoreConfig};
use crate::services::ArtifactFetcher;
use crate::storage::{ArtifactStore, FetchSelection, Store};
use crate::utils::http::HttpClient;
use crate::utils::log as console;

/// Metrics file written into the artifact directory after every run.
pub const METRICS_FILE: &str = "fetch_metrics.json";

/// Selection derived from config, optionally narrowed to explicit ids.
pub fn selection_from_config(config: &FetcherConfig, ids: Option<Vec<i64>>) -> FetchSelection {
    FetchSelection {
        limit: config.limit,
        ids,
        since_days: config.since_days,
        source: config.source.clone(),
    }
}

/// Fetch the selected documents and write `fetch_metrics.json`.
pub async fn run_fetch(
    store: &Store,
    client: &dyn HttpClient,
    store_config: &StoreConfig,
    config: &FetcherConfig,
    selection: &FetchSelection,
) -> Result<RunMetrics> {
    console::header(if config.dry_run {
        "Fetching artifacts (dry run)"
    } else {
        "Fetching artifacts"
    });

    let artifacts = ArtifactStore::new(&store_config.artifact_dir);
    let fetcher = ArtifactFetcher::new(client, store, artifacts.clone(), config);
    let metrics = fetcher.fetch_selection(selection).await?;

    artifacts.ensure_root().await?;
    let metrics_path = artifacts.path(METRICS_FILE);
    artifacts.write_json(&metrics_path, &metrics).await?;

    console::summary("Fetch", &metrics.summary_items());
    console::sub_item(&format!("Metrics written to {}", metrics_path.display()));
    Ok(metrics)
}
