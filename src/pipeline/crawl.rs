// src/pipeline/crawl.rs

//! Link-following crawl run.

use crate::error::{AppError, Result};
use crate::models::Config;
use crate::services::{CrawlReport, Crawler, HtmlMetadataExtractor, IdentityResolver};
use crate::storage::Store;
use crate::utils::http::HttpClient;
use crate::utils::log as console;

/// Crawl from `seeds`, or from the configured seeds when none are given.
pub async fn run_crawl(
    config: &Config,
    store: &Store,
    client: &dyn HttpClient,
    seeds: &[String],
) -> Result<CrawlReport> {
    let seeds: Vec<String> = if seeds.is_empty() {
        config.crawler.seeds.clone()
    } else {
        seeds.to_vec()
    };
    if seeds.is_empty() {
        return Err(AppError::config(
            "no crawl seeds; pass --seed or set crawler.seeds",
        ));
    }

    console::header("Crawling seed sites");
    console::sub_item(&format!(
        "{} seeds, max_pages={}, max_depth={}",
        seeds.len(),
        config.crawler.max_pages,
        config.crawler.max_depth
    ));

    let extractor = HtmlMetadataExtractor::new()?;
    let crawler = Crawler::new(
        client,
        store,
        &extractor,
        IdentityResolver::new(&config.resolver),
        &config.crawler,
        &config.http.full_user_agent(),
    )?;
    let report = crawler.crawl(&seeds).await?;

    console::summary("Crawl", &report.summary_items());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::http::testing::{Scripted, ScriptedClient};

    #[tokio::test]
    async fn test_requires_seeds() {
        let store = Store::in_memory().unwrap();
        let client = ScriptedClient::new();
        let err = run_crawl(&Config::default(), &store, &client, &[]).await;
        assert!(matches!(err, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn test_seed_override_and_report() {
        let store = Store::in_memory().unwrap();
        let client = ScriptedClient::new();
        client.on_get(
            "https://lab.example.edu/",
            vec![Scripted::html(
                "<html><head><title>Ocean Acoustics Lab</title></head><body><p>Sediment work.</p></body></html>",
            )],
        );
        let mut config = Config::default();
        config.crawler.request_delay_ms = 0;
        config.crawler.jitter_ms = 0;
        config.crawler.seeds = vec!["https://ignored.example.org/".into()];

        let report = run_crawl(
            &config,
            &store,
            &client,
            &["https://lab.example.edu/".to_string()],
        )
        .await
        .unwrap();
        assert_eq!(report.pages, 1);
        assert_eq!(report.inserted, 1);
        assert_eq!(client.gets_for("https://ignored.example.org/"), 0);
    }
}
