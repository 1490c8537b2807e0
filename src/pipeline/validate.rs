// src/pipeline/validate.rs

use std::path::Path;

use crate::config::load_all;
use crate::error::Result;
use crate::models::Config;
use crate::utils::log as console;

/// Load and validate configuration plus keyword files, printing what was found.
pub fn run_validate(base_path: &Path) -> Result<Config> {
    console::header("Validating configuration");

    match load_all(base_path) {
        Ok(config) => {
            console::success("Configuration is valid");
            console::sub_item(&format!("User agent: {}", config.http.full_user_agent()));
            console::sub_item(&format!("Timeout: {}s", config.http.timeout_secs));
            console::sub_item(&format!("Database: {}", config.store.database_path));
            console::sub_item(&format!("Artifacts: {}", config.store.artifact_dir));
            console::sub_item(&format!(
                "Keywords: {} (+{} negative)",
                config.scoring.keywords.len(),
                config.scoring.negative_keywords.len()
            ));
            console::sub_item(&format!(
                "Fetch: limit={}, max_mb={}, retries={}",
                config.fetcher.limit, config.fetcher.max_mb, config.fetcher.max_retries
            ));
            console::sub_item(&format!(
                "Crawl: {} seeds, max_concurrent={}, max_per_domain={}",
                config.crawler.seeds.len(),
                config.crawler.max_concurrent,
                config.crawler.max_per_domain
            ));
            Ok(config)
        }
        Err(e) => {
            console::error(&format!("Configuration invalid: {}", e));
            Err(e)
        }
    }
}
