// src/config.rs

//! Configuration loading utilities.
//!
//! A storage directory holds `config.toml` plus optional keyword lists
//! (`keywords.txt`, `negative_keywords.txt`), one phrase per line.

use std::path::Path;

use crate::error::Result;
use crate::models::Config;

pub const CONFIG_FILE: &str = "config.toml";
pub const KEYWORDS_FILE: &str = "keywords.txt";
pub const NEGATIVE_KEYWORDS_FILE: &str = "negative_keywords.txt";

/// Load configuration from a TOML file.
///
/// Falls back to defaults if loading fails.
pub fn load_config(path: &Path) -> Config {
    Config::load_or_default(path)
}

/// Read a keyword list: one phrase per line, `#` starts a comment.
///
/// A missing file yields an empty list.
pub fn load_keywords(path: &Path) -> Result<Vec<String>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    Ok(content
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn merge_keywords(target: &mut Vec<String>, extra: Vec<String>) {
    for keyword in extra {
        if !target.iter().any(|k| k.eq_ignore_ascii_case(&keyword)) {
            target.push(keyword);
        }
    }
}

/// Load config and keyword files from `base_path`, then validate.
pub fn load_all(base_path: &Path) -> Result<Config> {
    let mut config = load_config(&base_path.join(CONFIG_FILE));

    merge_keywords(
        &mut config.scoring.keywords,
        load_keywords(&base_path.join(KEYWORDS_FILE))?,
    );
    merge_keywords(
        &mut config.scoring.negative_keywords,
        load_keywords(&base_path.join(NEGATIVE_KEYWORDS_FILE))?,
    );

    config.validate()?;
    Ok(config)
}
