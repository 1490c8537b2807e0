//! Application configuration structures.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Shared HTTP client settings
    #[serde(default)]
    pub http: HttpConfig,

    /// Database and artifact locations
    #[serde(default)]
    pub store: StoreConfig,

    /// Identity resolution options
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Relevance scoring lexicons
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Artifact fetcher behavior
    #[serde(default)]
    pub fetcher: FetcherConfig,

    /// Link-following crawler behavior
    #[serde(default)]
    pub crawler: CrawlerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.http.user_agent.trim().is_empty() {
            return Err(AppError::validation("http.user_agent is empty"));
        }
        if self.http.timeout_secs == 0 {
            return Err(AppError::validation("http.timeout_secs must be > 0"));
        }
        if self.store.database_path.trim().is_empty() {
            return Err(AppError::validation("store.database_path is empty"));
        }
        if !(self.fetcher.max_mb > 0.0) {
            return Err(AppError::validation("fetcher.max_mb must be > 0"));
        }
        if self.fetcher.limit == 0 {
            return Err(AppError::validation("fetcher.limit must be > 0"));
        }
        if self.crawler.max_concurrent == 0 {
            return Err(AppError::validation("crawler.max_concurrent must be > 0"));
        }
        if self.crawler.max_per_domain == 0 {
            return Err(AppError::validation("crawler.max_per_domain must be > 0"));
        }
        if self.crawler.links_per_page == 0 {
            return Err(AppError::validation("crawler.links_per_page must be > 0"));
        }
        Ok(())
    }
}

/// HTTP client settings shared by the fetcher and the crawler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Contact address appended to the User-Agent
    #[serde(default)]
    pub contact_email: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,
}

impl HttpConfig {
    /// User-Agent including the contact address, if configured.
    pub fn full_user_agent(&self) -> String {
        match self.contact_email.as_deref().map(str::trim) {
            Some(email) if !email.is_empty() => format!("{}; {}", self.user_agent, email),
            _ => self.user_agent.clone(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            contact_email: None,
            timeout_secs: defaults::timeout(),
        }
    }
}

/// Locations of the document store and the artifact directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "defaults::database_path")]
    pub database_path: String,

    #[serde(default = "defaults::artifact_dir")]
    pub artifact_dir: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: defaults::database_path(),
            artifact_dir: defaults::artifact_dir(),
        }
    }
}

/// Identity resolution options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Also match on normalized title (less reliable)
    #[serde(default)]
    pub match_title: bool,
}

/// Keyword lexicons and scoring switches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub negative_keywords: Vec<String>,

    /// Use extracted full text when available
    #[serde(default = "defaults::enabled")]
    pub use_fulltext: bool,

    /// Threshold reported in the scoring summary
    #[serde(default)]
    pub min_score: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            keywords: Vec::new(),
            negative_keywords: Vec::new(),
            use_fulltext: defaults::enabled(),
            min_score: 0.0,
        }
    }
}

/// Artifact fetcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Maximum documents selected per batch
    #[serde(default = "defaults::fetch_limit")]
    pub limit: usize,

    /// Base pause between network calls in milliseconds
    #[serde(default = "defaults::throttle")]
    pub throttle_ms: u64,

    /// Upper bound of the random pause added to the throttle
    #[serde(default = "defaults::jitter")]
    pub jitter_ms: u64,

    /// Size cap in megabytes
    #[serde(default = "defaults::max_mb")]
    pub max_mb: f64,

    /// Retries after the first attempt on 429/5xx
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Preflight only, write nothing
    #[serde(default)]
    pub dry_run: bool,

    /// Re-fetch documents whose last fetch is older than this
    #[serde(default)]
    pub since_days: Option<i64>,

    /// Restrict selection to one producer tag
    #[serde(default)]
    pub source: Option<String>,

    /// Canonical PDF endpoint for arXiv identifiers
    #[serde(default = "defaults::arxiv_pdf_base")]
    pub arxiv_pdf_base: String,
}

impl FetcherConfig {
    pub fn max_bytes(&self) -> u64 {
        (self.max_mb * 1024.0 * 1024.0) as u64
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            limit: defaults::fetch_limit(),
            throttle_ms: defaults::throttle(),
            jitter_ms: defaults::jitter(),
            max_mb: defaults::max_mb(),
            max_retries: defaults::max_retries(),
            dry_run: false,
            since_days: None,
            source: None,
            arxiv_pdf_base: defaults::arxiv_pdf_base(),
        }
    }
}

/// Link-following crawler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    #[serde(default)]
    pub seeds: Vec<String>,

    #[serde(default = "defaults::max_pages")]
    pub max_pages: usize,

    #[serde(default = "defaults::max_depth")]
    pub max_depth: u32,

    /// Global in-flight request cap
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// In-flight request cap per domain
    #[serde(default = "defaults::max_per_domain")]
    pub max_per_domain: usize,

    /// Base delay between requests to the same domain
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    #[serde(default = "defaults::jitter")]
    pub jitter_ms: u64,

    /// Outgoing links kept per page after prioritization
    #[serde(default = "defaults::links_per_page")]
    pub links_per_page: usize,

    #[serde(default = "defaults::enabled")]
    pub respect_robots: bool,

    /// Literal phrases, matched case-insensitively
    #[serde(default)]
    pub keyword_patterns: Vec<String>,

    /// Domains followed in addition to the seed hosts
    #[serde(default)]
    pub domain_allowlist: Vec<String>,

    /// Path substrings never followed
    #[serde(default)]
    pub path_blocklist: Vec<String>,

    /// Page titles treated as boilerplate
    #[serde(default = "defaults::title_blocklist")]
    pub title_blocklist: Vec<String>,
}

impl CrawlerConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_millis(self.jitter_ms)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            max_pages: defaults::max_pages(),
            max_depth: defaults::max_depth(),
            max_concurrent: defaults::max_concurrent(),
            max_per_domain: defaults::max_per_domain(),
            request_delay_ms: defaults::request_delay(),
            jitter_ms: defaults::jitter(),
            links_per_page: defaults::links_per_page(),
            respect_robots: defaults::enabled(),
            keyword_patterns: Vec::new(),
            domain_allowlist: Vec::new(),
            path_blocklist: Vec::new(),
            title_blocklist: defaults::title_blocklist(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    // HTTP defaults
    pub fn user_agent() -> String {
        "harvester/0.1 (Academic Research Crawler)".into()
    }
    pub fn timeout() -> u64 {
        30
    }

    // Store defaults
    pub fn database_path() -> String {
        "data/harvester.sqlite".into()
    }
    pub fn artifact_dir() -> String {
        "data/files".into()
    }

    pub fn enabled() -> bool {
        true
    }

    // Fetcher defaults
    pub fn fetch_limit() -> usize {
        50
    }
    pub fn throttle() -> u64 {
        1000
    }
    pub fn jitter() -> u64 {
        500
    }
    pub fn max_mb() -> f64 {
        60.0
    }
    pub fn max_retries() -> u32 {
        3
    }
    pub fn arxiv_pdf_base() -> String {
        "https://arxiv.org/pdf".into()
    }

    // Crawler defaults
    pub fn max_pages() -> usize {
        50
    }
    pub fn max_depth() -> u32 {
        3
    }
    pub fn max_concurrent() -> usize {
        8
    }
    pub fn max_per_domain() -> usize {
        2
    }
    pub fn request_delay() -> u64 {
        1000
    }
    pub fn links_per_page() -> usize {
        20
    }
    pub fn title_blocklist() -> Vec<String> {
        [
            "home", "about", "contact", "login", "sign up", "privacy", "terms", "cookie",
            "sitemap", "404", "error",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    pub fn log_level() -> String {
        "info".into()
    }
}
