// src/services/crawler.rs

//! Polite link-following crawler.
//!
//! Pages are dispatched from a [`Frontier`] onto a bounded set of concurrent
//! requests, each holding a per-domain permit. Requests to one domain start
//! at least the polite delay apart. Every requested URL lands in
//! the visited ledger, so no URL is requested twice, within a run or across
//! runs. Relevant pages become candidates for the identity resolver.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use rand::Rng;
use regex::Regex;
use scraper::{Html, Selector};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::CrawlerConfig;
use crate::services::extractor::{ExtractedMetadata, MetadataExtractor};
use crate::services::frontier::{Frontier, FrontierEntry, url_score};
use crate::services::resolver::IdentityResolver;
use crate::services::robots::RobotsCache;
use crate::storage::{Store, visited};
use crate::utils::http::HttpClient;

/// Counters for one crawl run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlReport {
    /// Page requests issued
    pub pages: usize,
    pub inserted: usize,
    pub merged: usize,
    pub irrelevant: usize,
    pub blocklisted: usize,
    pub robots_blocked: usize,
    /// Dequeued URLs already present in the ledger
    pub already_visited: usize,
    pub errors: usize,
}

impl CrawlReport {
    pub fn summary_items(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Pages", self.pages.to_string()),
            ("Inserted", self.inserted.to_string()),
            ("Merged", self.merged.to_string()),
            ("Irrelevant", self.irrelevant.to_string()),
            ("Blocklisted", self.blocklisted.to_string()),
            ("Robots blocked", self.robots_blocked.to_string()),
            ("Already visited", self.already_visited.to_string()),
            ("Errors", self.errors.to_string()),
        ]
    }
}

/// Raw result of one dispatched page.
enum PageFetch {
    Html(String),
    Status(u16),
    RobotsBlocked,
    Failed(AppError),
}

/// Everything the dispatcher needs from a parsed page.
struct PageAnalysis {
    metadata: ExtractedMetadata,
    links: Vec<String>,
}

enum Relevance {
    Relevant,
    Irrelevant,
    Blocklisted,
}

/// Concurrency permits and request pacing for one host.
struct DomainSlot {
    permits: Semaphore,
    next_request: Mutex<Instant>,
}

/// Crawler bound to one store, client and extractor for a run.
pub struct Crawler<'a> {
    client: &'a dyn HttpClient,
    store: &'a Store,
    extractor: &'a dyn MetadataExtractor,
    resolver: IdentityResolver,
    config: CrawlerConfig,
    user_agent: String,
    robots: RobotsCache,
    keyword_patterns: Vec<Regex>,
    link_selector: Selector,
    domain_slots: Mutex<HashMap<String, Arc<DomainSlot>>>,
}

impl<'a> Crawler<'a> {
    pub fn new(
        client: &'a dyn HttpClient,
        store: &'a Store,
        extractor: &'a dyn MetadataExtractor,
        resolver: IdentityResolver,
        config: &CrawlerConfig,
        user_agent: &str,
    ) -> Result<Self> {
        let keyword_patterns = config
            .keyword_patterns
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .map(|k| {
                Regex::new(&format!("(?i){}", regex::escape(k)))
                    .map_err(|e| AppError::config(format!("keyword pattern '{k}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let link_selector = Selector::parse("a[href]")
            .map_err(|e| AppError::selector("a[href]", format!("{e:?}")))?;

        Ok(Self {
            client,
            store,
            extractor,
            resolver,
            config: config.clone(),
            user_agent: user_agent.to_string(),
            robots: RobotsCache::new(),
            keyword_patterns,
            link_selector,
            domain_slots: Mutex::new(HashMap::new()),
        })
    }

    /// Breadth-first crawl from `seeds`.
    pub async fn crawl(&self, seeds: &[String]) -> Result<CrawlReport> {
        let mut report = CrawlReport::default();
        let mut frontier = Frontier::new(self.config.max_depth);
        let allowed = self.allowed_domains(seeds);

        for seed in seeds {
            match normalize_link(seed) {
                Some(url) => {
                    frontier.push(&url, 0);
                }
                None => log::warn!("Skipping invalid seed URL: {}", seed),
            }
        }
        log::info!(
            "Crawling {} seeds (max_pages={}, max_depth={}, allowed={:?})",
            frontier.len(),
            self.config.max_pages,
            self.config.max_depth,
            allowed
        );

        let max_concurrent = self.config.max_concurrent.max(1);
        let mut reserved = 0usize;
        let mut in_flight = FuturesUnordered::new();

        loop {
            while in_flight.len() < max_concurrent && reserved < self.config.max_pages {
                let Some(entry) = frontier.pop() else {
                    break;
                };
                let seen = self
                    .store
                    .with_conn(|conn| visited::contains(conn, &entry.url))?;
                if seen {
                    log::debug!("Already visited: {}", entry.url);
                    report.already_visited += 1;
                    continue;
                }
                reserved += 1;
                in_flight.push(self.fetch_page(entry));
            }

            let Some(result) = in_flight.next().await else {
                break;
            };
            let (entry, fetched) = result?;

            match fetched {
                PageFetch::RobotsBlocked => {
                    log::info!("robots.txt disallows {}", entry.url);
                    report.robots_blocked += 1;
                    reserved -= 1;
                }
                PageFetch::Failed(e) => {
                    log::warn!("Request failed for {}: {}", entry.url, e);
                    report.pages += 1;
                    report.errors += 1;
                    let status = if e.is_timeout() { "timeout" } else { "error" };
                    self.mark_visited(&entry.url, status)?;
                }
                PageFetch::Status(status) => {
                    log::debug!("HTTP {} for {}", status, entry.url);
                    report.pages += 1;
                    report.errors += 1;
                    self.mark_visited(&entry.url, &status.to_string())?;
                }
                PageFetch::Html(body) => {
                    report.pages += 1;
                    self.handle_page(&entry, &body, &allowed, &mut frontier, &mut report)?;
                }
            }
        }

        log::info!(
            "Crawl finished: {} pages, {} inserted, {} merged",
            report.pages,
            report.inserted,
            report.merged
        );
        Ok(report)
    }

    /// Seed hosts plus the configured allowlist, lowercased.
    fn allowed_domains(&self, seeds: &[String]) -> HashSet<String> {
        seeds
            .iter()
            .filter_map(|s| crate::utils::get_domain(s))
            .chain(self.config.domain_allowlist.iter().cloned())
            .map(|d| d.trim().to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect()
    }

    fn domain_slot(&self, host: &str) -> Result<Arc<DomainSlot>> {
        let per_domain = self.config.max_per_domain.max(1);
        let mut slots = self
            .domain_slots
            .lock()
            .map_err(|_| AppError::crawl(host, "domain slot table poisoned"))?;
        let slot = slots.entry(host.to_string()).or_insert_with(|| {
            Arc::new(DomainSlot {
                permits: Semaphore::new(per_domain),
                next_request: Mutex::new(Instant::now()),
            })
        });
        Ok(Arc::clone(slot))
    }

    /// Claim the next start time for `host`, pushing it one polite delay on.
    fn reserve_start(&self, host: &str, slot: &DomainSlot) -> Result<Instant> {
        let mut next = slot
            .next_request
            .lock()
            .map_err(|_| AppError::crawl(host, "domain pacing poisoned"))?;
        let start = (*next).max(Instant::now());
        *next = start + self.polite_delay();
        Ok(start)
    }

    async fn fetch_page(&self, entry: FrontierEntry) -> Result<(FrontierEntry, PageFetch)> {
        let host = crate::utils::get_domain(&entry.url).unwrap_or_default();
        let slot = self.domain_slot(&host)?;
        let Ok(_permit) = slot.permits.acquire().await else {
            let e = AppError::crawl(&entry.url, "domain slot closed");
            return Ok((entry, PageFetch::Failed(e)));
        };

        if self.config.respect_robots
            && !self
                .robots
                .is_allowed(self.client, &entry.url, &self.user_agent)
                .await
        {
            return Ok((entry, PageFetch::RobotsBlocked));
        }

        let start = self.reserve_start(&host, &slot)?;
        tokio::time::sleep_until(start).await;

        log::debug!("GET {} (depth {})", entry.url, entry.depth);
        let fetched = match self.client.get(&entry.url).await {
            Ok(response) if response.is_success() => match response.text().await {
                Ok(body) => PageFetch::Html(body),
                Err(e) => PageFetch::Failed(e),
            },
            Ok(response) => PageFetch::Status(response.status),
            Err(e) => PageFetch::Failed(e),
        };
        Ok((entry, fetched))
    }

    /// Base request delay plus random jitter.
    fn polite_delay(&self) -> Duration {
        let jitter_ms = self.config.jitter().as_millis() as u64;
        let extra = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        self.config.request_delay() + Duration::from_millis(extra)
    }

    fn handle_page(
        &self,
        entry: &FrontierEntry,
        body: &str,
        allowed: &HashSet<String>,
        frontier: &mut Frontier,
        report: &mut CrawlReport,
    ) -> Result<()> {
        let analysis = self.analyze(&entry.url, body, allowed);

        if entry.depth < frontier.max_depth() {
            for link in &analysis.links {
                frontier.push(link, entry.depth + 1);
            }
        }

        match self.relevance(&analysis.metadata) {
            Relevance::Blocklisted => {
                report.blocklisted += 1;
                self.mark_visited(&entry.url, "blocklisted")
            }
            Relevance::Irrelevant => {
                report.irrelevant += 1;
                self.mark_visited(&entry.url, "irrelevant")
            }
            Relevance::Relevant => {
                let candidate = match analysis.metadata.into_candidate(&entry.url).validate() {
                    Ok(candidate) => candidate,
                    Err(e) => {
                        log::debug!("Page {} not usable as a candidate: {}", entry.url, e);
                        report.errors += 1;
                        return self.mark_visited(&entry.url, "error");
                    }
                };
                let resolution = self.store.transaction(|tx| {
                    let resolution = self.resolver.resolve_in(tx, &candidate)?;
                    visited::touch(tx, &entry.url, Some("ok"))?;
                    Ok(resolution)
                })?;
                if resolution.is_new {
                    report.inserted += 1;
                    log::info!("New document {} from {}", resolution.document.id, entry.url);
                } else {
                    report.merged += 1;
                    log::debug!(
                        "Merged {} into document {} (by {:?})",
                        entry.url,
                        resolution.document.id,
                        resolution.matched_by
                    );
                }
                Ok(())
            }
        }
    }

    /// Parse once, synchronously: metadata and ranked outgoing links.
    fn analyze(&self, url: &str, body: &str, allowed: &HashSet<String>) -> PageAnalysis {
        let metadata = self.extractor.extract(body, url);
        let links = match Url::parse(url) {
            Ok(base) => {
                let document = Html::parse_document(body);
                let hrefs: Vec<&str> = document
                    .select(&self.link_selector)
                    .filter_map(|a| a.value().attr("href"))
                    .collect();
                self.rank_links(&base, &hrefs, allowed)
            }
            Err(_) => Vec::new(),
        };
        PageAnalysis { metadata, links }
    }

    /// Filter, dedupe and rank hrefs; keeps the top `links_per_page`.
    fn rank_links(&self, base: &Url, hrefs: &[&str], allowed: &HashSet<String>) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut links: Vec<(String, f64)> = hrefs
            .iter()
            .map(|href| href.trim())
            .filter(|href| {
                !href.is_empty()
                    && !href.starts_with('#')
                    && !href.starts_with("javascript:")
                    && !href.starts_with("mailto:")
                    && !href.starts_with("tel:")
            })
            .filter_map(|href| base.join(href).ok())
            .filter_map(|mut url| {
                if !matches!(url.scheme(), "http" | "https") {
                    return None;
                }
                url.set_fragment(None);
                let host = url.host_str()?.to_ascii_lowercase();
                if !allowed.iter().any(|d| domain_matches(&host, d)) {
                    return None;
                }
                let path = url.path().to_ascii_lowercase();
                if self
                    .config
                    .path_blocklist
                    .iter()
                    .any(|b| !b.is_empty() && path.contains(&b.to_ascii_lowercase()))
                {
                    return None;
                }
                Some(url.to_string())
            })
            .filter(|url| seen.insert(url.clone()))
            .map(|url| {
                let score = url_score(&url);
                (url, score)
            })
            .collect();

        links.sort_by(|a, b| b.1.total_cmp(&a.1));
        links.truncate(self.config.links_per_page);
        links.into_iter().map(|(url, _)| url).collect()
    }

    fn relevance(&self, metadata: &ExtractedMetadata) -> Relevance {
        let title = metadata.title.as_deref().unwrap_or("").trim().to_lowercase();
        if self
            .config
            .title_blocklist
            .iter()
            .any(|b| !b.is_empty() && title.contains(&b.to_lowercase()))
        {
            return Relevance::Blocklisted;
        }
        if self.keyword_patterns.is_empty() {
            return Relevance::Relevant;
        }

        let text = format!(
            "{}\n{}\n{}",
            metadata.title.as_deref().unwrap_or(""),
            metadata.abstract_text.as_deref().unwrap_or(""),
            metadata.body_text
        );
        if self.keyword_patterns.iter().any(|p| p.is_match(&text)) {
            Relevance::Relevant
        } else {
            Relevance::Irrelevant
        }
    }

    fn mark_visited(&self, url: &str, status: &str) -> Result<()> {
        self.store
            .with_conn(|conn| visited::touch(conn, url, Some(status)))
    }
}

/// Exact host or subdomain of `domain`.
fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Absolute http(s) URL without its fragment.
fn normalize_link(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}
