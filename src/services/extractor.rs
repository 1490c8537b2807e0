// src/services/extractor.rs

//! HTML metadata extraction.
//!
//! Strategies run in order and only fill what is still missing:
//! 1. Scholarly meta tags (`citation_*`, Dublin Core, OpenGraph)
//! 2. Page structure (`h1`, `.abstract`, `.author`, PDF links)
//! 3. Regex over the visible text (DOI, year)

use std::collections::HashSet;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{CandidateRecord, OaStatus};

const MAX_AUTHORS: usize = 10;
const MAX_AFFILIATIONS: usize = 5;
const MAX_KEYWORDS: usize = 20;

/// Metadata recovered from one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedMetadata {
    pub title: Option<String>,
    pub abstract_text: Option<String>,
    pub authors: Vec<String>,
    pub affiliations: Vec<String>,
    pub keywords: Vec<String>,
    pub doi: Option<String>,
    pub year: Option<i32>,
    pub pdf_url: Option<String>,
    pub venue: Option<String>,
    /// Paragraph text, used for relevance gating
    pub body_text: String,
}

impl ExtractedMetadata {
    /// Candidate record for a crawled page.
    pub fn into_candidate(self, url: &str) -> CandidateRecord {
        let oa_status = if self.pdf_url.is_some() {
            OaStatus::FulltextPdf
        } else if self.abstract_text.is_some() {
            OaStatus::AbstractOnly
        } else {
            OaStatus::Closed
        };

        CandidateRecord {
            doi: self.doi,
            title: self.title,
            abstract_text: self.abstract_text,
            authors: self.authors,
            affiliations: self.affiliations,
            keywords: self.keywords,
            venue: self.venue,
            year: self.year,
            source_url: Some(url.to_string()),
            landing_url: Some(url.to_string()),
            pdf_url: self.pdf_url,
            oa_status: Some(oa_status),
            source: Some("crawler".to_string()),
            ..Default::default()
        }
    }
}

/// Turns a fetched page into metadata.
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, html: &str, url: &str) -> ExtractedMetadata;
}

struct Selectors {
    h1: Selector,
    title: Selector,
    abstract_block: Selector,
    main_paragraphs: Selector,
    paragraphs: Selector,
    authors: Selector,
    affiliations: Selector,
    pdf_links: Selector,
    body: Selector,
}

fn parse_selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| AppError::selector(css, e))
}

impl Selectors {
    fn new() -> Result<Self> {
        Ok(Self {
            h1: parse_selector("h1")?,
            title: parse_selector("title")?,
            abstract_block: parse_selector(".abstract, #abstract, .description")?,
            main_paragraphs: parse_selector("main p, article p, .content p")?,
            paragraphs: parse_selector("p")?,
            authors: parse_selector(".author, .authors, .author-name, [rel=author], .byline")?,
            affiliations: parse_selector(".affiliation, .institution, [class*=affiliation]")?,
            pdf_links: parse_selector("a[href]")?,
            body: parse_selector("body")?,
        })
    }
}

/// Multi-strategy extractor built on `scraper`.
pub struct HtmlMetadataExtractor {
    selectors: Selectors,
    doi_re: Regex,
    year_res: Vec<Regex>,
}

impl HtmlMetadataExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            selectors: Selectors::new()?,
            doi_re: Regex::new(r#"\b10\.\d{4,}/[^\s"'<>]+"#)
                .map_err(|e| AppError::config(e.to_string()))?,
            year_res: [r"\((\d{4})\)", r"\[(\d{4})\]", r"\b((?:19|20)\d{2})\b"]
                .iter()
                .map(|p| Regex::new(p).map_err(|e| AppError::config(e.to_string())))
                .collect::<Result<_>>()?,
        })
    }

    fn meta_tags(&self, document: &Html, out: &mut ExtractedMetadata) {
        let metas = MetaTags::collect(document);

        out.title = metas
            .first("citation_title")
            .or_else(|| metas.first("dc.title"))
            .or_else(|| metas.first("og:title"));
        out.abstract_text = metas
            .first("citation_abstract")
            .or_else(|| metas.first("dc.description"))
            .or_else(|| metas.first("og:description"));
        out.authors = dedup_cap(metas.all("citation_author"), MAX_AUTHORS, 1);
        out.affiliations = dedup_cap(metas.all("citation_author_institution"), MAX_AFFILIATIONS, 1);
        out.doi = metas.first("citation_doi");
        out.year = metas
            .first("citation_publication_date")
            .or_else(|| metas.first("citation_date"))
            .or_else(|| metas.first("dc.date"))
            .and_then(|d| first_year(&d));
        out.pdf_url = metas.first("citation_pdf_url");
        out.venue = metas
            .first("citation_journal_title")
            .or_else(|| metas.first("citation_conference_title"));

        if out.abstract_text.is_none() {
            out.abstract_text = metas.first("description").filter(|d| d.chars().count() > 50);
        }

        let mut keywords: Vec<String> = metas
            .all("keywords")
            .into_iter()
            .chain(metas.all("citation_keywords"))
            .flat_map(|k| k.split([',', ';']).map(|s| s.trim().to_string()).collect::<Vec<_>>())
            .collect();
        keywords.extend(metas.all("dc.subject"));
        out.keywords = dedup_cap(keywords, MAX_KEYWORDS, 1);
    }

    fn structure(&self, document: &Html, url: &str, out: &mut ExtractedMetadata) {
        let s = &self.selectors;

        if out.title.is_none() {
            out.title = document
                .select(&s.h1)
                .map(element_text)
                .find(|t| !t.is_empty())
                .or_else(|| {
                    document
                        .select(&s.title)
                        .map(element_text)
                        .find(|t| !t.is_empty())
                        .map(|t| strip_site_suffix(&t))
                })
                .filter(|t| !t.is_empty());
        }

        if out.abstract_text.is_none() {
            out.abstract_text = document
                .select(&s.abstract_block)
                .map(element_text)
                .find(|t| t.chars().count() > 50)
                .or_else(|| {
                    document
                        .select(&s.main_paragraphs)
                        .map(element_text)
                        .max_by_key(|t| t.chars().count())
                        .filter(|t| t.chars().count() > 100)
                })
                .or_else(|| {
                    document
                        .select(&s.paragraphs)
                        .map(element_text)
                        .next()
                        .filter(|t| t.chars().count() > 100)
                });
        }

        if out.authors.is_empty() {
            let found = document.select(&s.authors).map(element_text).collect();
            out.authors = dedup_cap(found, MAX_AUTHORS, 3);
        }

        if out.affiliations.is_empty() {
            let found = document.select(&s.affiliations).map(element_text).collect();
            out.affiliations = dedup_cap(found, MAX_AFFILIATIONS, 6);
        }

        let base = Url::parse(url).ok();
        if let Some(pdf) = &out.pdf_url {
            if let Some(base) = &base {
                out.pdf_url = Some(crate::utils::resolve_url(base, pdf));
            }
        } else {
            out.pdf_url = document
                .select(&s.pdf_links)
                .filter_map(|a| a.value().attr("href"))
                .map(str::trim)
                .find(|href| {
                    let path = href.split(['?', '#']).next().unwrap_or("");
                    path.to_ascii_lowercase().ends_with(".pdf")
                })
                .map(|href| match &base {
                    Some(base) => crate::utils::resolve_url(base, href),
                    None => href.to_string(),
                });
        }

        out.body_text = document
            .select(&s.paragraphs)
            .map(element_text)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
    }

    fn text_patterns(&self, document: &Html, out: &mut ExtractedMetadata) {
        let text = document
            .select(&self.selectors.body)
            .next()
            .map(|b| b.text().collect::<Vec<_>>().join(" "))
            .unwrap_or_default();

        if out.doi.is_none() {
            out.doi = self
                .doi_re
                .find(&text)
                .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ')']).to_string());
        }

        if out.year.is_none() {
            out.year = self.year_res.iter().find_map(|re| {
                re.captures_iter(&text)
                    .filter_map(|c| c.get(1)?.as_str().parse::<i32>().ok())
                    .filter(|y| (1900..=2100).contains(y))
                    .last()
            });
        }
    }
}

impl MetadataExtractor for HtmlMetadataExtractor {
    fn extract(&self, html: &str, url: &str) -> ExtractedMetadata {
        let document = Html::parse_document(html);
        let mut out = ExtractedMetadata::default();

        self.meta_tags(&document, &mut out);
        self.structure(&document, url, &mut out);
        self.text_patterns(&document, &mut out);
        out
    }
}

/// `<meta>` name/property → content pairs, names lowercased.
struct MetaTags(Vec<(String, String)>);

impl MetaTags {
    fn collect(document: &Html) -> Self {
        let mut pairs = Vec::new();
        if let Ok(selector) = Selector::parse("meta[content]") {
            for meta in document.select(&selector) {
                let el = meta.value();
                let Some(name) = el.attr("name").or_else(|| el.attr("property")) else {
                    continue;
                };
                let content = el.attr("content").unwrap_or("").trim();
                if !content.is_empty() {
                    pairs.push((name.trim().to_ascii_lowercase(), content.to_string()));
                }
            }
        }
        Self(pairs)
    }

    fn first(&self, name: &str) -> Option<String> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c.clone())
    }

    fn all(&self, name: &str) -> Vec<String> {
        self.0
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, c)| c.clone())
            .collect()
    }
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Remove a trailing " | Site Name".
fn strip_site_suffix(title: &str) -> String {
    title
        .split('|')
        .next()
        .unwrap_or(title)
        .trim()
        .to_string()
}

fn first_year(value: &str) -> Option<i32> {
    value
        .as_bytes()
        .windows(4)
        .position(|w| w.iter().all(u8::is_ascii_digit))
        .and_then(|i| value.get(i..i + 4))
        .and_then(|y| y.parse().ok())
}

/// Case-insensitive dedup preserving order, dropping short entries.
fn dedup_cap(values: Vec<String>, cap: usize, min_len: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| v.chars().count() >= min_len)
        .filter(|v| seen.insert(v.to_lowercase()))
        .take(cap)
        .collect()
}
