// src/services/fetcher.rs

//! Resilient artifact fetcher.
//!
//! For each selected document: build candidate URLs, preflight them with HEAD,
//! then stream one GET into a `.part` file while hashing it. Only a 200 with a
//! PDF content type is renamed into place. Every per-document failure is
//! classified and recorded; the batch always ends with a [`RunMetrics`].

use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;

use crate::error::Result;
use crate::models::{
    ArtifactUpdate, Document, FetchedItem, FetcherConfig, LatencySummary, PdfStatus, RunMetrics,
};
use crate::services::resolver::url_hash;
use crate::storage::{
    ArtifactStore, FetchSelection, Store, checksum_file, documents, safe_filename, visited,
};
use crate::utils::http::{HeadResponse, HttpClient, HttpResponse};
use crate::utils::retry::RetryPolicy;

/// Split an arXiv identifier into its base and optional version suffix.
///
/// Accepts `NNNN.NNNN` or `NNNN.NNNNN`, optionally followed by `vN`.
pub fn parse_arxiv_id(id: &str) -> Option<(&str, Option<&str>)> {
    let (base, version) = match id.find('v') {
        Some(idx) => (&id[..idx], Some(&id[idx..])),
        None => (id, None),
    };
    let (yymm, number) = base.split_once('.')?;
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if yymm.len() != 4 || !digits(yymm) || !(4..=5).contains(&number.len()) || !digits(number) {
        return None;
    }
    if let Some(v) = version {
        if !digits(&v[1..]) {
            return None;
        }
    }
    Some((base, version))
}

/// arXiv identifier carried by a `/pdf/` or `/abs/` URL of the document.
pub fn arxiv_id(doc: &Document) -> Option<String> {
    [doc.pdf_url.as_deref(), doc.landing_url.as_deref()]
        .into_iter()
        .flatten()
        .find_map(|url| {
            let tail = url
                .split_once("/pdf/")
                .or_else(|| url.split_once("/abs/"))?
                .1;
            let tail = tail.split(['?', '#']).next().unwrap_or(tail);
            let id = tail.trim_end_matches('/').trim_end_matches(".pdf");
            parse_arxiv_id(id).map(|_| id.to_string())
        })
}

/// Ordered candidate URLs: version-pinned, then latest, then the literal
/// `pdf_url`.
pub fn candidate_urls(doc: &Document, arxiv_base: &str) -> Vec<String> {
    let pdf_url = doc.pdf_url.as_deref().filter(|u| !u.trim().is_empty());
    let mut urls = Vec::new();

    if let Some(id) = arxiv_id(doc) {
        if let Some((base, version)) = parse_arxiv_id(&id) {
            let root = arxiv_base.trim_end_matches('/');
            if let Some(version) = version {
                urls.push(format!("{root}/{base}{version}.pdf"));
            }
            urls.push(format!("{root}/{base}.pdf"));
        }
    }
    if let Some(url) = pdf_url {
        if !urls.iter().any(|u| u == url) {
            urls.push(url.to_string());
        }
    }
    urls
}

/// Stable artifact file stem for a document.
pub fn artifact_stem(doc: &Document) -> String {
    let name = match arxiv_id(doc) {
        Some(id) => format!("arxiv_{id}"),
        None => {
            let key = doc
                .pdf_url
                .clone()
                .or_else(|| doc.source_url.clone())
                .unwrap_or_else(|| doc.id.to_string());
            format!("doc_{}", &url_hash(&key)[..12])
        }
    };
    safe_filename(&format!("{name}_id{}", doc.id))
}

/// Identification and fetch provenance written next to an artifact.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactSidecar {
    pub document_id: i64,
    pub source: Option<String>,
    pub arxiv_id: Option<String>,
    pub doi: Option<String>,
    pub title: Option<String>,
    pub authors: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub year: Option<i32>,
    pub local_path: String,
    pub url_used: String,
    pub http_status: Option<u16>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub sha256: Option<String>,
    pub file_size: Option<u64>,
    pub too_large: bool,
    pub cap_mb: f64,
    pub pdf_status: PdfStatus,
    pub pdf_fetched_at: DateTime<Utc>,
    /// Filled by an external uploader
    pub s3_key: Option<String>,
}

/// Result of the HEAD phase.
struct Preflight {
    chosen: Option<String>,
    size_rejected: Option<(String, HeadResponse)>,
}

/// Final state of one GET sequence.
struct Download {
    status: PdfStatus,
    http_status: Option<u16>,
    committed: Option<(String, u64)>,
    content_type: Option<String>,
    content_length: Option<u64>,
    etag: Option<String>,
    last_modified: Option<String>,
}

impl Download {
    fn failed(status: PdfStatus, http_status: Option<u16>) -> Self {
        Self {
            status,
            http_status,
            committed: None,
            content_type: None,
            content_length: None,
            etag: None,
            last_modified: None,
        }
    }
}

/// Batch PDF fetcher over the document store.
pub struct ArtifactFetcher<'a> {
    client: &'a dyn HttpClient,
    store: &'a Store,
    artifacts: ArtifactStore,
    config: FetcherConfig,
    retry: RetryPolicy,
}

impl<'a> ArtifactFetcher<'a> {
    pub fn new(
        client: &'a dyn HttpClient,
        store: &'a Store,
        artifacts: ArtifactStore,
        config: &FetcherConfig,
    ) -> Self {
        Self {
            client,
            store,
            artifacts,
            retry: RetryPolicy::new(config.max_retries, config.throttle(), config.jitter()),
            config: config.clone(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Materialise the selection once and fetch it.
    pub async fn fetch_selection(&self, selection: &FetchSelection) -> Result<RunMetrics> {
        if selection.ids.as_ref().is_some_and(|ids| ids.is_empty()) {
            log::info!("Empty id filter, nothing to fetch");
            return Ok(RunMetrics::default());
        }
        let rows = self
            .store
            .with_conn(|conn| documents::select_fetch_candidates(conn, selection))?;
        log::info!("Selected {} documents for fetching", rows.len());
        self.fetch_batch(&rows).await
    }

    /// Fetch artifacts for `docs`, sequentially.
    pub async fn fetch_batch(&self, docs: &[Document]) -> Result<RunMetrics> {
        self.artifacts.ensure_root().await?;

        let mut metrics = RunMetrics::default();
        let mut latencies = Vec::new();

        for doc in docs {
            let candidates = candidate_urls(doc, &self.config.arxiv_pdf_base);
            if candidates.is_empty() {
                log::debug!("Document {} has no candidate URL", doc.id);
                continue;
            }
            metrics.attempted += 1;

            let touched_network = match self
                .fetch_one(doc, &candidates, &mut metrics, &mut latencies)
                .await
            {
                Ok(touched) => touched,
                Err(e) if e.is_store() => return Err(e),
                Err(e) => {
                    log::warn!("Document {} failed: {}", doc.id, e);
                    let final_path = self.artifacts.artifact_path(&artifact_stem(doc));
                    self.artifacts.discard_partial(&final_path).await;
                    self.record(doc.id, &ArtifactUpdate::status_only(PdfStatus::Error, None))?;
                    metrics.record_outcome(PdfStatus::Error, None);
                    true
                }
            };
            if touched_network {
                self.retry.pause().await;
            }
        }

        metrics.latency_ms = LatencySummary::from_samples(&latencies);
        log::info!(
            "Fetch finished: {} attempted, {} downloaded, {} failed, {} too large",
            metrics.attempted,
            metrics.downloaded,
            metrics.failed,
            metrics.too_large
        );
        Ok(metrics)
    }

    /// Returns whether any network call was made.
    async fn fetch_one(
        &self,
        doc: &Document,
        candidates: &[String],
        metrics: &mut RunMetrics,
        latencies: &mut Vec<u64>,
    ) -> Result<bool> {
        let stem = artifact_stem(doc);
        let final_path = self.artifacts.artifact_path(&stem);

        if tokio::fs::try_exists(&final_path).await? {
            self.adopt_existing(doc, &final_path, metrics).await?;
            return Ok(false);
        }

        let preflight = self.preflight(candidates, metrics).await?;

        if self.config.dry_run {
            log::info!("[dry-run] document {} -> {:?}", doc.id, preflight.chosen);
            self.record(doc.id, &ArtifactUpdate::status_only(PdfStatus::DryRun, None))?;
            metrics.record_outcome(PdfStatus::DryRun, None);
            return Ok(true);
        }

        let url = match (preflight.chosen, preflight.size_rejected) {
            (Some(url), _) => url,
            (None, Some((url, head))) => {
                log::info!(
                    "Document {} too large at HEAD ({:?} bytes)",
                    doc.id,
                    head.content_length
                );
                let update = ArtifactUpdate::status_only(PdfStatus::TooLarge, Some(head.status));
                self.record(doc.id, &update)?;
                metrics.record_outcome(PdfStatus::TooLarge, Some(head.status));
                let download = Download {
                    content_type: head.content_type.clone(),
                    content_length: head.content_length,
                    ..Download::failed(PdfStatus::TooLarge, Some(head.status))
                };
                self.write_sidecar(doc, &stem, &final_path, &url, &download, update.fetched_at)
                    .await;
                return Ok(true);
            }
            (None, None) => candidates[0].clone(),
        };

        let download = self.download(&url, &final_path, metrics, latencies).await?;
        let fetched_at = Utc::now();

        let update = match &download.committed {
            Some((sha256, size)) => ArtifactUpdate {
                pdf_status: PdfStatus::Ok,
                fetched_at,
                http_status: download.http_status,
                local_path: Some(final_path.to_string_lossy().to_string()),
                file_size: Some(*size as i64),
                checksum_sha256: Some(sha256.clone()),
                mime_type: download.content_type.clone(),
            },
            None => ArtifactUpdate {
                fetched_at,
                ..ArtifactUpdate::status_only(download.status, download.http_status)
            },
        };
        self.record(doc.id, &update)?;
        metrics.record_outcome(download.status, download.http_status);

        if let Some((sha256, size)) = &download.committed {
            metrics.bytes_downloaded += size;
            metrics.items.push(FetchedItem {
                id: doc.id,
                local_path: final_path.to_string_lossy().to_string(),
                sha256: sha256.clone(),
                file_size: *size as i64,
                fetched_at,
            });
            log::info!("Fetched document {} ({} bytes)", doc.id, size);
        } else {
            log::warn!(
                "Document {} fetch ended as {} (HTTP {:?}) from {}",
                doc.id,
                download.status,
                download.http_status,
                url
            );
        }

        if matches!(download.status, PdfStatus::Ok | PdfStatus::TooLarge) {
            self.write_sidecar(doc, &stem, &final_path, &url, &download, fetched_at)
                .await;
        }
        Ok(true)
    }

    async fn adopt_existing(
        &self,
        doc: &Document,
        path: &Path,
        metrics: &mut RunMetrics,
    ) -> Result<()> {
        let (sha256, size) = checksum_file(path).await?;
        let update = ArtifactUpdate {
            pdf_status: PdfStatus::Ok,
            fetched_at: Utc::now(),
            http_status: doc.http_status,
            local_path: Some(path.to_string_lossy().to_string()),
            file_size: Some(size as i64),
            checksum_sha256: Some(sha256),
            mime_type: Some("application/pdf".to_string()),
        };
        self.record(doc.id, &update)?;
        metrics.already_present += 1;
        log::info!("Document {} already on disk at {:?}", doc.id, path);
        Ok(())
    }

    /// HEAD each candidate in order until one is acceptable.
    async fn preflight(&self, candidates: &[String], metrics: &mut RunMetrics) -> Result<Preflight> {
        let max_bytes = self.config.max_bytes();
        let mut size_rejected = None;

        for url in candidates {
            let head = match self.head_with_retry(url, metrics).await? {
                Some(head) => head,
                None => continue,
            };

            if matches!(head.status, 403 | 404) {
                log::debug!("HEAD {} -> {}, trying next candidate", head.status, url);
                continue;
            }
            if head.content_length.is_some_and(|len| len > max_bytes) {
                log::debug!("HEAD {} reports {:?} bytes over cap", url, head.content_length);
                size_rejected.get_or_insert((url.clone(), head));
                continue;
            }
            return Ok(Preflight {
                chosen: Some(url.clone()),
                size_rejected,
            });
        }

        Ok(Preflight {
            chosen: None,
            size_rejected,
        })
    }

    /// HEAD under the retry policy; transport errors yield `None`.
    async fn head_with_retry(
        &self,
        url: &str,
        metrics: &mut RunMetrics,
    ) -> Result<Option<HeadResponse>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.head(url).await {
                Ok(head) => {
                    self.touch(url, &head.status.to_string())?;
                    if self.retry.should_retry(head.status, attempt) {
                        metrics.retries += 1;
                        self.retry.pause().await;
                        continue;
                    }
                    return Ok(Some(head));
                }
                Err(e) => {
                    let status = if e.is_timeout() { "timeout" } else { "error" };
                    self.touch(url, status)?;
                    log::debug!("HEAD {} failed: {}", url, e);
                    return Ok(None);
                }
            }
        }
    }

    /// GET under the retry policy, streaming a PDF body into place.
    async fn download(
        &self,
        url: &str,
        final_path: &Path,
        metrics: &mut RunMetrics,
        latencies: &mut Vec<u64>,
    ) -> Result<Download> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let started = Instant::now();
            let response = match self.client.get(url).await {
                Ok(response) => response,
                Err(e) => {
                    latencies.push(elapsed_ms(started));
                    let status = if e.is_timeout() {
                        PdfStatus::Timeout
                    } else {
                        PdfStatus::Error
                    };
                    log::debug!("GET {} failed: {}", url, e);
                    return Ok(Download::failed(status, None));
                }
            };
            self.touch(url, &response.status.to_string())?;

            if self.retry.should_retry(response.status, attempt) {
                latencies.push(elapsed_ms(started));
                log::debug!(
                    "GET {} -> {} (attempt {}/{}), retrying",
                    url,
                    response.status,
                    attempt,
                    self.retry.max_attempts()
                );
                metrics.retries += 1;
                drop(response);
                self.retry.pause().await;
                continue;
            }

            let status = response.status;
            let result = if status == 200 && response.is_pdf() {
                self.stream_to_disk(response, final_path).await?
            } else {
                let outcome = match status {
                    404 => PdfStatus::NotFound,
                    403 => PdfStatus::Forbidden,
                    _ => PdfStatus::Error,
                };
                Download {
                    content_type: response.content_type.clone(),
                    ..Download::failed(outcome, Some(status))
                }
            };
            latencies.push(elapsed_ms(started));
            return Ok(result);
        }
    }

    async fn stream_to_disk(&self, response: HttpResponse, final_path: &Path) -> Result<Download> {
        let max_bytes = self.config.max_bytes();
        let HttpResponse {
            status,
            content_type,
            content_length,
            etag,
            last_modified,
            mut body,
        } = response;
        let base = Download {
            content_type,
            content_length,
            etag,
            last_modified,
            ..Download::failed(PdfStatus::Error, Some(status))
        };

        let mut partial = self.artifacts.begin(final_path).await?;
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    partial.discard().await;
                    let outcome = if e.is_timeout() {
                        PdfStatus::Timeout
                    } else {
                        PdfStatus::Error
                    };
                    log::debug!("Body of {:?} interrupted: {}", final_path, e);
                    return Ok(Download {
                        status: outcome,
                        ..base
                    });
                }
            };
            if partial.bytes_written() + chunk.len() as u64 > max_bytes {
                partial.discard().await;
                return Ok(Download {
                    status: PdfStatus::TooLarge,
                    ..base
                });
            }
            if let Err(e) = partial.write_chunk(&chunk).await {
                partial.discard().await;
                return Err(e);
            }
        }

        let committed = partial.commit().await?;
        Ok(Download {
            status: PdfStatus::Ok,
            committed: Some((committed.sha256, committed.size)),
            ..base
        })
    }

    fn record(&self, id: i64, update: &ArtifactUpdate) -> Result<()> {
        self.store
            .with_conn(|conn| documents::record_artifact(conn, id, update))
    }

    fn touch(&self, url: &str, status: &str) -> Result<()> {
        self.store
            .with_conn(|conn| visited::touch(conn, url, Some(status)))
    }

    async fn write_sidecar(
        &self,
        doc: &Document,
        stem: &str,
        final_path: &Path,
        url: &str,
        download: &Download,
        fetched_at: DateTime<Utc>,
    ) {
        let sidecar = ArtifactSidecar {
            document_id: doc.id,
            source: doc.source.clone(),
            arxiv_id: arxiv_id(doc),
            doi: doc.doi.clone(),
            title: doc.title.clone(),
            authors: doc.authors.clone(),
            abstract_text: doc.abstract_text.clone(),
            year: doc.year,
            local_path: final_path.to_string_lossy().to_string(),
            url_used: url.to_string(),
            http_status: download.http_status,
            content_type: download.content_type.clone(),
            content_length: download.content_length,
            etag: download.etag.clone(),
            last_modified: download.last_modified.clone(),
            sha256: download.committed.as_ref().map(|(sha, _)| sha.clone()),
            file_size: download.committed.as_ref().map(|(_, size)| *size),
            too_large: download.status == PdfStatus::TooLarge,
            cap_mb: self.config.max_mb,
            pdf_status: download.status,
            pdf_fetched_at: fetched_at,
            s3_key: None,
        };
        let path = self.artifacts.meta_path(stem);
        if let Err(e) = self.artifacts.write_json(&path, &sidecar).await {
            log::warn!("Could not write sidecar {:?}: {}", path, e);
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
