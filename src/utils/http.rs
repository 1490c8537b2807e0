// src/utils/http.rs

//! HTTP client abstraction.
//!
//! The fetcher and the crawler only see [`HttpClient`]; one client is built
//! per run from [`HttpConfig`] and passed by reference.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG, HeaderMap, LAST_MODIFIED};

use crate::error::{AppError, Result};
use crate::models::HttpConfig;

/// Streamed response body.
pub type BodyStream = BoxStream<'static, Result<Vec<u8>>>;

/// Status and size hints from a HEAD request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HeadResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    pub content_type: Option<String>,
}

/// A GET response whose body has not been read yet.
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub body: BodyStream,
}

impl HttpResponse {
    /// Build a response around an in-memory body.
    pub fn from_bytes(status: u16, content_type: Option<&str>, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type: content_type.map(str::to_string),
            content_length: Some(body.len() as u64),
            etag: None,
            last_modified: None,
            body: stream::once(async move { Ok(body) }).boxed(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the content type names a PDF.
    pub fn is_pdf(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("application/pdf"))
    }

    /// Drain the body as (lossy) UTF-8 text.
    pub async fn text(mut self) -> Result<String> {
        let mut bytes = Vec::new();
        while let Some(chunk) = self.body.next().await {
            bytes.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Minimal HTTP surface used by the pipeline.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// HEAD `url`, following redirects.
    async fn head(&self, url: &str) -> Result<HeadResponse>;

    /// GET `url`, following redirects; the body is streamed.
    async fn get(&self, url: &str) -> Result<HttpResponse>;
}

/// Create a configured asynchronous HTTP client.
pub fn create_async_client(config: &HttpConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(config.full_user_agent())
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client: create_async_client(config)?,
        })
    }
}

fn header_str(headers: &HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn header_len(headers: &HeaderMap) -> Option<u64> {
    header_str(headers, CONTENT_LENGTH).and_then(|v| v.parse().ok())
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn head(&self, url: &str) -> Result<HeadResponse> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(AppError::from_reqwest)?;
        let headers = response.headers();
        Ok(HeadResponse {
            status: response.status().as_u16(),
            content_length: header_len(headers),
            content_type: header_str(headers, CONTENT_TYPE),
        })
    }

    async fn get(&self, url: &str) -> Result<HttpResponse> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(AppError::from_reqwest)?;
        let headers = response.headers();
        let status = response.status().as_u16();
        let content_type = header_str(headers, CONTENT_TYPE);
        let content_length = header_len(headers);
        let etag = header_str(headers, ETAG);
        let last_modified = header_str(headers, LAST_MODIFIED);

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(AppError::from_reqwest))
            .boxed();

        Ok(HttpResponse {
            status,
            content_type,
            content_length,
            etag,
            last_modified,
            body,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory client for pipeline tests.

    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Instant;

    use super::*;

    #[derive(Debug, Clone)]
    pub enum Scripted {
        Respond {
            status: u16,
            content_type: Option<String>,
            content_length: Option<u64>,
            body: Vec<u8>,
        },
        Timeout,
    }

    impl Scripted {
        pub fn status(status: u16) -> Self {
            Self::Respond {
                status,
                content_type: None,
                content_length: None,
                body: Vec::new(),
            }
        }

        pub fn pdf(body: &[u8]) -> Self {
            Self::Respond {
                status: 200,
                content_type: Some("application/pdf".into()),
                content_length: Some(body.len() as u64),
                body: body.to_vec(),
            }
        }

        pub fn html(body: &str) -> Self {
            Self::Respond {
                status: 200,
                content_type: Some("text/html; charset=utf-8".into()),
                content_length: Some(body.len() as u64),
                body: body.as_bytes().to_vec(),
            }
        }

        pub fn sized(status: u16, content_length: u64) -> Self {
            Self::Respond {
                status,
                content_type: Some("application/pdf".into()),
                content_length: Some(content_length),
                body: Vec::new(),
            }
        }
    }

    #[derive(Default)]
    struct State {
        heads: HashMap<String, VecDeque<Scripted>>,
        gets: HashMap<String, VecDeque<Scripted>>,
        calls: Vec<(&'static str, String)>,
        get_started: Vec<(String, Instant)>,
        in_flight: HashMap<String, usize>,
        max_in_flight: HashMap<String, usize>,
    }

    /// Replays scripted responses per URL; the last entry repeats.
    ///
    /// Unscripted HEADs answer 200 without a length, unscripted GETs 404.
    #[derive(Default)]
    pub struct ScriptedClient {
        state: Mutex<State>,
        latency: Duration,
    }

    impl ScriptedClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_latency(latency: Duration) -> Self {
            Self {
                latency,
                ..Self::default()
            }
        }

        pub fn on_head(&self, url: &str, responses: Vec<Scripted>) {
            self.state
                .lock()
                .unwrap()
                .heads
                .insert(url.to_string(), responses.into());
        }

        pub fn on_get(&self, url: &str, responses: Vec<Scripted>) {
            self.state
                .lock()
                .unwrap()
                .gets
                .insert(url.to_string(), responses.into());
        }

        pub fn calls(&self) -> Vec<(&'static str, String)> {
            self.state.lock().unwrap().calls.clone()
        }

        pub fn count(&self, method: &str) -> usize {
            self.calls().iter().filter(|(m, _)| *m == method).count()
        }

        pub fn gets_for(&self, url: &str) -> usize {
            self.calls()
                .iter()
                .filter(|(m, u)| *m == "GET" && u == url)
                .count()
        }

        /// Start instants of every GET to `url`, in call order.
        pub fn get_times(&self, url: &str) -> Vec<Instant> {
            self.state
                .lock()
                .unwrap()
                .get_started
                .iter()
                .filter(|(u, _)| u == url)
                .map(|(_, at)| *at)
                .collect()
        }

        /// Highest number of concurrent GETs observed per host.
        pub fn max_in_flight(&self, host: &str) -> usize {
            self.state
                .lock()
                .unwrap()
                .max_in_flight
                .get(host)
                .copied()
                .unwrap_or(0)
        }

        fn next(
            queue: Option<&mut VecDeque<Scripted>>,
        ) -> Option<Scripted> {
            let queue = queue?;
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        }
    }

    fn host(url: &str) -> String {
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default()
    }

    #[async_trait]
    impl HttpClient for ScriptedClient {
        async fn head(&self, url: &str) -> Result<HeadResponse> {
            let scripted = {
                let mut state = self.state.lock().unwrap();
                state.calls.push(("HEAD", url.to_string()));
                Self::next(state.heads.get_mut(url))
            };
            match scripted {
                None => Ok(HeadResponse {
                    status: 200,
                    ..Default::default()
                }),
                Some(Scripted::Timeout) => Err(AppError::Timeout(url.to_string())),
                Some(Scripted::Respond {
                    status,
                    content_type,
                    content_length,
                    ..
                }) => Ok(HeadResponse {
                    status,
                    content_length,
                    content_type,
                }),
            }
        }

        async fn get(&self, url: &str) -> Result<HttpResponse> {
            let host = host(url);
            let scripted = {
                let mut state = self.state.lock().unwrap();
                state.calls.push(("GET", url.to_string()));
                state.get_started.push((url.to_string(), Instant::now()));
                let current = {
                    let n = state.in_flight.entry(host.clone()).or_default();
                    *n += 1;
                    *n
                };
                let max = state.max_in_flight.entry(host.clone()).or_default();
                *max = (*max).max(current);
                Self::next(state.gets.get_mut(url))
            };

            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if let Some(n) = self.state.lock().unwrap().in_flight.get_mut(&host) {
                *n -= 1;
            }

            match scripted {
                None => Ok(HttpResponse::from_bytes(404, None, Vec::new())),
                Some(Scripted::Timeout) => Err(AppError::Timeout(url.to_string())),
                Some(Scripted::Respond {
                    status,
                    content_type,
                    content_length,
                    body,
                }) => {
                    let mut response = HttpResponse::from_bytes(status, content_type.as_deref(), body);
                    response.content_length = content_length;
                    Ok(response)
                }
            }
        }
    }
}
