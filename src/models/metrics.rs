//! Run reports emitted by the batch jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::PdfStatus;

/// Latency percentiles over all GET attempts of a fetch run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub p50: Option<u64>,
    pub p95: Option<u64>,
    pub max: Option<u64>,
}

impl LatencySummary {
    /// Nearest-rank percentiles using `round(p * (n - 1))`.
    pub fn from_samples(samples: &[u64]) -> Self {
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();

        let pct = |p: f64| -> Option<u64> {
            if sorted.is_empty() {
                return None;
            }
            let last = sorted.len() - 1;
            let k = (p * last as f64).round() as usize;
            Some(sorted[k.min(last)])
        };

        Self {
            p50: pct(0.5),
            p95: pct(0.95),
            max: sorted.last().copied(),
        }
    }
}

/// A successfully committed artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedItem {
    pub id: i64,
    pub local_path: String,
    pub sha256: String,
    pub file_size: i64,
    pub fetched_at: DateTime<Utc>,
}

/// Aggregate report of one fetch batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub attempted: usize,
    pub downloaded: usize,
    pub failed: usize,
    pub not_found_404: usize,
    pub forbidden_403: usize,
    pub errors_5xx: usize,
    pub timeouts: usize,
    pub too_large: usize,
    pub dry_run: usize,
    /// Artifacts found on disk and adopted without a download
    pub already_present: usize,
    pub retries: usize,
    pub bytes_downloaded: u64,
    pub latency_ms: LatencySummary,
    pub items: Vec<FetchedItem>,
}

impl RunMetrics {
    /// Count a final per-document outcome.
    pub fn record_outcome(&mut self, status: PdfStatus, http_status: Option<u16>) {
        match status {
            PdfStatus::Ok => self.downloaded += 1,
            PdfStatus::DryRun => self.dry_run += 1,
            PdfStatus::TooLarge => self.too_large += 1,
            PdfStatus::None => {}
            PdfStatus::NotFound => {
                self.failed += 1;
                self.not_found_404 += 1;
            }
            PdfStatus::Forbidden => {
                self.failed += 1;
                self.forbidden_403 += 1;
            }
            PdfStatus::Timeout => {
                self.failed += 1;
                self.timeouts += 1;
            }
            PdfStatus::Error => {
                self.failed += 1;
                if http_status.is_some_and(|s| (500..600).contains(&s)) {
                    self.errors_5xx += 1;
                }
            }
        }
    }

    /// Summary rows for console output.
    pub fn summary_items(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Attempted", self.attempted.to_string()),
            ("Downloaded", self.downloaded.to_string()),
            ("Already present", self.already_present.to_string()),
            ("Failed", self.failed.to_string()),
            ("404 / 403 / 5xx", format!(
                "{} / {} / {}",
                self.not_found_404, self.forbidden_403, self.errors_5xx
            )),
            ("Timeouts", self.timeouts.to_string()),
            ("Too large", self.too_large.to_string()),
            ("Retries", self.retries.to_string()),
            ("Bytes", self.bytes_downloaded.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_percentiles() {
        let summary = LatencySummary::from_samples(&[40, 10, 30, 20, 50]);
        assert_eq!(summary.p50, Some(30));
        assert_eq!(summary.p95, Some(50));
        assert_eq!(summary.max, Some(50));
    }

    #[test]
    fn test_latency_empty() {
        assert_eq!(LatencySummary::from_samples(&[]), LatencySummary::default());
    }

    #[test]
    fn test_record_outcome_counts_5xx_errors() {
        let mut metrics = RunMetrics::default();
        metrics.record_outcome(PdfStatus::Error, Some(503));
        metrics.record_outcome(PdfStatus::Error, None);
        metrics.record_outcome(PdfStatus::NotFound, Some(404));
        assert_eq!(metrics.failed, 3);
        assert_eq!(metrics.errors_5xx, 1);
        assert_eq!(metrics.not_found_404, 1);
    }

    #[test]
    fn test_metrics_json_shape() {
        let json = serde_json::to_value(RunMetrics::default()).unwrap();
        assert!(json.get("latency_ms").unwrap().get("p95").is_some());
        assert!(json.get("items").unwrap().as_array().unwrap().is_empty());
    }
}
