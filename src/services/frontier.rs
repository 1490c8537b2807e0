// src/services/frontier.rs

//! Priority work queue for the crawler.
//!
//! Entries dequeue by depth ascending, then target-domain score descending,
//! then discovery order. A URL is accepted at most once per frontier.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use crate::utils::get_domain;

/// Academic likelihood of a host: `.edu`, `.gov` and `.ac.<cc>` score 1.0,
/// `.org` 0.7, anything else 0.3.
pub fn domain_score(host: &str) -> f64 {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let labels: Vec<&str> = host.split('.').collect();
    let tld = labels.last().copied().unwrap_or("");

    let academic_cc = labels.len() >= 3
        && labels[labels.len() - 2] == "ac"
        && tld.len() >= 2
        && tld.bytes().all(|b| b.is_ascii_alphabetic());

    if tld == "edu" || tld == "gov" || academic_cc {
        1.0
    } else if tld == "org" {
        0.7
    } else {
        0.3
    }
}

/// Score of the host of `url`; unparseable URLs get the lowest score.
pub fn url_score(url: &str) -> f64 {
    get_domain(url).map_or(0.3, |host| domain_score(&host))
}

/// A dequeued unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct FrontierEntry {
    pub url: String,
    pub depth: u32,
    pub score: f64,
}

#[derive(Debug, PartialEq, Eq)]
struct Queued {
    key: (Reverse<u32>, u32, Reverse<u64>),
    url: String,
}

impl Ord for Queued {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Depth-bounded BFS frontier.
#[derive(Debug)]
pub struct Frontier {
    heap: BinaryHeap<Queued>,
    seen: HashSet<String>,
    max_depth: u32,
    seq: u64,
}

impl Frontier {
    pub fn new(max_depth: u32) -> Self {
        Self {
            heap: BinaryHeap::new(),
            seen: HashSet::new(),
            max_depth,
            seq: 0,
        }
    }

    /// Enqueue `url` at `depth`. Returns false when it is too deep or
    /// already known.
    pub fn push(&mut self, url: &str, depth: u32) -> bool {
        if depth > self.max_depth || self.seen.contains(url) {
            return false;
        }
        self.seen.insert(url.to_string());

        let permille = (url_score(url) * 1000.0).round() as u32;
        self.heap.push(Queued {
            key: (Reverse(depth), permille, Reverse(self.seq)),
            url: url.to_string(),
        });
        self.seq += 1;
        true
    }

    pub fn pop(&mut self) -> Option<FrontierEntry> {
        self.heap.pop().map(|q| FrontierEntry {
            depth: q.key.0.0,
            score: f64::from(q.key.1) / 1000.0,
            url: q.url,
        })
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }
}
