// src/lib.rs

//! Harvester library: scholarly candidate ingestion, relevance scoring,
//! resilient artifact fetching and polite crawling.

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
