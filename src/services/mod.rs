//! Service layer of the harvester.
//!
//! - Identity resolution (`IdentityResolver`)
//! - Relevance scoring (`RelevanceScorer`)
//! - Artifact fetching (`ArtifactFetcher`)
//! - Link-following crawl (`Crawler`, `Frontier`)
//! - Page metadata extraction (`HtmlMetadataExtractor`)
//! - robots.txt handling (`RobotsCache`)

pub mod crawler;
pub mod extractor;
pub mod fetcher;
pub mod frontier;
pub mod resolver;
pub mod robots;
pub mod scorer;

pub use crawler::{CrawlReport, Crawler};
pub use extractor::{ExtractedMetadata, HtmlMetadataExtractor, MetadataExtractor};
pub use fetcher::ArtifactFetcher;
pub use frontier::{Frontier, FrontierEntry};
pub use resolver::{IdentityResolver, MatchedBy, Resolution};
pub use robots::{RobotsCache, RobotsTxt};
pub use scorer::{RelevanceScorer, ScoreResult};
