//! Pipeline entry points for harvester runs.
//!
//! - `run_ingest`: resolve JSON-Lines candidates into the store
//! - `run_score`: rank stored documents against the lexicon
//! - `run_fetch`: download artifacts and write fetch metrics
//! - `run_crawl`: discover candidate pages from seed sites
//! - `run_validate`: check configuration files

pub mod crawl;
pub mod fetch;
pub mod ingest;
pub mod score;
pub mod validate;

pub use crawl::run_crawl;
pub use fetch::{run_fetch, selection_from_config};
pub use ingest::{IngestStats, JsonlReader, run_ingest};
pub use score::{ScoreReport, run_score};
pub use validate::run_validate;
