//! Persistence: the SQLite document store, the visited-URL ledger and the
//! artifact directory.
//!
//! ```text
//! harvester.sqlite
//! ├── documents       # one row per resolved document
//! └── visited_urls    # HEAD/GET ledger shared by fetcher and crawler
//! files/              # see `local`
//! ```

pub mod documents;
pub mod local;
pub mod sqlite;
pub mod visited;

pub use documents::FetchSelection;
pub use local::{ArtifactStore, CommittedArtifact, PartialArtifact, checksum_file, safe_filename};
pub use sqlite::Store;
