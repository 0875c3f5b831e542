//! Persistent vector index with atomic version publishing.

pub mod format;
pub mod index;
pub mod ingest;
pub mod snapshot;
pub mod store;

pub use index::VectorIndex;
pub use ingest::{build_index, ingest_directory, ingest_from, IngestStats};
pub use snapshot::{IndexSnapshot, SnapshotStore};
pub use store::IndexStore;
