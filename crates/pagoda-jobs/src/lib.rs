//! # pagoda-jobs
//!
//! Ingestion worker pool for the pagoda knowledge hub. Consumes post-merge
//! tasks, stream-parses the merged object, splits text into passages,
//! persists them, then embeds and bulk-indexes into the search store.

pub mod extract;
pub mod handler;
pub mod memory;
pub mod splitter;
pub mod worker;

pub use extract::{detect_kind, extract_text, DocKind};
pub use handler::{search_doc_id, IngestConfig, IngestHandler};
pub use memory::MemoryGate;
pub use splitter::{split_text, TwoLevelSplitter};
pub use worker::{IngestWorker, WorkerConfig, WorkerEvent, WorkerHandle};
