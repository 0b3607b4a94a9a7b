//! # pagoda-search
//!
//! Hybrid permissioned search for the pagoda knowledge hub: vector k-NN
//! plus lexical match over Elasticsearch, permission filter composition,
//! rescoring, and the lexical-only degradation path.

pub mod es;
pub mod hybrid;
pub mod query;

pub use es::{EsClient, EsConfig};
pub use hybrid::{map_hits, HybridSearchEngine};
