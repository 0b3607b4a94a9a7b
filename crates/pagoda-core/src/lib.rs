//! # pagoda-core
//!
//! Core types, traits, and abstractions for the pagoda knowledge hub.
//!
//! This crate provides the foundational data structures and trait
//! definitions that the other pagoda crates depend on.

pub mod defaults;
pub mod error;
pub mod file_types;
pub mod logging;
pub mod models;
pub mod tags;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use file_types::{check_file_type, file_extension, FileTypeCheck};
pub use models::*;
pub use tags::{is_private_tag, private_tag_id, DEFAULT_TAG, PRIVATE_TAG_PREFIX};
pub use traits::*;
