//! # pagoda-store
//!
//! S3-compatible object store client for the pagoda knowledge hub.
//!
//! Uses only pure-Rust dependencies (`hmac`, `sha2`) for AWS SigV4
//! signing — no C library dependencies — and path-style addressing so
//! MinIO and LocalStack endpoints work unchanged.

pub mod s3;
pub mod sigv4;
pub mod source;

pub use s3::{delete_all_best_effort, S3Store, StoreConfig};
pub use source::{is_remote, open_source, read_source_bytes, SourceStream};

use pagoda_core::defaults::{CHUNK_PREFIX, MERGED_PREFIX};

/// Object key of an uploaded chunk: `chunks/<fileMd5>/<index>`.
pub fn chunk_path(file_md5: &str, chunk_index: i32) -> String {
    format!("{CHUNK_PREFIX}/{file_md5}/{chunk_index}")
}

/// Object key of a composed file: `merged/<fileName>`.
pub fn merged_path(file_name: &str) -> String {
    format!("{MERGED_PREFIX}/{file_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_layout() {
        assert_eq!(
            chunk_path("d41d8cd98f00b204e9800998ecf8427e", 2),
            "chunks/d41d8cd98f00b204e9800998ecf8427e/2"
        );
        assert_eq!(merged_path("report.pdf"), "merged/report.pdf");
    }
}
