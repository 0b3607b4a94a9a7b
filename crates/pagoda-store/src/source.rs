//! Merged-object source streaming for the ingestion worker.
//!
//! A post-merge task carries either a local filesystem path or an HTTP(S)
//! URL (typically a pre-signed download link). Remote sources use a 30 s
//! connect / 180 s read timeout; HTTP 403 is treated as an expired link and
//! fails the task outright rather than retrying forever.

use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

use futures::TryStreamExt;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tracing::info;

use pagoda_core::defaults::{SOURCE_CONNECT_TIMEOUT_SECS, SOURCE_READ_TIMEOUT_SECS};
use pagoda_core::{Error, Result};

/// Byte stream over a task's source object.
pub type SourceStream = Pin<Box<dyn AsyncRead + Send>>;

/// Whether the path denotes a remote source.
pub fn is_remote(file_path: &str) -> bool {
    file_path.starts_with("http://") || file_path.starts_with("https://")
}

/// Open the merged object behind `file_path` as a byte stream.
pub async fn open_source(file_path: &str) -> Result<SourceStream> {
    if !is_remote(file_path) {
        if Path::new(file_path).exists() {
            info!(path = %file_path, "Opening local source file");
            let file = tokio::fs::File::open(file_path).await?;
            return Ok(Box::pin(file));
        }
        return Err(Error::Storage(format!(
            "unsupported file path format: {file_path}"
        )));
    }

    info!(url = %file_path, "Downloading source object");
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(SOURCE_CONNECT_TIMEOUT_SECS))
        .read_timeout(Duration::from_secs(SOURCE_READ_TIMEOUT_SECS))
        .user_agent("pagoda-ingest/1.0")
        .build()
        .map_err(|e| Error::Storage(format!("failed to build download client: {e}")))?;

    let response = client
        .get(file_path)
        .send()
        .await
        .map_err(|e| Error::Storage(format!("source download failed: {e}")))?;

    match response.status() {
        status if status.is_success() => {}
        reqwest::StatusCode::FORBIDDEN => {
            return Err(Error::Storage(
                "access forbidden - the presigned URL may have expired".to_string(),
            ));
        }
        status => {
            return Err(Error::Storage(format!(
                "source download failed with HTTP {status}"
            )));
        }
    }

    let stream = response
        .bytes_stream()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
    Ok(Box::pin(StreamReader::new(stream)))
}

/// Read an entire source into memory (binary formats need whole-file
/// access for container parsing).
pub async fn read_source_bytes(file_path: &str) -> Result<Vec<u8>> {
    use tokio::io::AsyncReadExt;
    let mut reader = open_source(file_path).await?;
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn remote_detection() {
        assert!(is_remote("http://minio:9000/uploads/merged/a.pdf?X-Amz..."));
        assert!(is_remote("https://example.com/f.txt"));
        assert!(!is_remote("/var/data/merged/a.pdf"));
        assert!(!is_remote("relative/path.txt"));
    }

    #[tokio::test]
    async fn local_source_streams_bytes() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello pagoda").unwrap();

        let bytes = read_source_bytes(tmp.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(bytes, b"hello pagoda");
    }

    #[tokio::test]
    async fn missing_local_source_errors() {
        let result = open_source("/definitely/not/here.bin").await;
        assert!(matches!(result, Err(Error::Storage(_))));
    }
}
