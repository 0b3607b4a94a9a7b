//! S3-compatible object store client.
//!
//! Speaks the S3 REST API directly over `reqwest` with SigV4 signing, using
//! path-style addressing so MinIO and LocalStack endpoints work unchanged.
//! `compose` expresses the store's native composition primitive as a
//! multipart upload whose parts are server-side copies of the source
//! objects, so chunk bytes never travel through this process.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use pagoda_core::{Error, ObjectStore, Result};

use crate::sigv4::{hex_sha256, presign_url, sign_headers, uri_encode_path, SigningContext};

/// Object store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Endpoint URL, e.g. `http://localhost:9000`.
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    /// Endpoint advertised in pre-signed URLs; defaults to `endpoint`.
    pub public_endpoint: String,
}

impl StoreConfig {
    /// Read configuration from the environment.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `OBJECT_STORE_ENDPOINT` | `http://localhost:9000` |
    /// | `OBJECT_STORE_REGION` | `us-east-1` |
    /// | `OBJECT_STORE_BUCKET` | `uploads` |
    /// | `OBJECT_STORE_ACCESS_KEY` | — (required) |
    /// | `OBJECT_STORE_SECRET_KEY` | — (required) |
    /// | `OBJECT_STORE_PUBLIC_ENDPOINT` | endpoint |
    pub fn from_env() -> Result<Self> {
        let endpoint = std::env::var("OBJECT_STORE_ENDPOINT")
            .unwrap_or_else(|_| "http://localhost:9000".to_string());
        let access_key = std::env::var("OBJECT_STORE_ACCESS_KEY")
            .map_err(|_| Error::Config("OBJECT_STORE_ACCESS_KEY is not set".to_string()))?;
        let secret_key = std::env::var("OBJECT_STORE_SECRET_KEY")
            .map_err(|_| Error::Config("OBJECT_STORE_SECRET_KEY is not set".to_string()))?;

        Ok(Self {
            public_endpoint: std::env::var("OBJECT_STORE_PUBLIC_ENDPOINT")
                .unwrap_or_else(|_| endpoint.clone()),
            endpoint,
            region: std::env::var("OBJECT_STORE_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            bucket: std::env::var("OBJECT_STORE_BUCKET").unwrap_or_else(|_| {
                pagoda_core::defaults::UPLOAD_BUCKET.to_string()
            }),
            access_key,
            secret_key,
        })
    }
}

/// S3-compatible implementation of [`ObjectStore`].
#[derive(Clone)]
pub struct S3Store {
    client: reqwest::Client,
    config: StoreConfig,
    ctx: SigningContext,
}

fn split_endpoint(endpoint: &str) -> (String, String) {
    let (scheme, rest) = endpoint
        .split_once("://")
        .unwrap_or(("http", endpoint));
    (scheme.to_string(), rest.trim_end_matches('/').to_string())
}

/// Extract the text of the first `<tag>...</tag>` in a small XML payload.
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].to_string())
}

impl S3Store {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Storage(format!("failed to build HTTP client: {e}")))?;

        let ctx = SigningContext {
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            region: config.region.clone(),
        };

        Ok(Self {
            client,
            config,
            ctx,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn canonical_uri(&self, path: &str) -> String {
        format!("/{}/{}", self.config.bucket, uri_encode_path(path))
    }

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &[(String, String)],
        extra_headers: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<reqwest::Response> {
        let (scheme, host) = split_endpoint(&self.config.endpoint);
        let canonical_uri = self.canonical_uri(path);
        let payload_hash = hex_sha256(&body);

        let headers = sign_headers(
            &self.ctx,
            method.as_str(),
            &host,
            &canonical_uri,
            query,
            extra_headers,
            &payload_hash,
            Utc::now(),
        );

        let mut url = format!("{scheme}://{host}{canonical_uri}");
        if !query.is_empty() {
            // Send exactly the canonical form so the signature matches.
            url = format!("{url}?{}", crate::sigv4::canonical_query(query));
        }

        let mut req = self.client.request(method, &url);
        for (k, v) in headers {
            req = req.header(k, v);
        }
        if !body.is_empty() {
            req = req.body(body);
        }

        Ok(req.send().await.map_err(|e| Error::Storage(e.to_string()))?)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn put(&self, path: &str, data: &[u8], content_type: &str) -> Result<()> {
        debug!(path, size = data.len(), "object_store: put");
        let response = self
            .send(
                reqwest::Method::PUT,
                path,
                &[],
                &[("content-type".to_string(), content_type.to_string())],
                data.to_vec(),
            )
            .await?;

        if !response.status().is_success() {
            return Err(Error::Storage(format!(
                "PUT {path} failed with HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let response = self
            .send(reqwest::Method::GET, path, &[], &[], Vec::new())
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("object {path}")));
        }
        if !response.status().is_success() {
            return Err(Error::Storage(format!(
                "GET {path} failed with HTTP {}",
                response.status()
            )));
        }
        Ok(response
            .bytes()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?
            .to_vec())
    }

    async fn stat(&self, path: &str) -> Result<Option<u64>> {
        let response = self
            .send(reqwest::Method::HEAD, path, &[], &[], Vec::new())
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::Storage(format!(
                "HEAD {path} failed with HTTP {}",
                response.status()
            )));
        }

        let len = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Ok(Some(len))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.stat(path).await?.is_some())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let response = self
            .send(reqwest::Method::DELETE, path, &[], &[], Vec::new())
            .await?;

        // S3 DELETE is idempotent; 404 means already gone.
        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(Error::Storage(format!(
                "DELETE {path} failed with HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn compose(&self, sources: &[String], dest: &str) -> Result<()> {
        if sources.is_empty() {
            return Err(Error::InvalidInput(
                "compose requires at least one source object".to_string(),
            ));
        }
        debug!(dest, parts = sources.len(), "object_store: compose");

        // 1. Initiate the multipart upload.
        let response = self
            .send(
                reqwest::Method::POST,
                dest,
                &[("uploads".to_string(), String::new())],
                &[],
                Vec::new(),
            )
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::Storage(format!(
                "initiate multipart for {dest} failed with HTTP {status}: {body}"
            )));
        }
        let upload_id = extract_xml_value(&body, "UploadId")
            .ok_or_else(|| Error::Storage("multipart response missing UploadId".to_string()))?;

        // 2. Copy each source as one part, in order.
        let mut etags = Vec::with_capacity(sources.len());
        for (i, source) in sources.iter().enumerate() {
            let copy_source = format!("/{}/{}", self.config.bucket, uri_encode_path(source));
            let response = self
                .send(
                    reqwest::Method::PUT,
                    dest,
                    &[
                        ("partNumber".to_string(), (i + 1).to_string()),
                        ("uploadId".to_string(), upload_id.clone()),
                    ],
                    &[("x-amz-copy-source".to_string(), copy_source)],
                    Vec::new(),
                )
                .await?;
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(Error::Storage(format!(
                    "copy part {} from {source} failed with HTTP {status}: {body}",
                    i + 1
                )));
            }
            let etag = extract_xml_value(&body, "ETag").ok_or_else(|| {
                Error::Storage(format!("copy part {} response missing ETag", i + 1))
            })?;
            etags.push(etag);
        }

        // 3. Complete the upload.
        let mut complete = String::from("<CompleteMultipartUpload>");
        for (i, etag) in etags.iter().enumerate() {
            complete.push_str(&format!(
                "<Part><PartNumber>{}</PartNumber><ETag>{}</ETag></Part>",
                i + 1,
                etag
            ));
        }
        complete.push_str("</CompleteMultipartUpload>");

        let response = self
            .send(
                reqwest::Method::POST,
                dest,
                &[("uploadId".to_string(), upload_id)],
                &[],
                complete.into_bytes(),
            )
            .await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        // S3 can return 200 with an embedded error for complete-multipart.
        if !status.is_success() || body.contains("<Error>") {
            return Err(Error::Storage(format!(
                "complete multipart for {dest} failed with HTTP {status}: {body}"
            )));
        }

        Ok(())
    }

    async fn presign_get(&self, path: &str, expiry_secs: u64) -> Result<String> {
        let (scheme, host) = split_endpoint(&self.config.public_endpoint);
        let canonical_uri = self.canonical_uri(path);
        Ok(presign_url(
            &self.ctx,
            &scheme,
            &host,
            &canonical_uri,
            expiry_secs,
            Utc::now(),
        ))
    }
}

/// Best-effort deletion of several objects; failures are logged, not raised.
pub async fn delete_all_best_effort(store: &dyn ObjectStore, paths: &[String]) {
    for path in paths {
        if let Err(e) = store.delete(path).await {
            warn!(path = %path, error = %e, "Failed to delete source object after merge");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_splitting() {
        assert_eq!(
            split_endpoint("http://localhost:9000/"),
            ("http".to_string(), "localhost:9000".to_string())
        );
        assert_eq!(
            split_endpoint("https://minio.internal:9000"),
            ("https".to_string(), "minio.internal:9000".to_string())
        );
    }

    #[test]
    fn xml_value_extraction() {
        let xml = "<InitiateMultipartUploadResult><Bucket>uploads</Bucket>\
                   <UploadId>abc.123</UploadId></InitiateMultipartUploadResult>";
        assert_eq!(extract_xml_value(xml, "UploadId").as_deref(), Some("abc.123"));
        assert_eq!(extract_xml_value(xml, "Bucket").as_deref(), Some("uploads"));
        assert_eq!(extract_xml_value(xml, "Missing"), None);
    }

    #[test]
    fn canonical_uri_includes_bucket() {
        let store = S3Store::new(StoreConfig {
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            bucket: "uploads".into(),
            access_key: "minio".into(),
            secret_key: "minio123".into(),
            public_endpoint: "http://localhost:9000".into(),
        })
        .unwrap();
        assert_eq!(
            store.canonical_uri("chunks/abc/0"),
            "/uploads/chunks/abc/0"
        );
        assert_eq!(
            store.canonical_uri("merged/a b.pdf"),
            "/uploads/merged/a%20b.pdf"
        );
    }
}
