//! AWS Signature Version 4 signing.
//!
//! Pure-Rust signing (`hmac` + `sha2`) for S3-compatible endpoints,
//! including MinIO. Supports header signing for API calls and query
//! signing for pre-signed URLs.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Payload hash marker for pre-signed URLs.
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Credentials and scope for signing.
#[derive(Debug, Clone)]
pub struct SigningContext {
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

/// Compute the hex-encoded SHA-256 hash of data.
pub fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Derive the SigV4 signing key:
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{secret_key}").as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode per RFC 3986: everything except `A-Z a-z 0-9 - _ . ~`.
pub fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => result.push_str(&format!("%{byte:02X}")),
        }
    }
    result
}

/// Encode an object key, preserving `/` separators.
pub fn uri_encode_path(path: &str) -> String {
    path.split('/').map(uri_encode).collect::<Vec<_>>().join("/")
}

/// Sorted, RFC 3986-encoded query string; also the form sent on the wire so
/// the signature always matches the request.
pub fn canonical_query(params: &[(String, String)]) -> String {
    let mut sorted: Vec<_> = params.to_vec();
    sorted.sort();
    sorted
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Sign a request with headers; returns the header list to attach
/// (including `Authorization`, `x-amz-date`, `x-amz-content-sha256`, and
/// any extra signed headers supplied).
#[allow(clippy::too_many_arguments)]
pub fn sign_headers(
    ctx: &SigningContext,
    method: &str,
    host: &str,
    canonical_uri: &str,
    query: &[(String, String)],
    extra_headers: &[(String, String)],
    payload_hash: &str,
    now: DateTime<Utc>,
) -> Vec<(String, String)> {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

    let mut headers: Vec<(String, String)> = vec![
        ("host".to_string(), host.to_string()),
        ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    for (k, v) in extra_headers {
        headers.push((k.to_ascii_lowercase(), v.clone()));
    }
    headers.sort();

    let signed_headers: String = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");
    let canonical_headers: String = headers.iter().map(|(k, v)| format!("{k}:{v}\n")).collect();

    let canonical_request = format!(
        "{method}\n{canonical_uri}\n{}\n{canonical_headers}\n{signed_headers}\n{payload_hash}",
        canonical_query(query)
    );

    let credential_scope = format!("{date_stamp}/{}/s3/aws4_request", ctx.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&ctx.secret_key, &date_stamp, &ctx.region, "s3");
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
        ctx.access_key
    );

    let mut out = vec![
        ("Authorization".to_string(), authorization),
        ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
        ("x-amz-date".to_string(), amz_date),
    ];
    for (k, v) in extra_headers {
        out.push((k.clone(), v.clone()));
    }
    out
}

/// Produce a pre-signed GET URL valid for `expiry_secs`.
///
/// Query-string signing with `UNSIGNED-PAYLOAD`; only the `host` header is
/// signed, so any HTTP client can use the URL directly.
pub fn presign_url(
    ctx: &SigningContext,
    scheme: &str,
    host: &str,
    canonical_uri: &str,
    expiry_secs: u64,
    now: DateTime<Utc>,
) -> String {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let credential_scope = format!("{date_stamp}/{}/s3/aws4_request", ctx.region);

    let query: Vec<(String, String)> = vec![
        (
            "X-Amz-Algorithm".to_string(),
            "AWS4-HMAC-SHA256".to_string(),
        ),
        (
            "X-Amz-Credential".to_string(),
            format!("{}/{credential_scope}", ctx.access_key),
        ),
        ("X-Amz-Date".to_string(), amz_date.clone()),
        ("X-Amz-Expires".to_string(), expiry_secs.to_string()),
        ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
    ];

    let canonical_querystring = canonical_query(&query);
    let canonical_request = format!(
        "GET\n{canonical_uri}\n{canonical_querystring}\nhost:{host}\n\nhost\n{UNSIGNED_PAYLOAD}"
    );

    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
        hex_sha256(canonical_request.as_bytes())
    );
    let signing_key = derive_signing_key(&ctx.secret_key, &date_stamp, &ctx.region, "s3");
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    format!("{scheme}://{host}{canonical_uri}?{canonical_querystring}&X-Amz-Signature={signature}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn signing_key_matches_aws_reference_vector() {
        // Published AWS SigV4 example: secret/date/region/service below
        // derive this exact signing key.
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20150830",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "c4afb1cc5771d871763a393e44b703571b55cc28424d1a5e86da6ed3c154a4b9"
        );
    }

    #[test]
    fn uri_encode_preserves_unreserved() {
        assert_eq!(uri_encode("AZaz09-_.~"), "AZaz09-_.~");
        assert_eq!(uri_encode("a b/c"), "a%20b%2Fc");
        assert_eq!(uri_encode_path("chunks/abc/0"), "chunks/abc/0");
        assert_eq!(uri_encode_path("merged/a b.pdf"), "merged/a%20b.pdf");
    }

    #[test]
    fn empty_payload_hash_is_well_known() {
        assert_eq!(
            hex_sha256(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn canonical_query_is_sorted() {
        let q = vec![
            ("uploadId".to_string(), "xyz".to_string()),
            ("partNumber".to_string(), "2".to_string()),
        ];
        assert_eq!(canonical_query(&q), "partNumber=2&uploadId=xyz");
    }

    #[test]
    fn presigned_url_carries_signature_params() {
        let ctx = SigningContext {
            access_key: "AKIDEXAMPLE".into(),
            secret_key: "secret".into(),
            region: "us-east-1".into(),
        };
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let url = presign_url(&ctx, "http", "localhost:9000", "/uploads/merged/a.pdf", 3600, now);

        assert!(url.starts_with("http://localhost:9000/uploads/merged/a.pdf?"));
        assert!(url.contains("X-Amz-Algorithm=AWS4-HMAC-SHA256"));
        assert!(url.contains("X-Amz-Expires=3600"));
        assert!(url.contains("X-Amz-Date=20260102T030405Z"));
        assert!(url.contains("X-Amz-Signature="));
    }

    #[test]
    fn sign_headers_includes_authorization() {
        let ctx = SigningContext {
            access_key: "AKIDEXAMPLE".into(),
            secret_key: "secret".into(),
            region: "us-east-1".into(),
        };
        let now = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let headers = sign_headers(
            &ctx,
            "PUT",
            "localhost:9000",
            "/uploads/chunks/abc/0",
            &[],
            &[],
            &hex_sha256(b"data"),
            now,
        );

        let auth = headers
            .iter()
            .find(|(k, _)| k == "Authorization")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20260102/us-east-1/s3/aws4_request"));
        assert!(auth.contains("SignedHeaders=host;x-amz-content-sha256;x-amz-date"));
    }
}
