//! S3-compatible object storage.
//!
//! Uploads and removes objects with the S3 REST API and AWS Signature V4.
//! Works against AWS itself and S3-compatible services (MinIO, R2, the
//! Supabase storage S3 endpoint) through `endpoint_url`.
//!
//! # Configuration
//!
//! ```toml
//! [storage]
//! backend = "s3"
//! bucket = "listing-images"
//! region = "eu-central-1"
//! # endpoint_url = "http://localhost:9000"   # MinIO, path-style addressing
//! # public_base_url = "https://cdn.example.com"
//! ```
//!
//! Credentials come from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and
//! optionally `AWS_SESSION_TOKEN`.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::storage::ObjectStore;

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials loaded from environment variables.
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self, StorageError> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .map_err(|_| StorageError::Credentials("AWS_ACCESS_KEY_ID not set".into()))?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .map_err(|_| StorageError::Credentials("AWS_SECRET_ACCESS_KEY not set".into()))?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

pub struct S3ObjectStore {
    bucket: String,
    region: String,
    /// `(scheme, host)` of a custom endpoint; path-style addressing when set.
    endpoint: Option<(String, String)>,
    public_base_url: Option<String>,
    creds: AwsCredentials,
    http: reqwest::Client,
}

impl S3ObjectStore {
    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        let region = config
            .region
            .clone()
            .ok_or_else(|| StorageError::Credentials("storage.region not set".into()))?;
        Ok(Self {
            bucket: config.bucket.clone(),
            region,
            endpoint: config.endpoint_url.as_deref().map(split_endpoint),
            public_base_url: config
                .public_base_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
            creds: AwsCredentials::from_env()?,
            http: reqwest::Client::new(),
        })
    }

    /// Host, URL and canonical URI for an object key.
    fn locate(&self, bucket: &str, key: &str) -> (String, String, String) {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        match &self.endpoint {
            Some((scheme, host)) => {
                let canonical_uri = format!("/{}/{}", bucket, encoded_key);
                let url = format!("{}://{}{}", scheme, host, canonical_uri);
                (host.clone(), url, canonical_uri)
            }
            None => {
                let host = format!("{}.s3.{}.amazonaws.com", bucket, self.region);
                let canonical_uri = format!("/{}", encoded_key);
                let url = format!("https://{}{}", host, canonical_uri);
                (host, url, canonical_uri)
            }
        }
    }

    /// Build a SigV4-signed request for a single object.
    fn signed_request(
        &self,
        method: reqwest::Method,
        bucket: &str,
        key: &str,
        payload: &[u8],
        content_type: Option<&str>,
    ) -> reqwest::RequestBuilder {
        let (host, url, canonical_uri) = self.locate(bucket, key);

        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(payload);

        let mut headers = vec![
            ("host".to_string(), host),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ct) = content_type {
            headers.push(("content-type".to_string(), ct.to_string()));
        }
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n\n{}\n{}\n{}",
            method.as_str(),
            canonical_uri,
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );
        let signing_key =
            derive_signing_key(&self.creds.secret_access_key, &date_stamp, &self.region, "s3");
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut req = self
            .http
            .request(method, &url)
            .header("Authorization", authorization)
            .header("x-amz-content-sha256", payload_hash)
            .header("x-amz-date", amz_date);
        if let Some(ct) = content_type {
            req = req.header("Content-Type", ct);
        }
        if let Some(ref token) = self.creds.session_token {
            req = req.header("x-amz-security-token", token);
        }
        req
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn default_bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(
        &self,
        bucket: &str,
        path: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<(), StorageError> {
        let resp = self
            .signed_request(reqwest::Method::PUT, bucket, path, bytes, Some(content_type))
            .body(bytes.to_vec())
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(StorageError::Status {
                status: resp.status().as_u16(),
                path: format!("{}/{}", bucket, path),
            });
        }
        debug!(bucket, path, size = bytes.len(), "uploaded object");
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        if let Some(ref base) = self.public_base_url {
            return format!("{}/{}/{}", base, bucket, path);
        }
        self.locate(bucket, path).1
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), StorageError> {
        for path in paths {
            let resp = self
                .signed_request(reqwest::Method::DELETE, bucket, path, b"", None)
                .send()
                .await?;
            // S3 answers 204 for deletes, including of missing keys
            if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
                return Err(StorageError::Status {
                    status: resp.status().as_u16(),
                    path: format!("{}/{}", bucket, path),
                });
            }
        }
        Ok(())
    }
}

// ============ AWS SigV4 Helpers ============

fn split_endpoint(endpoint: &str) -> (String, String) {
    let (scheme, rest) = match endpoint.split_once("://") {
        Some((scheme, rest)) => (scheme.to_string(), rest),
        None => ("https".to_string(), endpoint),
    };
    (scheme, rest.trim_end_matches('/').to_string())
}

/// Compute the hex-encoded SHA-256 hash of data.
fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode a path segment per RFC 3986.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
