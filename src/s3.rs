//! Minimal S3 object client for snapshot storage.
//!
//! Reads and replaces a single object with `GetObject` / `PutObject`,
//! signed with [AWS Signature Version 4](https://docs.aws.amazon.com/AmazonS3/latest/API/sigv4-auth-using-authorization-header.html)
//! using `hmac` + `sha2`. A `PutObject` replaces the object atomically for
//! readers, which is what snapshot publishing relies on.
//!
//! `GetObject` goes through [`retry::read`]; `PutObject` through
//! [`retry::write`], once under the deadline.
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID`: required
//! - `AWS_SECRET_ACCESS_KEY`: required
//! - `AWS_SESSION_TOKEN`: optional (temporary credentials / IAM roles)
//!
//! With a custom `endpoint_url` (MinIO, LocalStack) requests are path-style
//! (`{endpoint}/{bucket}/{key}`); otherwise virtual-hosted
//! (`https://{bucket}.s3.{region}.amazonaws.com/{key}`).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::error::ExternalApiError;
use crate::retry::{self, RetryPolicy};

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "s3";

// ============ AWS Credentials ============

#[derive(Clone)]
pub struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
        }
    }

    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

// ============ Object Client ============

pub struct S3Client {
    http: reqwest::Client,
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
    creds: AwsCredentials,
    policy: RetryPolicy,
}

impl S3Client {
    pub fn new(
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
        creds: AwsCredentials,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(policy.timeout.saturating_mul(2).max(Duration::from_secs(1)))
            .build()?;

        Ok(Self {
            http,
            bucket,
            region,
            endpoint_url,
            creds,
            policy,
        })
    }

    /// Fetch an object. Returns `None` when the key does not exist.
    pub async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>, ExternalApiError> {
        retry::read(&self.policy, SERVICE, || async move {
            let resp = self
                .signed(reqwest::Method::GET, key, &[], Utc::now())?
                .send()
                .await
                .map_err(transport_error)?;
            if resp.status().as_u16() == 404 {
                return Ok(None);
            }
            let resp = check_status(resp).await?;
            let bytes = resp.bytes().await.map_err(transport_error)?;
            Ok(Some(bytes.to_vec()))
        })
        .await
    }

    /// Replace an object with `body`.
    pub async fn put_object(&self, key: &str, body: Vec<u8>) -> Result<(), ExternalApiError> {
        retry::write(&self.policy, SERVICE, async move {
            let resp = self
                .signed(reqwest::Method::PUT, key, &body, Utc::now())?
                .header("Content-Type", "application/json")
                .body(body)
                .send()
                .await
                .map_err(transport_error)?;
            check_status(resp).await?;
            Ok(())
        })
        .await
    }

    fn signed(
        &self,
        method: reqwest::Method,
        key: &str,
        payload: &[u8],
        now: DateTime<Utc>,
    ) -> Result<reqwest::RequestBuilder, ExternalApiError> {
        let target = self.target(key);
        let payload_hash = hex_sha256(payload);
        let signature = sign(
            &SigningInput {
                method: method.as_str(),
                host: &target.host,
                canonical_uri: &target.canonical_uri,
                payload_hash: &payload_hash,
                region: &self.region,
                now,
            },
            &self.creds,
        )
        .map_err(|e| ExternalApiError::Transport {
            service: SERVICE,
            message: format!("request signing failed: {:#}", e),
        })?;

        let mut builder = self
            .http
            .request(method, &target.url)
            .header("Authorization", &signature.authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &signature.amz_date);
        if let Some(ref token) = self.creds.session_token {
            builder = builder.header("x-amz-security-token", token);
        }
        Ok(builder)
    }

    fn target(&self, key: &str) -> Target {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        match &self.endpoint_url {
            Some(endpoint) => {
                let endpoint = endpoint.trim_end_matches('/');
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .to_string();
                let canonical_uri = format!("/{}/{}", uri_encode(&self.bucket), encoded_key);
                Target {
                    url: format!("{}{}", endpoint, canonical_uri),
                    host,
                    canonical_uri,
                }
            }
            None => {
                let host = format!("{}.s3.{}.amazonaws.com", self.bucket, self.region);
                let canonical_uri = format!("/{}", encoded_key);
                Target {
                    url: format!("https://{}{}", host, canonical_uri),
                    host,
                    canonical_uri,
                }
            }
        }
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ExternalApiError> {
    let status = resp.status();
    if status.as_u16() == 429 {
        return Err(ExternalApiError::RateLimited { service: SERVICE });
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ExternalApiError::Status {
            service: SERVICE,
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp)
}

fn transport_error(e: reqwest::Error) -> ExternalApiError {
    if e.is_timeout() {
        ExternalApiError::Timeout { service: SERVICE }
    } else {
        ExternalApiError::Transport {
            service: SERVICE,
            message: e.to_string(),
        }
    }
}

struct Target {
    url: String,
    host: String,
    canonical_uri: String,
}

// ============ AWS SigV4 Helpers ============

struct SigningInput<'a> {
    method: &'a str,
    host: &'a str,
    canonical_uri: &'a str,
    payload_hash: &'a str,
    region: &'a str,
    now: DateTime<Utc>,
}

struct Signature {
    authorization: String,
    amz_date: String,
}

fn sign(input: &SigningInput<'_>, creds: &AwsCredentials) -> Result<Signature> {
    let date_stamp = input.now.format("%Y%m%d").to_string();
    let amz_date = input.now.format("%Y%m%dT%H%M%SZ").to_string();

    let mut headers = vec![
        ("host", input.host.to_string()),
        ("x-amz-content-sha256", input.payload_hash.to_string()),
        ("x-amz-date", amz_date.clone()),
    ];
    if let Some(ref token) = creds.session_token {
        headers.push(("x-amz-security-token", token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(b.0));

    let signed_headers = headers.iter().map(|(k, _)| *k).collect::<Vec<_>>().join(";");
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n\n{}\n{}\n{}",
        input.method, input.canonical_uri, canonical_headers, signed_headers, input.payload_hash
    );

    let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, input.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key =
        derive_signing_key(&creds.secret_access_key, &date_stamp, input.region, "s3")?;
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

    Ok(Signature {
        authorization: format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            creds.access_key_id, credential_scope, signed_headers, signature
        ),
        amz_date,
    })
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| anyhow::anyhow!("invalid HMAC key: {}", e))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}

/// URI-encode a path segment per RFC 3986 (unreserved: `A-Z a-z 0-9 - _ . ~`).
fn uri_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => result.push_str(&format!("%{:02X}", byte)),
        }
    }
    result
}
