//! Amazon S3 object store.
//!
//! Talks to the S3 REST API directly with AWS Signature V4 authentication.
//! Uses only pure-Rust dependencies (`hmac`, `sha2`) for signing, so no C
//! library is needed at build time.
//!
//! # Operations
//!
//! | Trait method | S3 call |
//! |--------------|---------|
//! | `list_page` | `GET /?list-type=2&prefix=..&continuation-token=..` (ListObjectsV2, 1000 keys per page) |
//! | `get_object` | `GET /{key}`, body streamed chunk by chunk |
//! | `put_object` | `PUT /{key}` with `Content-Type` and `x-amz-meta-*` headers |
//!
//! # Addressing
//!
//! Without `endpoint_url` requests go to the virtual-hosted endpoint
//! `https://{bucket}.s3.{region}.amazonaws.com/{key}`. With a custom
//! endpoint (MinIO, LocalStack) path-style addressing is used:
//! `{endpoint_url}/{bucket}/{key}`, keeping the endpoint's scheme.
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID` (required)
//! - `AWS_SECRET_ACCESS_KEY` (required)
//! - `AWS_SESSION_TOKEN` (optional, for temporary credentials)

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use super::{ListPage, ObjectInfo, ObjectStore, PutObject};
use crate::config::StorageConfig;

type HmacSha256 = Hmac<Sha256>;

const MAX_KEYS: &str = "1000";

/// AWS credentials used to sign requests.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    /// Load credentials from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
    /// and optionally `AWS_SESSION_TOKEN`.
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

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

pub struct S3Store {
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
    creds: AwsCredentials,
    client: reqwest::Client,
}

/// A request ready to send: its full URL and the headers that were signed
/// (plus `Authorization`).
struct SignedRequest {
    url: String,
    headers: Vec<(String, String)>,
}

impl S3Store {
    /// Create a store for the configured bucket, reading credentials from
    /// the environment.
    pub fn from_config(storage: &StorageConfig) -> Result<Self> {
        Ok(Self::new(storage, AwsCredentials::from_env()?))
    }

    pub fn new(storage: &StorageConfig, creds: AwsCredentials) -> Self {
        Self {
            bucket: storage.bucket.clone(),
            region: storage.region.clone(),
            endpoint_url: storage.endpoint_url.clone(),
            creds,
            client: reqwest::Client::new(),
        }
    }

    /// Scheme, host, and canonical path prefix for requests.
    ///
    /// The path prefix is empty for virtual-hosted addressing and
    /// `/{bucket}` for path-style addressing.
    fn endpoint(&self) -> (String, String, String) {
        match self.endpoint_url {
            Some(ref endpoint) => {
                let scheme = if endpoint.starts_with("http://") {
                    "http"
                } else {
                    "https"
                };
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string();
                (
                    scheme.to_string(),
                    host,
                    format!("/{}", uri_encode(&self.bucket)),
                )
            }
            None => (
                "https".to_string(),
                format!("{}.s3.{}.amazonaws.com", self.bucket, self.region),
                String::new(),
            ),
        }
    }

    /// Build and sign a request.
    ///
    /// `key` of `None` addresses the bucket root (used for listing).
    /// `extra_headers` must use lowercase names; they are signed too.
    fn sign(
        &self,
        method: &str,
        key: Option<&str>,
        query: &[(String, String)],
        extra_headers: &[(String, String)],
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> SignedRequest {
        let (scheme, host, path_prefix) = self.endpoint();
        let encoded_key = key
            .map(|k| k.split('/').map(uri_encode).collect::<Vec<_>>().join("/"))
            .unwrap_or_default();
        let canonical_uri = format!("{}/{}", path_prefix, encoded_key);

        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let mut sorted_query = query.to_vec();
        sorted_query.sort();
        let canonical_querystring: String = sorted_query
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let mut headers = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.to_string()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.extend(extra_headers.iter().cloned());
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
            .collect();

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method,
            canonical_uri,
            canonical_querystring,
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

        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            &date_stamp,
            &self.region,
            "s3",
        );
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut url = format!("{}://{}{}", scheme, host, canonical_uri);
        if !canonical_querystring.is_empty() {
            url.push('?');
            url.push_str(&canonical_querystring);
        }

        // reqwest sets Host itself.
        headers.retain(|(k, _)| k != "host");
        headers.push(("authorization".to_string(), authorization));

        SignedRequest { url, headers }
    }

    fn request(&self, method: reqwest::Method, signed: SignedRequest) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(method, &signed.url);
        for (name, value) in signed.headers {
            builder = builder.header(name, value);
        }
        builder
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_page(&self, prefix: &str, token: Option<&str>) -> Result<ListPage> {
        let mut query = vec![
            ("list-type".to_string(), "2".to_string()),
            ("max-keys".to_string(), MAX_KEYS.to_string()),
        ];
        if !prefix.is_empty() {
            query.push(("prefix".to_string(), prefix.to_string()));
        }
        if let Some(token) = token {
            query.push(("continuation-token".to_string(), token.to_string()));
        }

        let payload_hash = hex_sha256(b"");
        let signed = self.sign("GET", None, &query, &[], &payload_hash, Utc::now());

        let resp = self
            .request(reqwest::Method::GET, signed)
            .send()
            .await
            .map_err(|e| {
                anyhow!(
                    "Failed to list S3 objects in s3://{}/{}: {}",
                    self.bucket,
                    prefix,
                    e
                )
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "S3 ListObjectsV2 failed (HTTP {}): {}",
                status,
                body.chars().take(500).collect::<String>()
            );
        }

        let xml_body = resp.text().await?;
        parse_list_objects_response(&xml_body)
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let payload_hash = hex_sha256(b"");
        let signed = self.sign("GET", Some(key), &[], &[], &payload_hash, Utc::now());

        let mut resp = self
            .request(reqwest::Method::GET, signed)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to get s3://{}/{}: {}", self.bucket, key, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            bail!("S3 GetObject failed (HTTP {}) for key '{}'", status, key);
        }

        let mut body = Vec::with_capacity(resp.content_length().unwrap_or(0) as usize);
        while let Some(chunk) = resp
            .chunk()
            .await
            .with_context(|| format!("Failed reading body of s3://{}/{}", self.bucket, key))?
        {
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    async fn put_object(&self, object: PutObject) -> Result<()> {
        let payload_hash = hex_sha256(&object.body);

        let mut extra = vec![("content-type".to_string(), object.content_type.clone())];
        for (name, value) in &object.metadata {
            extra.push((format!("x-amz-meta-{}", name.to_lowercase()), value.clone()));
        }

        let signed = self.sign(
            "PUT",
            Some(&object.key),
            &[],
            &extra,
            &payload_hash,
            Utc::now(),
        );

        let resp = self
            .request(reqwest::Method::PUT, signed)
            .body(object.body)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to put s3://{}/{}: {}", self.bucket, object.key, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            bail!(
                "S3 PutObject failed (HTTP {}) for key '{}': {}",
                status,
                object.key,
                body.chars().take(500).collect::<String>()
            );
        }
        Ok(())
    }
}

// ============ AWS SigV4 Helpers ============

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

/// URI-encode a string per RFC 3986, leaving only `A-Z a-z 0-9 - _ . ~`.
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

// ============ XML Parsing ============

/// Parse a `ListObjectsV2` XML response into one [`ListPage`].
///
/// Folder placeholder keys (ending in `/`) are skipped. A truncated
/// response without a continuation token is an error, since following it
/// would restart the listing.
fn parse_list_objects_response(xml: &str) -> Result<ListPage> {
    let mut objects = Vec::new();
    let is_truncated = extract_xml_value(xml, "IsTruncated")
        .map(|v| v == "true")
        .unwrap_or(false);
    let next_token = extract_xml_value(xml, "NextContinuationToken")
        .map(|t| xml_unescape(&t))
        .transpose()?;

    let mut remaining = xml;
    while let Some(start) = remaining.find("<Contents>") {
        let block_start = start + "<Contents>".len();
        let Some(end) = remaining[block_start..].find("</Contents>") else {
            break;
        };
        let block = &remaining[block_start..block_start + end];
        remaining = &remaining[block_start + end + "</Contents>".len()..];

        let key = match extract_xml_value(block, "Key") {
            Some(raw) => xml_unescape(&raw)?,
            None => continue,
        };
        if key.is_empty() || key.ends_with('/') {
            continue;
        }

        let size = extract_xml_value(block, "Size")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);

        objects.push(ObjectInfo { key, size });
    }

    match (is_truncated, next_token) {
        (true, None) => bail!("S3 listing is truncated but has no NextContinuationToken"),
        (true, Some(token)) => Ok(ListPage {
            objects,
            next_token: Some(token),
        }),
        (false, _) => Ok(ListPage {
            objects,
            next_token: None,
        }),
    }
}

/// Extract the text content of an XML tag (simple, non-nested).
fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)?;
    let value_start = start + open.len();
    let end = xml[value_start..].find(&close)?;
    Some(xml[value_start..value_start + end].to_string())
}

fn xml_unescape(raw: &str) -> Result<String> {
    quick_xml::escape::unescape(raw)
        .map(|s| s.into_owned())
        .map_err(|e| anyhow!("invalid XML escape in '{}': {}", raw, e))
}
