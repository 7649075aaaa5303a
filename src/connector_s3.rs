//! Object enumeration and transfer for S3-compatible stores.
//!
//! [`ObjectStore`] is the seam the pipeline uses: list one page of keys,
//! read object metadata, and stream an object body to a local file.
//! [`S3Client`] implements it over the S3 REST API with AWS Signature V4,
//! and [`ObjectLister`] turns the paged listing into a lazy sequence of
//! [`SourceObject`]s, one page in memory at a time.
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID` (required)
//! - `AWS_SECRET_ACCESS_KEY` (required)
//! - `AWS_SESSION_TOKEN` (optional, for temporary credentials)
//!
//! # Addressing
//!
//! Without `endpoint_url` requests go to
//! `https://<bucket>.s3.<region>.amazonaws.com/<key>`. With a custom
//! endpoint (MinIO, LocalStack) they use path-style URLs:
//! `<endpoint>/<bucket>/<key>`.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use reqwest::Method;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::config::S3Config;
use crate::error::HttpStatusError;
use crate::models::{ObjectMetadata, SourceObject};

/// One page of a bucket listing.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<SourceObject>,
    /// Token for the next page; `None` on the last page.
    pub next_token: Option<String>,
}

/// Remote object store operations used by the pipeline.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket this store reads from.
    fn bucket(&self) -> &str;

    /// List one page of objects whose keys start with `prefix`.
    async fn list_page(&self, prefix: &str, continuation: Option<&str>) -> Result<ListPage>;

    /// Fetch size, last-modified and entity tag for `key`.
    async fn head_object(&self, key: &str) -> Result<ObjectMetadata>;

    /// Write the body of `key` to `dest`, returning the number of bytes written.
    async fn download_to(&self, key: &str, dest: &Path) -> Result<u64>;
}

// ============ Enumeration ============

/// Decides which listed keys are ingested.
///
/// Directory placeholders (keys ending in `/`) are always skipped. Globs
/// are matched against the key with the listing prefix stripped.
#[derive(Debug, Clone)]
pub struct KeyFilter {
    prefix: String,
    include: Option<GlobSet>,
    exclude: GlobSet,
}

impl KeyFilter {
    pub fn new(prefix: &str, include_globs: &[String], exclude_globs: &[String]) -> Result<Self> {
        let include = if include_globs.is_empty() {
            None
        } else {
            Some(build_globset(include_globs)?)
        };
        Ok(Self {
            prefix: prefix.to_string(),
            include,
            exclude: build_globset(exclude_globs)?,
        })
    }

    /// Accept every non-directory key.
    pub fn all(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            include: None,
            exclude: GlobSet::empty(),
        }
    }

    pub fn accepts(&self, key: &str) -> bool {
        if key.is_empty() || key.ends_with('/') {
            return false;
        }
        let rel_key = relative_key(&self.prefix, key);
        if self.exclude.is_match(rel_key) {
            return false;
        }
        self.include
            .as_ref()
            .map(|set| set.is_match(rel_key))
            .unwrap_or(true)
    }
}

/// Key with the listing prefix (and any leading `/`) removed.
fn relative_key<'a>(prefix: &str, key: &'a str) -> &'a str {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return key;
    }
    key.strip_prefix(prefix)
        .map(|s| s.trim_start_matches('/'))
        .unwrap_or(key)
}

/// Lazy, page-at-a-time sequence of objects under a prefix.
///
/// Listing errors are returned from [`next`](ObjectLister::next) and are
/// fatal to the run. The sequence can only be restarted from scratch by
/// building a new lister.
pub struct ObjectLister {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    filter: KeyFilter,
    buffer: VecDeque<SourceObject>,
    next_token: Option<String>,
    exhausted: bool,
    pages: usize,
}

impl ObjectLister {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: &str, filter: KeyFilter) -> Self {
        Self {
            store,
            prefix: prefix.to_string(),
            filter,
            buffer: VecDeque::new(),
            next_token: None,
            exhausted: false,
            pages: 0,
        }
    }

    /// Next accepted object, fetching another page when the buffer runs dry.
    pub async fn next(&mut self) -> Result<Option<SourceObject>> {
        loop {
            if let Some(object) = self.buffer.pop_front() {
                if self.filter.accepts(&object.key) {
                    return Ok(Some(object));
                }
                tracing::debug!(key = %object.key, "skipping filtered key");
                continue;
            }
            if self.exhausted {
                return Ok(None);
            }

            let page = self
                .store
                .list_page(&self.prefix, self.next_token.as_deref())
                .await
                .with_context(|| {
                    format!(
                        "Failed to list s3://{}/{}",
                        self.store.bucket(),
                        self.prefix
                    )
                })?;
            self.pages += 1;
            tracing::debug!(page = self.pages, objects = page.objects.len(), "listed page");

            if page.next_token.is_some() && page.next_token == self.next_token {
                bail!("S3 listing returned the same continuation token twice");
            }
            self.exhausted = page.next_token.is_none();
            self.next_token = page.next_token;
            self.buffer.extend(page.objects);
        }
    }

    /// Pages fetched so far.
    pub fn pages(&self) -> usize {
        self.pages
    }
}

// ============ S3 REST client ============

/// AWS credentials loaded from environment variables.
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    fn from_env() -> Result<Self> {
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

/// S3 REST client for a single bucket.
pub struct S3Client {
    bucket: String,
    region: String,
    /// Custom endpoint (scheme + authority), path-style addressing.
    endpoint: Option<String>,
    max_keys: u32,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl S3Client {
    /// Build a client for `bucket`, reading credentials from the environment.
    pub fn new(bucket: &str, config: &S3Config) -> Result<Self> {
        if bucket.trim().is_empty() {
            bail!("bucket name must not be empty");
        }
        let creds = AwsCredentials::from_env()?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build S3 HTTP client")?;

        Ok(Self {
            bucket: bucket.to_string(),
            region: config.region.clone(),
            endpoint: config
                .endpoint_url
                .as_ref()
                .map(|e| e.trim_end_matches('/').to_string()),
            max_keys: config.max_keys,
            creds,
            client,
        })
    }

    /// Host header value the request is signed for.
    fn host(&self) -> String {
        match self.endpoint {
            Some(ref endpoint) => endpoint
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .to_string(),
            None => format!("{}.s3.{}.amazonaws.com", self.bucket, self.region),
        }
    }

    /// `(url_without_query, canonical_uri)` for a bucket-level or object request.
    fn location(&self, key: Option<&str>) -> (String, String) {
        let encoded_key = key
            .map(|k| k.split('/').map(uri_encode).collect::<Vec<_>>().join("/"))
            .unwrap_or_default();
        match self.endpoint {
            Some(ref endpoint) => {
                let path = format!("/{}/{}", uri_encode(&self.bucket), encoded_key);
                (format!("{}{}", endpoint, path), path)
            }
            None => {
                let path = format!("/{}", encoded_key);
                (format!("https://{}{}", self.host(), path), path)
            }
        }
    }

    /// Build a SigV4-signed request.
    fn signed(&self, method: Method, key: Option<&str>, query: &[(String, String)]) -> reqwest::RequestBuilder {
        let (url, canonical_uri) = self.location(key);
        let canonical_querystring = canonical_query(query);
        let signature = sign_request(
            &self.creds,
            &self.region,
            method.as_str(),
            &self.host(),
            &canonical_uri,
            &canonical_querystring,
            Utc::now(),
        );

        let full_url = if canonical_querystring.is_empty() {
            url
        } else {
            format!("{}?{}", url, canonical_querystring)
        };

        let mut builder = self.client.request(method, full_url);
        for (name, value) in signature {
            builder = builder.header(name, value);
        }
        builder
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list_page(&self, prefix: &str, continuation: Option<&str>) -> Result<ListPage> {
        let mut query = vec![
            ("list-type".to_string(), "2".to_string()),
            ("max-keys".to_string(), self.max_keys.to_string()),
        ];
        if !prefix.is_empty() {
            query.push(("prefix".to_string(), prefix.to_string()));
        }
        if let Some(token) = continuation {
            query.push(("continuation-token".to_string(), token.to_string()));
        }

        let resp = self
            .signed(Method::GET, None, &query)
            .send()
            .await
            .with_context(|| format!("Failed to list S3 objects in s3://{}/{}", self.bucket, prefix))?;

        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(HttpStatusError::new("S3 ListObjectsV2", status.as_u16(), &body).into());
        }
        parse_list_objects_response(&body)
    }

    async fn head_object(&self, key: &str) -> Result<ObjectMetadata> {
        let resp = self
            .signed(Method::HEAD, Some(key), &[])
            .send()
            .await
            .with_context(|| format!("Failed to head s3://{}/{}", self.bucket, key))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(HttpStatusError::new("S3 HeadObject", status.as_u16(), "").into());
        }

        let headers = resp.headers();
        let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

        Ok(ObjectMetadata {
            key: key.to_string(),
            size: header_str("content-length").and_then(|v| v.parse().ok()),
            last_modified: header_str("last-modified")
                .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            etag: header_str("etag").map(|v| v.trim_matches('"').to_string()),
        })
    }

    async fn download_to(&self, key: &str, dest: &Path) -> Result<u64> {
        let mut resp = self
            .signed(Method::GET, Some(key), &[])
            .send()
            .await
            .with_context(|| format!("Failed to get s3://{}/{}", self.bucket, key))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(HttpStatusError::new("S3 GetObject", status.as_u16(), &body).into());
        }

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("Failed to create {}", dest.display()))?;
        let mut written = 0u64;
        while let Some(bytes) = resp.chunk().await? {
            file.write_all(&bytes).await?;
            written += bytes.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

// ============ AWS SigV4 ============

type HmacSha256 = Hmac<Sha256>;

/// SHA-256 of an empty body, used for every request this client sends.
const EMPTY_PAYLOAD_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Compute SigV4 headers (`authorization`, `x-amz-*`) for a bodiless request.
fn sign_request(
    creds: &AwsCredentials,
    region: &str,
    method: &str,
    host: &str,
    canonical_uri: &str,
    canonical_querystring: &str,
    now: DateTime<Utc>,
) -> Vec<(&'static str, String)> {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

    let mut headers = vec![
        ("host", host.to_string()),
        ("x-amz-content-sha256", EMPTY_PAYLOAD_SHA256.to_string()),
        ("x-amz-date", amz_date.clone()),
    ];
    if let Some(ref token) = creds.session_token {
        headers.push(("x-amz-security-token", token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(b.0));

    let signed_headers = headers
        .iter()
        .map(|(k, _)| *k)
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
        EMPTY_PAYLOAD_SHA256
    );

    let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, &date_stamp, region, "s3");
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        creds.access_key_id, credential_scope, signed_headers, signature
    );

    // `host` is set by reqwest from the URL.
    let mut out: Vec<(&'static str, String)> = headers
        .into_iter()
        .filter(|(k, _)| *k != "host")
        .collect();
    out.push(("authorization", authorization));
    out
}

/// Sorted, URI-encoded `k=v&...` query string.
fn canonical_query(params: &[(String, String)]) -> String {
    let mut sorted = params.to_vec();
    sorted.sort();
    sorted
        .iter()
        .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

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

/// RFC 3986 encoding; only `A-Z a-z 0-9 - _ . ~` pass through.
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

// ============ ListObjectsV2 XML ============

#[derive(Default)]
struct ContentsFields {
    key: String,
    size: u64,
    last_modified: Option<DateTime<Utc>>,
    etag: String,
}

/// Parse a `ListObjectsV2` response body into a [`ListPage`].
///
/// Directory placeholders are kept here; [`KeyFilter`] drops them. Text is
/// not trimmed by the reader: leading and trailing spaces are part of a key.
fn parse_list_objects_response(xml: &str) -> Result<ListPage> {
    let mut reader = quick_xml::Reader::from_str(xml);

    let mut objects = Vec::new();
    let mut current: Option<ContentsFields> = None;
    let mut field: Option<Vec<u8>> = None;
    let mut is_truncated = false;
    let mut next_token = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.local_name().as_ref().to_vec();
                if name == b"Contents" {
                    current = Some(ContentsFields::default());
                }
                field = Some(name);
            }
            Ok(Event::Text(t)) => {
                let Some(ref name) = field else { continue };
                let raw = t
                    .unescape()
                    .context("Invalid ListObjectsV2 response")?
                    .into_owned();
                let text = raw.trim();
                match (name.as_slice(), current.as_mut()) {
                    (b"Key", Some(c)) => c.key = raw.clone(),
                    (b"Size", Some(c)) => c.size = text.parse().unwrap_or(0),
                    (b"LastModified", Some(c)) => {
                        c.last_modified = DateTime::parse_from_rfc3339(text)
                            .ok()
                            .map(|dt| dt.with_timezone(&Utc));
                    }
                    (b"ETag", Some(c)) => c.etag = text.trim_matches('"').to_string(),
                    (b"IsTruncated", None) => is_truncated = text == "true",
                    (b"NextContinuationToken", None) => next_token = Some(text.to_string()),
                    _ => {}
                }
            }
            Ok(Event::End(e)) => {
                if e.local_name().as_ref() == b"Contents" {
                    if let Some(c) = current.take() {
                        objects.push(SourceObject {
                            key: c.key,
                            size: c.size,
                            last_modified: c.last_modified,
                            etag: c.etag,
                        });
                    }
                }
                field = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => bail!("Invalid ListObjectsV2 response: {}", e),
            _ => {}
        }
    }

    if is_truncated && next_token.is_none() {
        tracing::warn!("listing is truncated but has no continuation token; stopping");
    }

    Ok(ListPage {
        objects,
        next_token: if is_truncated { next_token } else { None },
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob '{}'", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>ops-docs</Name>
  <Prefix>rcas/</Prefix>
  <KeyCount>3</KeyCount>
  <MaxKeys>1000</MaxKeys>
  <IsTruncated>true</IsTruncated>
  <Contents>
    <Key>rcas/</Key>
    <LastModified>2024-01-01T00:00:00.000Z</LastModified>
    <ETag>&quot;d41d8cd98f00b204e9800998ecf8427e&quot;</ETag>
    <Size>0</Size>
    <StorageClass>STANDARD</StorageClass>
  </Contents>
  <Contents>
    <Key>rcas/incident-42.log</Key>
    <LastModified>2024-03-05T10:15:00.000Z</LastModified>
    <ETag>&quot;0123abcd&quot;</ETag>
    <Size>1000</Size>
    <Owner><ID>owner</ID></Owner>
    <StorageClass>STANDARD</StorageClass>
  </Contents>
  <Contents>
    <Key>rcas/R&amp;D notes.md</Key>
    <LastModified>2024-03-06T11:00:00.000Z</LastModified>
    <ETag>&quot;ffff&quot;</ETag>
    <Size>12</Size>
  </Contents>
  <NextContinuationToken>token-2</NextContinuationToken>
</ListBucketResult>"#;

    #[test]
    fn parses_list_page() {
        let page = parse_list_objects_response(PAGE).unwrap();
        assert_eq!(page.objects.len(), 3);
        assert_eq!(page.next_token.as_deref(), Some("token-2"));

        let log = &page.objects[1];
        assert_eq!(log.key, "rcas/incident-42.log");
        assert_eq!(log.size, 1000);
        assert_eq!(log.etag, "0123abcd");
        assert_eq!(
            log.last_modified.unwrap().to_rfc3339(),
            "2024-03-05T10:15:00+00:00"
        );
        assert_eq!(page.objects[2].key, "rcas/R&D notes.md");
    }

    #[test]
    fn keys_keep_surrounding_spaces() {
        let xml = r#"<ListBucketResult>
  <IsTruncated>false</IsTruncated>
  <Contents>
    <Key>rcas/notes.md </Key>
    <Size> 7 </Size>
  </Contents>
  <Contents>
    <Key> rcas/lead.md</Key>
    <Size>3</Size>
  </Contents>
  <Contents>
    <Key>rcas/notes.md</Key>
    <Size>5</Size>
  </Contents>
</ListBucketResult>"#;
        let page = parse_list_objects_response(xml).unwrap();
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["rcas/notes.md ", " rcas/lead.md", "rcas/notes.md"]);
        assert_eq!(page.objects[0].size, 7);
        assert!(page.next_token.is_none());
    }

    #[test]
    fn last_page_has_no_token() {
        let xml = "<ListBucketResult><IsTruncated>false</IsTruncated></ListBucketResult>";
        let page = parse_list_objects_response(xml).unwrap();
        assert!(page.objects.is_empty());
        assert!(page.next_token.is_none());
    }

    #[test]
    fn filter_skips_directory_markers() {
        let filter = KeyFilter::all("rcas/");
        assert!(!filter.accepts("rcas/"));
        assert!(!filter.accepts("rcas/2024/"));
        assert!(filter.accepts("rcas/incident-42.log"));
    }

    #[test]
    fn filter_applies_globs_relative_to_prefix() {
        let filter = KeyFilter::new(
            "rcas/",
            &["**/*.md".to_string(), "*.log".to_string()],
            &["drafts/**".to_string()],
        )
        .unwrap();
        assert!(filter.accepts("rcas/incident-42.log"));
        assert!(filter.accepts("rcas/2024/q1/summary.md"));
        assert!(!filter.accepts("rcas/drafts/wip.md"));
        assert!(!filter.accepts("rcas/image.png"));
    }

    #[test]
    fn invalid_glob_is_error() {
        assert!(KeyFilter::new("", &["[".to_string()], &[]).is_err());
    }

    #[test]
    fn signing_key_matches_aws_example() {
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn empty_payload_constant() {
        assert_eq!(hex_sha256(b""), EMPTY_PAYLOAD_SHA256);
    }

    #[test]
    fn canonical_query_sorted_and_encoded() {
        let q = canonical_query(&[
            ("prefix".to_string(), "rcas/2024 q1".to_string()),
            ("list-type".to_string(), "2".to_string()),
        ]);
        assert_eq!(q, "list-type=2&prefix=rcas%2F2024%20q1");
    }

    #[test]
    fn signature_headers_are_deterministic() {
        let creds = AwsCredentials {
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: Some("session".to_string()),
        };
        let now = DateTime::parse_from_rfc3339("2024-03-05T10:15:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let a = sign_request(&creds, "eu-west-1", "GET", "ops.s3.eu-west-1.amazonaws.com", "/k", "", now);
        let b = sign_request(&creds, "eu-west-1", "GET", "ops.s3.eu-west-1.amazonaws.com", "/k", "", now);
        assert_eq!(a, b);

        let auth = &a.iter().find(|(k, _)| *k == "authorization").unwrap().1;
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240305/eu-west-1/s3/aws4_request, \
             SignedHeaders=host;x-amz-content-sha256;x-amz-date;x-amz-security-token, Signature="
        ));
        assert!(a.iter().any(|(k, v)| *k == "x-amz-date" && v == "20240305T101500Z"));
        assert!(!a.iter().any(|(k, _)| *k == "host"));
    }

    #[test]
    fn uri_encode_reserved() {
        assert_eq!(uri_encode("a b/c~d"), "a%20b%2Fc~d");
    }
}
