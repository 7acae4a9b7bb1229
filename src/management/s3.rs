//! S3 bucket used as DVC storage.
//!
//! Requests go through the blocking `reqwest` client with path-style
//! addressing and are signed with AWS Signature Version 4, so any
//! S3-compatible endpoint works as well as AWS itself.

use chrono::Utc;
use hmac::{Hmac, Mac};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use quick_xml::Reader;
use quick_xml::events::Event;
use reqwest::blocking::{Client, Response};
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, StatusCode};
use sha2::{Digest, Sha256};
use std::env;
use std::fmt;
use tracing::debug;
use url::Url;

use super::remotes::RemoteStorage;
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Region new buckets are created in unless another one is configured.
pub const DEFAULT_REGION: &str = "eu-central-1";

/// Characters left as-is by SigV4 URI encoding.
const UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Object keys keep their `/` separators.
const KEY: &AsciiSet = &UNRESERVED.remove(b'/');

/// Access key pair used to sign requests.
#[derive(Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl S3Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    /// `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` (+ `AWS_SESSION_TOKEN`).
    pub fn from_env() -> Option<Self> {
        Some(Self {
            access_key_id: env::var("AWS_ACCESS_KEY_ID").ok()?,
            secret_access_key: env::var("AWS_SECRET_ACCESS_KEY").ok()?,
            session_token: env::var("AWS_SESSION_TOKEN").ok(),
        })
    }
}

impl fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

/// An S3 bucket holding the DVC cache under `dvc/`.
///
/// [`RemoteStorage::init_storage`] creates the bucket when it does not
/// exist yet; [`RemoteStorage::remove`] deletes every object in it but
/// keeps the bucket.
#[derive(Debug)]
pub struct S3Remote {
    bucket: String,
    region: String,
    endpoint: Option<String>,
    create_bucket: bool,
    credentials: Option<S3Credentials>,
    http: Client,
}

impl S3Remote {
    /// Region, endpoint and credentials come from the usual `AWS_*`
    /// variables; the region falls back to [`DEFAULT_REGION`].
    pub fn new(bucket: impl Into<String>) -> Self {
        let region = env::var("AWS_REGION")
            .or_else(|_| env::var("AWS_DEFAULT_REGION"))
            .unwrap_or_else(|_| DEFAULT_REGION.to_string());
        let endpoint = env::var("AWS_ENDPOINT_URL_S3")
            .or_else(|_| env::var("AWS_ENDPOINT_URL"))
            .ok();
        Self {
            bucket: bucket.into(),
            region,
            endpoint,
            create_bucket: true,
            credentials: S3Credentials::from_env(),
            http: Client::new(),
        }
    }

    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// S3-compatible service to talk to instead of AWS.
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = Some(url.into());
        self
    }

    pub fn credentials(mut self, creds: S3Credentials) -> Self {
        self.credentials = Some(creds);
        self
    }

    /// Leave bucket creation to someone else.
    pub fn create_bucket(mut self, create: bool) -> Self {
        self.create_bucket = create;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn base(&self) -> String {
        match &self.endpoint {
            Some(e) => e.trim_end_matches('/').to_string(),
            None => format!("https://s3.{}.amazonaws.com", self.region),
        }
    }

    fn error(&self, status: Option<u16>, message: impl Into<String>) -> Error {
        Error::Storage {
            bucket: self.bucket.clone(),
            status,
            message: message.into(),
        }
    }

    /// Send one signed request for `key` in the bucket (`""` is the bucket
    /// itself).
    fn send(&self, method: Method, key: &str, query: &[(&str, &str)], body: Vec<u8>) -> Result<Response> {
        let base = Url::parse(&self.base())
            .map_err(|e| self.error(None, format!("invalid endpoint {}: {}", self.base(), e)))?;
        let host = match (base.host_str(), base.port()) {
            (Some(h), Some(p)) => format!("{h}:{p}"),
            (Some(h), None) => h.to_string(),
            (None, _) => return Err(self.error(None, format!("endpoint {} has no host", base))),
        };

        let mut path = format!("{}/{}", base.path().trim_end_matches('/'), self.bucket);
        if !key.is_empty() {
            path.push('/');
            path.push_str(&utf8_percent_encode(key, KEY).to_string());
        }
        let query = canonical_query(query);
        let payload_hash = hex::encode(Sha256::digest(&body));
        let amz_date = Utc::now().format("%Y%m%dT%H%M%SZ").to_string();

        let mut url = format!("{}://{}{}", base.scheme(), host, path);
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query);
        }

        let mut req = self
            .http
            .request(method.clone(), url)
            .header("x-amz-date", &amz_date)
            .header("x-amz-content-sha256", &payload_hash);
        if let Some(creds) = &self.credentials {
            if let Some(token) = &creds.session_token {
                req = req.header("x-amz-security-token", token);
            }
            let signed = SignInput {
                method: method.as_str(),
                host: &host,
                path: &path,
                query: &query,
                payload_hash: &payload_hash,
                amz_date: &amz_date,
            };
            req = req.header(AUTHORIZATION, authorization(creds, &self.region, &signed));
        }
        if !body.is_empty() {
            req = req.body(body);
        }

        debug!(%method, bucket = %self.bucket, key, "S3 request");
        req.send()
            .map_err(|e| self.error(e.status().map(|s| s.as_u16()), e.to_string()))
    }

    fn check(&self, resp: Response, what: &str) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().unwrap_or_default();
        let code = xml_field(&body, "Code").unwrap_or_else(|| status.to_string());
        Err(self.error(Some(status.as_u16()), format!("{what} failed: {code}")))
    }

    fn create(&self) -> Result<()> {
        debug!(bucket = %self.bucket, region = %self.region, "Create DVC S3 bucket for storage");
        // us-east-1 is the one region that rejects an explicit constraint.
        let body = if self.region == "us-east-1" {
            Vec::new()
        } else {
            format!(
                "<CreateBucketConfiguration xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
                 <LocationConstraint>{}</LocationConstraint>\
                 </CreateBucketConfiguration>",
                self.region
            )
            .into_bytes()
        };
        let resp = self.send(Method::PUT, "", &[], body)?;
        self.check(resp, "create bucket")?;
        Ok(())
    }
}

impl RemoteStorage for S3Remote {
    fn init_storage(&self) -> Result<()> {
        if !self.create_bucket {
            return Ok(());
        }
        let head = self.send(Method::HEAD, "", &[], Vec::new())?;
        match head.status() {
            s if s.is_success() => {
                debug!(bucket = %self.bucket, "S3 bucket exists");
                Ok(())
            }
            StatusCode::NOT_FOUND => self.create(),
            _ => self.check(head, "head bucket").map(|_| ()),
        }
    }

    fn remove(&self) -> Result<()> {
        let mut token: Option<String> = None;
        let mut removed = 0usize;
        loop {
            let mut query = vec![("list-type", "2")];
            if let Some(t) = &token {
                query.push(("continuation-token", t.as_str()));
            }
            let resp = self.send(Method::GET, "", &query, Vec::new())?;
            if resp.status() == StatusCode::NOT_FOUND {
                break;
            }
            let xml = self
                .check(resp, "list objects")?
                .text()
                .map_err(|e| self.error(None, e.to_string()))?;
            let page = parse_listing(&xml)
                .map_err(|e| self.error(None, format!("malformed object listing: {e}")))?;

            for key in &page.keys {
                let resp = self.send(Method::DELETE, key, &[], Vec::new())?;
                self.check(resp, "delete object")?;
                removed += 1;
            }
            match page.next {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        debug!(bucket = %self.bucket, removed, "emptied S3 storage");
        Ok(())
    }

    fn url(&self) -> String {
        format!("s3://{}/dvc", self.bucket)
    }
}

fn canonical_query(params: &[(&str, &str)]) -> String {
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| {
            (
                utf8_percent_encode(k, UNRESERVED).to_string(),
                utf8_percent_encode(v, UNRESERVED).to_string(),
            )
        })
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

struct SignInput<'a> {
    method: &'a str,
    host: &'a str,
    /// Already URI-encoded.
    path: &'a str,
    /// Already canonical.
    query: &'a str,
    payload_hash: &'a str,
    amz_date: &'a str,
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// `Authorization` header value for a SigV4-signed S3 request.
fn authorization(creds: &S3Credentials, region: &str, req: &SignInput<'_>) -> String {
    let mut headers = vec![
        ("host", req.host),
        ("x-amz-content-sha256", req.payload_hash),
        ("x-amz-date", req.amz_date),
    ];
    if let Some(token) = &creds.session_token {
        headers.push(("x-amz-security-token", token.as_str()));
    }
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
        .collect();
    let signed_headers = headers
        .iter()
        .map(|(k, _)| *k)
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        req.method, req.path, req.query, canonical_headers, signed_headers, req.payload_hash
    );
    let date = &req.amz_date[..8];
    let scope = format!("{date}/{region}/s3/aws4_request");
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        req.amz_date,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let k_date = hmac(format!("AWS4{}", creds.secret_access_key).as_bytes(), date.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, b"s3");
    let k_signing = hmac(&k_service, b"aws4_request");
    let signature = hex::encode(hmac(&k_signing, string_to_sign.as_bytes()));

    format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        creds.access_key_id, scope, signed_headers, signature
    )
}

#[derive(Debug, Default)]
struct Listing {
    keys: Vec<String>,
    next: Option<String>,
}

/// Keys and continuation token of a `ListObjectsV2` response.
fn parse_listing(xml: &str) -> std::result::Result<Listing, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut listing = Listing::default();
    let mut truncated = false;
    let mut current: Vec<u8> = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => current = e.local_name().as_ref().to_vec(),
            Event::End(_) => current.clear(),
            Event::Text(t) => {
                let text = t.unescape()?.into_owned();
                match current.as_slice() {
                    b"Key" => listing.keys.push(text),
                    b"NextContinuationToken" => listing.next = Some(text),
                    b"IsTruncated" => truncated = text == "true",
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    if !truncated {
        listing.next = None;
    }
    Ok(listing)
}

/// Text of the first `<name>` element, for error bodies.
fn xml_field(xml: &str, name: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    let mut inside = false;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).ok()? {
            Event::Start(e) => inside = e.local_name().as_ref() == name.as_bytes(),
            Event::Text(t) if inside => return t.unescape().ok().map(|s| s.into_owned()),
            Event::Eof => return None,
            _ => {}
        }
        buf.clear();
    }
}
