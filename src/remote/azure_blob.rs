//! Azure Blob Storage over the Blob service REST API.
//!
//! Files up to the single-put limit go up in one Put Blob call. Larger files
//! are staged as fixed-size blocks (Put Block) and committed with Put Block
//! List, so the client timeout bounds one block rather than a whole file.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use log::debug;
use reqwest::blocking::{Body, Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, IF_NONE_MATCH};
use reqwest::StatusCode;
use sha2::Sha256;
use time::macros::format_description;
use time::OffsetDateTime;
use url::Url;

use crate::config::ExistingObjectPolicy;
use crate::error::{ArchiveError, UploadError};
use crate::remote::{key_segments, ObjectStore, PutOutcome};

const API_VERSION: &str = "2021-08-06";
const MAX_ERROR_BODY: usize = 512;

/// Files above this size are uploaded block by block.
pub const SINGLE_PUT_LIMIT: u64 = 64 * 1024 * 1024;
pub const BLOCK_SIZE: u64 = 8 * 1024 * 1024;
/// Committed blocks per blob allowed by the service.
const MAX_BLOCKS: u64 = 50_000;

/// Headers covered by a Shared Key signature, in signing order. Content-Length
/// is handled separately.
const SIGNED_HEADERS: [&str; 10] = [
    "content-encoding",
    "content-language",
    "content-md5",
    "content-type",
    "date",
    "if-modified-since",
    "if-match",
    "if-none-match",
    "if-unmodified-since",
    "range",
];

/// How requests against the container are authorized.
#[derive(Clone)]
pub enum Credential {
    /// Shared access signature appended to every request URL.
    Sas(String),
    /// Storage account key; every request carries a Shared Key signature.
    AccessKey { account: String, key: Vec<u8> },
}

impl Credential {
    pub fn sas(token: &str) -> Self {
        Credential::Sas(token.trim_start_matches('?').to_string())
    }

    /// `key` is the base64 account key as shown by the portal.
    pub fn access_key(account: &str, key: &str) -> Result<Self, ArchiveError> {
        let key = general_purpose::STANDARD
            .decode(key.trim())
            .map_err(|e| ArchiveError::Configuration(format!("access_key is not base64: {e}")))?;
        Ok(Credential::AccessKey {
            account: account.to_string(),
            key,
        })
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Sas(_) => f.write_str("Sas(<redacted>)"),
            Credential::AccessKey { account, .. } => f
                .debug_struct("AccessKey")
                .field("account", account)
                .field("key", &"<redacted>")
                .finish(),
        }
    }
}

pub struct AzureBlobStore {
    client: Client,
    endpoint: Url,
    container: String,
    credential: Credential,
    single_put_limit: u64,
    block_size: u64,
}

impl AzureBlobStore {
    pub fn new(
        account: &str,
        container: &str,
        endpoint: Option<&str>,
        credential: Credential,
        timeout: Duration,
    ) -> Result<Self, ArchiveError> {
        debug!("Creating azure remote storage for container {container}");

        let endpoint = match endpoint {
            Some(endpoint) => endpoint.to_string(),
            None => format!("https://{account}.blob.core.windows.net"),
        };
        let endpoint = Url::parse(&endpoint).map_err(|e| {
            ArchiveError::Configuration(format!("invalid blob endpoint {endpoint}: {e}"))
        })?;
        if endpoint.cannot_be_a_base() {
            return Err(ArchiveError::Configuration(format!(
                "blob endpoint {endpoint} cannot carry a path"
            )));
        }

        // applies per request, so per block for staged uploads
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ArchiveError::Configuration(format!("http client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            container: container.to_string(),
            credential,
            single_put_limit: SINGLE_PUT_LIMIT,
            block_size: BLOCK_SIZE,
        })
    }

    /// Overrides the single-put threshold and the staged block size.
    pub fn with_block_sizes(mut self, single_put_limit: u64, block_size: u64) -> Self {
        self.single_put_limit = single_put_limit;
        self.block_size = block_size.max(1);
        self
    }

    /// Blob URL for `key`, including the SAS query string when one is used.
    pub fn blob_url(&self, key: &str) -> Result<Url, UploadError> {
        let segments = key_segments(key)?;
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| UploadError::InvalidKey {
                key: key.to_string(),
                reason: "endpoint cannot be a base".to_string(),
            })?
            .pop_if_empty()
            .push(&self.container)
            .extend(segments);
        if let Credential::Sas(token) = &self.credential {
            if !token.is_empty() {
                url.set_query(Some(token));
            }
        }
        Ok(url)
    }

    fn put_blob(
        &self,
        file: File,
        len: u64,
        key: &str,
        policy: ExistingObjectPolicy,
    ) -> Result<PutOutcome, UploadError> {
        let mut request = self
            .client
            .put(self.blob_url(key)?)
            .header("x-ms-blob-type", "BlockBlob")
            .body(Body::sized(file, len));
        if policy == ExistingObjectPolicy::SkipWithWarning {
            request = request.header(IF_NONE_MATCH, "*");
        }
        let response = self.send(request, len)?;
        put_outcome(response, policy, len)
    }

    fn put_blocks(
        &self,
        local_path: &Path,
        mut file: File,
        len: u64,
        key: &str,
        policy: ExistingObjectPolicy,
    ) -> Result<PutOutcome, UploadError> {
        let block_count = len.div_ceil(self.block_size);
        if block_count > MAX_BLOCKS {
            return Err(UploadError::TooLarge {
                path: local_path.to_path_buf(),
                len,
                limit: self.block_size * MAX_BLOCKS,
            });
        }
        // a conditional commit alone would still stage every block first
        if policy == ExistingObjectPolicy::SkipWithWarning && self.blob_exists(key)? {
            return Ok(PutOutcome::SkippedExisting);
        }

        let mut block_ids = Vec::with_capacity(block_count as usize);
        let mut remaining = len;
        for index in 0..block_count {
            let chunk = remaining.min(self.block_size);
            let mut buf = vec![0u8; chunk as usize];
            file.read_exact(&mut buf)
                .map_err(|e| UploadError::io(local_path, e))?;
            remaining -= chunk;

            let id = block_id(index);
            let mut url = self.blob_url(key)?;
            url.query_pairs_mut()
                .append_pair("comp", "block")
                .append_pair("blockid", &id);
            let response = self.send(self.client.put(url).body(buf), chunk)?;
            if !response.status().is_success() {
                return Err(status_error(response));
            }
            debug!("Staged block {}/{block_count} of {key}", index + 1);
            block_ids.push(id);
        }

        let body = block_list_xml(&block_ids);
        let body_len = body.len() as u64;
        let mut url = self.blob_url(key)?;
        url.query_pairs_mut().append_pair("comp", "blocklist");
        let mut request = self
            .client
            .put(url)
            .header(CONTENT_TYPE, "application/xml")
            .body(body);
        if policy == ExistingObjectPolicy::SkipWithWarning {
            request = request.header(IF_NONE_MATCH, "*");
        }
        let response = self.send(request, body_len)?;
        put_outcome(response, policy, len)
    }

    fn blob_exists(&self, key: &str) -> Result<bool, UploadError> {
        let response = self.send(self.client.head(self.blob_url(key)?), 0)?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(status_error(response)),
        }
    }

    fn send(&self, request: RequestBuilder, content_length: u64) -> Result<Response, UploadError> {
        let mut request = request.header("x-ms-version", API_VERSION).build()?;
        if let Credential::AccessKey { account, key } = &self.credential {
            let date = http_date(OffsetDateTime::now_utc())?;
            request
                .headers_mut()
                .insert("x-ms-date", header_value(&date)?);
            let to_sign = string_to_sign(
                request.method().as_str(),
                request.url(),
                request.headers(),
                content_length,
                account,
            );
            let authorization = format!("SharedKey {account}:{}", sign(key, &to_sign));
            request
                .headers_mut()
                .insert(AUTHORIZATION, header_value(&authorization)?);
        }
        Ok(self.client.execute(request)?)
    }
}

impl ObjectStore for AzureBlobStore {
    fn describe(&self) -> String {
        format!(
            "azure container '{}' at {}",
            self.container,
            self.endpoint.as_str().trim_end_matches('/')
        )
    }

    fn put_file(
        &self,
        local_path: &Path,
        key: &str,
        policy: ExistingObjectPolicy,
    ) -> Result<PutOutcome, UploadError> {
        let file = File::open(local_path).map_err(|e| UploadError::io(local_path, e))?;
        let len = file
            .metadata()
            .map_err(|e| UploadError::io(local_path, e))?
            .len();

        if len > self.single_put_limit {
            self.put_blocks(local_path, file, len, key, policy)
        } else {
            self.put_blob(file, len, key, policy)
        }
    }
}

fn put_outcome(
    response: Response,
    policy: ExistingObjectPolicy,
    bytes: u64,
) -> Result<PutOutcome, UploadError> {
    let status = response.status();
    if status.is_success() {
        return Ok(PutOutcome::Uploaded { bytes });
    }
    if policy == ExistingObjectPolicy::SkipWithWarning && is_existing_blob(status) {
        return Ok(PutOutcome::SkippedExisting);
    }
    Err(status_error(response))
}

fn status_error(response: Response) -> UploadError {
    let status = response.status().as_u16();
    let mut body = response.text().unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    UploadError::Status { status, body }
}

/// Conditional put rejected because the blob is already there.
fn is_existing_blob(status: StatusCode) -> bool {
    status == StatusCode::CONFLICT || status == StatusCode::PRECONDITION_FAILED
}

/// Fixed-width ids; every block of a blob must use the same id length.
fn block_id(index: u64) -> String {
    general_purpose::STANDARD.encode(format!("block-{index:06}"))
}

fn block_list_xml(block_ids: &[String]) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="utf-8"?><BlockList>"#);
    for id in block_ids {
        xml.push_str("<Latest>");
        xml.push_str(id);
        xml.push_str("</Latest>");
    }
    xml.push_str("</BlockList>");
    xml
}

/// RFC 1123 date as the service expects in `x-ms-date`.
fn http_date(now: OffsetDateTime) -> Result<String, UploadError> {
    now.format(format_description!(
        "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
    ))
    .map_err(|e| UploadError::Signing(e.to_string()))
}

fn header_value(value: &str) -> Result<HeaderValue, UploadError> {
    HeaderValue::from_str(value).map_err(|e| UploadError::Signing(e.to_string()))
}

/// Shared Key string-to-sign for the Blob service.
fn string_to_sign(
    method: &str,
    url: &Url,
    headers: &HeaderMap,
    content_length: u64,
    account: &str,
) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    };

    let mut out = String::new();
    out.push_str(method);
    out.push('\n');
    for (i, name) in SIGNED_HEADERS.into_iter().enumerate() {
        // content-length sits between content-language and content-md5
        if i == 2 {
            if content_length > 0 {
                out.push_str(&content_length.to_string());
            }
            out.push('\n');
        }
        out.push_str(header(name));
        out.push('\n');
    }

    let mut ms_headers: Vec<(&str, &str)> = headers
        .iter()
        .filter(|(name, _)| name.as_str().starts_with("x-ms-"))
        .map(|(name, value)| (name.as_str(), value.to_str().unwrap_or("").trim()))
        .collect();
    ms_headers.sort();
    for (name, value) in ms_headers {
        out.push_str(name);
        out.push(':');
        out.push_str(value);
        out.push('\n');
    }

    out.push('/');
    out.push_str(account);
    out.push_str(url.path());
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in url.query_pairs() {
        params
            .entry(name.to_lowercase())
            .or_default()
            .push(value.into_owned());
    }
    for (name, mut values) in params {
        values.sort();
        out.push('\n');
        out.push_str(&name);
        out.push(':');
        out.push_str(&values.join(","));
    }
    out
}

fn sign(key: &[u8], string_to_sign: &str) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).expect("HMAC is able to accept all key sizes");
    mac.update(string_to_sign.as_bytes());
    general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}
