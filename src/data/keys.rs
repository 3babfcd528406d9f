//! Authorized SSH key dataset client
//!
//! Fetches an `authorized_keys` style document and turns every key line into a
//! `KeyRecord`. A line that is not a well-formed public key fails the whole
//! download.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Duration;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{numbered_lines, FetchError};
use crate::refresh::Dataset;

/// Keys rarely change; refresh once a day
pub const DEFAULT_KEYS_FRESHNESS_SECS: i64 = 24 * 60 * 60;

/// Cache key for the key dataset
pub const KEYS_CACHE_KEY: &str = "pubkey-cache";

/// Comment of the aggregate record holding every key
pub const ALL_KEYS_COMMENT: &str = "All keys";

/// Public key algorithms accepted in a key line
const KEY_TYPES: &[&str] = &[
    "ssh-ed25519",
    "ssh-rsa",
    "ssh-dss",
    "ecdsa-sha2-nistp256",
    "ecdsa-sha2-nistp384",
    "ecdsa-sha2-nistp521",
    "sk-ssh-ed25519@openssh.com",
    "sk-ecdsa-sha2-nistp256@openssh.com",
    "ssh-ed25519-cert-v01@openssh.com",
    "ssh-rsa-cert-v01@openssh.com",
    "ecdsa-sha2-nistp256-cert-v01@openssh.com",
    "ecdsa-sha2-nistp384-cert-v01@openssh.com",
    "ecdsa-sha2-nistp521-cert-v01@openssh.com",
];

/// A single public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Canonical `<type> <base64> [comment]` line
    pub key_line: String,
    /// Human label, may be empty
    #[serde(default)]
    pub comment: String,
}

/// Parses one key line, skipping any leading authorized_keys options
fn parse_key_line(line_no: usize, line: &str) -> Result<KeyRecord, FetchError> {
    let mut tokens = line.split_whitespace();

    let key_type = tokens
        .by_ref()
        .find(|token| KEY_TYPES.iter().any(|kind| kind == token))
        .ok_or_else(|| FetchError::invalid(line_no, "no recognised key type"))?;

    let blob = tokens
        .next()
        .ok_or_else(|| FetchError::invalid(line_no, "missing key data"))?;

    let decoded = STANDARD
        .decode(blob)
        .map_err(|e| FetchError::invalid(line_no, format!("invalid base64 key data: {e}")))?;

    if embedded_key_type(&decoded) != Some(key_type.as_bytes()) {
        return Err(FetchError::invalid(
            line_no,
            format!("key data does not encode a {key_type} key"),
        ));
    }

    let comment = tokens.collect::<Vec<_>>().join(" ");
    let key_line = if comment.is_empty() {
        format!("{key_type} {blob}")
    } else {
        format!("{key_type} {blob} {comment}")
    };

    Ok(KeyRecord { key_line, comment })
}

/// The algorithm name at the start of an SSH wire-format key blob
fn embedded_key_type(blob: &[u8]) -> Option<&[u8]> {
    let len_bytes: [u8; 4] = blob.get(..4)?.try_into().ok()?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    blob.get(4..4usize.checked_add(len)?)
}

/// Parses an authorized_keys document
///
/// Blank lines and `#` comments are ignored. When at least one key is present
/// an aggregate record with every key line is placed first. The aggregate is
/// built from the canonical `<type> <blob> [comment]` lines, not the raw
/// document, so option prefixes and `#` lines are not part of it.
pub fn parse_keys(body: &str) -> Result<Vec<KeyRecord>, FetchError> {
    let mut keys = Vec::new();

    for (line_no, line) in numbered_lines(body) {
        if line.starts_with('#') {
            continue;
        }
        keys.push(parse_key_line(line_no, line)?);
    }

    if !keys.is_empty() {
        let all = keys
            .iter()
            .map(|key| key.key_line.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        keys.insert(
            0,
            KeyRecord {
                key_line: all,
                comment: ALL_KEYS_COMMENT.to_string(),
            },
        );
    }

    Ok(keys)
}

/// Client for the published key list
#[derive(Debug, Clone)]
pub struct KeysClient {
    client: Client,
    url: String,
    freshness: Duration,
}

impl KeysClient {
    /// Create a new KeysClient for the given source URL
    pub fn new(url: impl Into<String>, freshness: Duration) -> Self {
        Self::with_client(Client::new(), url, freshness)
    }

    /// Create a new KeysClient with a custom HTTP client
    pub fn with_client(client: Client, url: impl Into<String>, freshness: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            freshness,
        }
    }
}

#[async_trait]
impl Dataset for KeysClient {
    type Record = KeyRecord;

    fn name(&self) -> &'static str {
        "keys"
    }

    fn cache_key(&self) -> &'static str {
        KEYS_CACHE_KEY
    }

    fn freshness(&self) -> Duration {
        self.freshness
    }

    async fn fetch(&self) -> Result<Vec<KeyRecord>, FetchError> {
        info!(url = %self.url, "Downloading keys");

        let response = self.client.get(&self.url).send().await?.error_for_status()?;
        let body = response.text().await?;
        debug!(bytes = body.len(), "Received key list");

        let keys = parse_keys(&body)?;
        info!(count = keys.len(), "Downloaded pubkeys");
        Ok(keys)
    }
}
