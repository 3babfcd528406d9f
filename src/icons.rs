//! Favicon prefetch for links
//!
//! After the link dataset is refreshed the worker tries to download an icon for
//! every link that does not have one yet. A failed attempt leaves a marker in
//! the cache store that suppresses further attempts for that link until the
//! cooldown has passed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use regex::Regex;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::{CacheError, CacheManager};
use crate::data::LinkRecord;

/// Directory below the cache dir holding icon files
pub const ICON_DIR: &str = "icons";

/// Prefix of the per-link failure marker keys
const MARKER_PREFIX: &str = "icon-download-";

/// Do not retry a failed icon download for this many hours
pub const DEFAULT_RETRY_COOLDOWN_HOURS: i64 = 24;

/// Icon downloads running at once
const PREFETCH_CONCURRENCY: usize = 4;

/// Errors that can occur while downloading an icon
#[derive(Debug, Error)]
pub enum IconError {
    /// The link target has no usable icon
    #[error("no icon found")]
    NotFound,

    #[error("invalid link URL '{0}'")]
    InvalidUrl(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("error writing icon file: {0}")]
    Io(#[from] io::Error),
}

/// Content of a failure marker
#[derive(Debug, Serialize, Deserialize)]
struct FailureMarker {
    reason: String,
}

/// Decides whether an icon download should be attempted for a link
#[derive(Debug, Clone)]
pub struct IconGuard {
    icon_dir: PathBuf,
    markers: CacheManager,
    cooldown: Duration,
}

impl IconGuard {
    pub fn new(icon_dir: PathBuf, markers: CacheManager, cooldown: Duration) -> Self {
        Self {
            icon_dir,
            markers,
            cooldown,
        }
    }

    /// Path of the icon file for a short name
    pub fn icon_path(&self, short: &str) -> PathBuf {
        self.icon_dir.join(format!("{}.png", file_stem(short)))
    }

    fn marker_key(short: &str) -> String {
        format!("{MARKER_PREFIX}{}", file_stem(short))
    }

    /// Whether the icon is already on disk
    pub fn has_icon(&self, short: &str) -> bool {
        self.icon_path(short).is_file()
    }

    /// Whether an attempt is allowed now
    pub fn should_attempt(&self, short: &str) -> bool {
        self.should_attempt_at(short, Utc::now())
    }

    /// Whether an attempt is allowed at `now`
    ///
    /// Never when the icon exists. Otherwise only when no failure was recorded
    /// within the cooldown window.
    pub fn should_attempt_at(&self, short: &str, now: DateTime<Utc>) -> bool {
        if self.has_icon(short) {
            return false;
        }
        self.markers
            .expired_at(&Self::marker_key(short), self.cooldown, now)
    }

    /// Records a failed attempt at the current time
    pub fn record_failure(&self, short: &str, reason: &str) -> Result<(), CacheError> {
        self.record_failure_at(short, reason, Utc::now())
    }

    /// Records a failed attempt at `at`
    pub fn record_failure_at(
        &self,
        short: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<(), CacheError> {
        let marker = FailureMarker {
            reason: reason.to_string(),
        };
        self.markers.write_at(&Self::marker_key(short), &marker, at)
    }

    /// Whether any link is eligible for an icon download
    pub fn needs_icon_download(&self, links: &[LinkRecord]) -> bool {
        links.iter().any(|link| self.should_attempt(&link.short))
    }
}

/// Maps a short name to a safe file stem
fn file_stem(short: &str) -> String {
    short
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn link_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<link\b[^>]*>").expect("valid link tag regex"))
}

fn attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?is)\b(rel|href)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#)
            .expect("valid attribute regex")
    })
}

/// Icon URLs declared by `<link rel="...icon...">` tags, resolved against `base`
pub fn find_icon_links(html: &str, base: &Url) -> Vec<Url> {
    let mut icons = Vec::new();

    for tag in link_tag_regex().find_iter(html) {
        let mut rel = None;
        let mut href = None;
        for caps in attr_regex().captures_iter(tag.as_str()) {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .or_else(|| caps.get(4))
                .map(|m| m.as_str());
            match caps[1].to_ascii_lowercase().as_str() {
                "rel" => rel = value,
                _ => href = value,
            }
        }

        let is_icon = rel.is_some_and(|rel| {
            rel.split_whitespace()
                .any(|token| token.to_ascii_lowercase().contains("icon"))
        });
        if let (true, Some(href)) = (is_icon, href) {
            if let Ok(url) = base.join(href.trim()) {
                icons.push(url);
            }
        }
    }

    icons
}

/// Finds and downloads favicons
#[derive(Debug, Clone, Default)]
pub struct FaviconClient {
    client: Client,
}

impl FaviconClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Candidate icon URLs for a page, best first
    pub async fn find(&self, page: &str) -> Result<Vec<Url>, IconError> {
        let page_url = Url::parse(page).map_err(|_| IconError::InvalidUrl(page.to_string()))?;

        let response = self.client.get(page_url).send().await?;
        let final_url = response.url().clone();
        let mut icons = if response.status().is_success() {
            find_icon_links(&response.text().await?, &final_url)
        } else {
            Vec::new()
        };

        if let Ok(fallback) = final_url.join("/favicon.ico") {
            if !icons.contains(&fallback) {
                icons.push(fallback);
            }
        }

        Ok(icons)
    }

    /// Downloads the first available icon for `page` to `dest`
    pub async fn download(&self, page: &str, dest: &Path) -> Result<(), IconError> {
        let icons = self.find(page).await?;
        debug!(count = icons.len(), page, "Found icon candidates");

        for url in icons {
            let response = self.client.get(url.clone()).send().await?;
            if !response.status().is_success() {
                debug!(%url, status = %response.status(), "Icon candidate unavailable");
                continue;
            }

            let bytes = response.bytes().await?;
            if bytes.is_empty() {
                continue;
            }

            write_atomically(dest, &bytes)?;
            debug!(%url, dest = %dest.display(), "Stored icon");
            return Ok(());
        }

        Err(IconError::NotFound)
    }
}

fn write_atomically(dest: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = dest.with_extension(format!("png.tmp-{}", std::process::id()));
    let result = fs::write(&tmp, bytes).and_then(|_| fs::rename(&tmp, dest));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Summary of one prefetch batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IconReport {
    pub downloaded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Downloads missing icons for `links`. Individual failures never abort the batch.
pub async fn prefetch_icons(
    links: &[LinkRecord],
    guard: &IconGuard,
    favicons: &FaviconClient,
) -> IconReport {
    info!(count = links.len(), "Download icons");

    let (eligible, skipped): (Vec<&LinkRecord>, Vec<&LinkRecord>) = links
        .iter()
        .partition(|link| guard.should_attempt(&link.short));

    let outcomes: Vec<bool> = stream::iter(eligible)
        .map(|link| async move {
            let dest = guard.icon_path(&link.short);
            match favicons.download(&link.long, &dest).await {
                Ok(()) => {
                    info!(short = %link.short, "Downloaded icon");
                    true
                }
                Err(e) => {
                    warn!(short = %link.short, error = %e, "Error downloading icon");
                    if let Err(e) = guard.record_failure(&link.short, &e.to_string()) {
                        warn!(short = %link.short, error = %e, "Failed to record icon failure");
                    }
                    false
                }
            }
        })
        .buffer_unordered(PREFETCH_CONCURRENCY)
        .collect()
        .await;

    let downloaded = outcomes.iter().filter(|ok| **ok).count();
    IconReport {
        downloaded,
        failed: outcomes.len() - downloaded,
        skipped: skipped.len(),
    }
}
