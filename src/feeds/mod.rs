//! The feeds module contains what's needed to describe the remote feeds.
//!
//! The NVD partitions its CVE 1.1 data into one feed per year plus the
//! `modified` and `recent` delta feeds. Each feed is published as a pair of
//! artifacts: a small `.meta` descriptor (size, checksum, last-modified)
//! and a gzipped JSON body. Parsing the descriptor is enough to decide
//! whether the body must be downloaded at all.

pub mod decoder;

use chrono::{DateTime, Datelike, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::models::FeedMarker;

/// The base URL of the NVD CVE 1.1 feeds.
pub const BASE_FEED_URL: &str = "https://nvd.nist.gov/feeds/json/cve/1.1/nvdcve-1.1-";

/// The first year the NVD publishes a feed for.
const FIRST_FEED_YEAR: i32 = 2002;

/// Checks whether a feed key names a feed the NVD publishes: a four digit
/// year, or one of the delta feeds.
pub fn is_valid_key(key: &str) -> bool {
    let key_regex = Regex::new(r"^(\d{4}|modified|recent)$").unwrap();
    key_regex.is_match(key)
}

/// The list of all feeds published upstream: one per year from 2002 to the
/// current year, plus the delta feeds.
pub fn default_feeds() -> Vec<String> {
    let mut feeds: Vec<String> = (FIRST_FEED_YEAR..=Utc::now().year())
        .map(|year| year.to_string())
        .collect();
    feeds.push("modified".to_string());
    feeds.push("recent".to_string());
    feeds
}

/// The URL of a feed's `.meta` descriptor.
pub fn meta_url(base_url: &str, feed: &str) -> String {
    format!("{}{}.meta", base_url, feed)
}

/// The URL of a feed's gzipped JSON body.
pub fn body_url(base_url: &str, feed: &str) -> String {
    format!("{}{}.json.gz", base_url, feed)
}

/// Computes the SHA-256 of a byte buffer as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Parses a timestamp as found in the feeds.
///
/// The `.meta` descriptors carry full RFC 3339 timestamps with an offset,
/// while the feed bodies use minute-precision forms like
/// `2021-12-10T10:15Z`. Both are accepted.
pub fn parse_feed_date(text: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(date) = DateTime::parse_from_rfc3339(text) {
        return Ok(date.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%MZ", "%Y-%m-%dT%H:%M:%SZ", "%Y-%m-%dT%H:%M:%S%.fZ"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDateTime::parse_from_str(&format!("{}T00:00:00", text), "%Y-%m-%dT%H:%M:%S")
    {
        return Ok(Utc.from_utc_datetime(&date));
    }
    Err(format!("Unparseable date: {}", text))
}

/// The content of a feed's `.meta` descriptor.
///
/// Example:
/// ```text
/// lastModifiedDate:2023-04-28T03:00:01-04:00
/// size:16384
/// zipSize:2048
/// gzSize:2048
/// sha256:0F06BF[...]
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct FeedMeta {
    /// When the remote feed was last modified.
    pub last_modified_date: DateTime<Utc>,
    /// The size of the uncompressed feed, in bytes.
    pub size: u64,
    /// The size of the zip artifact, in bytes.
    pub zip_size: u64,
    /// The size of the gzip artifact, in bytes.
    pub gz_size: u64,
    /// The SHA-256 of the uncompressed feed, lowercase hex.
    pub sha256: String,
}

impl FeedMeta {
    /// Parses the `key:value` lines of a `.meta` descriptor.
    ///
    /// A malformed descriptor counts as an unreachable source: the feed is
    /// skipped for this run and retried on the next sync.
    pub fn parse(feed: &str, bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| FeedMeta::error(feed, &format!("descriptor is not UTF-8: {}", e)))?;

        let mut last_modified_date = None;
        let mut size = None;
        let mut zip_size = None;
        let mut gz_size = None;
        let mut sha256 = None;

        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| FeedMeta::error(feed, &format!("unexpected line: {:?}", line)))?;
            let slot = match key {
                "lastModifiedDate" => {
                    let date = parse_feed_date(value)
                        .map_err(|e| FeedMeta::error(feed, &e))?;
                    FeedMeta::fill(feed, key, &mut last_modified_date, date)?;
                    continue;
                }
                "sha256" => {
                    FeedMeta::fill(feed, key, &mut sha256, value.to_lowercase())?;
                    continue;
                }
                "size" => &mut size,
                "zipSize" => &mut zip_size,
                "gzSize" => &mut gz_size,
                _ => {
                    return Err(FeedMeta::error(
                        feed,
                        &format!("unknown descriptor key: {:?}", key),
                    ))
                }
            };
            let number = value
                .parse::<u64>()
                .map_err(|_| FeedMeta::error(feed, &format!("invalid {} value: {:?}", key, value)))?;
            FeedMeta::fill(feed, key, slot, number)?;
        }

        Ok(FeedMeta {
            last_modified_date: last_modified_date
                .ok_or_else(|| FeedMeta::error(feed, "missing lastModifiedDate"))?,
            size: size.ok_or_else(|| FeedMeta::error(feed, "missing size"))?,
            zip_size: zip_size.ok_or_else(|| FeedMeta::error(feed, "missing zipSize"))?,
            gz_size: gz_size.ok_or_else(|| FeedMeta::error(feed, "missing gzSize"))?,
            sha256: sha256.ok_or_else(|| FeedMeta::error(feed, "missing sha256"))?,
        })
    }

    /// The change-detection marker derived from the descriptor.
    pub fn marker(&self) -> FeedMarker {
        FeedMarker {
            size: self.size,
            sha256: self.sha256.clone(),
            last_modified: self.last_modified_date,
        }
    }

    fn fill<T>(feed: &str, key: &str, slot: &mut Option<T>, value: T) -> Result<()> {
        if slot.is_some() {
            return Err(FeedMeta::error(
                feed,
                &format!("duplicate descriptor key: {:?}", key),
            ));
        }
        *slot = Some(value);
        Ok(())
    }

    fn error(feed: &str, reason: &str) -> Error {
        Error::UnreachableSource {
            feed: feed.to_string(),
            reason: reason.to_string(),
        }
    }
}
