//! Fetch feed artifacts over HTTP(S)
//!
//! The [`HttpFeedReader`] downloads the `.meta` descriptors and the gzipped
//! feed bodies from the NVD. It works asynchronously so the sync engine can
//! fetch several feeds in a minimum amount of time.

use async_trait::async_trait;
use log::{debug, error, trace};
use reqwest::Client;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::feeds::{body_url, meta_url, BASE_FEED_URL};
use crate::readers::FeedReader;

/// How long a single artifact request may take before it is reported as an
/// unreachable source.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// A reader used to fetch the feed artifacts from the NVD.
pub struct HttpFeedReader {
    /// The HTTP client, reused across requests.
    client: Client,
    /// The base URL the feed names are appended to.
    base_url: String,
}

impl HttpFeedReader {
    /// Creates a new HttpFeedReader pointing at the NVD.
    pub fn new() -> Self {
        Self::with_base_url(BASE_FEED_URL)
    }

    /// Creates a new HttpFeedReader pointing at an alternative mirror.
    pub fn with_base_url(base_url: &str) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Unable to create a HTTP client.");
        HttpFeedReader {
            client,
            base_url: base_url.to_string(),
        }
    }

    /// Sends one HTTP request and returns the response bytes.
    async fn fetch(&self, feed: &str, url: &str) -> Result<Vec<u8>> {
        trace!("Running HttpFeedReader::fetch()");
        debug!("Sending HTTP request for URL {}", url);
        let response = self.client.get(url).send().await.map_err(|e| {
            error!("An error occured in the HTTP request to {}: {:?}", url, e);
            Error::UnreachableSource {
                feed: feed.to_string(),
                reason: format!("request to {} failed: {}", url, e),
            }
        })?;

        if !response.status().is_success() {
            error!("Invalid HTTP response code: {}", response.status());
            return Err(Error::UnreachableSource {
                feed: feed.to_string(),
                reason: format!("{} returned HTTP {}", url, response.status()),
            });
        }

        let bytes = response.bytes().await.map_err(|e| Error::UnreachableSource {
            feed: feed.to_string(),
            reason: format!("reading the body of {} failed: {}", url, e),
        })?;
        Ok(bytes.to_vec())
    }
}

impl Default for HttpFeedReader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedReader for HttpFeedReader {
    /// Fetches a feed's `.meta` descriptor.
    async fn read_meta(&self, feed: &str) -> Result<Vec<u8>> {
        self.fetch(feed, &meta_url(&self.base_url, feed)).await
    }

    /// Fetches a feed's gzipped JSON body.
    async fn read_body(&self, feed: &str) -> Result<Vec<u8>> {
        self.fetch(feed, &body_url(&self.base_url, feed)).await
    }
}
