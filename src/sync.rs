//! Bring the local mirror up to date with the remote feeds.
//!
//! A sync run fetches the `.meta` descriptors (and, for changed feeds, the
//! bodies) of a few feeds at a time, skipping feeds whose marker matches
//! the stored one. Each feed is merged into the store as soon as its fetch
//! completes, one transaction per feed, so the marker and the records
//! always advance together and at most a handful of decoded feeds are held
//! in memory at any point, no matter how many feeds a full sync covers.
//!
//! Feed-level failures (an unreachable mirror, a corrupt body) are recorded
//! in the [`SyncReport`] and never abort the other feeds. Store failures
//! are fatal and abort the run.

use futures::stream::{self, StreamExt};
use log::{debug, error, info, trace};

use crate::error::{Error, Result};
use crate::feeds::{decoder, sha256_hex, FeedMeta};
use crate::models::{FeedMarker, FeedOutcome, SyncReport, VulnRecord};
use crate::readers::FeedReader;
use crate::store::Store;

/// How many feeds are fetched and decoded at once. Bounds the memory of a
/// full sync: at most this many decoded feeds wait for their merge.
const FETCH_CONCURRENCY: usize = 4;

/// The result of fetching one feed, before any merge.
enum Fetch {
    /// The remote marker matches the stored one.
    UpToDate,
    /// The feed changed; its decoded records are ready to merge.
    Ready {
        marker: FeedMarker,
        records: Vec<VulnRecord>,
    },
    /// The feed could not be fetched or decoded.
    Failed(Error),
}

/// Downloads changed feeds and merges them into the store.
pub struct SyncEngine {
    reader: Box<dyn FeedReader>,
    store: Store,
}

impl SyncEngine {
    pub fn new(reader: Box<dyn FeedReader>, store: Store) -> Self {
        SyncEngine { reader, store }
    }

    /// Syncs the given feeds and reports the per-feed outcomes, in the
    /// order the feeds were requested.
    ///
    /// When `force` is set, feeds are redownloaded and merged even if their
    /// marker is unchanged. Re-merging unchanged records is a no-op, so a
    /// forced sync of an up-to-date mirror reports zero changes.
    pub fn sync(&self, feeds: &[String], force: bool) -> Result<SyncReport> {
        trace!("Running SyncEngine::sync()");
        info!("Syncing {} feed(s)", feeds.len());

        let mut markers = Vec::with_capacity(feeds.len());
        for feed in feeds {
            markers.push(self.store.feed_state(feed)?.and_then(|state| state.marker));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("Unable to create the tokio runtime.");
        runtime.block_on(async {
            let mut fetches = stream::iter(feeds.iter().zip(markers.iter()).map(
                |(feed, marker)| async move {
                    (feed.as_str(), self.fetch_feed(feed, marker.as_ref(), force).await)
                },
            ))
            .buffered(FETCH_CONCURRENCY);

            // Merge each feed as its fetch completes; decoded records never
            // pile up beyond the fetch window.
            let mut report = SyncReport::new();
            while let Some((feed, fetch)) = fetches.next().await {
                match fetch {
                    Fetch::UpToDate => report.push(feed, FeedOutcome::UpToDate),
                    Fetch::Failed(e) => {
                        error!("Syncing the feed {} failed: {}", feed, e);
                        report.push(
                            feed,
                            FeedOutcome::Failed {
                                reason: e.to_string(),
                            },
                        );
                    }
                    Fetch::Ready { marker, records } => {
                        let (added, updated) = self.store.merge_feed(feed, &records, &marker)?;
                        info!(
                            "Merged the feed {}: {} added, {} updated",
                            feed, added, updated
                        );
                        report.push(feed, FeedOutcome::Updated { added, updated });
                    }
                }
            }
            Ok(report)
        })
    }

    /// Fetches one feed's artifacts and decodes its body if it changed.
    async fn fetch_feed(&self, feed: &str, known: Option<&FeedMarker>, force: bool) -> Fetch {
        trace!("Running SyncEngine::fetch_feed()");
        match self.try_fetch(feed, known, force).await {
            Ok(fetch) => fetch,
            Err(e) => Fetch::Failed(e),
        }
    }

    async fn try_fetch(&self, feed: &str, known: Option<&FeedMarker>, force: bool) -> Result<Fetch> {
        let meta_bytes = self.reader.read_meta(feed).await?;
        let meta = FeedMeta::parse(feed, &meta_bytes)?;
        let marker = meta.marker();
        if !force && known == Some(&marker) {
            debug!("The feed {} is up to date", feed);
            return Ok(Fetch::UpToDate);
        }

        let body = self.reader.read_body(feed).await?;
        let json = decoder::decompress(feed, &body)?;

        // The descriptor pins the checksum of the uncompressed feed; a
        // mismatch means the body does not match the marker about to be
        // stored for it.
        let digest = sha256_hex(&json);
        if digest != marker.sha256 {
            return Err(Error::MalformedFeed {
                feed: feed.to_string(),
                reason: format!(
                    "checksum mismatch: the descriptor announces {} but the body hashes to {}",
                    marker.sha256, digest
                ),
            });
        }

        let records = decoder::parse(feed, &json)?;
        Ok(Fetch::Ready { marker, records })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::decoder::tests::{feed_item, gzip};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;

    /// A reader serving canned artifacts. Feeds it was not told about
    /// behave like an unreachable mirror.
    #[derive(Default)]
    struct StubReader {
        metas: HashMap<String, Vec<u8>>,
        bodies: HashMap<String, Vec<u8>>,
    }

    impl StubReader {
        fn new() -> Self {
            Self::default()
        }

        /// Publishes a consistent descriptor/body pair for a feed.
        fn serve(&mut self, feed: &str, last_modified: &str, items: &[serde_json::Value]) {
            let file = json!({
                "CVE_data_type": "CVE",
                "CVE_data_format": "MITRE",
                "CVE_data_version": "4.0",
                "CVE_Items": items
            })
            .to_string();
            let meta = format!(
                "lastModifiedDate:{}\nsize:{}\nzipSize:0\ngzSize:0\nsha256:{}\n",
                last_modified,
                file.len(),
                sha256_hex(file.as_bytes())
            );
            self.metas.insert(feed.to_string(), meta.into_bytes());
            self.bodies.insert(feed.to_string(), gzip(file.as_bytes()));
        }
    }

    #[async_trait]
    impl FeedReader for StubReader {
        async fn read_meta(&self, feed: &str) -> Result<Vec<u8>> {
            self.metas
                .get(feed)
                .cloned()
                .ok_or_else(|| Error::UnreachableSource {
                    feed: feed.to_string(),
                    reason: "connection refused".to_string(),
                })
        }

        async fn read_body(&self, feed: &str) -> Result<Vec<u8>> {
            self.bodies
                .get(feed)
                .cloned()
                .ok_or_else(|| Error::UnreachableSource {
                    feed: feed.to_string(),
                    reason: "connection refused".to_string(),
                })
        }
    }

    fn engine(reader: StubReader) -> (SyncEngine, Store) {
        let store = Store::in_memory().unwrap();
        (SyncEngine::new(Box::new(reader), store.clone()), store)
    }

    fn feeds(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn first_sync_merges_every_feed() {
        let mut reader = StubReader::new();
        reader.serve(
            "2022",
            "2023-01-02T03:00:01-05:00",
            &[feed_item(
                "CVE-2022-0001",
                "2022-01-05T10:15Z",
                "2022-02-01T08:30Z",
                "heap overflow",
                Some(9.8),
            )],
        );
        reader.serve(
            "2023",
            "2023-04-28T03:00:01-04:00",
            &[
                feed_item(
                    "CVE-2023-0001",
                    "2023-01-05T10:15Z",
                    "2023-02-01T08:30Z",
                    "path traversal",
                    Some(7.5),
                ),
                feed_item(
                    "CVE-2023-0002",
                    "2023-01-06T10:15Z",
                    "2023-01-06T10:15Z",
                    "open redirect",
                    None,
                ),
            ],
        );
        let (engine, store) = engine(reader);

        let report = engine.sync(&feeds(&["2022", "2023"]), false).unwrap();

        assert_eq!(
            report.outcome("2022"),
            Some(&FeedOutcome::Updated { added: 1, updated: 0 })
        );
        assert_eq!(
            report.outcome("2023"),
            Some(&FeedOutcome::Updated { added: 2, updated: 0 })
        );
        assert_eq!(store.record_count().unwrap(), 3);
        let state = store.feed_state("2023").unwrap().unwrap();
        assert_eq!(state.record_count, 2);
        assert!(state.marker.is_some());
    }

    #[test]
    fn syncs_more_feeds_than_the_fetch_window() {
        let mut reader = StubReader::new();
        let keys: Vec<String> = (2010..2020).map(|year| year.to_string()).collect();
        for key in &keys {
            reader.serve(
                key,
                "2023-04-28T03:00:01-04:00",
                &[feed_item(
                    &format!("CVE-{}-0001", key),
                    "2023-01-05T10:15Z",
                    "2023-02-01T08:30Z",
                    "yearly issue",
                    Some(5.0),
                )],
            );
        }
        let (engine, store) = engine(reader);

        let report = engine.sync(&keys, false).unwrap();

        // every feed beyond the fetch window was still merged, and the
        // outcomes come back in request order
        assert_eq!(report.feeds.len(), keys.len());
        for (entry, key) in report.feeds.iter().zip(&keys) {
            assert_eq!(&entry.feed, key);
            assert_eq!(entry.outcome, FeedOutcome::Updated { added: 1, updated: 0 });
        }
        assert_eq!(store.record_count().unwrap(), keys.len() as u64);
    }

    #[test]
    fn unchanged_feeds_are_skipped_on_resync() {
        let mut reader = StubReader::new();
        reader.serve(
            "2023",
            "2023-04-28T03:00:01-04:00",
            &[feed_item(
                "CVE-2023-0001",
                "2023-01-05T10:15Z",
                "2023-02-01T08:30Z",
                "path traversal",
                Some(7.5),
            )],
        );
        let (engine, store) = engine(reader);

        engine.sync(&feeds(&["2023"]), false).unwrap();
        let report = engine.sync(&feeds(&["2023"]), false).unwrap();

        assert_eq!(report.outcome("2023"), Some(&FeedOutcome::UpToDate));
        assert_eq!(store.record_count().unwrap(), 1);
    }

    #[test]
    fn a_changed_feed_is_merged_incrementally() {
        let mut reader = StubReader::new();
        reader.serve(
            "modified",
            "2023-04-27T03:00:01-04:00",
            &[feed_item(
                "CVE-2023-0001",
                "2023-01-05T10:15Z",
                "2023-02-01T08:30Z",
                "path traversal",
                Some(7.5),
            )],
        );
        let (engine, store) = engine(reader);
        engine.sync(&feeds(&["modified"]), false).unwrap();

        // upstream publishes a revision of 0001 and a brand new 0002
        let mut reader = StubReader::new();
        reader.serve(
            "modified",
            "2023-04-28T03:00:01-04:00",
            &[
                feed_item(
                    "CVE-2023-0001",
                    "2023-01-05T10:15Z",
                    "2023-04-27T09:00Z",
                    "path traversal (revised)",
                    Some(8.1),
                ),
                feed_item(
                    "CVE-2023-0002",
                    "2023-04-27T10:15Z",
                    "2023-04-27T10:15Z",
                    "use after free",
                    Some(9.8),
                ),
            ],
        );
        let engine = SyncEngine::new(Box::new(reader), store.clone());
        let report = engine.sync(&feeds(&["modified"]), false).unwrap();

        assert_eq!(
            report.outcome("modified"),
            Some(&FeedOutcome::Updated { added: 1, updated: 1 })
        );
        let revised = store.get("CVE-2023-0001").unwrap().unwrap();
        assert_eq!(revised.description("en"), Some("path traversal (revised)"));
        assert_eq!(revised.base_score(), Some(8.1));
        assert_eq!(store.record_count().unwrap(), 2);
    }

    #[test]
    fn a_failed_feed_never_aborts_its_siblings() {
        let mut reader = StubReader::new();
        // 2022 is not served at all
        reader.serve(
            "2023",
            "2023-04-28T03:00:01-04:00",
            &[feed_item(
                "CVE-2023-0001",
                "2023-01-05T10:15Z",
                "2023-02-01T08:30Z",
                "path traversal",
                Some(7.5),
            )],
        );
        let (engine, store) = engine(reader);

        let report = engine.sync(&feeds(&["2022", "2023"]), false).unwrap();

        assert_eq!(report.failed_feeds(), vec!["2022"]);
        assert_eq!(
            report.outcome("2023"),
            Some(&FeedOutcome::Updated { added: 1, updated: 0 })
        );
        // the failed feed left no state behind
        assert!(store.feed_state("2022").unwrap().is_none());
        assert_eq!(store.record_count().unwrap(), 1);
    }

    #[test]
    fn a_malformed_body_leaves_the_store_untouched() {
        let mut reader = StubReader::new();
        reader.serve(
            "2023",
            "2023-04-27T03:00:01-04:00",
            &[feed_item(
                "CVE-2023-0001",
                "2023-01-05T10:15Z",
                "2023-02-01T08:30Z",
                "path traversal",
                Some(7.5),
            )],
        );
        let (engine, store) = engine(reader);
        engine.sync(&feeds(&["2023"]), false).unwrap();
        let state_before = store.feed_state("2023").unwrap().unwrap();

        // a newer descriptor, but the body is garbage
        let mut reader = StubReader::new();
        reader.serve("2023", "2023-04-28T03:00:01-04:00", &[]);
        reader
            .bodies
            .insert("2023".to_string(), b"definitely not gzip".to_vec());
        let engine = SyncEngine::new(Box::new(reader), store.clone());
        let report = engine.sync(&feeds(&["2023"]), false).unwrap();

        assert_eq!(report.failed_feeds(), vec!["2023"]);
        // the marker did not advance, so the next sync retries the feed
        let state_after = store.feed_state("2023").unwrap().unwrap();
        assert_eq!(state_after.marker, state_before.marker);
        assert_eq!(store.record_count().unwrap(), 1);
    }

    #[test]
    fn a_checksum_mismatch_is_a_malformed_feed() {
        let mut reader = StubReader::new();
        reader.serve(
            "2023",
            "2023-04-28T03:00:01-04:00",
            &[feed_item(
                "CVE-2023-0001",
                "2023-01-05T10:15Z",
                "2023-02-01T08:30Z",
                "path traversal",
                Some(7.5),
            )],
        );
        // swap in a body the descriptor does not vouch for
        reader
            .bodies
            .insert("2023".to_string(), gzip(br#"{"CVE_Items": []}"#));
        let (engine, store) = engine(reader);

        let report = engine.sync(&feeds(&["2023"]), false).unwrap();

        match report.outcome("2023") {
            Some(FeedOutcome::Failed { reason }) => {
                assert!(reason.contains("checksum mismatch"))
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(store.record_count().unwrap(), 0);
    }

    #[test]
    fn force_redownloads_an_up_to_date_feed() {
        let mut reader = StubReader::new();
        reader.serve(
            "2023",
            "2023-04-28T03:00:01-04:00",
            &[feed_item(
                "CVE-2023-0001",
                "2023-01-05T10:15Z",
                "2023-02-01T08:30Z",
                "path traversal",
                Some(7.5),
            )],
        );
        let (engine, store) = engine(reader);
        engine.sync(&feeds(&["2023"]), false).unwrap();

        let report = engine.sync(&feeds(&["2023"]), true).unwrap();

        // redelivered records are unchanged, so the merge is a no-op
        assert_eq!(
            report.outcome("2023"),
            Some(&FeedOutcome::Updated { added: 0, updated: 0 })
        );
        assert_eq!(store.record_count().unwrap(), 1);
    }
}
