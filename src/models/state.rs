//! Per-feed sync state and the report produced by a sync run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// The lightweight marker identifying a feed's current remote version,
/// taken from the `.meta` descriptor without fetching the body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FeedMarker {
    /// The size of the uncompressed feed, in bytes.
    pub size: u64,
    /// The SHA-256 of the uncompressed feed, lowercase hex.
    pub sha256: String,
    /// When the remote feed was last modified.
    pub last_modified: DateTime<Utc>,
}

/// The sync state tracked for one feed.
///
/// The marker is advanced only after a full, successful merge of the feed's
/// records. A partial or failed merge leaves it untouched so the feed is
/// retried on the next sync.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FeedSyncState {
    /// The feed this state tracks.
    /// Example: 2023, modified
    pub feed: String,
    /// The last remote marker that was fully merged.
    pub marker: Option<FeedMarker>,
    /// When the feed was last successfully merged.
    pub last_synced_at: Option<DateTime<Utc>>,
    /// The number of records last written by this feed.
    pub record_count: u64,
}

impl FeedSyncState {
    /// An empty state for a feed that has never been synced.
    pub fn never_synced(feed: &str) -> Self {
        Self {
            feed: feed.to_string(),
            marker: None,
            last_synced_at: None,
            record_count: 0,
        }
    }
}

/// The outcome of syncing one feed.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FeedOutcome {
    /// The feed changed and its records were merged.
    Updated { added: u64, updated: u64 },
    /// The remote marker matched the stored one, nothing to do.
    UpToDate,
    /// The feed could not be fetched or decoded. The store is untouched
    /// for this feed.
    Failed { reason: String },
}

impl fmt::Display for FeedOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedOutcome::Updated { added, updated } => {
                write!(f, "updated ({} added, {} updated)", added, updated)
            }
            FeedOutcome::UpToDate => write!(f, "up to date"),
            FeedOutcome::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// The per-feed outcomes of one sync run. A failed feed never aborts its
/// siblings; partial success is a first-class, reported outcome.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SyncReport {
    pub feeds: Vec<FeedReport>,
}

/// One line of the sync report.
#[derive(Clone, Debug, Serialize)]
pub struct FeedReport {
    pub feed: String,
    pub outcome: FeedOutcome,
}

impl SyncReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome for a feed.
    pub fn push(&mut self, feed: &str, outcome: FeedOutcome) {
        self.feeds.push(FeedReport {
            feed: feed.to_string(),
            outcome,
        });
    }

    /// The feeds that failed, for a targeted retry.
    pub fn failed_feeds(&self) -> Vec<&str> {
        self.feeds
            .iter()
            .filter(|f| matches!(f.outcome, FeedOutcome::Failed { .. }))
            .map(|f| f.feed.as_str())
            .collect()
    }

    /// Looks up the outcome recorded for a feed.
    pub fn outcome(&self, feed: &str) -> Option<&FeedOutcome> {
        self.feeds
            .iter()
            .find(|f| f.feed == feed)
            .map(|f| &f.outcome)
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for feed in &self.feeds {
            writeln!(f, "{}: {}", feed.feed, feed.outcome)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_tracks_failed_feeds() {
        let mut report = SyncReport::new();
        report.push("2022", FeedOutcome::UpToDate);
        report.push(
            "2023",
            FeedOutcome::Failed {
                reason: "connection reset".to_string(),
            },
        );
        report.push(
            "modified",
            FeedOutcome::Updated {
                added: 2,
                updated: 1,
            },
        );

        assert_eq!(report.failed_feeds(), vec!["2023"]);
        assert_eq!(report.outcome("2022"), Some(&FeedOutcome::UpToDate));
        assert!(report.outcome("recent").is_none());

        let text = report.to_string();
        assert!(text.contains("2023: failed: connection reset"));
        assert!(text.contains("modified: updated (2 added, 1 updated)"));
    }
}
