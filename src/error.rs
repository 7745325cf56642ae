//! Error types for cvemirror

use thiserror::Error;

/// Result type alias using the cvemirror Error
pub type Result<T> = std::result::Result<T, Error>;

/// The errors that can occur while syncing or searching the mirror.
///
/// Fetch and decode failures are scoped to a single feed and are recorded
/// in the [`SyncReport`](crate::models::SyncReport) instead of aborting the
/// sibling feeds. Only a store failure is fatal to the whole operation.
#[derive(Error, Debug)]
pub enum Error {
    /// The feed descriptor or body could not be retrieved, or the
    /// descriptor itself was malformed.
    #[error("feed {feed} is unreachable: {reason}")]
    UnreachableSource { feed: String, reason: String },

    /// The feed body failed to decompress, failed its checksum, or could
    /// not be parsed.
    #[error("feed {feed} is malformed: {reason}")]
    MalformedFeed { feed: String, reason: String },

    /// The local store cannot be opened or written. Fatal.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A structured search predicate is malformed. Reported before any
    /// scan begins.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl Error {
    /// Whether the error aborts the whole sync rather than a single feed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_errors_are_fatal() {
        assert!(Error::StoreUnavailable("disk full".to_string()).is_fatal());
        assert!(!Error::UnreachableSource {
            feed: "2023".to_string(),
            reason: "timeout".to_string(),
        }
        .is_fatal());
        assert!(!Error::MalformedFeed {
            feed: "2023".to_string(),
            reason: "bad gzip".to_string(),
        }
        .is_fatal());
        assert!(!Error::InvalidQuery("empty term".to_string()).is_fatal());
    }
}
