//! The readers module defines how feed artifacts are fetched.
//!
//! The sync engine only needs the raw bytes of a feed's `.meta` descriptor
//! and of its gzipped body; the transport behind that is an implementation
//! detail of the reader. The production reader speaks HTTP(S), tests plug
//! in readers serving canned bytes.

pub mod http;

use async_trait::async_trait;

use crate::error::Result;

/// A common interface between all feed readers.
#[async_trait]
pub trait FeedReader: Send + Sync {
    /// Reads the raw bytes of a feed's `.meta` descriptor.
    async fn read_meta(&self, feed: &str) -> Result<Vec<u8>>;

    /// Reads the raw bytes of a feed's gzipped JSON body.
    async fn read_body(&self, feed: &str) -> Result<Vec<u8>>;
}
