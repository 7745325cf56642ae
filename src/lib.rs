//! cvemirror keeps a local, queryable mirror of the NVD CVE 1.1 JSON feeds.
//!
//! The NVD publishes one feed per year plus the `modified` and `recent`
//! delta feeds, each with a small `.meta` descriptor advertising its size,
//! checksum and last-modified date. The sync engine compares those
//! descriptors against the state recorded in the local store and only
//! downloads and merges the feeds that actually changed. The search engine
//! answers free-text and structured queries against the store, and never
//! touches the network.

pub mod application;
pub mod error;
pub mod feeds;
pub mod models;
pub mod readers;
pub mod search;
pub mod store;
pub mod sync;
pub mod writers;
