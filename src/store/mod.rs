//! Durable storage for vulnerability records and per-feed sync state.
//!
//! The store is a single SQLite database. The sync engine is its only
//! writer; search and external readers only ever read. Each feed merge is
//! one transaction, so the database always reflects the last fully
//! committed state, even after an interrupted sync.

use chrono::{DateTime, Utc};
use log::{error, trace};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{HashSet, VecDeque};
use std::fmt::Display;
use std::fs::create_dir_all;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::models::{FeedMarker, FeedSyncState, SeverityMetrics, VulnRecord};

/// How many records one page of a full scan fetches.
const SCAN_PAGE: usize = 256;

/// The record columns, in the order [`row_to_record`] expects them.
const RECORD_COLUMNS: &str = "id, published, last_modified, assigner, descriptions, \
                              refs, cvss_version, cvss_vector, base_score, severity, raw";

/// The local mirror database.
///
/// Cloning is cheap: clones share the same connection.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens (or creates) the store at the given path, creating parent
    /// directories as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        trace!("Running Store::open()");
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                create_dir_all(parent).map_err(|e| {
                    Error::StoreUnavailable(format!(
                        "unable to create the directory {}: {}",
                        parent.to_string_lossy(),
                        e
                    ))
                })?;
            }
        }
        let conn = Connection::open(path)
            .map_err(|e| Error::StoreUnavailable(format!("unable to open the store: {}", e)))?;
        Store::from_connection(conn)
    }

    /// Creates an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            Error::StoreUnavailable(format!("unable to create an in-memory store: {}", e))
        })?;
        Store::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Store {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                feed TEXT PRIMARY KEY,
                size INTEGER,
                sha256 TEXT,
                last_modified TEXT,
                last_synced TEXT,
                record_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS cves (
                id TEXT PRIMARY KEY,
                feed TEXT NOT NULL,
                published TEXT NOT NULL,
                last_modified TEXT NOT NULL,
                assigner TEXT,
                descriptions TEXT NOT NULL,
                refs TEXT NOT NULL,
                cvss_version TEXT,
                cvss_vector TEXT,
                base_score REAL,
                severity TEXT,
                raw TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_cves_feed ON cves (feed);
            "#,
        )
        .map_err(store_err)?;
        Ok(())
    }

    /// Looks a record up by its identifier.
    pub fn get(&self, id: &str) -> Result<Option<VulnRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {} FROM cves WHERE id = ?1", RECORD_COLUMNS),
            [id],
            row_to_record,
        )
        .optional()
        .map_err(store_err)
    }

    /// Inserts or replaces a record, attributing it to the given feed.
    /// Last-write-wins merging is the business of [`Store::merge_feed`];
    /// a plain upsert always replaces.
    pub fn upsert(&self, feed: &str, record: &VulnRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        write_record(&conn, feed, record, true).map_err(store_err)?;
        Ok(())
    }

    /// Returns a lazy scan over every record, ordered by ascending id.
    ///
    /// The scan fetches pages from the id index as it goes, so iterating a
    /// large mirror does not load it into memory. The ordering is stable
    /// across repeated calls against unchanged data.
    pub fn all(&self) -> RecordIter {
        RecordIter {
            conn: Arc::clone(&self.conn),
            last_id: String::new(),
            buf: VecDeque::new(),
            exhausted: false,
        }
    }

    /// The total number of records in the store.
    pub fn record_count(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM cves", [], |row| row.get(0))
            .map_err(store_err)?;
        Ok(count as u64)
    }

    /// Loads the sync state of a feed. Absent means never synced.
    pub fn feed_state(&self, feed: &str) -> Result<Option<FeedSyncState>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT feed, size, sha256, last_modified, last_synced, record_count \
             FROM feeds WHERE feed = ?1",
            [feed],
            row_to_state,
        )
        .optional()
        .map_err(store_err)
    }

    /// Stores the sync state of a feed.
    pub fn put_feed_state(&self, state: &FeedSyncState) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        write_state(&conn, state).map_err(store_err)?;
        Ok(())
    }

    /// Enumerates the sync states of every tracked feed.
    pub fn feed_states(&self) -> Result<Vec<FeedSyncState>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT feed, size, sha256, last_modified, last_synced, record_count \
                 FROM feeds ORDER BY feed",
            )
            .map_err(store_err)?;
        let states = stmt
            .query_map([], row_to_state)
            .map_err(store_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(store_err)?;
        Ok(states)
    }

    /// Merges a feed's records and advances its marker, as one transaction.
    ///
    /// Merging is last-write-wins by modification time: an absent record is
    /// inserted, a present one is replaced only if the incoming
    /// `modified_at` is strictly newer. A redownloaded feed re-delivering
    /// unchanged entries is therefore a no-op, which keeps retried syncs
    /// idempotent. The feed row (marker, last-synced, recomputed record
    /// count) is written in the same transaction, so a failure anywhere
    /// leaves both the records and the marker untouched.
    ///
    /// Returns how many records were added and how many updated.
    pub fn merge_feed(
        &self,
        feed: &str,
        records: &[VulnRecord],
        marker: &FeedMarker,
    ) -> Result<(u64, u64)> {
        trace!("Running Store::merge_feed()");
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(store_err)?;

        let mut added = 0;
        let mut updated = 0;
        let mut taken_over: HashSet<String> = HashSet::new();
        for record in records {
            let stored: Option<(String, String)> = tx
                .query_row(
                    "SELECT last_modified, feed FROM cves WHERE id = ?1",
                    [&record.id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()
                .map_err(store_err)?;
            match stored {
                None => {
                    write_record(&tx, feed, record, false).map_err(store_err)?;
                    added += 1;
                }
                Some((stored_modified, stored_feed)) => {
                    if record.modified_at > parse_stored_date(&stored_modified) {
                        write_record(&tx, feed, record, true).map_err(store_err)?;
                        updated += 1;
                        if stored_feed != feed {
                            taken_over.insert(stored_feed);
                        }
                    }
                }
            }
        }

        let record_count: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM cves WHERE feed = ?1",
                [feed],
                |row| row.get(0),
            )
            .map_err(store_err)?;
        let state = FeedSyncState {
            feed: feed.to_string(),
            marker: Some(marker.clone()),
            last_synced_at: Some(Utc::now()),
            record_count: record_count as u64,
        };
        write_state(&tx, &state).map_err(store_err)?;

        // Records taken over from a sibling feed leave its stored count
        // stale; refresh every feed the merge re-attributed records from.
        for sibling in &taken_over {
            tx.execute(
                "UPDATE feeds SET record_count = \
                 (SELECT COUNT(*) FROM cves WHERE feed = ?1) WHERE feed = ?1",
                [sibling],
            )
            .map_err(store_err)?;
        }

        tx.commit().map_err(store_err)?;
        Ok((added, updated))
    }

    /// Closes the store, flushing it to disk.
    ///
    /// Committed transactions are durable regardless; this releases the
    /// connection. A no-op while clones of the store are still alive.
    pub fn close(self) -> Result<()> {
        if let Ok(mutex) = Arc::try_unwrap(self.conn) {
            let conn = mutex
                .into_inner()
                .map_err(|_| Error::StoreUnavailable("store mutex poisoned".to_string()))?;
            conn.close()
                .map_err(|(_, e)| Error::StoreUnavailable(format!("unable to close the store: {}", e)))?;
        }
        Ok(())
    }
}

/// A lazy, restartable, id-ordered scan over the store's records.
///
/// Errors during the scan are logged and end the iteration early rather
/// than panicking; they only occur if the database goes away mid-scan.
pub struct RecordIter {
    conn: Arc<Mutex<Connection>>,
    last_id: String,
    buf: VecDeque<VulnRecord>,
    exhausted: bool,
}

impl RecordIter {
    fn fill(&mut self) {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(&format!(
            "SELECT {} FROM cves WHERE id > ?1 ORDER BY id LIMIT ?2",
            RECORD_COLUMNS
        )) {
            Ok(stmt) => stmt,
            Err(e) => {
                error!("Unable to prepare the scan statement: {}", e);
                self.exhausted = true;
                return;
            }
        };
        let rows = match stmt.query_map(params![self.last_id, SCAN_PAGE as i64], row_to_record) {
            Ok(rows) => rows,
            Err(e) => {
                error!("Unable to scan the records: {}", e);
                self.exhausted = true;
                return;
            }
        };
        let mut fetched = 0;
        for row in rows {
            match row {
                Ok(record) => {
                    self.last_id = record.id.clone();
                    self.buf.push_back(record);
                    fetched += 1;
                }
                Err(e) => {
                    error!("Unable to read a record during the scan: {}", e);
                    self.exhausted = true;
                    return;
                }
            }
        }
        if fetched < SCAN_PAGE {
            self.exhausted = true;
        }
    }
}

impl Iterator for RecordIter {
    type Item = VulnRecord;

    fn next(&mut self) -> Option<VulnRecord> {
        if self.buf.is_empty() && !self.exhausted {
            self.fill();
        }
        self.buf.pop_front()
    }
}

fn store_err(e: impl Display) -> Error {
    Error::StoreUnavailable(e.to_string())
}

/// Writes one record row. `replace` distinguishes a fresh insert from an
/// overwrite of an existing id.
fn write_record(
    conn: &Connection,
    feed: &str,
    record: &VulnRecord,
    replace: bool,
) -> rusqlite::Result<()> {
    let sql = if replace {
        "INSERT OR REPLACE INTO cves (id, feed, published, last_modified, assigner, \
         descriptions, refs, cvss_version, cvss_vector, base_score, severity, raw) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
    } else {
        "INSERT INTO cves (id, feed, published, last_modified, assigner, \
         descriptions, refs, cvss_version, cvss_vector, base_score, severity, raw) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
    };
    conn.execute(
        sql,
        params![
            record.id,
            feed,
            record.published_at.to_rfc3339(),
            record.modified_at.to_rfc3339(),
            record.assigner,
            serde_json::to_string(&record.descriptions).unwrap_or_default(),
            serde_json::to_string(&record.references).unwrap_or_default(),
            record.metrics.as_ref().map(|m| m.version.clone()),
            record.metrics.as_ref().map(|m| m.vector.clone()),
            record.metrics.as_ref().map(|m| m.base_score),
            record.severity().as_str(),
            record.raw.to_string(),
        ],
    )?;
    Ok(())
}

fn write_state(conn: &Connection, state: &FeedSyncState) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO feeds (feed, size, sha256, last_modified, last_synced, record_count) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            state.feed,
            state.marker.as_ref().map(|m| m.size as i64),
            state.marker.as_ref().map(|m| m.sha256.clone()),
            state.marker.as_ref().map(|m| m.last_modified.to_rfc3339()),
            state.last_synced_at.map(|d| d.to_rfc3339()),
            state.record_count as i64,
        ],
    )?;
    Ok(())
}

fn row_to_record(row: &Row) -> rusqlite::Result<VulnRecord> {
    let metrics = match (
        row.get::<_, Option<String>>(6)?,
        row.get::<_, Option<String>>(7)?,
        row.get::<_, Option<f64>>(8)?,
    ) {
        (Some(version), Some(vector), Some(base_score)) => {
            Some(SeverityMetrics::new(&version, &vector, base_score))
        }
        _ => None,
    };
    Ok(VulnRecord {
        id: row.get(0)?,
        published_at: parse_stored_date(&row.get::<_, String>(1)?),
        modified_at: parse_stored_date(&row.get::<_, String>(2)?),
        assigner: row.get(3)?,
        descriptions: serde_json::from_str(&row.get::<_, String>(4)?).unwrap_or_default(),
        references: serde_json::from_str(&row.get::<_, String>(5)?).unwrap_or_default(),
        metrics,
        raw: serde_json::from_str(&row.get::<_, String>(10)?).unwrap_or(serde_json::Value::Null),
    })
}

fn row_to_state(row: &Row) -> rusqlite::Result<FeedSyncState> {
    let marker = match (
        row.get::<_, Option<i64>>(1)?,
        row.get::<_, Option<String>>(2)?,
        row.get::<_, Option<String>>(3)?,
    ) {
        (Some(size), Some(sha256), Some(last_modified)) => Some(FeedMarker {
            size: size as u64,
            sha256,
            last_modified: parse_stored_date(&last_modified),
        }),
        _ => None,
    };
    Ok(FeedSyncState {
        feed: row.get(0)?,
        marker,
        last_synced_at: row
            .get::<_, Option<String>>(4)?
            .map(|d| parse_stored_date(&d)),
        record_count: row.get::<_, i64>(5)? as u64,
    })
}

/// Dates were written by us as RFC 3339; a corrupt value degrades to the
/// epoch instead of aborting a whole scan.
fn parse_stored_date(text: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(text)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            error!("Corrupt date in the store: {:?}", text);
            DateTime::<Utc>::UNIX_EPOCH
        })
}
