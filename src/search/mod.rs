//! Query the mirrored records.
//!
//! A search is a full scan of the store filtered by a [`Query`]. Queries
//! are validated before any record is read, so a malformed query fails
//! fast instead of surfacing halfway through a scan. The scan is id
//! ordered, which makes the results stable across repeated runs against
//! an unchanged mirror.

use chrono::{DateTime, Utc};
use log::trace;

use crate::error::{Error, Result};
use crate::models::{Severity, SortKey, VulnRecord};
use crate::store::Store;
use std::cmp::Ordering;

/// A search query.
#[derive(Clone, Debug)]
pub enum Query {
    /// A case-insensitive substring match over a record's identifier and
    /// description texts.
    FreeText(String),
    /// A structured predicate, possibly combining several conditions.
    Predicate(Predicate),
}

/// One condition of a structured query.
#[derive(Clone, Debug)]
pub enum Predicate {
    /// Case-insensitive substring over the identifier and descriptions.
    Text(String),
    /// The record's derived severity equals the given one.
    SeverityIs(Severity),
    /// The base score lies in the given inclusive range. Records without
    /// metrics never match.
    ScoreRange { min: Option<f64>, max: Option<f64> },
    /// The publication date lies in the given inclusive range.
    PublishedRange {
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    },
    /// The modification date lies in the given inclusive range.
    ModifiedRange {
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    },
    /// All of the conditions hold.
    And(Vec<Predicate>),
    /// At least one of the conditions holds.
    Or(Vec<Predicate>),
    /// The condition does not hold.
    Not(Box<Predicate>),
}

impl Query {
    /// Checks the query for contradictions and degenerate conditions.
    ///
    /// Validation is deliberately strict: an empty search term, an empty
    /// combinator, an unbounded range and an inverted range are all
    /// reported as invalid queries rather than silently matching
    /// everything or nothing. A caller that wants every record should scan
    /// the store directly instead of searching with a degenerate query.
    pub fn validate(&self) -> Result<()> {
        match self {
            Query::FreeText(text) => validate_text(text),
            Query::Predicate(predicate) => predicate.validate(),
        }
    }

    /// Whether a record satisfies the query.
    pub fn matches(&self, record: &VulnRecord) -> bool {
        match self {
            Query::FreeText(text) => matches_text(record, text),
            Query::Predicate(predicate) => predicate.matches(record),
        }
    }
}

impl Predicate {
    fn validate(&self) -> Result<()> {
        match self {
            Predicate::Text(text) => validate_text(text),
            Predicate::SeverityIs(_) => Ok(()),
            Predicate::ScoreRange { min, max } => {
                if min.is_none() && max.is_none() {
                    return Err(invalid("a score range needs at least one bound"));
                }
                if let (Some(min), Some(max)) = (min, max) {
                    if min > max {
                        return Err(invalid(&format!(
                            "empty score range: {} is greater than {}",
                            min, max
                        )));
                    }
                }
                Ok(())
            }
            Predicate::PublishedRange { after, before }
            | Predicate::ModifiedRange { after, before } => {
                if after.is_none() && before.is_none() {
                    return Err(invalid("a date range needs at least one bound"));
                }
                if let (Some(after), Some(before)) = (after, before) {
                    if after > before {
                        return Err(invalid(&format!(
                            "empty date range: {} is after {}",
                            after, before
                        )));
                    }
                }
                Ok(())
            }
            Predicate::And(children) | Predicate::Or(children) => {
                if children.is_empty() {
                    return Err(invalid("a combinator needs at least one condition"));
                }
                for child in children {
                    child.validate()?;
                }
                Ok(())
            }
            Predicate::Not(child) => child.validate(),
        }
    }

    fn matches(&self, record: &VulnRecord) -> bool {
        match self {
            Predicate::Text(text) => matches_text(record, text),
            Predicate::SeverityIs(severity) => record.severity() == *severity,
            Predicate::ScoreRange { min, max } => match record.base_score() {
                None => false,
                Some(score) => {
                    min.map_or(true, |min| score >= min) && max.map_or(true, |max| score <= max)
                }
            },
            Predicate::PublishedRange { after, before } => {
                in_range(record.published_at, after, before)
            }
            Predicate::ModifiedRange { after, before } => {
                in_range(record.modified_at, after, before)
            }
            Predicate::And(children) => children.iter().all(|child| child.matches(record)),
            Predicate::Or(children) => children.iter().any(|child| child.matches(record)),
            Predicate::Not(child) => !child.matches(record),
        }
    }
}

fn validate_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(invalid("an empty search term matches everything"));
    }
    Ok(())
}

fn matches_text(record: &VulnRecord, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    if record.id.to_lowercase().contains(&needle) {
        return true;
    }
    record
        .descriptions
        .iter()
        .any(|d| d.value.to_lowercase().contains(&needle))
}

fn in_range(
    date: DateTime<Utc>,
    after: &Option<DateTime<Utc>>,
    before: &Option<DateTime<Utc>>,
) -> bool {
    after.map_or(true, |after| date >= after) && before.map_or(true, |before| date <= before)
}

fn invalid(reason: &str) -> Error {
    Error::InvalidQuery(reason.to_string())
}

/// Orders materialized results by the requested key.
///
/// The sort is stable, so records with equal keys keep their relative id
/// ordering. `descending` reverses the whole ordering.
pub fn sort_records(records: &mut [VulnRecord], key: SortKey, descending: bool) {
    match key {
        SortKey::Cve => records.sort_by(|a, b| a.id.cmp(&b.id)),
        SortKey::Published => records.sort_by_key(|r| r.published_at),
        SortKey::Modified => records.sort_by_key(|r| r.modified_at),
        SortKey::Impact => records.sort_by(|a, b| {
            a.base_score()
                .partial_cmp(&b.base_score())
                .unwrap_or(Ordering::Equal)
        }),
        SortKey::Severity => records.sort_by_key(|r| r.severity()),
    }
    if descending {
        records.reverse();
    }
}

/// Evaluates queries against a store.
pub struct SearchEngine {
    store: Store,
}

impl SearchEngine {
    pub fn new(store: Store) -> Self {
        SearchEngine { store }
    }

    /// Runs a query and returns the matching records, lazily, in id order.
    ///
    /// Every record in the store is considered, so the results are
    /// complete: a record matching the query is returned no matter which
    /// feed delivered it or when.
    pub fn search(&self, query: &Query) -> Result<impl Iterator<Item = VulnRecord>> {
        trace!("Running SearchEngine::search()");
        query.validate()?;
        let query = query.clone();
        Ok(self.store.all().filter(move |record| query.matches(record)))
    }
}
