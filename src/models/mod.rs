//! In this module are declared the entities manipulated by this program

pub mod record;
pub mod state;

pub use record::{Description, Reference, Severity, SeverityMetrics, VulnRecord};
pub use state::{FeedMarker, FeedOutcome, FeedSyncState, SyncReport};

use clap::{builder::PossibleValue, ValueEnum};

/// This enum represents the writers available to print the records.
#[derive(Clone, Debug)]
pub enum Writers {
    /// The records are printed on stdout as plain text.
    TextStdout,
    /// The records are printed on stdout as JSON.
    Json,
    /// The records are printed on stdout as CSV.
    Csv,
}

impl ValueEnum for Writers {
    /// Lists the variants available for clap
    fn value_variants<'a>() -> &'a [Self] {
        &[Writers::TextStdout, Writers::Json, Writers::Csv]
    }

    /// Map each value to a possible value in clap
    fn to_possible_value(&self) -> Option<PossibleValue> {
        match &self {
            Writers::TextStdout => Some(PossibleValue::new("textstdout")),
            Writers::Json => Some(PossibleValue::new("json")),
            Writers::Csv => Some(PossibleValue::new("csv")),
        }
    }
}

/// This enum represents the orderings available for the printed records.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SortKey {
    /// Order by the CVE identifier. The default.
    Cve,
    /// Order by publication date.
    Published,
    /// Order by last modification date.
    Modified,
    /// Order by CVSS base score; records without metrics come first.
    Impact,
    /// Order by derived severity label.
    Severity,
}

impl ValueEnum for SortKey {
    /// Lists the variants available for clap
    fn value_variants<'a>() -> &'a [Self] {
        &[
            SortKey::Cve,
            SortKey::Published,
            SortKey::Modified,
            SortKey::Impact,
            SortKey::Severity,
        ]
    }

    /// Map each value to a possible value in clap
    fn to_possible_value(&self) -> Option<PossibleValue> {
        match &self {
            SortKey::Cve => Some(PossibleValue::new("cve")),
            SortKey::Published => Some(PossibleValue::new("published")),
            SortKey::Modified => Some(PossibleValue::new("modified")),
            SortKey::Impact => Some(PossibleValue::new("impact")),
            SortKey::Severity => Some(PossibleValue::new("severity")),
        }
    }
}
