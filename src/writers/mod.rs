//! Writing Records
//!
//! After a search finishes, it's up to a writer to handle the matching
//! [`VulnRecord`]s. It provides a common interface, allowing to work on the
//! records without affecting the execution of the application.

pub mod csv;
pub mod json;
pub mod textstdout;

use crate::{application::Args, models::VulnRecord};

/// A trait to have a common interface between writers.
/// A writer has the responsibility to write the [`VulnRecord`]s in a way,
/// be it on standard output as text, as JSON, or as CSV.
pub trait Writer {
    /// Create a new writer
    /// The whole argv is given; only set the right option(s).
    fn new(argv: &Args) -> Self
    where
        Self: Sized;

    /// Write the records
    /// What is done with the [`VulnRecord`]s is totally up to the writer.
    fn write(&self, records: Vec<VulnRecord>);
}
