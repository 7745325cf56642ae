//! This module contains the main structure and logic for the whole
//! application.

use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::PathBuf;

use crate::error::Result;
use crate::feeds;
use crate::models::{Severity, SortKey, SyncReport, VulnRecord, Writers};
use crate::readers::http::HttpFeedReader;
use crate::search::{sort_records, Predicate, Query, SearchEngine};
use crate::store::Store;
use crate::sync::SyncEngine;
use crate::writers::csv::CsvWriter;
use crate::writers::json::JsonWriter;
use crate::writers::textstdout::TextStdoutWriter;
use crate::writers::Writer;

use log::{debug, error, info, trace};

/// Represents the application
pub struct Application {
    /// The arguments given on the command line.
    argv: Option<Args>,
}

impl Application {
    /// Creates a new application
    pub fn new() -> Self {
        trace!("In Application::new()");
        Application { argv: None }
    }

    /// Read argv to get the arguments before running the application
    pub fn read_argv(&mut self) {
        trace!("In Application::read_argv()");
        let args = Args::parse();
        if let Some(feeds) = &args.feeds {
            for feed in feeds {
                if !feeds::is_valid_key(feed) {
                    error!("Invalid feed requested: {:?}", feed);
                    println!("Invalid feed {:?} provided. Use cvemirror --help", feed);
                    panic!("A feed is a four digit year, \"modified\" or \"recent\".");
                }
            }
        }
        self.argv = Some(args);
    }

    /// Runs the global application
    /// read_argv() MUST have been called before
    pub fn run(&self) -> Result<()> {
        trace!("Running Application::run()");
        let args = self
            .argv
            .as_ref()
            .expect("CLI arguments haven't been read.");

        let store = Store::open(&args.database)?;

        if args.update {
            info!("Updating the mirror at {:?}", args.database);
            let feeds = args.feeds.clone().unwrap_or_else(feeds::default_feeds);
            let engine = SyncEngine::new(Box::new(HttpFeedReader::new()), store.clone());
            let report = engine.sync(&feeds, args.force)?;
            self.write_report(args, &report);
        }

        if let Some(records) = self.collect_records(args, &store)? {
            let writer: Box<dyn Writer> = match args.writer {
                Writers::TextStdout => Box::new(TextStdoutWriter::new(args)),
                Writers::Json => Box::new(JsonWriter::new(args)),
                Writers::Csv => Box::new(CsvWriter::new(args)),
            };
            writer.write(records);
        }

        store.close()
    }

    /// Collects the records to print, sorted as requested: the query's
    /// matches, or the whole mirror when no search was asked at all.
    /// Returns None for an update-only invocation.
    fn collect_records(&self, args: &Args, store: &Store) -> Result<Option<Vec<VulnRecord>>> {
        trace!("In Application::collect_records()");
        let mut records: Vec<VulnRecord> = match self.build_query(args) {
            Some(query) => {
                debug!("Searching with the query {:?}", query);
                SearchEngine::new(store.clone()).search(&query)?.collect()
            }
            None if args.update => return Ok(None),
            // no search arguments at all: print the whole mirror
            None => store.all().collect(),
        };
        info!("Collected {} record(s)", records.len());
        sort_records(&mut records, args.sort, args.descending);
        Ok(Some(records))
    }

    /// Prints the sync report in the requested format.
    fn write_report(&self, args: &Args, report: &SyncReport) {
        match args.writer {
            // serde_json::to_value() should never return Err, since
            // SyncReport derives Serialize.
            Writers::Json => println!("{:#}", serde_json::to_value(report).unwrap()),
            _ => print!("{}", report),
        }
        let failed = report.failed_feeds();
        if !failed.is_empty() {
            error!("{} feed(s) failed to sync: {}", failed.len(), failed.join(", "));
        }
    }

    /// Builds the search query from the CLI arguments.
    /// Returns None when no search was asked at all.
    fn build_query(&self, args: &Args) -> Option<Query> {
        trace!("In Application::build_query()");
        let mut predicates = Vec::new();

        // Several terms widen the search, the filters below narrow it
        match args.search_terms.len() {
            0 => {}
            1 => predicates.push(Predicate::Text(args.search_terms[0].clone())),
            _ => predicates.push(Predicate::Or(
                args.search_terms
                    .iter()
                    .map(|term| Predicate::Text(term.clone()))
                    .collect(),
            )),
        }
        if let Some(severity) = args.severity {
            predicates.push(Predicate::SeverityIs(severity));
        }
        if args.min_score.is_some() || args.max_score.is_some() {
            predicates.push(Predicate::ScoreRange {
                min: args.min_score,
                max: args.max_score,
            });
        }
        if args.published_after.is_some() || args.published_before.is_some() {
            predicates.push(Predicate::PublishedRange {
                after: args.published_after,
                before: args.published_before,
            });
        }
        if args.modified_after.is_some() || args.modified_before.is_some() {
            predicates.push(Predicate::ModifiedRange {
                after: args.modified_after,
                before: args.modified_before,
            });
        }

        if predicates.is_empty() {
            return None;
        }
        if predicates.len() == 1 {
            if let Predicate::Text(term) = &predicates[0] {
                return Some(Query::FreeText(term.clone()));
            }
            return predicates.pop().map(Query::Predicate);
        }
        Some(Query::Predicate(Predicate::And(predicates)))
    }
}

/// Parses a date given on the command line. Plain dates like 2023-04-28
/// are accepted along with full timestamps.
fn parse_date_arg(text: &str) -> std::result::Result<DateTime<Utc>, String> {
    feeds::parse_feed_date(text)
}

/// Represents the CLI arguments accepted by cvemirror
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// The terms to search for in the mirrored records
    #[arg(value_name = "TERMS")]
    pub search_terms: Vec<String>,
    /// The path of the mirror database
    #[arg(short, long, value_name = "DATABASE", default_value = "cvemirror.sqlite")]
    pub database: PathBuf,
    /// Sync the mirror with the remote feeds before searching
    #[arg(short, long)]
    pub update: bool,
    /// Redownload the feeds even when they look unchanged
    #[arg(long)]
    pub force: bool,
    /// The feeds to sync, comma-delimited (defaults to all of them)
    #[arg(long, value_name = "FEEDS", value_delimiter = ',')]
    pub feeds: Option<Vec<String>>,
    /// Keep records published on or after this date
    #[arg(long, value_name = "DATE", value_parser = parse_date_arg)]
    pub published_after: Option<DateTime<Utc>>,
    /// Keep records published on or before this date
    #[arg(long, value_name = "DATE", value_parser = parse_date_arg)]
    pub published_before: Option<DateTime<Utc>>,
    /// Keep records modified on or after this date
    #[arg(long, value_name = "DATE", value_parser = parse_date_arg)]
    pub modified_after: Option<DateTime<Utc>>,
    /// Keep records modified on or before this date
    #[arg(long, value_name = "DATE", value_parser = parse_date_arg)]
    pub modified_before: Option<DateTime<Utc>>,
    /// Keep records with a base score of at least this value
    #[arg(long, value_name = "SCORE")]
    pub min_score: Option<f64>,
    /// Keep records with a base score of at most this value
    #[arg(long, value_name = "SCORE")]
    pub max_score: Option<f64>,
    /// Keep records with exactly this severity
    #[arg(short, long, value_name = "SEVERITY")]
    pub severity: Option<Severity>,
    /// The ordering of the printed records
    #[arg(long, value_name = "SORT", default_value = "cve")]
    pub sort: SortKey,
    /// Reverse the ordering
    #[arg(long)]
    pub descending: bool,
    /// The language of the descriptions to print
    #[arg(long, value_name = "LANG", default_value = "en")]
    pub lang: String,
    /// The writer to use
    #[arg(short, long, value_name = "WRITER", default_value = "textstdout")]
    pub writer: Writers,
}
