//! Write the [`VulnRecord`]s to standard output
//! It is the default writer, it presents the records in a text
//! format and prints it on STDOUT.

use super::Writer;
use crate::application::Args;
use crate::models::VulnRecord;

/// A writer to print the records in the terminal.
pub struct TextStdoutWriter {
    /// The preferred description language.
    lang: String,
}

impl Writer for TextStdoutWriter {
    /// Create a new TextStdoutWriter
    fn new(argv: &Args) -> Self {
        Self {
            lang: argv.lang.clone(),
        }
    }

    /// Prints the records on STDOUT
    fn write(&self, records: Vec<VulnRecord>) {
        println!("----------{} record(s)----------\n", records.len());
        for record in records {
            let mut score = "n/a".to_string();
            if record.base_score().is_some() {
                score = record.base_score().unwrap().to_string();
            }
            let description = record
                .description(&self.lang)
                .unwrap_or("(no description)");

            println!("[{}/{}/{}] {}\n", record.id, record.severity(), score, description);
        }
    }
}
