//! Write the [`VulnRecord`]s as CSV
//! It presents the records in a CSV format and prints it on STDOUT.

use super::Writer;
use crate::application::Args;
use crate::models::VulnRecord;

/// A writer to print the records as CSV.
pub struct CsvWriter {
    /// The preferred description language.
    lang: String,
}

impl Writer for CsvWriter {
    /// Create a new CsvWriter
    fn new(argv: &Args) -> Self {
        Self {
            lang: argv.lang.clone(),
        }
    }

    /// Writes the records
    fn write(&self, records: Vec<VulnRecord>) {
        let mut csv =
            "\"ID\",\"Published\",\"Modified\",\"Severity\",\"Score\",\"Assigner\",\"Description\"\n"
                .to_string();

        for record in records {
            let mut score = String::new();
            if record.base_score().is_some() {
                score = record.base_score().unwrap().to_string();
            }
            let mut assigner = "";
            if record.assigner.is_some() {
                assigner = record.assigner.as_ref().unwrap();
            }
            let description = record.description(&self.lang).unwrap_or("");

            // Escape quotes (") to avoid breaking the CSV
            csv.push_str(&format!(
                "\"{}\",\"{}\",\"{}\",\"{}\",\"{}\",\"{}\",\"{}\"\n",
                record.id.replace("\"", "\"\""),
                record.published_at.to_rfc3339(),
                record.modified_at.to_rfc3339(),
                record.severity(),
                score,
                assigner.replace("\"", "\"\""),
                description.replace("\"", "\"\"")
            ));
        }
        println!("{}", csv);
    }
}
