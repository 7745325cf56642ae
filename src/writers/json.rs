//! Write the [`VulnRecord`]s as JSON
//! It presents the records in a JSON format and prints it on STDOUT.

use super::Writer;
use crate::application::Args;
use crate::models::VulnRecord;
use serde_json::value::Value;
use serde_json::Map;

/// A writer to print the records as JSON.
pub struct JsonWriter {}

impl Writer for JsonWriter {
    /// Create a new JsonWriter
    fn new(_argv: &Args) -> Self {
        Self {}
    }

    /// Writes the records
    fn write(&self, records: Vec<VulnRecord>) {
        let mut map = Map::new();
        map.insert("count".to_string(), Value::Number(records.len().into()));

        // serde_json::to_value() should never return Err, since VulnRecord
        // derives Serialize.
        let records_value = serde_json::to_value(records).unwrap();
        map.insert("records".to_string(), records_value);
        let result = Value::Object(map);
        println!("{:#}", result);
    }
}
