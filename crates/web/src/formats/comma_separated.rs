use serde_json::Value;

use tablestore_datastore::QueryResult;

use super::{cell_text, FormatTrait, Message, RowSource};
use crate::{Error, Result};

/// A header row followed by one record per row.  Decoded values are always strings.
pub(crate) struct CsvFormat;

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>> {
    writer
        .into_inner()
        .map_err(|e| Error::Internal(format!("Unable to write CSV: {}", e)))
}

impl FormatTrait for CsvFormat {
    fn content_type(&self) -> &'static str {
        "text/csv"
    }

    fn render_table(&self, table: &QueryResult, _callback: Option<&str>) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(vec![]);
        writer.write_record(&table.keys)?;
        for row in table.rows.iter() {
            writer.write_record(row.iter().map(cell_text))?;
        }
        finish(writer)
    }

    fn render_message(&self, message: &Message) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(vec![]);
        writer.write_record(["message", "state", "url"])?;
        writer.write_record([
            message.message.as_str(),
            message.state.to_string().as_str(),
            message.url.as_deref().unwrap_or(""),
        ])?;
        finish(writer)
    }

    fn decode_rows<'a>(&self, body: &'a [u8]) -> Result<RowSource<'a>> {
        let mut reader = csv::Reader::from_reader(body);
        let headers = reader.headers()?.clone();
        Ok(Box::new(reader.into_records().map(move |record| {
            let record = record?;
            Ok(headers
                .iter()
                .zip(record.iter())
                .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                .collect())
        })))
    }
}
