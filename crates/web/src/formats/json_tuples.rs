use serde_json::{json, Value};

use tablestore_datastore::QueryResult;

use super::{wrap_callback, FormatTrait, Message, RowSource};
use crate::{Error, Result};

/// Tables as `{"keys": [...], "data": [[...], ...]}`, which is much smaller than an array of objects.
pub(crate) struct JsonTuplesFormat;

#[derive(serde::Deserialize)]
struct TuplesBody {
    #[serde(default)]
    keys: Vec<String>,
    #[serde(default)]
    data: Vec<Vec<Value>>,
}

impl FormatTrait for JsonTuplesFormat {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn render_table(&self, table: &QueryResult, callback: Option<&str>) -> Result<Vec<u8>> {
        let body = json!({"keys": &table.keys, "data": &table.rows});
        Ok(wrap_callback(serde_json::to_vec(&body)?, callback))
    }

    fn render_message(&self, message: &Message) -> Result<Vec<u8>> {
        let mut keys = vec!["message", "state"];
        let mut values = vec![json!(message.message), json!(message.state)];
        if let Some(url) = message.url.as_ref() {
            keys.push("url");
            values.push(json!(url));
        }
        Ok(serde_json::to_vec(&json!({"keys": keys, "data": [values]}))?)
    }

    fn decode_rows<'a>(&self, body: &'a [u8]) -> Result<RowSource<'a>> {
        if body.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Box::new(std::iter::empty()));
        }

        let TuplesBody { keys, data } = serde_json::from_slice(body)?;
        Ok(Box::new(data.into_iter().map(move |values| {
            if values.len() > keys.len() {
                return Err(Error::BadRequest(format!(
                    "Row has {} values but there are only {} keys",
                    values.len(),
                    keys.len()
                )));
            }
            Ok(keys.iter().cloned().zip(values).collect())
        })))
    }
}
