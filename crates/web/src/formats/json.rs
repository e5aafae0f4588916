use serde_json::Value;

use tablestore_datastore::QueryResult;

use super::{wrap_callback, FormatTrait, Message, RowSource};
use crate::{Error, Result};

/// Tables as arrays of objects.
pub(crate) struct JsonFormat;

impl FormatTrait for JsonFormat {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn render_table(&self, table: &QueryResult, callback: Option<&str>) -> Result<Vec<u8>> {
        let rows: Vec<Value> = table.iter_rows().map(Value::Object).collect();
        Ok(wrap_callback(serde_json::to_vec(&rows)?, callback))
    }

    fn render_message(&self, message: &Message) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(message)?)
    }

    /// Bodies may be one object or an array of them.
    fn decode_rows<'a>(&self, body: &'a [u8]) -> Result<RowSource<'a>> {
        if body.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Box::new(std::iter::empty()));
        }

        match serde_json::from_slice(body)? {
            Value::Object(row) => Ok(Box::new(std::iter::once(Ok(row)))),
            Value::Array(rows) => Ok(Box::new(rows.into_iter().map(|r| match r {
                Value::Object(row) => Ok(row),
                other => Err(Error::BadRequest(format!("Rows must be objects, not {}", other))),
            }))),
            _ => Err(Error::BadRequest(
                "Expected an object or an array of objects".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::formats::State;

    fn decode(body: &str) -> Result<Vec<Value>> {
        JsonFormat
            .decode_rows(body.as_bytes())?
            .map(|r| r.map(Value::Object))
            .collect()
    }

    #[test]
    fn decodes_objects_and_arrays() {
        assert_eq!(decode(r#"{"a": 1}"#).unwrap(), vec![json!({"a": 1})]);
        assert_eq!(
            decode(r#"[{"a": 1}, {"b": "x"}]"#).unwrap(),
            vec![json!({"a": 1}), json!({"b": "x"})]
        );
        assert!(decode("  ").unwrap().is_empty());
        assert!(matches!(decode("[1]"), Err(Error::BadRequest(_))));
        assert!(matches!(decode("5"), Err(Error::BadRequest(_))));
        assert!(matches!(decode("{"), Err(Error::BadRequest(_))));
    }

    #[test]
    fn renders() {
        let table = QueryResult {
            keys: vec!["a".into(), "b".into()],
            rows: vec![vec![json!(1), json!("x")]],
        };
        let body = JsonFormat.render_table(&table, None).unwrap();
        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!([{"a": 1, "b": "x"}]));
        let body = JsonFormat.render_table(&table, Some("cb")).unwrap();
        assert_eq!(String::from_utf8(body).unwrap(), r#"cb([{"a":1,"b":"x"}])"#);

        let msg = Message {
            message: "Table dropped: t".into(),
            state: State::Success,
            url: None,
        };
        let body = JsonFormat.render_message(&msg).unwrap();
        assert_eq!(
            serde_json::from_slice::<Value>(&body).unwrap(),
            json!({"message": "Table dropped: t", "state": "success"})
        );
    }
}
