//! Content negotiation and the representations tables and messages are rendered in.
//!
//! Every representation knows how to render a table, render a status message, and decode a request body into rows.
//! The raw database download (`.db`) isn't a representation in that sense: it only exists for responses, and its
//! messages are rendered as JSON.
mod comma_separated;
mod html;
mod json;
mod json_tuples;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use tablestore_datastore::{QueryResult, Row};

use crate::http::Request;
use crate::{Error, Result};

pub(crate) use comma_separated::*;
pub(crate) use html::*;
pub(crate) use json::*;
pub(crate) use json_tuples::*;

/// Mime type of a raw sqlite database.
pub const SQLITE_MIME: &str = "application/x-sqlite3";

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Format {
    Html,
    Json,
    JsonTuples,
    Csv,
    /// The database file itself.
    Db,
}

const MIME_TYPES: &[(&str, Format)] = &[
    ("text/html", Format::Html),
    ("application/xhtml+xml", Format::Html),
    ("application/json", Format::Json),
    ("text/javascript", Format::Json),
    ("text/csv", Format::Csv),
    (SQLITE_MIME, Format::Db),
];

impl Format {
    /// The format named by a path suffix such as the `csv` of `table.csv`.
    pub fn from_suffix(suffix: &str) -> Option<Format> {
        match suffix {
            "html" => Some(Format::Html),
            "json" => Some(Format::Json),
            "jsontuples" => Some(Format::JsonTuples),
            "csv" => Some(Format::Csv),
            "db" => Some(Format::Db),
            _ => None,
        }
    }

    pub fn from_mime(mime: &str) -> Option<Format> {
        MIME_TYPES
            .iter()
            .find(|(m, _)| m.eq_ignore_ascii_case(mime))
            .map(|(_, f)| *f)
    }

    /// The format of the response: the suffix if there is one, else the best match for `Accept`, else HTML.
    pub fn for_response(request: &Request, suffix: Option<Format>) -> Format {
        suffix
            .or_else(|| request.header("Accept").and_then(best_accepted))
            .unwrap_or(Format::Html)
    }

    /// The format of the request body: the suffix if there is one, else the content type, else HTML.
    pub fn for_request(request: &Request, suffix: Option<Format>) -> Format {
        suffix
            .or_else(|| request.content_type().and_then(|c| Format::from_mime(&c)))
            .unwrap_or(Format::Html)
    }

    pub(crate) fn formatter(&self, html_row_limit: usize) -> Formatter {
        match self {
            Format::Html => HtmlFormat::new(html_row_limit).into(),
            Format::Json | Format::Db => JsonFormat.into(),
            Format::JsonTuples => JsonTuplesFormat.into(),
            Format::Csv => CsvFormat.into(),
        }
    }

    /// Whether a JSONP callback may wrap this format.
    pub fn supports_callback(&self) -> bool {
        matches!(self, Format::Json | Format::JsonTuples)
    }
}

/// Pick the known format an `Accept` header likes best.  Among equal qualities the earliest wins.
fn best_accepted(accept: &str) -> Option<Format> {
    let mut best: Option<(f32, Format)> = None;
    for entry in accept.split(',') {
        let mut parts = entry.split(';');
        let mime = parts.next().unwrap_or("").trim();
        let quality = parts
            .filter_map(|p| p.trim().strip_prefix("q="))
            .find_map(|q| q.parse::<f32>().ok())
            .unwrap_or(1.0);
        if let Some(format) = Format::from_mime(mime) {
            if best.map(|(q, _)| quality > q).unwrap_or(true) {
                best = Some((quality, format));
            }
        }
    }
    best.map(|(_, f)| f)
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Success,
    Error,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            State::Success => "success",
            State::Error => "error",
        })
    }
}

/// A status report: the outcome of a write, or an error.
#[derive(Clone, Debug, serde::Serialize)]
pub struct Message {
    pub message: String,
    pub state: State,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

pub(crate) type RowSource<'a> = Box<dyn Iterator<Item = Result<Row>> + 'a>;

#[enum_dispatch::enum_dispatch(Formatter)]
pub(crate) trait FormatTrait {
    fn content_type(&self) -> &'static str;

    /// Render a table, wrapped in the JSONP `callback` if the representation supports one.
    fn render_table(&self, table: &QueryResult, callback: Option<&str>) -> Result<Vec<u8>>;

    fn render_message(&self, message: &Message) -> Result<Vec<u8>>;

    /// Decode a request body into rows, lazily where the representation allows it.
    fn decode_rows<'a>(&self, body: &'a [u8]) -> Result<RowSource<'a>>;
}

#[enum_dispatch::enum_dispatch]
pub(crate) enum Formatter {
    Json(JsonFormat),
    JsonTuples(JsonTuplesFormat),
    Csv(CsvFormat),
    Html(HtmlFormat),
}

/// How a value shows up in text-only representations.
pub(crate) fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

lazy_static! {
    static ref VALID_CALLBACK: Regex = Regex::new(r"^[A-Za-z0-9_.$]+$").unwrap();
}

/// Check a JSONP callback name.  Anything but a plain (possibly dotted) identifier is refused.
pub(crate) fn validate_callback(callback: &str) -> Result<&str> {
    if !VALID_CALLBACK.is_match(callback) {
        return Err(Error::BadRequest(format!("Invalid callback: {}", callback)));
    }
    Ok(callback)
}

/// Wrap `body` in a JSONP callback.
pub(crate) fn wrap_callback(body: Vec<u8>, callback: Option<&str>) -> Vec<u8> {
    match callback {
        None => body,
        Some(cb) => {
            let mut ret = Vec::with_capacity(body.len() + cb.len() + 2);
            ret.extend_from_slice(cb.as_bytes());
            ret.push(b'(');
            ret.extend(body);
            ret.push(b')');
            ret
        }
    }
}
