use tablestore_datastore::QueryResult;

use super::{cell_text, FormatTrait, Message, RowSource};
use crate::Result;

const TABLE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>tablestore</title></head>
<body>
<table>
<tr>{% for k in keys %}<th>{{ k }}</th>{% endfor %}</tr>
{% for row in rows -%}
<tr>{% for cell in row %}<td>{{ cell }}</td>{% endfor %}</tr>
{% endfor -%}
</table>
{% if truncated %}<p>Showing the first {{ rows | length }} of {{ total }} rows.</p>
{% endif -%}
</body>
</html>
"#;

const MESSAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>tablestore: {{ state }}</title></head>
<body>
<p class="{{ state }}">{{ message }}</p>
{% if url %}<p><a href="{{ url }}">{{ url }}</a></p>
{% endif -%}
</body>
</html>
"#;

/// Browsable pages.  Tables are cut off after `row_limit` rows.
pub(crate) struct HtmlFormat {
    row_limit: usize,
}

impl HtmlFormat {
    pub(crate) fn new(row_limit: usize) -> HtmlFormat {
        HtmlFormat { row_limit }
    }
}

impl FormatTrait for HtmlFormat {
    fn content_type(&self) -> &'static str {
        "text/html"
    }

    fn render_table(&self, table: &QueryResult, _callback: Option<&str>) -> Result<Vec<u8>> {
        let rows: Vec<Vec<String>> = table
            .rows
            .iter()
            .take(self.row_limit)
            .map(|r| r.iter().map(cell_text).collect())
            .collect();

        let mut context = tera::Context::new();
        context.insert("keys", &table.keys);
        context.insert("truncated", &(table.rows.len() > rows.len()));
        context.insert("total", &table.rows.len());
        context.insert("rows", &rows);
        Ok(tera::Tera::one_off(TABLE_TEMPLATE, &context, true)?.into_bytes())
    }

    fn render_message(&self, message: &Message) -> Result<Vec<u8>> {
        let mut context = tera::Context::new();
        context.insert("message", &message.message);
        context.insert("state", &message.state);
        context.insert("url", &message.url);
        Ok(tera::Tera::one_off(MESSAGE_TEMPLATE, &context, true)?.into_bytes())
    }

    /// Forms aren't supported, so there are never any rows.
    fn decode_rows<'a>(&self, _body: &'a [u8]) -> Result<RowSource<'a>> {
        Ok(Box::new(std::iter::empty()))
    }
}
