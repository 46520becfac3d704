//! JSON to HTML tables for e-mail bodies

use serde_json::Value;

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Render a JSON value as nested HTML tables
///
/// Objects become key/value tables, arrays of objects become a table with
/// one column per key of the first object, other arrays a bullet list.
pub fn json_to_html(value: &Value) -> String {
    let mut out = String::new();
    render(value, &mut out);
    out
}

fn render(value: &Value, out: &mut String) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push_str(&escape(s)),
        Value::Bool(_) | Value::Number(_) => out.push_str(&value.to_string()),
        Value::Object(map) => {
            out.push_str("<table border=\"1\">");
            for (key, value) in map {
                out.push_str("<tr><th>");
                out.push_str(&escape(key));
                out.push_str("</th><td>");
                render(value, out);
                out.push_str("</td></tr>");
            }
            out.push_str("</table>");
        }
        Value::Array(items) => match items.first() {
            Some(Value::Object(first)) if items.iter().all(Value::is_object) => {
                let columns: Vec<&String> = first.keys().collect();
                out.push_str("<table border=\"1\"><thead><tr>");
                for column in &columns {
                    out.push_str("<th>");
                    out.push_str(&escape(column));
                    out.push_str("</th>");
                }
                out.push_str("</tr></thead><tbody>");
                for item in items {
                    out.push_str("<tr>");
                    for column in &columns {
                        out.push_str("<td>");
                        if let Some(cell) = item.get(column.as_str()) {
                            render(cell, out);
                        }
                        out.push_str("</td>");
                    }
                    out.push_str("</tr>");
                }
                out.push_str("</tbody></table>");
            }
            _ => {
                out.push_str("<ul>");
                for item in items {
                    out.push_str("<li>");
                    render(item, out);
                    out.push_str("</li>");
                }
                out.push_str("</ul>");
            }
        },
    }
}
