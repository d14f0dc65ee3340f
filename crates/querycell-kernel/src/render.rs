//! Display artifacts for remote results.

use querycell_client::{ColumnMeta, TraceInfo};
use querycell_core::output::DisplayData;
use serde_json::Value;

const NO_DATA_PLACEHOLDER: &str = "<p>No data available to display</p>";

/// Render a tabular result as a self-contained HTML artifact.
///
/// The header row comes from the declared column metadata, never from the
/// first row. Structured cell values are JSON-stringified. A present trace
/// id prepends a banner carrying the id as a click-to-inspect affordance
/// for the hosting context.
#[must_use]
pub fn render_table(
    rows: &[Value],
    columns: &[ColumnMeta],
    trace: Option<&TraceInfo>,
) -> DisplayData {
    let mut html = String::new();
    if let Some(trace) = trace {
        html.push_str(&trace_banner(trace));
    }

    if rows.is_empty() {
        html.push_str(NO_DATA_PLACEHOLDER);
        return DisplayData::html(html);
    }

    html.push_str("<table border=\"1\"><thead><tr>");
    for column in columns {
        html.push_str(&format!("<th>{}</th>", html_escape(&column.name)));
    }
    html.push_str("</tr></thead><tbody>");

    for row in rows {
        html.push_str("<tr>");
        for column in columns {
            let cell = row
                .get(column.name.as_str())
                .map_or_else(String::new, cell_text);
            html.push_str(&format!("<td>{}</td>", html_escape(&cell)));
        }
        html.push_str("</tr>");
    }
    html.push_str("</tbody></table>");

    DisplayData::html(html)
}

/// Scalars render plainly; structured values keep their JSON shape.
fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string(value).unwrap_or_else(|_| value.to_string())
        }
    }
}

fn trace_banner(trace: &TraceInfo) -> String {
    let model = trace.model_name.as_deref().unwrap_or_default();
    format!(
        "<div class=\"querycell-trace-banner\" data-trace-id=\"{id}\" data-model-name=\"{model}\"><a href=\"#\" title=\"Open trace\">trace {id}</a></div>",
        id = html_escape(&trace.trace_id),
        model = html_escape(model),
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
