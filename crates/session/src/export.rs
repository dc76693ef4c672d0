//! CSV export of the rows behind a bot answer.

use serde_json::Value;

use super::message::{ChatMessage, MessageMetadata, Sender};
use super::render::Row;

/// Header from the first row's keys, one line per row; `None` when there is nothing to write.
pub fn rows_to_csv(rows: &[Row]) -> Option<String> {
    let first = rows.first()?;
    let headers: Vec<&String> = first.keys().collect();

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(
        headers
            .iter()
            .map(|header| header.as_str())
            .collect::<Vec<_>>()
            .join(","),
    );
    for row in rows {
        let cells: Vec<String> = headers
            .iter()
            .map(|header| row.get(header.as_str()).map(csv_cell).unwrap_or_default())
            .collect();
        lines.push(cells.join(","));
    }
    Some(lines.join("\n"))
}

fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => quoted(text),
        Value::Array(_) | Value::Object(_) => quoted(&value.to_string()),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
    }
}

fn quoted(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

/// Newest bot answer in `messages` that carries result rows.
pub fn latest_results(messages: &[ChatMessage]) -> Option<&MessageMetadata> {
    messages
        .iter()
        .rev()
        .filter(|message| message.sender == Sender::Bot)
        .find_map(|message| {
            message
                .metadata
                .as_ref()
                .filter(|metadata| !metadata.results.is_empty())
        })
}
