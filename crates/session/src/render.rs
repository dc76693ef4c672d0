//! Markdown bodies for bot messages.

use serde_json::{Map, Value};

/// Rows beyond this are counted but not rendered.
pub const MAX_TABLE_ROWS: usize = 50;

pub type Row = Map<String, Value>;

/// Body for an answered question: optional SQL block, then the results section.
pub fn answer_body(sql: &str, rows: &[Row]) -> String {
    let mut body = String::new();
    let sql = sql.trim();
    if !sql.is_empty() {
        body.push_str(&sql_section(sql));
    }

    body.push_str("## Results\n");
    if rows.is_empty() {
        body.push_str("No results found.");
    } else {
        body.push_str(&results_table(rows));
    }
    body
}

pub fn error_body(message: &str) -> String {
    format!("## Error\n\n{message}")
}

/// Body for the direct engine path, which reports row counts and falls back to raw JSON.
pub fn direct_results_body(sql: &str, data: &Value) -> String {
    let mut body = sql_section(sql.trim());
    match rows_from_value(data) {
        Some(rows) => {
            let unit = if rows.len() == 1 { "row" } else { "rows" };
            body.push_str(&format!("## Results ({} {unit})\n", rows.len()));
            body.push_str(&results_table(&rows));
        }
        None => {
            let pretty = serde_json::to_string_pretty(data).unwrap_or_else(|_| data.to_string());
            body.push_str(&format!("## Results\n```json\n{pretty}\n```"));
        }
    }
    body
}

pub fn direct_error_body(error: &str) -> String {
    format!("## Error\n```\n{error}\n```")
}

/// Markdown table over the first [`MAX_TABLE_ROWS`] rows, columns in first-row key order.
pub fn results_table(rows: &[Row]) -> String {
    let Some(first) = rows.first() else {
        return "```\nNo results found\n```".to_string();
    };
    let columns: Vec<&String> = first.keys().collect();

    let mut table = format!(
        "| {} |\n",
        columns
            .iter()
            .map(|column| column.as_str())
            .collect::<Vec<_>>()
            .join(" | ")
    );
    table.push_str(&format!(
        "| {} |\n",
        vec!["---"; columns.len()].join(" | ")
    ));

    for row in rows.iter().take(MAX_TABLE_ROWS) {
        let cells: Vec<String> = columns
            .iter()
            .map(|column| cell_text(row.get(column.as_str())))
            .collect();
        table.push_str(&format!("| {} |\n", cells.join(" | ")));
    }

    if rows.len() > MAX_TABLE_ROWS {
        table.push_str(&format!(
            "\n_Showing {MAX_TABLE_ROWS} of {} rows_",
            rows.len()
        ));
    }
    table
}

/// Unwraps payloads that arrive JSON-encoded inside a string.
pub fn normalize_payload(data: Option<&Value>) -> Value {
    match data {
        Some(Value::String(text)) => match serde_json::from_str::<Value>(text) {
            Ok(parsed) => parsed,
            Err(error) => {
                tracing::debug!(error = %error, "response data is not embedded json");
                Value::String(text.clone())
            }
        },
        Some(value) => value.clone(),
        None => Value::Null,
    }
}

/// Rows of an array payload; `None` when the payload is not an array.
pub fn rows_from_value(data: &Value) -> Option<Vec<Row>> {
    let items = data.as_array()?;
    Some(
        items
            .iter()
            .map(|item| match item {
                Value::Object(row) => row.clone(),
                scalar => {
                    let mut row = Row::new();
                    row.insert("value".to_string(), scalar.clone());
                    row
                }
            })
            .collect(),
    )
}

fn sql_section(sql: &str) -> String {
    format!("## SQL Query\n```sql\n{sql}\n```\n\n")
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "NULL".to_string(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}
