//! `render_table`: box-drawn text tables for query results.

use aiq_core::error::ToolError;
use aiq_core::tool::{Tool, names};
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

/// Render `columns` and `rows` as a box-drawn table.
///
/// Short rows are padded with empty cells and long rows are cut to the
/// header width. No columns renders as an empty string.
pub fn render_table(columns: &[String], rows: &[Vec<String>]) -> String {
    if columns.is_empty() {
        return String::new();
    }

    let widths: Vec<usize> = (0..columns.len())
        .map(|i| {
            rows.iter()
                .map(|r| cell(r, i).chars().count())
                .chain(std::iter::once(columns[i].chars().count()))
                .max()
                .unwrap_or(0)
                + 2
        })
        .collect();

    let border = |left: &str, mid: &str, right: &str| {
        let segments: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
        format!("{left}{}{right}\n", segments.join(mid))
    };
    let line = |cells: &[String]| {
        let padded: Vec<String> = widths
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let text = cell(cells, i);
                let pad = w - 2 - text.chars().count();
                format!(" {text}{} ", " ".repeat(pad))
            })
            .collect();
        format!("│{}│\n", padded.join("│"))
    };

    let mut out = border("┌", "┬", "┐");
    out.push_str(&line(columns));
    out.push_str(&border("├", "┼", "┤"));
    for row in rows {
        out.push_str(&line(row));
    }
    out.push_str(&border("└", "┴", "┘"));
    out
}

fn cell(row: &[String], i: usize) -> &str {
    row.get(i).map(String::as_str).unwrap_or("")
}

fn text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "NULL".into(),
        other => other.to_string(),
    }
}

pub struct RenderTableTool;

#[async_trait]
impl Tool for RenderTableTool {
    fn name(&self) -> &str {
        names::RENDER_TABLE
    }

    fn description(&self) -> &str {
        "Format columns and rows as a text table for display to the user."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "columns": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Column headers"
                },
                "rows": {
                    "type": "array",
                    "items": { "type": "array", "items": { "type": "string" } },
                    "description": "Table rows, one array of cells per row"
                }
            },
            "required": ["columns", "rows"]
        })
    }

    async fn execute(&self, args: Map<String, Value>, _cancel: CancellationToken) -> Result<Value, ToolError> {
        let columns: Vec<String> = args
            .get("columns")
            .and_then(Value::as_array)
            .ok_or_else(|| ToolError::InvalidArguments("columns must be an array".into()))?
            .iter()
            .map(text)
            .collect();
        let rows: Vec<Vec<String>> = args
            .get("rows")
            .and_then(Value::as_array)
            .ok_or_else(|| ToolError::InvalidArguments("rows must be an array".into()))?
            .iter()
            .map(|row| match row {
                Value::Array(cells) => cells.iter().map(text).collect(),
                single => vec![text(single)],
            })
            .collect();

        Ok(json!({
            "status": "success",
            "format": "table",
            "output": render_table(&columns, &rows),
            "row_count": rows.len(),
        }))
    }
}
