use serde_json::{json, Value};

use crate::cli::OutputFormat;
use crate::statement::ParseError;

/// Print a one-line success message; JSON output merges `data` into the envelope
pub fn output_success(output_format: &OutputFormat, message: &str, data: Option<Value>) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = json!({
                "success": true,
                "message": message
            });
            if let (Some(Value::Object(extra)), Some(body)) = (data, response.as_object_mut()) {
                body.extend(extra);
            }
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => println!("✓ {}", message),
    }
    Ok(())
}

/// Report definition files that failed to parse, one entry per file
pub fn output_parse_errors(output_format: &OutputFormat, errors: &[ParseError]) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let errors: Vec<Value> = errors
                .iter()
                .map(|e| Value::String(e.to_string()))
                .collect();
            let response = json!({
                "success": false,
                "error_code": "PARSE_ERROR",
                "errors": errors
            });
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            for error in errors {
                eprintln!("✗ {}", error);
            }
        }
    }
    Ok(())
}

/// Print `rows` as aligned columns, or as a JSON array under `collection`
pub fn output_table(
    output_format: &OutputFormat,
    collection: &str,
    columns: &[&str],
    rows: &[Vec<String>],
) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let items: Vec<Value> = rows
                .iter()
                .map(|row| {
                    let object = columns
                        .iter()
                        .zip(row)
                        .map(|(column, value)| (column.to_string(), Value::String(value.clone())))
                        .collect();
                    Value::Object(object)
                })
                .collect();
            let mut response = serde_json::Map::new();
            response.insert(collection.to_string(), Value::Array(items));
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        OutputFormat::Text => {
            if rows.is_empty() {
                println!("No {} found", collection);
                return Ok(());
            }
            let widths: Vec<usize> = (0..columns.len())
                .map(|i| {
                    rows.iter()
                        .filter_map(|row| row.get(i).map(String::len))
                        .chain(std::iter::once(columns[i].len()))
                        .max()
                        .unwrap_or(0)
                })
                .collect();
            let line = |cells: Vec<&str>| {
                cells
                    .iter()
                    .zip(&widths)
                    .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
                    .collect::<Vec<_>>()
                    .join("  ")
                    .trim_end()
                    .to_string()
            };
            println!("{}", line(columns.to_vec()));
            for row in rows {
                println!("{}", line(row.iter().map(String::as_str).collect()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_output_accepts_empty_and_ragged_rows() {
        let columns = ["url", "kind"];
        assert!(output_table(&OutputFormat::Text, "routes", &columns, &[]).is_ok());
        let rows = vec![vec!["/api/sql/biz/a".to_string()], vec!["/b".to_string(), "select".to_string()]];
        assert!(output_table(&OutputFormat::Text, "routes", &columns, &rows).is_ok());
        assert!(output_table(&OutputFormat::Json, "routes", &columns, &rows).is_ok());
    }
}
