use serde_json::{Map, Number, Value};
use sqlx::any::{AnyArguments, AnyRow};
use sqlx::{Any, Column, Row, TypeInfo};

pub type AnyQuery<'q> = sqlx::query::Query<'q, Any, AnyArguments<'q>>;

/// Build a query over compiled SQL with JSON values bound in placeholder order
pub fn bind_all<'q>(sql: &'q str, values: &[&Value]) -> AnyQuery<'q> {
    values.iter().fold(sqlx::query(sql), |q, v| bind_value(q, v))
}

/// Bind one JSON value. Arrays and objects travel as JSON text.
pub fn bind_value<'q>(q: AnyQuery<'q>, v: &Value) -> AnyQuery<'q> {
    match v {
        Value::Null => {
            let none: Option<String> = None;
            q.bind(none)
        }
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(n.to_string())
            }
        }
        Value::String(s) => q.bind(s.clone()),
        Value::Array(_) | Value::Object(_) => q.bind(v.to_string()),
    }
}

/// Convert a result row to a JSON object keyed by column name
pub fn row_to_json(row: &AnyRow) -> Map<String, Value> {
    let mut record = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        record.insert(column.name().to_string(), column_value(row, i));
    }
    record
}

/// Extract a column as JSON, guided by the reported type and falling back
/// through the scalar types the driver can decode.
pub fn column_value(row: &AnyRow, index: usize) -> Value {
    let type_name = row
        .columns()
        .get(index)
        .map(|c| c.type_info().name())
        .unwrap_or("NULL");

    let typed = match type_name {
        "BOOLEAN" => decode_bool(row, index),
        "SMALLINT" | "INTEGER" | "BIGINT" => decode_integer(row, index),
        "REAL" | "DOUBLE" => decode_float(row, index),
        "TEXT" => decode_text(row, index),
        "BLOB" => decode_blob(row, index),
        _ => None,
    };

    typed
        .or_else(|| decode_integer(row, index))
        .or_else(|| decode_float(row, index))
        .or_else(|| decode_text(row, index))
        .or_else(|| decode_bool(row, index))
        .or_else(|| decode_blob(row, index))
        .unwrap_or(Value::Null)
}

fn decode_bool(row: &AnyRow, index: usize) -> Option<Value> {
    row.try_get::<Option<bool>, _>(index)
        .ok()
        .map(|b| b.map(Value::Bool).unwrap_or(Value::Null))
}

fn decode_integer(row: &AnyRow, index: usize) -> Option<Value> {
    row.try_get::<Option<i64>, _>(index)
        .ok()
        .map(|n| n.map(Value::from).unwrap_or(Value::Null))
}

fn decode_float(row: &AnyRow, index: usize) -> Option<Value> {
    row.try_get::<Option<f64>, _>(index)
        .ok()
        .map(|f| f.and_then(Number::from_f64).map(Value::Number).unwrap_or(Value::Null))
}

fn decode_text(row: &AnyRow, index: usize) -> Option<Value> {
    row.try_get::<Option<String>, _>(index)
        .ok()
        .map(|s| s.map(Value::String).unwrap_or(Value::Null))
}

fn decode_blob(row: &AnyRow, index: usize) -> Option<Value> {
    row.try_get::<Option<Vec<u8>>, _>(index).ok().map(|bytes| match bytes {
        Some(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Value::String(text),
            Err(e) => Value::Array(e.into_bytes().into_iter().map(Value::from).collect()),
        },
        None => Value::Null,
    })
}
