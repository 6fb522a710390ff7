use serde::Serialize;
use serde_json::{Map, Value};

/// One decoded row, columns in select order
pub type Row = Map<String, Value>;

/// Typed outcome of one statement execution, serialized with a `type` tag
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionResult {
    Rows {
        rows: Vec<Row>,
    },
    Page {
        rows: Vec<Row>,
        total: i64,
        start: i64,
        limited: i64,
    },
    /// multi_select: named row sets in declared order
    Sets {
        sets: Map<String, Value>,
    },
    Affected {
        count: u64,
    },
    /// batch_complex: affected count per group in declared order
    Groups {
        groups: Map<String, Value>,
    },
    Key {
        value: Value,
    },
    Tree {
        nodes: Vec<Value>,
    },
}

impl ExecutionResult {
    pub fn rows(&self) -> Option<&[Row]> {
        match self {
            ExecutionResult::Rows { rows } | ExecutionResult::Page { rows, .. } => Some(rows),
            _ => None,
        }
    }

    pub fn affected(&self) -> Option<u64> {
        match self {
            ExecutionResult::Affected { count } => Some(*count),
            _ => None,
        }
    }
}
