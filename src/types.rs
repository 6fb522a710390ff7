/// Shared types used across the codebase

use serde::{Deserialize, Serialize};
use std::fmt;

/// Statement kinds supported by the engine.
/// Declared in each definition file and used to pick the execution handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Select,
    PagingSelect,
    NestedSelect,
    MultiSelect,
    Delete,
    Insert,
    Update,
    BatchInsert,
    BatchUpdate,
    BatchComplex,
    InsertPro,
}

/// Parameter shape a statement kind accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadShape {
    /// `{"id": 1, "name": "x"}`
    Object,
    /// `[{"id": 1}, {"id": 2}]`
    Array,
    /// `{"main": [...], "sub1": [...]}`
    Groups,
}

impl StatementKind {
    pub const ALL: [StatementKind; 11] = [
        StatementKind::Select,
        StatementKind::PagingSelect,
        StatementKind::NestedSelect,
        StatementKind::MultiSelect,
        StatementKind::Delete,
        StatementKind::Insert,
        StatementKind::Update,
        StatementKind::BatchInsert,
        StatementKind::BatchUpdate,
        StatementKind::BatchComplex,
        StatementKind::InsertPro,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Select => "select",
            StatementKind::PagingSelect => "paging_select",
            StatementKind::NestedSelect => "nested_select",
            StatementKind::MultiSelect => "multi_select",
            StatementKind::Delete => "delete",
            StatementKind::Insert => "insert",
            StatementKind::Update => "update",
            StatementKind::BatchInsert => "batch_insert",
            StatementKind::BatchUpdate => "batch_update",
            StatementKind::BatchComplex => "batch_complex",
            StatementKind::InsertPro => "insert_pro",
        }
    }

    /// Payload shape this kind requires
    pub fn payload_shape(&self) -> PayloadShape {
        match self {
            StatementKind::BatchInsert | StatementKind::BatchUpdate => PayloadShape::Array,
            StatementKind::BatchComplex => PayloadShape::Groups,
            _ => PayloadShape::Object,
        }
    }

    /// Read-only kinds are the only ones allowed to carry a cache directive
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            StatementKind::Select
                | StatementKind::PagingSelect
                | StatementKind::NestedSelect
                | StatementKind::MultiSelect
        )
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for PayloadShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadShape::Object => f.write_str("object"),
            PayloadShape::Array => f.write_str("array of objects"),
            PayloadShape::Groups => f.write_str("object of named arrays"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_as_snake_case() {
        for kind in StatementKind::ALL {
            let encoded = serde_json::to_value(kind).unwrap();
            assert_eq!(encoded, serde_json::Value::String(kind.as_str().to_string()));
        }
    }

    #[test]
    fn batch_kinds_take_array_payloads() {
        assert_eq!(StatementKind::BatchInsert.payload_shape(), PayloadShape::Array);
        assert_eq!(StatementKind::BatchComplex.payload_shape(), PayloadShape::Groups);
        assert_eq!(StatementKind::InsertPro.payload_shape(), PayloadShape::Object);
        assert!(!StatementKind::Update.is_read());
        assert!(StatementKind::MultiSelect.is_read());
    }
}
