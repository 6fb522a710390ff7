//! Tree assembly for `nested_select` results.
//!
//! Rows are linked by their id and parent columns. A row whose parent is
//! null, empty, or not present in the row set becomes a root. Siblings keep
//! the order in which they appeared in the row set. The walk is iterative,
//! so deep trees cannot overflow the stack.

use serde_json::{Map, Value};
use std::collections::HashMap;
use thiserror::Error;

use super::result::Row;
use crate::statement::TreeShape;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("node {id} is its own ancestor")]
    Cycle { id: String },

    #[error("duplicate id {id}")]
    DuplicateId { id: String },

    #[error("row {row} has no `{column}` value")]
    MissingId { row: usize, column: String },

    #[error("row {row} has an unsupported `{column}` value")]
    InvalidId { row: usize, column: String },
}

#[derive(Clone, Copy, PartialEq)]
enum Visit {
    New,
    Active,
    Done,
}

/// Build the forest described by `rows`
pub fn assemble(rows: Vec<Row>, shape: &TreeShape) -> Result<Vec<Value>, TreeError> {
    let count = rows.len();
    let mut index: HashMap<String, usize> = HashMap::with_capacity(count);
    let mut parent_keys = Vec::with_capacity(count);

    for (i, row) in rows.iter().enumerate() {
        let id = match row.get(&shape.id) {
            None | Some(Value::Null) => {
                return Err(TreeError::MissingId {
                    row: i,
                    column: shape.id.clone(),
                })
            }
            Some(v) => node_key(v).ok_or_else(|| TreeError::InvalidId {
                row: i,
                column: shape.id.clone(),
            })?,
        };
        if index.insert(id.clone(), i).is_some() {
            return Err(TreeError::DuplicateId { id });
        }

        let parent = match row.get(&shape.parent) {
            None | Some(Value::Null) => None,
            Some(v) => Some(node_key(v).ok_or_else(|| TreeError::InvalidId {
                row: i,
                column: shape.parent.clone(),
            })?),
        };
        parent_keys.push(parent.filter(|p| !p.is_empty()));
    }

    let parents: Vec<Option<usize>> = parent_keys
        .iter()
        .map(|key| key.as_ref().and_then(|k| index.get(k).copied()))
        .collect();

    // Walk every ancestor chain once; meeting a node of the current chain again is a cycle
    let mut state = vec![Visit::New; count];
    for start in 0..count {
        let mut trail = Vec::new();
        let mut cursor = Some(start);
        while let Some(i) = cursor {
            match state[i] {
                Visit::Done => break,
                Visit::Active => {
                    let id = node_key(rows[i].get(&shape.id).unwrap_or(&Value::Null)).unwrap_or_default();
                    return Err(TreeError::Cycle { id });
                }
                Visit::New => {
                    state[i] = Visit::Active;
                    trail.push(i);
                    cursor = parents[i];
                }
            }
        }
        for i in trail {
            state[i] = Visit::Done;
        }
    }

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); count];
    let mut roots = Vec::new();
    for (i, parent) in parents.iter().enumerate() {
        match parent {
            Some(p) => children[*p].push(i),
            None => roots.push(i),
        }
    }

    // Post-order so every child is built before its parent
    let mut order = Vec::with_capacity(count);
    let mut stack: Vec<(usize, bool)> = roots.iter().rev().map(|r| (*r, false)).collect();
    while let Some((i, expanded)) = stack.pop() {
        if expanded {
            order.push(i);
        } else {
            stack.push((i, true));
            stack.extend(children[i].iter().rev().map(|c| (*c, false)));
        }
    }

    let mut pending: Vec<Option<Map<String, Value>>> = rows.into_iter().map(Some).collect();
    let mut built: Vec<Option<Value>> = vec![None; count];
    for i in order {
        let mut node = pending[i].take().unwrap_or_default();
        let kids = children[i].iter().filter_map(|c| built[*c].take()).collect();
        node.insert(shape.children.clone(), Value::Array(kids));
        built[i] = Some(Value::Object(node));
    }

    Ok(roots.into_iter().filter_map(|r| built[r].take()).collect())
}

fn node_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(values: Value) -> Vec<Row> {
        values
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect()
    }

    fn shape() -> TreeShape {
        TreeShape {
            id: "id".to_string(),
            parent: "parent".to_string(),
            children: "children".to_string(),
        }
    }

    #[test]
    fn builds_single_root_with_ordered_children() {
        let input = rows(json!([
            {"id": 1, "parent": null},
            {"id": 2, "parent": 1},
            {"id": 3, "parent": 1}
        ]));
        let tree = assemble(input, &shape()).unwrap();
        assert_eq!(
            tree,
            vec![json!({"id": 1, "parent": null, "children": [
                {"id": 2, "parent": 1, "children": []},
                {"id": 3, "parent": 1, "children": []}
            ]})]
        );
    }

    #[test]
    fn self_parent_is_a_cycle() {
        let input = rows(json!([{"id": 1, "parent": 1}]));
        assert_eq!(assemble(input, &shape()), Err(TreeError::Cycle { id: "1".to_string() }));
    }

    #[test]
    fn longer_cycles_are_detected() {
        let input = rows(json!([
            {"id": "a", "parent": null},
            {"id": "b", "parent": "d"},
            {"id": "c", "parent": "b"},
            {"id": "d", "parent": "c"}
        ]));
        assert!(matches!(assemble(input, &shape()), Err(TreeError::Cycle { .. })));
    }

    #[test]
    fn children_may_precede_parents() {
        let input = rows(json!([
            {"id": 3, "parent": 2},
            {"id": 2, "parent": 1},
            {"id": 1, "parent": ""}
        ]));
        let tree = assemble(input, &shape()).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0]["id"], json!(1));
        assert_eq!(tree[0]["children"][0]["id"], json!(2));
        assert_eq!(tree[0]["children"][0]["children"][0]["id"], json!(3));
    }

    #[test]
    fn orphans_become_roots() {
        let input = rows(json!([
            {"id": 1, "parent": null},
            {"id": 2, "parent": 99}
        ]));
        let tree = assemble(input, &shape()).unwrap();
        let ids: Vec<&Value> = tree.iter().map(|n| &n["id"]).collect();
        assert_eq!(ids, vec![&json!(1), &json!(2)]);
    }

    #[test]
    fn rejects_duplicate_and_missing_ids() {
        let dup = rows(json!([{"id": 1}, {"id": 1}]));
        assert_eq!(assemble(dup, &shape()), Err(TreeError::DuplicateId { id: "1".to_string() }));

        let missing = rows(json!([{"id": 1}, {"parent": 1}]));
        assert!(matches!(assemble(missing, &shape()), Err(TreeError::MissingId { row: 1, .. })));
    }

    #[test]
    fn deep_chains_do_not_recurse() {
        let input: Vec<Row> = (0..2_000)
            .map(|i| {
                let parent = if i == 0 { Value::Null } else { json!(i - 1) };
                json!({"id": i, "parent": parent}).as_object().unwrap().clone()
            })
            .collect();
        let tree = assemble(input, &shape()).unwrap();
        assert_eq!(tree.len(), 1);
    }
}
