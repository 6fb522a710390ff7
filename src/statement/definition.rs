use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::ParseError;
use super::template::SqlTemplate;
use crate::types::StatementKind;

/// Paging placeholders every `paging_select` statement must reference
pub const PAGING_START: &str = "start";
pub const PAGING_LIMIT: &str = "limited";

/// On-disk layout of a statement definition file (YAML)
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDefinition {
    kind: StatementKind,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    sql: Option<String>,
    #[serde(default)]
    count: Option<String>,
    #[serde(default)]
    cache: Option<CacheDirective>,
    #[serde(default)]
    tree: Option<TreeShape>,
    #[serde(default)]
    statements: Vec<RawNamedStatement>,
    #[serde(default)]
    groups: Vec<RawNamedStatement>,
    #[serde(default)]
    key: Option<KeyDirective>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawNamedStatement {
    name: String,
    sql: String,
}

/// Result caching for read statements
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheDirective {
    /// Seconds an entry stays valid; falls back to the configured default
    #[serde(default)]
    pub ttl: Option<u64>,
}

impl CacheDirective {
    pub fn ttl_or(&self, default: Duration) -> Duration {
        self.ttl.map(Duration::from_secs).unwrap_or(default)
    }
}

/// Column names used to assemble a nested tree from a flat row set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TreeShape {
    #[serde(default = "TreeShape::default_id")]
    pub id: String,
    #[serde(default = "TreeShape::default_parent")]
    pub parent: String,
    #[serde(default = "TreeShape::default_children")]
    pub children: String,
}

impl TreeShape {
    fn default_id() -> String {
        "id".to_string()
    }

    fn default_parent() -> String {
        "parent_id".to_string()
    }

    fn default_children() -> String {
        "children".to_string()
    }
}

impl Default for TreeShape {
    fn default() -> Self {
        Self {
            id: Self::default_id(),
            parent: Self::default_parent(),
            children: Self::default_children(),
        }
    }
}

/// How `insert_pro` produces the key it returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Server generates a v4 UUID and binds it under the key name
    Uuid,
    /// Statement carries a RETURNING clause; first column of the returned row
    Returning,
    /// Backend last-insert id
    Auto,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyDirective {
    pub name: String,
    pub strategy: KeyStrategy,
}

#[derive(Debug, Clone)]
pub struct NamedStatement {
    pub name: String,
    pub template: SqlTemplate,
}

/// Kind-specific statement bodies
#[derive(Debug, Clone)]
pub enum StatementBody {
    /// select, delete, insert, update, batch_insert, batch_update
    Single(SqlTemplate),
    Paging { query: SqlTemplate, count: SqlTemplate },
    Nested { query: SqlTemplate, tree: TreeShape },
    Multi(Vec<NamedStatement>),
    /// batch_complex groups in execution order
    Groups(Vec<NamedStatement>),
    InsertPro { query: SqlTemplate, key: KeyDirective },
}

/// A parsed, validated statement definition.
/// Immutable once built; the store replaces it wholesale on reload.
#[derive(Debug, Clone)]
pub struct StatementDefinition {
    pub path: String,
    pub kind: StatementKind,
    pub description: Option<String>,
    pub body: StatementBody,
    pub cache: Option<CacheDirective>,
    pub source: PathBuf,
    /// Assigned by the store when installed; bumps on every reload
    pub revision: u64,
}

impl StatementDefinition {
    /// Parse definition text read from `source`
    pub fn parse(path: impl Into<String>, source: &Path, text: &str) -> Result<Self, ParseError> {
        let raw: RawDefinition = serde_yaml::from_str(text).map_err(|e| ParseError::Yaml {
            path: source.to_path_buf(),
            source: e,
        })?;
        Self::from_raw(path.into(), source, raw)
    }

    fn from_raw(path: String, source: &Path, raw: RawDefinition) -> Result<Self, ParseError> {
        let invalid = |reason: String| ParseError::invalid(source, reason);
        let kind = raw.kind;

        if raw.cache.is_some() && !kind.is_read() {
            return Err(invalid(format!("cache is only allowed on read statements, not {}", kind)));
        }

        // Fields that belong to one kind only
        let only_for = |present: bool, field: &str, allowed: &[StatementKind]| {
            if present && !allowed.contains(&kind) {
                Err(ParseError::invalid(
                    source,
                    format!("field `{}` is not valid for {} statements", field, kind),
                ))
            } else {
                Ok(())
            }
        };
        only_for(raw.count.is_some(), "count", &[StatementKind::PagingSelect])?;
        only_for(raw.tree.is_some(), "tree", &[StatementKind::NestedSelect])?;
        only_for(!raw.statements.is_empty(), "statements", &[StatementKind::MultiSelect])?;
        only_for(!raw.groups.is_empty(), "groups", &[StatementKind::BatchComplex])?;
        only_for(raw.key.is_some(), "key", &[StatementKind::InsertPro])?;
        only_for(
            raw.sql.is_some(),
            "sql",
            &[
                StatementKind::Select,
                StatementKind::PagingSelect,
                StatementKind::NestedSelect,
                StatementKind::Delete,
                StatementKind::Insert,
                StatementKind::Update,
                StatementKind::BatchInsert,
                StatementKind::BatchUpdate,
                StatementKind::InsertPro,
            ],
        )?;

        let require_sql = |sql: Option<&String>| -> Result<SqlTemplate, ParseError> {
            let sql = sql.ok_or_else(|| ParseError::invalid(source, format!("{} statements require `sql`", kind)))?;
            SqlTemplate::compile(sql)
        };

        let body = match kind {
            StatementKind::Select
            | StatementKind::Delete
            | StatementKind::Insert
            | StatementKind::Update
            | StatementKind::BatchInsert
            | StatementKind::BatchUpdate => StatementBody::Single(require_sql(raw.sql.as_ref())?),

            StatementKind::PagingSelect => {
                let query = require_sql(raw.sql.as_ref())?;
                for placeholder in [PAGING_START, PAGING_LIMIT] {
                    if !query.references(placeholder) {
                        return Err(invalid(format!(
                            "paging_select sql must reference the :{} placeholder",
                            placeholder
                        )));
                    }
                }
                let count = raw
                    .count
                    .as_deref()
                    .ok_or_else(|| invalid("paging_select statements require a `count` query".to_string()))
                    .and_then(SqlTemplate::compile)?;
                StatementBody::Paging { query, count }
            }

            StatementKind::NestedSelect => {
                let tree = raw.tree.clone().unwrap_or_default();
                if tree.id.is_empty() || tree.parent.is_empty() || tree.children.is_empty() {
                    return Err(invalid("tree column names must not be empty".to_string()));
                }
                if tree.id == tree.parent {
                    return Err(invalid("tree id and parent columns must differ".to_string()));
                }
                StatementBody::Nested {
                    query: require_sql(raw.sql.as_ref())?,
                    tree,
                }
            }

            StatementKind::MultiSelect => StatementBody::Multi(named_statements(source, kind, raw.statements)?),

            StatementKind::BatchComplex => StatementBody::Groups(named_statements(source, kind, raw.groups)?),

            StatementKind::InsertPro => {
                let query = require_sql(raw.sql.as_ref())?;
                let key = raw
                    .key
                    .clone()
                    .ok_or_else(|| invalid("insert_pro statements require a `key` directive".to_string()))?;
                if key.name.is_empty() {
                    return Err(invalid("key name must not be empty".to_string()));
                }
                match key.strategy {
                    KeyStrategy::Uuid if !query.references(&key.name) => {
                        return Err(invalid(format!(
                            "uuid key strategy requires the sql to reference :{}",
                            key.name
                        )));
                    }
                    KeyStrategy::Returning if !query.source().to_ascii_uppercase().contains("RETURNING") => {
                        return Err(invalid("returning key strategy requires a RETURNING clause".to_string()));
                    }
                    _ => {}
                }
                StatementBody::InsertPro { query, key }
            }
        };

        Ok(Self {
            path,
            kind,
            description: raw.description,
            body,
            cache: raw.cache,
            source: source.to_path_buf(),
            revision: 0,
        })
    }

    /// Every SQL template of this definition, in execution order
    pub fn templates(&self) -> Vec<&SqlTemplate> {
        match &self.body {
            StatementBody::Single(t) => vec![t],
            StatementBody::Paging { query, count } => vec![count, query],
            StatementBody::Nested { query, .. } => vec![query],
            StatementBody::InsertPro { query, .. } => vec![query],
            StatementBody::Multi(list) | StatementBody::Groups(list) => list.iter().map(|s| &s.template).collect(),
        }
    }

    /// Group names for batch_complex, in execution order
    pub fn group_names(&self) -> Vec<&str> {
        match &self.body {
            StatementBody::Groups(groups) => groups.iter().map(|g| g.name.as_str()).collect(),
            _ => Vec::new(),
        }
    }
}

fn named_statements(
    source: &Path,
    kind: StatementKind,
    raw: Vec<RawNamedStatement>,
) -> Result<Vec<NamedStatement>, ParseError> {
    if raw.is_empty() {
        let field = if kind == StatementKind::MultiSelect { "statements" } else { "groups" };
        return Err(ParseError::invalid(
            source,
            format!("{} statements require a non-empty `{}` list", kind, field),
        ));
    }

    let mut seen = HashSet::new();
    raw.into_iter()
        .map(|s| {
            if s.name.is_empty() {
                return Err(ParseError::invalid(source, "statement name must not be empty"));
            }
            if !seen.insert(s.name.clone()) {
                return Err(ParseError::invalid(source, format!("duplicate statement name `{}`", s.name)));
            }
            Ok(NamedStatement {
                template: SqlTemplate::compile(&s.sql)?,
                name: s.name,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<StatementDefinition, ParseError> {
        StatementDefinition::parse("biz/plan/main", Path::new("bizmodel/plan/main.msql"), text)
    }

    #[test]
    fn parses_paging_select() {
        let def = parse(
            "kind: paging_select\n\
             sql: SELECT id FROM plan WHERE owner = :owner LIMIT :limited OFFSET :start\n\
             count: SELECT COUNT(*) FROM plan WHERE owner = :owner\n\
             cache:\n  ttl: 30\n",
        )
        .unwrap();
        assert_eq!(def.kind, StatementKind::PagingSelect);
        assert_eq!(def.cache, Some(CacheDirective { ttl: Some(30) }));
        match &def.body {
            StatementBody::Paging { query, count } => {
                assert_eq!(query.params(), &["owner", "limited", "start"]);
                assert_eq!(count.params(), &["owner"]);
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn paging_requires_placeholders_and_count() {
        let err = parse("kind: paging_select\nsql: SELECT * FROM plan\ncount: SELECT 1\n").unwrap_err();
        assert!(err.to_string().contains(":start"), "{}", err);

        let err = parse("kind: paging_select\nsql: SELECT * FROM plan LIMIT :limited OFFSET :start\n").unwrap_err();
        assert!(err.to_string().contains("count"), "{}", err);
    }

    #[test]
    fn cache_rejected_on_write_kinds() {
        let err = parse("kind: insert\nsql: INSERT INTO t (a) VALUES (:a)\ncache: {}\n").unwrap_err();
        assert!(err.to_string().contains("cache"), "{}", err);
    }

    #[test]
    fn fields_of_other_kinds_are_rejected() {
        let err = parse("kind: select\nsql: SELECT 1\ntree: {}\n").unwrap_err();
        assert!(err.to_string().contains("tree"), "{}", err);

        let err = parse("kind: batch_complex\nsql: SELECT 1\ngroups:\n  - {name: main, sql: SELECT 1}\n").unwrap_err();
        assert!(err.to_string().contains("sql"), "{}", err);
    }

    #[test]
    fn batch_complex_groups_keep_declared_order() {
        let def = parse(
            r#"kind: batch_complex
groups:
  - name: main
    sql: INSERT INTO plan (id) VALUES (:id)
  - name: sub1
    sql: INSERT INTO task (plan_id) VALUES (:plan_id)
"#,
        )
        .unwrap();
        assert_eq!(def.group_names(), vec!["main", "sub1"]);
    }

    #[test]
    fn duplicate_group_names_rejected() {
        let err = parse(
            "kind: multi_select\nstatements:\n  - {name: a, sql: SELECT 1}\n  - {name: a, sql: SELECT 2}\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"), "{}", err);
    }

    #[test]
    fn nested_select_uses_default_tree_shape() {
        let def = parse("kind: nested_select\nsql: SELECT id, parent_id, name FROM menu\n").unwrap();
        match def.body {
            StatementBody::Nested { tree, .. } => assert_eq!(tree, TreeShape::default()),
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn insert_pro_validates_key_strategy() {
        let err = parse(
            "kind: insert_pro\nsql: INSERT INTO t (name) VALUES (:name)\nkey: {name: id, strategy: uuid}\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains(":id"), "{}", err);

        let err = parse(
            "kind: insert_pro\nsql: INSERT INTO t (name) VALUES (:name)\nkey: {name: id, strategy: returning}\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("RETURNING"), "{}", err);

        assert!(parse(
            "kind: insert_pro\nsql: INSERT INTO t (id, name) VALUES (:id, :name)\nkey: {name: id, strategy: uuid}\n",
        )
        .is_ok());
    }

    #[test]
    fn unknown_kind_and_fields_fail_as_yaml_errors() {
        assert!(matches!(parse("kind: upsert\nsql: SELECT 1\n"), Err(ParseError::Yaml { .. })));
        assert!(matches!(parse("kind: select\nsql: SELECT 1\nbogus: 1\n"), Err(ParseError::Yaml { .. })));
    }
}
