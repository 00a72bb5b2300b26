//! Logical layer: namespaces, entities, and columns as the user declared
//! them, independent of where data physically lives.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use stratadb_id::{ConstraintId, EntityId, FieldId, NamespaceId};

use crate::catalog::Repository;
use crate::materialized::MaterializedCriteria;

/// The data model a namespace (and all entities in it) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataModel {
    Relational,
    Document,
    Graph,
}

impl fmt::Display for DataModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Relational => write!(f, "relational"),
            Self::Document => write!(f, "document"),
            Self::Graph => write!(f, "graph"),
        }
    }
}

/// Distinguishes plain entities from views over them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Entity,
    View,
    MaterializedView,
}

/// Logical scalar and collection types columns are declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolyType {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Decimal,
    Real,
    Double,
    Date,
    Time,
    Timestamp,
    Char,
    VarChar,
    Text,
    Binary,
    VarBinary,
    Json,
    Document,
    Array,
}

impl fmt::Display for PolyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "BOOLEAN",
            Self::TinyInt => "TINYINT",
            Self::SmallInt => "SMALLINT",
            Self::Integer => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::Decimal => "DECIMAL",
            Self::Real => "REAL",
            Self::Double => "DOUBLE",
            Self::Date => "DATE",
            Self::Time => "TIME",
            Self::Timestamp => "TIMESTAMP",
            Self::Char => "CHAR",
            Self::VarChar => "VARCHAR",
            Self::Text => "TEXT",
            Self::Binary => "BINARY",
            Self::VarBinary => "VARBINARY",
            Self::Json => "JSON",
            Self::Document => "DOCUMENT",
            Self::Array => "ARRAY",
        };
        write!(f, "{name}")
    }
}

/// A literal default rendered in the declared type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DefaultValue {
    pub poly_type: PolyType,
    pub value: Arc<str>,
}

/// A column of a relational table.
///
/// `position` is the dense 0-based ordinal within the owning table; dropping
/// a column compacts the positions of everything behind it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub id: FieldId,
    pub name: Arc<str>,
    pub position: u64,
    pub poly_type: PolyType,
    /// Element type when `poly_type` is a collection type.
    pub collection_type: Option<PolyType>,
    pub length: Option<u64>,
    pub scale: Option<u64>,
    pub dimension: Option<u64>,
    pub cardinality: Option<u64>,
    pub nullable: bool,
    pub default: Option<DefaultValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintType {
    PrimaryKey,
    Unique,
}

impl fmt::Display for ConstraintType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrimaryKey => write!(f, "PRIMARY KEY"),
            Self::Unique => write!(f, "UNIQUE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConstraintDefinition {
    pub id: ConstraintId,
    pub name: Arc<str>,
    pub constraint_type: ConstraintType,
    pub column_ids: Vec<FieldId>,
}

/// Stored query definition of a view or materialized view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewDefinition {
    pub query: Arc<str>,
    /// Tables the view reads from, used for invalidation and refresh.
    pub underlying: Vec<EntityId>,
    /// Refresh bookkeeping, present only on materialized views.
    pub criteria: Option<MaterializedCriteria>,
}

/// A relational table, view, or materialized view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableDefinition {
    pub id: EntityId,
    pub namespace_id: NamespaceId,
    pub name: Arc<str>,
    pub entity_type: EntityType,
    pub columns: Repository<FieldId, ColumnDefinition>,
    pub constraints: Vec<ConstraintDefinition>,
    pub view: Option<ViewDefinition>,
}

impl TableDefinition {
    /// Columns in ordinal order.
    pub fn columns_in_position_order(&self) -> Vec<Arc<ColumnDefinition>> {
        let mut columns: Vec<_> = self.columns.resource_iter().map(Arc::clone).collect();
        columns.sort_by_key(|c| c.position);
        columns
    }

    pub fn column_by_id(&self, id: FieldId) -> Option<Arc<ColumnDefinition>> {
        self.columns.get_by_id(&id)
    }

    /// Lookup by name. The caller normalizes the probe according to the
    /// owning namespace's case sensitivity.
    pub fn column_by_name(&self, name: &str) -> Option<Arc<ColumnDefinition>> {
        self.columns.get_by_name(name)
    }

    pub fn constraint_by_name(&self, name: &str) -> Option<&ConstraintDefinition> {
        self.constraints.iter().find(|c| c.name.as_ref() == name)
    }

    pub fn primary_key(&self) -> Option<&ConstraintDefinition> {
        self.constraints
            .iter()
            .find(|c| c.constraint_type == ConstraintType::PrimaryKey)
    }

    /// Constraints that reference the given column.
    pub fn constraints_on_column(&self, column_id: FieldId) -> Vec<&ConstraintDefinition> {
        self.constraints
            .iter()
            .filter(|c| c.column_ids.contains(&column_id))
            .collect()
    }

    pub fn is_view(&self) -> bool {
        matches!(
            self.entity_type,
            EntityType::View | EntityType::MaterializedView
        )
    }

    pub fn is_materialized(&self) -> bool {
        self.entity_type == EntityType::MaterializedView
    }
}

/// A document collection. Collections are schemaless at the logical layer;
/// fields materialize only physically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionDefinition {
    pub id: EntityId,
    pub namespace_id: NamespaceId,
    pub name: Arc<str>,
}

/// A property graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphDefinition {
    pub id: EntityId,
    pub namespace_id: NamespaceId,
    pub name: Arc<str>,
}

/// Read-side view over any logical entity, regardless of data model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogicalEntity {
    Table(Arc<TableDefinition>),
    Collection(Arc<CollectionDefinition>),
    Graph(Arc<GraphDefinition>),
}

impl LogicalEntity {
    pub fn id(&self) -> EntityId {
        match self {
            Self::Table(t) => t.id,
            Self::Collection(c) => c.id,
            Self::Graph(g) => g.id,
        }
    }

    pub fn namespace_id(&self) -> NamespaceId {
        match self {
            Self::Table(t) => t.namespace_id,
            Self::Collection(c) => c.namespace_id,
            Self::Graph(g) => g.namespace_id,
        }
    }

    pub fn name(&self) -> Arc<str> {
        match self {
            Self::Table(t) => Arc::clone(&t.name),
            Self::Collection(c) => Arc::clone(&c.name),
            Self::Graph(g) => Arc::clone(&g.name),
        }
    }

    pub fn data_model(&self) -> DataModel {
        match self {
            Self::Table(_) => DataModel::Relational,
            Self::Collection(_) => DataModel::Document,
            Self::Graph(_) => DataModel::Graph,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Table(t) => t.entity_type,
            Self::Collection(_) | Self::Graph(_) => EntityType::Entity,
        }
    }

    pub fn as_table(&self) -> Option<&Arc<TableDefinition>> {
        match self {
            Self::Table(t) => Some(t),
            _ => None,
        }
    }
}

/// Declaration of a column as it arrives from DDL, before ids are assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: Arc<str>,
    pub poly_type: PolyType,
    pub collection_type: Option<PolyType>,
    pub length: Option<u64>,
    pub scale: Option<u64>,
    pub dimension: Option<u64>,
    pub cardinality: Option<u64>,
    pub nullable: bool,
    pub default: Option<DefaultValue>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<Arc<str>>, poly_type: PolyType) -> Self {
        Self {
            name: name.into(),
            poly_type,
            collection_type: None,
            length: None,
            scale: None,
            dimension: None,
            cardinality: None,
            nullable: true,
            default: None,
        }
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn with_length(mut self, length: u64) -> Self {
        self.length = Some(length);
        self
    }

    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }
}

/// A compiled SQL-style name pattern.
///
/// `%` matches any run of characters, `_` matches a single character, and
/// everything else matches literally. An absent pattern means "match all",
/// which callers express with `Option<&Pattern>`.
#[derive(Debug, Clone)]
pub struct Pattern {
    pattern: Arc<str>,
    regex: Regex,
}

impl Pattern {
    pub fn of(pattern: impl AsRef<str>, case_sensitive: bool) -> Self {
        let pattern = pattern.as_ref();
        let mut expression = String::with_capacity(pattern.len() + 8);
        if !case_sensitive {
            expression.push_str("(?i)");
        }
        expression.push('^');
        for ch in pattern.chars() {
            match ch {
                '%' => expression.push_str(".*"),
                '_' => expression.push('.'),
                other => {
                    let mut buf = [0u8; 4];
                    expression.push_str(&regex::escape(other.encode_utf8(&mut buf)));
                }
            }
        }
        expression.push('$');
        let regex =
            Regex::new(&expression).expect("escaped pattern is always a valid expression");
        Self {
            pattern: Arc::from(pattern),
            regex,
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

/// Applies a namespace's case-sensitivity rule to a name.
///
/// Case-insensitive namespaces store and compare lower-cased names, so both
/// writes and probes pass through here.
pub(crate) fn normalize_name(name: &str, case_sensitive: bool) -> Arc<str> {
    if case_sensitive {
        Arc::from(name)
    } else {
        Arc::from(name.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_compiles_sql_wildcards() {
        let pattern = Pattern::of("emp%_id", true);
        assert!(pattern.matches("employee_id"));
        assert!(pattern.matches("empXid"));
        assert!(!pattern.matches("EMPLOYEE_ID"));
        assert!(!pattern.matches("employee_id2"));
    }

    #[test]
    fn pattern_escapes_regex_metacharacters() {
        let pattern = Pattern::of("a.b%", true);
        assert!(pattern.matches("a.bc"));
        assert!(!pattern.matches("aXbc"));
    }

    #[test]
    fn case_insensitive_pattern() {
        let pattern = Pattern::of("Foo%", false);
        assert!(pattern.matches("foobar"));
        assert!(pattern.matches("FOOBAR"));
    }

    #[test]
    fn normalize_respects_sensitivity() {
        assert_eq!(normalize_name("Foo", true).as_ref(), "Foo");
        assert_eq!(normalize_name("Foo", false).as_ref(), "foo");
    }

    proptest::proptest! {
        // Without wildcards a pattern is a literal, regex metacharacters
        // included.
        #[test]
        fn literal_pattern_matches_only_itself(
            name in r"[a-zA-Z0-9.*+?()\[\]{}^$|\\-]{0,16}",
            other in r"[a-zA-Z0-9]{1,16}",
        ) {
            let pattern = Pattern::of(&name, true);
            proptest::prop_assert!(pattern.matches(&name));
            if other != name {
                proptest::prop_assert!(!pattern.matches(&other));
            }
        }

        #[test]
        fn percent_matches_any_tail(
            prefix in r"[a-zA-Z0-9]{0,8}",
            tail in r"[a-zA-Z0-9.$^]{0,8}",
        ) {
            let pattern = Pattern::of(format!("{prefix}%"), true);
            let candidate = format!("{prefix}{tail}");
            proptest::prop_assert!(pattern.matches(&candidate));
        }

        #[test]
        fn underscore_matches_exactly_one_character(
            stem in r"[a-zA-Z0-9]{0,8}",
            ch in proptest::char::range('a', 'z'),
        ) {
            let pattern = Pattern::of(format!("{stem}_"), true);
            let one = format!("{stem}{ch}");
            let two = format!("{stem}{ch}{ch}");
            proptest::prop_assert!(pattern.matches(&one));
            proptest::prop_assert!(!pattern.matches(&stem));
            proptest::prop_assert!(!pattern.matches(&two));
        }
    }
}
