//! Per-table policy storage.
//!
//! Schemas are declared with [`define_schema`] and compiled once at startup.
//! Compilation validates names and sorts each table's policies by priority,
//! so evaluation only ever walks a pre-ordered slice.

use std::collections::{BTreeMap, BTreeSet};

use rowguard_types::{AuthContext, Operation};
use tracing::debug;

use crate::error::ConfigurationError;
use crate::policy::PolicyDefinition;

// ============================================================================
// Declarative schema
// ============================================================================

/// Row-level rules for one table.
#[derive(Debug, Clone, Default)]
pub struct TableSchema {
    pub policies: Vec<PolicyDefinition>,
    /// Outcome when no allow/deny policy matches.
    pub default_deny: bool,
    /// Roles that bypass every row-level check on this table.
    pub skip_for: BTreeSet<String>,
}

impl TableSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn policy(mut self, policy: impl Into<PolicyDefinition>) -> Self {
        self.policies.push(policy.into());
        self
    }

    pub fn policies<I, P>(mut self, policies: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PolicyDefinition>,
    {
        self.policies.extend(policies.into_iter().map(Into::into));
        self
    }

    pub fn default_deny(mut self, default_deny: bool) -> Self {
        self.default_deny = default_deny;
        self
    }

    pub fn skip_for<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_for.extend(roles.into_iter().map(Into::into));
        self
    }
}

/// An ordered set of table schemas.
#[derive(Debug, Clone, Default)]
pub struct RlsSchema {
    tables: Vec<(String, TableSchema)>,
}

impl RlsSchema {
    pub fn tables(&self) -> impl Iterator<Item = (&str, &TableSchema)> {
        self.tables.iter().map(|(name, schema)| (name.as_str(), schema))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Declares row-level rules for a set of tables.
///
/// Declaration order is kept so registration errors are reported against
/// the first offending table.
pub fn define_schema<I, S>(tables: I) -> RlsSchema
where
    I: IntoIterator<Item = (S, TableSchema)>,
    S: Into<String>,
{
    RlsSchema {
        tables: tables
            .into_iter()
            .map(|(name, schema)| (name.into(), schema))
            .collect(),
    }
}

// ============================================================================
// Compiled tables
// ============================================================================

/// A registered table with its policies sorted by priority, highest first.
#[derive(Debug, Clone)]
pub struct CompiledTable {
    name: String,
    policies: Vec<PolicyDefinition>,
    default_deny: bool,
    skip_for: BTreeSet<String>,
}

impl CompiledTable {
    fn compile(name: String, schema: TableSchema) -> Result<Self, ConfigurationError> {
        if name.is_empty() {
            return Err(ConfigurationError::EmptyTableName);
        }

        let mut seen = BTreeSet::new();
        for (index, policy) in schema.policies.iter().enumerate() {
            if policy.name.is_empty() {
                return Err(ConfigurationError::UnnamedPolicy {
                    table: name.clone(),
                    index,
                });
            }
            if !seen.insert(policy.name.as_str()) {
                return Err(ConfigurationError::DuplicatePolicy {
                    table: name.clone(),
                    name: policy.name.clone(),
                });
            }
        }

        let mut policies = schema.policies;
        // Stable: equal priorities keep declaration order.
        policies.sort_by(|a, b| b.priority.cmp(&a.priority));

        Ok(Self {
            name,
            policies,
            default_deny: schema.default_deny,
            skip_for: schema.skip_for,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_deny(&self) -> bool {
        self.default_deny
    }

    pub fn skip_for(&self) -> &BTreeSet<String> {
        &self.skip_for
    }

    /// All policies in evaluation order.
    pub fn policies(&self) -> &[PolicyDefinition] {
        &self.policies
    }

    /// Policy names in evaluation order.
    pub fn policy_names(&self) -> Vec<&str> {
        self.policies.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn policy(&self, name: &str) -> Option<&PolicyDefinition> {
        self.policies.iter().find(|p| p.name == name)
    }

    /// Policies declared for `operation` (or `all`), in evaluation order.
    pub fn policies_for(&self, operation: Operation) -> impl Iterator<Item = &PolicyDefinition> {
        self.policies.iter().filter(move |p| p.applies_to(operation))
    }

    /// Returns whether `auth` holds one of the table's bypass roles.
    pub fn is_skipped_for(&self, auth: &AuthContext) -> bool {
        auth.roles.iter().any(|role| self.skip_for.contains(role))
    }
}

// ============================================================================
// PolicyRegistry
// ============================================================================

/// Compiled policies for every registered table.
///
/// Built once at startup, then shared read-only (typically behind an `Arc`).
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    tables: BTreeMap<String, CompiledTable>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiles every table of `schema` into a fresh registry.
    pub fn from_schema(schema: RlsSchema) -> Result<Self, ConfigurationError> {
        let mut registry = Self::new();
        registry.load_schema(schema)?;
        Ok(registry)
    }

    /// Compiles and stores the rules for `table`.
    ///
    /// Fails on a duplicate table, an unnamed policy, or two policies with
    /// the same name. Nothing is stored when registration fails.
    pub fn register(
        &mut self,
        table: impl Into<String>,
        schema: TableSchema,
    ) -> Result<(), ConfigurationError> {
        let table = table.into();
        if self.tables.contains_key(&table) {
            return Err(ConfigurationError::DuplicateTable { table });
        }

        let compiled = CompiledTable::compile(table.clone(), schema)?;
        debug!(
            table = %table,
            policies = compiled.policies.len(),
            default_deny = compiled.default_deny,
            skip_for = ?compiled.skip_for,
            "Registered RLS table"
        );
        self.tables.insert(table, compiled);
        Ok(())
    }

    /// Registers each table in declaration order, stopping at the first error.
    pub fn load_schema(&mut self, schema: RlsSchema) -> Result<(), ConfigurationError> {
        for (table, table_schema) in schema.tables {
            self.register(table, table_schema)?;
        }
        Ok(())
    }

    /// Policies for `table` whose operations include `operation` or `all`.
    ///
    /// Unregistered tables yield an empty list.
    pub fn get_policies_for(&self, table: &str, operation: Operation) -> Vec<&PolicyDefinition> {
        self.tables
            .get(table)
            .map(|t| t.policies_for(operation).collect())
            .unwrap_or_default()
    }

    pub fn table(&self, name: &str) -> Option<&CompiledTable> {
        self.tables.get(name)
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    /// Registered table names, sorted.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{allow, deny, filter};
    use serde_json::json;

    fn users_schema() -> TableSchema {
        TableSchema::new()
            .policy(allow(Operation::Read, |_| true).named("read-all").priority(10))
            .policy(deny(Operation::Delete, |_| true).named("no-delete").priority(200))
            .policy(filter(Operation::Read, |_| json!({})).named("tenant").priority(100))
            .default_deny(true)
            .skip_for(["admin"])
    }

    #[test]
    fn register_sorts_by_priority_descending() {
        let mut registry = PolicyRegistry::new();
        registry.register("users", users_schema()).unwrap();

        let table = registry.table("users").unwrap();
        assert_eq!(table.policy_names(), vec!["no-delete", "tenant", "read-all"]);
    }

    #[test]
    fn equal_priorities_keep_declaration_order() {
        let schema = TableSchema::new()
            .policy(allow(Operation::Read, |_| true).named("first"))
            .policy(allow(Operation::Read, |_| true).named("second"))
            .policy(allow(Operation::Read, |_| true).named("third"));

        let registry = PolicyRegistry::from_schema(define_schema([("t", schema)])).unwrap();
        assert_eq!(
            registry.table("t").unwrap().policy_names(),
            vec!["first", "second", "third"]
        );
    }

    #[test]
    fn duplicate_table_is_rejected() {
        let mut registry = PolicyRegistry::new();
        registry.register("users", TableSchema::new()).unwrap();

        let err = registry.register("users", TableSchema::new()).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::DuplicateTable {
                table: "users".into()
            }
        );
    }

    #[test]
    fn duplicate_policy_name_is_rejected() {
        let schema = TableSchema::new()
            .policy(allow(Operation::Read, |_| true).named("same"))
            .policy(deny(Operation::Delete, |_| true).named("same"));

        let err = PolicyRegistry::new().register("users", schema).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::DuplicatePolicy {
                table: "users".into(),
                name: "same".into()
            }
        );
    }

    #[test]
    fn unnamed_policy_is_rejected() {
        let schema = TableSchema::new()
            .policy(allow(Operation::Read, |_| true).named("ok"))
            .policy(allow(Operation::Read, |_| true));

        let err = PolicyRegistry::new().register("posts", schema).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::UnnamedPolicy {
                table: "posts".into(),
                index: 1
            }
        );
    }

    #[test]
    fn empty_table_name_is_rejected() {
        let err = PolicyRegistry::new()
            .register("", TableSchema::new())
            .unwrap_err();
        assert_eq!(err, ConfigurationError::EmptyTableName);
    }

    #[test]
    fn failed_registration_stores_nothing() {
        let mut registry = PolicyRegistry::new();
        let schema = TableSchema::new()
            .policy(allow(Operation::Read, |_| true).named("dup"))
            .policy(allow(Operation::Read, |_| true).named("dup"));

        assert!(registry.register("users", schema).is_err());
        assert!(!registry.has_table("users"));
    }

    #[test]
    fn load_schema_stops_at_first_error() {
        let schema = define_schema([
            ("a", TableSchema::new()),
            (
                "b",
                TableSchema::new()
                    .policy(allow(Operation::Read, |_| true).named("x"))
                    .policy(allow(Operation::Read, |_| true).named("x")),
            ),
            ("c", TableSchema::new()),
        ]);

        let mut registry = PolicyRegistry::new();
        assert!(registry.load_schema(schema).is_err());
        assert!(registry.has_table("a"));
        assert!(!registry.has_table("b"));
        assert!(!registry.has_table("c"));
    }

    #[test]
    fn get_policies_for_matches_operation_or_all() {
        let schema = TableSchema::new()
            .policy(allow(Operation::All, |_| true).named("any").priority(1))
            .policy(deny(Operation::Delete, |_| true).named("no-delete"))
            .policy(allow([Operation::Read, Operation::Update], |_| true).named("ru"));

        let mut registry = PolicyRegistry::new();
        registry.register("docs", schema).unwrap();

        let names = |op: Operation| -> Vec<String> {
            registry
                .get_policies_for("docs", op)
                .into_iter()
                .map(|p| p.name.clone())
                .collect()
        };
        assert_eq!(names(Operation::Delete), vec!["any", "no-delete"]);
        assert_eq!(names(Operation::Read), vec!["any", "ru"]);
        assert_eq!(names(Operation::Create), vec!["any"]);
        assert!(registry.get_policies_for("missing", Operation::Read).is_empty());
    }

    #[test]
    fn compiled_table_reads_back_schema() {
        let mut registry = PolicyRegistry::new();
        registry.register("users", users_schema()).unwrap();

        let table = registry.table("users").unwrap();
        assert_eq!(table.name(), "users");
        assert!(table.default_deny());
        assert!(table.skip_for().contains("admin"));
        assert!(table.policy("tenant").is_some());
        assert_eq!(registry.tables().collect::<Vec<_>>(), vec!["users"]);
    }

    #[test]
    fn skip_for_matches_any_role() {
        let mut registry = PolicyRegistry::new();
        registry.register("users", users_schema()).unwrap();
        let table = registry.table("users").unwrap();

        assert!(table.is_skipped_for(&AuthContext::new("u").with_roles(["user", "admin"])));
        assert!(!table.is_skipped_for(&AuthContext::new("u").with_role("user")));
    }
}
