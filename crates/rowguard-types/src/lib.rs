//! # rowguard-types: Core types for `rowguard`
//!
//! This crate contains the request-scoped types shared across the engine:
//! - Operations ([`Operation`])
//! - Caller identity ([`AuthContext`], [`RlsContext`])
//! - The borrowed view handed to every predicate ([`PolicyEvaluationContext`])
//! - Row representation ([`Row`], re-exported [`Value`])
//!
//! Everything here is constructed per request by the host application and is
//! treated as immutable for the duration of one logical operation.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
    str::FromStr,
};

use serde::{Deserialize, Serialize};

pub use serde_json::Value;

/// A single row: column name to value, insertion order preserved.
pub type Row = serde_json::Map<String, Value>;

// ============================================================================
// Operation
// ============================================================================

/// Database operation a policy applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    /// Matches every operation when used on a policy.
    All,
}

impl Operation {
    /// Returns whether a policy declared for `self` covers `requested`.
    pub fn covers(self, requested: Operation) -> bool {
        self == Operation::All || self == requested
    }

    /// Returns whether this operation writes data.
    pub fn is_write(self) -> bool {
        matches!(
            self,
            Operation::Create | Operation::Update | Operation::Delete
        )
    }

    /// Returns whether `validate` policies run for this operation.
    pub fn carries_payload(self) -> bool {
        matches!(self, Operation::Create | Operation::Update)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::All => "all",
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown operation name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOperation(pub String);

impl Display for UnknownOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown operation '{}'", self.0)
    }
}

impl std::error::Error for UnknownOperation {}

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" | "insert" => Ok(Operation::Create),
            "read" | "select" => Ok(Operation::Read),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            "all" => Ok(Operation::All),
            other => Err(UnknownOperation(other.to_string())),
        }
    }
}

// ============================================================================
// AuthContext
// ============================================================================

/// Identity of the caller for one logical operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthContext {
    /// Authenticated user identifier.
    pub user_id: String,
    /// Tenant the caller is scoped to, if any.
    pub tenant_id: Option<String>,
    /// Roles granted to the caller.
    pub roles: BTreeSet<String>,
    /// Trusted internal caller. Always bypasses row and field checks.
    pub is_system: bool,
    /// Organizations the caller belongs to.
    pub organization_ids: Option<Vec<String>>,
    /// Fine-grained permission strings.
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    /// Free-form attributes from the identity provider.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl AuthContext {
    /// Creates a context for an ordinary user with no roles.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Self::default()
        }
    }

    /// Creates a system context that bypasses every check.
    pub fn system() -> Self {
        Self {
            user_id: "system".to_string(),
            is_system: true,
            ..Self::default()
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    pub fn with_organizations<I, S>(mut self, organizations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.organization_ids = Some(organizations.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    /// Returns whether the caller holds at least one of `roles`.
    pub fn has_any_role<'r>(&self, roles: impl IntoIterator<Item = &'r str>) -> bool {
        roles.into_iter().any(|r| self.roles.contains(r))
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    pub fn in_organization(&self, organization_id: &str) -> bool {
        self.organization_ids
            .as_ref()
            .is_some_and(|orgs| orgs.iter().any(|o| o == organization_id))
    }
}

// ============================================================================
// RlsContext
// ============================================================================

/// Everything the host passes in for one request.
///
/// `meta` is where collaborators that run before evaluation (relationship
/// resolution, organization lookups) leave their results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RlsContext {
    pub auth: AuthContext,
    pub meta: Option<Value>,
}

impl RlsContext {
    pub fn new(auth: AuthContext) -> Self {
        Self { auth, meta: None }
    }

    /// Context for trusted internal jobs.
    pub fn system() -> Self {
        Self::new(AuthContext::system())
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Inserts `value` under `key` in `meta`, creating the object if needed.
    ///
    /// A non-object `meta` is replaced.
    pub fn insert_meta(&mut self, key: impl Into<String>, value: Value) {
        match &mut self.meta {
            Some(Value::Object(map)) => {
                map.insert(key.into(), value);
            }
            slot => {
                let mut map = serde_json::Map::new();
                map.insert(key.into(), value);
                *slot = Some(Value::Object(map));
            }
        }
    }

    /// Builds the borrowed evaluation view for `table` and `operation`.
    pub fn evaluation<'a>(
        &'a self,
        table: &'a str,
        operation: Operation,
    ) -> PolicyEvaluationContext<'a> {
        PolicyEvaluationContext {
            auth: &self.auth,
            table,
            operation,
            row: None,
            data: None,
            meta: self.meta.as_ref(),
        }
    }
}

// ============================================================================
// PolicyEvaluationContext
// ============================================================================

/// Borrowed view handed to every predicate.
///
/// Predicates never own request data, so the same row can be checked against
/// many fields without cloning it.
#[derive(Debug, Clone, Copy)]
pub struct PolicyEvaluationContext<'a> {
    pub auth: &'a AuthContext,
    pub table: &'a str,
    pub operation: Operation,
    /// Existing row, when the caller has loaded it.
    pub row: Option<&'a Row>,
    /// Proposed write payload.
    pub data: Option<&'a Row>,
    pub meta: Option<&'a Value>,
}

impl<'a> PolicyEvaluationContext<'a> {
    pub fn new(auth: &'a AuthContext, table: &'a str, operation: Operation) -> Self {
        Self {
            auth,
            table,
            operation,
            row: None,
            data: None,
            meta: None,
        }
    }

    pub fn with_row(mut self, row: &'a Row) -> Self {
        self.row = Some(row);
        self
    }

    pub fn with_data(mut self, data: &'a Row) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_meta(mut self, meta: &'a Value) -> Self {
        self.meta = Some(meta);
        self
    }

    /// Same context with a different operation.
    pub fn for_operation(mut self, operation: Operation) -> Self {
        self.operation = operation;
        self
    }

    pub fn row_value(&self, column: &str) -> Option<&'a Value> {
        self.row.and_then(|r| r.get(column))
    }

    pub fn data_value(&self, column: &str) -> Option<&'a Value> {
        self.data.and_then(|d| d.get(column))
    }

    /// Looks up a top-level key of an object-shaped `meta`.
    pub fn meta_value(&self, key: &str) -> Option<&'a Value> {
        self.meta.and_then(|m| m.get(key))
    }

    /// Returns whether the existing row's `column` holds the caller's user id.
    pub fn is_owner(&self, column: &str) -> bool {
        self.row_value(column)
            .is_some_and(|v| value_matches(v, &self.auth.user_id))
    }

    /// Returns whether the existing row's `column` holds the caller's tenant.
    pub fn row_in_tenant(&self, column: &str) -> bool {
        match (&self.auth.tenant_id, self.row_value(column)) {
            (Some(tenant), Some(v)) => value_matches(v, tenant),
            _ => false,
        }
    }
}

/// Compares a JSON scalar to an identifier string.
///
/// Ids arrive as strings or integers depending on the storage layer.
pub fn value_matches(value: &Value, expected: &str) -> bool {
    match value {
        Value::String(s) => s == expected,
        Value::Number(n) => n.to_string() == expected,
        _ => false,
    }
}

/// JavaScript-style truthiness for feature flags and free-form meta.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_case::test_case;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test_case(Operation::All, Operation::Read, true; "all covers read")]
    #[test_case(Operation::All, Operation::Delete, true; "all covers delete")]
    #[test_case(Operation::Read, Operation::Read, true; "exact match")]
    #[test_case(Operation::Read, Operation::Update, false; "different op")]
    #[test_case(Operation::Create, Operation::All, false; "specific does not cover all")]
    fn operation_covers(declared: Operation, requested: Operation, expected: bool) {
        assert_eq!(declared.covers(requested), expected);
    }

    #[test]
    fn operation_parses_sql_aliases() {
        assert_eq!("select".parse::<Operation>(), Ok(Operation::Read));
        assert_eq!("insert".parse::<Operation>(), Ok(Operation::Create));
        assert!("truncate".parse::<Operation>().is_err());
        assert_eq!(Operation::Update.to_string(), "update");
    }

    #[test]
    fn auth_context_builder() {
        let auth = AuthContext::new("u1")
            .with_tenant("t1")
            .with_roles(["user", "editor"])
            .with_organizations(["org-a"])
            .with_permission("posts:write");

        assert_eq!(auth.user_id, "u1");
        assert_eq!(auth.tenant_id.as_deref(), Some("t1"));
        assert!(auth.has_role("editor"));
        assert!(auth.has_any_role(["admin", "user"]));
        assert!(!auth.has_any_role(["admin"]));
        assert!(auth.in_organization("org-a"));
        assert!(!auth.in_organization("org-b"));
        assert!(auth.has_permission("posts:write"));
        assert!(!auth.is_system);
    }

    #[test]
    fn system_context_is_flagged() {
        let ctx = RlsContext::system();
        assert!(ctx.auth.is_system);
    }

    #[test]
    fn insert_meta_creates_object() {
        let mut ctx = RlsContext::new(AuthContext::new("u1"));
        ctx.insert_meta("rebac", json!({"can_edit": true}));
        ctx.insert_meta("orgs", json!(["a"]));

        let meta = ctx.meta.as_ref().unwrap();
        assert_eq!(meta["rebac"]["can_edit"], json!(true));
        assert_eq!(meta["orgs"], json!(["a"]));
    }

    #[test]
    fn ownership_accepts_numeric_ids() {
        let auth = AuthContext::new("42").with_tenant("7");
        let r = row(json!({"owner_id": 42, "tenant_id": "7"}));
        let ctx = PolicyEvaluationContext::new(&auth, "posts", Operation::Read).with_row(&r);

        assert!(ctx.is_owner("owner_id"));
        assert!(ctx.row_in_tenant("tenant_id"));
        assert!(!ctx.is_owner("missing"));
    }

    #[test]
    fn row_in_tenant_requires_caller_tenant() {
        let auth = AuthContext::new("42");
        let r = row(json!({"tenant_id": "7"}));
        let ctx = PolicyEvaluationContext::new(&auth, "posts", Operation::Read).with_row(&r);

        assert!(!ctx.row_in_tenant("tenant_id"));
    }

    #[test_case(json!(null), false; "null")]
    #[test_case(json!(false), false; "bool false")]
    #[test_case(json!(true), true; "bool true")]
    #[test_case(json!(0), false; "zero")]
    #[test_case(json!(2), true; "nonzero")]
    #[test_case(json!(""), false; "empty string")]
    #[test_case(json!("on"), true; "non-empty string")]
    #[test_case(json!([]), true; "empty array")]
    fn truthiness(value: Value, expected: bool) {
        assert_eq!(is_truthy(&value), expected);
    }
}
