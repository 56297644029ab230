//! Declarative column-level access.
//!
//! ```
//! use rowguard_field::masking::mask_email;
//! use rowguard_field::schema::{
//!     FieldDefault, TableFieldAccess, define_field_access_schema, masked_field, never_accessible,
//!     owner_or_roles, read_only,
//! };
//!
//! let schema = define_field_access_schema([(
//!     "users",
//!     TableFieldAccess::new()
//!         .default_access(FieldDefault::Allow)
//!         .skip_for(["admin"])
//!         .field("id", read_only())
//!         .field("password_hash", never_accessible().omit_when_hidden())
//!         .field("email", masked_field(mask_email(), ["support"]))
//!         .field("salary", owner_or_roles(["hr"], "id")),
//! )]);
//! assert_eq!(schema.len(), 1);
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use rowguard_types::{PolicyEvaluationContext, Value};
use serde::{Deserialize, Serialize};

use crate::masking::{MaskFn, MaskingStrategy};

/// Read or write check for a single column.
pub type FieldPredicate = Arc<dyn Fn(&PolicyEvaluationContext<'_>) -> bool + Send + Sync>;

/// Fallback for columns without their own rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldDefault {
    #[default]
    Allow,
    Deny,
}

impl FieldDefault {
    pub fn allows(self) -> bool {
        self == FieldDefault::Allow
    }
}

// ============================================================================
// FieldAccessConfig
// ============================================================================

/// Rules for one column.
///
/// A missing `read` or `write` predicate falls back to the table default.
#[derive(Clone, Default)]
pub struct FieldAccessConfig {
    pub read: Option<FieldPredicate>,
    pub write: Option<FieldPredicate>,
    /// Replacement for hidden values. Without one, hidden values become `null`.
    pub mask_fn: Option<MaskFn>,
    /// Drop the key entirely instead of masking it.
    pub omit_when_hidden: bool,
}

impl FieldAccessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(
        mut self,
        predicate: impl Fn(&PolicyEvaluationContext<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.read = Some(Arc::new(predicate));
        self
    }

    pub fn write(
        mut self,
        predicate: impl Fn(&PolicyEvaluationContext<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.write = Some(Arc::new(predicate));
        self
    }

    pub fn mask(mut self, mask: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        self.mask_fn = Some(Arc::new(mask));
        self
    }

    pub fn mask_with(mut self, mask: MaskFn) -> Self {
        self.mask_fn = Some(mask);
        self
    }

    pub fn mask_strategy(self, strategy: MaskingStrategy) -> Self {
        self.mask_with(strategy.into_mask_fn())
    }

    pub fn omit_when_hidden(mut self) -> Self {
        self.omit_when_hidden = true;
        self
    }
}

impl fmt::Debug for FieldAccessConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldAccessConfig")
            .field("read", &self.read.is_some())
            .field("write", &self.write.is_some())
            .field("mask_fn", &self.mask_fn.is_some())
            .field("omit_when_hidden", &self.omit_when_hidden)
            .finish()
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn role_set<I, S>(roles: I) -> Arc<BTreeSet<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Arc::new(roles.into_iter().map(Into::into).collect())
}

fn holds_any(ctx: &PolicyEvaluationContext<'_>, roles: &BTreeSet<String>) -> bool {
    ctx.auth.roles.iter().any(|r| roles.contains(r))
}

/// Hidden from and read-only for everyone except bypass callers.
pub fn never_accessible() -> FieldAccessConfig {
    FieldAccessConfig::new().read(|_| false).write(|_| false)
}

/// Readable by everyone, writable by nobody.
pub fn read_only() -> FieldAccessConfig {
    FieldAccessConfig::new().read(|_| true).write(|_| false)
}

/// Readable and writable only by the user whose id is in `owner_column`.
pub fn owner_only(owner_column: impl Into<String>) -> FieldAccessConfig {
    let column: Arc<str> = Arc::from(owner_column.into());
    let write_column = Arc::clone(&column);
    FieldAccessConfig::new()
        .read(move |ctx| ctx.is_owner(&column))
        .write(move |ctx| ctx.is_owner(&write_column))
}

/// Readable and writable by the owner or any of `roles`.
pub fn owner_or_roles<I, S>(roles: I, owner_column: impl Into<String>) -> FieldAccessConfig
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let roles = role_set(roles);
    let column: Arc<str> = Arc::from(owner_column.into());
    let check: FieldPredicate = Arc::new(move |ctx: &PolicyEvaluationContext<'_>| {
        ctx.is_owner(&column) || holds_any(ctx, &roles)
    });
    FieldAccessConfig {
        read: Some(Arc::clone(&check)),
        write: Some(check),
        ..FieldAccessConfig::default()
    }
}

/// Readable and writable only by holders of `roles`.
pub fn roles_only<I, S>(roles: I) -> FieldAccessConfig
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let roles = role_set(roles);
    let check: FieldPredicate =
        Arc::new(move |ctx: &PolicyEvaluationContext<'_>| holds_any(ctx, &roles));
    FieldAccessConfig {
        read: Some(Arc::clone(&check)),
        write: Some(check),
        ..FieldAccessConfig::default()
    }
}

/// Readable by everyone, writable by holders of `roles`.
pub fn public_read_restricted_write<I, S>(roles: I) -> FieldAccessConfig
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let roles = role_set(roles);
    FieldAccessConfig::new()
        .read(|_| true)
        .write(move |ctx| holds_any(ctx, &roles))
}

/// Masked with `mask_fn` unless the caller holds one of `read_roles`.
///
/// Writes fall back to the table default.
pub fn masked_field<I, S>(mask_fn: MaskFn, read_roles: I) -> FieldAccessConfig
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let roles = role_set(read_roles);
    FieldAccessConfig::new()
        .read(move |ctx| holds_any(ctx, &roles))
        .mask_with(mask_fn)
}

// ============================================================================
// Table and schema
// ============================================================================

/// Column rules for one table.
#[derive(Debug, Clone, Default)]
pub struct TableFieldAccess {
    pub default: FieldDefault,
    /// Roles that see and write every column unmasked.
    pub skip_for: BTreeSet<String>,
    /// Configured columns, in declaration order.
    pub fields: Vec<(String, FieldAccessConfig)>,
}

impl TableFieldAccess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn default_access(mut self, default: FieldDefault) -> Self {
        self.default = default;
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

    pub fn field(mut self, name: impl Into<String>, config: FieldAccessConfig) -> Self {
        self.fields.push((name.into(), config));
        self
    }
}

/// Column rules for a set of tables.
#[derive(Debug, Clone, Default)]
pub struct FieldAccessSchema {
    pub(crate) tables: Vec<(String, TableFieldAccess)>,
}

impl FieldAccessSchema {
    pub fn tables(&self) -> impl Iterator<Item = (&str, &TableFieldAccess)> {
        self.tables.iter().map(|(name, table)| (name.as_str(), table))
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

pub fn define_field_access_schema<I, S>(tables: I) -> FieldAccessSchema
where
    I: IntoIterator<Item = (S, TableFieldAccess)>,
    S: Into<String>,
{
    FieldAccessSchema {
        tables: tables
            .into_iter()
            .map(|(name, table)| (name.into(), table))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowguard_types::{AuthContext, Operation, Row};
    use serde_json::json;

    fn check(
        predicate: Option<&FieldPredicate>,
        auth: &AuthContext,
        row: Option<&Row>,
    ) -> Option<bool> {
        let ctx = PolicyEvaluationContext::new(auth, "users", Operation::Read);
        let ctx = match row {
            Some(row) => ctx.with_row(row),
            None => ctx,
        };
        predicate.map(|p| p(&ctx))
    }

    #[test]
    fn never_accessible_blocks_everyone() {
        let config = never_accessible();
        let auth = AuthContext::new("u1").with_role("admin");
        assert_eq!(check(config.read.as_ref(), &auth, None), Some(false));
        assert_eq!(check(config.write.as_ref(), &auth, None), Some(false));
    }

    #[test]
    fn owner_only_compares_owner_column() {
        let config = owner_only("user_id");
        let row = json!({"user_id": "u1"}).as_object().cloned().unwrap();

        let owner = AuthContext::new("u1");
        let stranger = AuthContext::new("u2");
        assert_eq!(check(config.read.as_ref(), &owner, Some(&row)), Some(true));
        assert_eq!(check(config.write.as_ref(), &stranger, Some(&row)), Some(false));
        assert_eq!(check(config.read.as_ref(), &owner, None), Some(false));
    }

    #[test]
    fn owner_or_roles_accepts_either() {
        let config = owner_or_roles(["hr"], "id");
        let row = json!({"id": "u1"}).as_object().cloned().unwrap();

        assert_eq!(check(config.read.as_ref(), &AuthContext::new("u1"), Some(&row)), Some(true));
        assert_eq!(
            check(config.read.as_ref(), &AuthContext::new("x").with_role("hr"), Some(&row)),
            Some(true)
        );
        assert_eq!(check(config.read.as_ref(), &AuthContext::new("x"), Some(&row)), Some(false));
    }

    #[test]
    fn public_read_restricted_write_splits_access() {
        let config = public_read_restricted_write(["editor"]);
        let reader = AuthContext::new("r");
        let editor = AuthContext::new("e").with_role("editor");

        assert_eq!(check(config.read.as_ref(), &reader, None), Some(true));
        assert_eq!(check(config.write.as_ref(), &reader, None), Some(false));
        assert_eq!(check(config.write.as_ref(), &editor, None), Some(true));
    }

    #[test]
    fn masked_field_leaves_write_to_default() {
        let config = masked_field(crate::masking::mask_email(), ["support"]);
        assert!(config.write.is_none());
        assert!(config.mask_fn.is_some());
        assert!(!config.omit_when_hidden);
    }

    #[test]
    fn roles_only_and_read_only() {
        let roles = roles_only(["finance"]);
        let finance = AuthContext::new("f").with_role("finance");
        assert_eq!(check(roles.write.as_ref(), &finance, None), Some(true));
        assert_eq!(check(roles.read.as_ref(), &AuthContext::new("x"), None), Some(false));

        let ro = read_only();
        assert_eq!(check(ro.read.as_ref(), &finance, None), Some(true));
        assert_eq!(check(ro.write.as_ref(), &finance, None), Some(false));
    }

    #[test]
    fn field_default_deserializes_lowercase() {
        let default: FieldDefault = serde_json::from_value(json!("deny")).unwrap();
        assert_eq!(default, FieldDefault::Deny);
        assert!(!default.allows());
    }
}
