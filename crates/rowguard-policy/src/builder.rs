//! Policy factories.
//!
//! ```
//! use rowguard_policy::builder::{allow, deny, filter, validate};
//! use rowguard_types::Operation;
//! use serde_json::json;
//!
//! let admins = allow(Operation::All, |ctx| ctx.auth.has_role("admin"))
//!     .named("admin-full-access")
//!     .priority(100)
//!     .build();
//!
//! let no_delete = deny(Operation::Delete, |_| true)
//!     .named("no-delete")
//!     .priority(200)
//!     .build();
//!
//! let tenant = filter(Operation::Read, |ctx| json!({ "tenant_id": ctx.auth.tenant_id }))
//!     .named("tenant-isolation")
//!     .build();
//!
//! let positive = validate([Operation::Create, Operation::Update], |ctx| {
//!     ctx.data_value("amount").and_then(|v| v.as_f64()).is_some_and(|a| a >= 0.0)
//! })
//! .named("non-negative-amount")
//! .build();
//! # let _ = (admins, no_delete, tenant, positive);
//! ```
//!
//! Names are required. A policy built without `.named(..)` is rejected when
//! its table is registered.

use std::sync::Arc;

use rowguard_types::{Operation, PolicyEvaluationContext};

use crate::policy::{
    FilterOutput, IntoOperations, PolicyDefinition, PolicyKind, PolicyPredicate, PredicateOutput,
};

/// Builder returned by the policy factories.
#[derive(Debug, Clone)]
#[must_use = "call .build() to obtain the policy"]
pub struct PolicyBuilder {
    name: String,
    operations: Vec<Operation>,
    priority: i32,
    kind: PolicyKind,
    hints: Option<serde_json::Value>,
}

impl PolicyBuilder {
    fn new(operations: Vec<Operation>, kind: PolicyKind) -> Self {
        Self {
            name: String::new(),
            operations,
            priority: 0,
            kind,
            hints: None,
        }
    }

    /// Sets the policy name (unique within its table).
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the evaluation priority. Higher runs first. Defaults to 0.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Attaches opaque metadata for tooling.
    pub fn hints(mut self, hints: serde_json::Value) -> Self {
        self.hints = Some(hints);
        self
    }

    pub fn build(self) -> PolicyDefinition {
        PolicyDefinition {
            name: self.name,
            operations: self.operations,
            priority: self.priority,
            kind: self.kind,
            activation: None,
            hints: self.hints,
        }
    }
}

impl From<PolicyBuilder> for PolicyDefinition {
    fn from(builder: PolicyBuilder) -> Self {
        builder.build()
    }
}

fn predicate<F, R>(f: F) -> PolicyPredicate
where
    F: Fn(&PolicyEvaluationContext<'_>) -> R + Send + Sync + 'static,
    R: PredicateOutput,
{
    Arc::new(move |ctx: &PolicyEvaluationContext<'_>| f(ctx).into_outcome())
}

/// Grants access when `predicate` returns true.
pub fn allow<F, R>(operations: impl IntoOperations, predicate_fn: F) -> PolicyBuilder
where
    F: Fn(&PolicyEvaluationContext<'_>) -> R + Send + Sync + 'static,
    R: PredicateOutput,
{
    PolicyBuilder::new(
        operations.into_operations(),
        PolicyKind::Allow(predicate(predicate_fn)),
    )
}

/// Refuses access when `predicate` returns true.
pub fn deny<F, R>(operations: impl IntoOperations, predicate_fn: F) -> PolicyBuilder
where
    F: Fn(&PolicyEvaluationContext<'_>) -> R + Send + Sync + 'static,
    R: PredicateOutput,
{
    PolicyBuilder::new(
        operations.into_operations(),
        PolicyKind::Deny(predicate(predicate_fn)),
    )
}

/// Contributes WHERE conditions to reads.
pub fn filter<F, R>(operations: impl IntoOperations, filter_fn: F) -> PolicyBuilder
where
    F: Fn(&PolicyEvaluationContext<'_>) -> R + Send + Sync + 'static,
    R: FilterOutput,
{
    PolicyBuilder::new(
        operations.into_operations(),
        PolicyKind::Filter(Arc::new(move |ctx: &PolicyEvaluationContext<'_>| {
            filter_fn(ctx).into_conditions()
        })),
    )
}

/// Rejects create/update payloads when `validate_fn` returns false.
pub fn validate<F, R>(operations: impl IntoOperations, validate_fn: F) -> PolicyBuilder
where
    F: Fn(&PolicyEvaluationContext<'_>) -> R + Send + Sync + 'static,
    R: PredicateOutput,
{
    PolicyBuilder::new(
        operations.into_operations(),
        PolicyKind::Validate(predicate(validate_fn)),
    )
}
