//! Policy definitions.
//!
//! A table's rules live in one ordered list that mixes four kinds of policy.
//! Each kind carries a differently-typed function, so [`PolicyKind`] is a
//! tagged enum and callers dispatch by matching on it.

use std::fmt;
use std::sync::Arc;

use rowguard_types::{Operation, PolicyEvaluationContext, Row};
use serde::{Deserialize, Serialize};

use crate::activation::ActivationCondition;

/// Key/value conditions a filter policy contributes to a query's WHERE clause.
pub type FilterConditions = Row;

/// Predicate used by `allow`, `deny` and `validate` policies.
pub type PolicyPredicate =
    Arc<dyn Fn(&PolicyEvaluationContext<'_>) -> Result<bool, String> + Send + Sync>;

/// Function used by `filter` policies.
pub type PolicyFilterFn =
    Arc<dyn Fn(&PolicyEvaluationContext<'_>) -> Result<FilterConditions, String> + Send + Sync>;

// ============================================================================
// DecisionType
// ============================================================================

/// Category of a policy's contribution to a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionType {
    Allow,
    Deny,
    Filter,
    Validate,
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DecisionType::Allow => "allow",
            DecisionType::Deny => "deny",
            DecisionType::Filter => "filter",
            DecisionType::Validate => "validate",
        })
    }
}

// ============================================================================
// Predicate outputs
// ============================================================================

/// Values a policy predicate may return.
///
/// Plain `bool` for infallible checks, `Result<bool, E>` when the check can
/// fail. An `Err` is recorded as a predicate error rather than a decision.
pub trait PredicateOutput {
    fn into_outcome(self) -> Result<bool, String>;
}

impl PredicateOutput for bool {
    fn into_outcome(self) -> Result<bool, String> {
        Ok(self)
    }
}

impl<E: fmt::Display> PredicateOutput for Result<bool, E> {
    fn into_outcome(self) -> Result<bool, String> {
        self.map_err(|e| e.to_string())
    }
}

/// Values a filter function may return.
pub trait FilterOutput {
    fn into_conditions(self) -> Result<FilterConditions, String>;
}

impl FilterOutput for FilterConditions {
    fn into_conditions(self) -> Result<FilterConditions, String> {
        Ok(self)
    }
}

impl FilterOutput for serde_json::Value {
    fn into_conditions(self) -> Result<FilterConditions, String> {
        match self {
            serde_json::Value::Object(map) => Ok(map),
            serde_json::Value::Null => Ok(FilterConditions::new()),
            other => Err(format!("filter must return an object, got {other}")),
        }
    }
}

impl<T: FilterOutput, E: fmt::Display> FilterOutput for Result<T, E> {
    fn into_conditions(self) -> Result<FilterConditions, String> {
        self.map_err(|e| e.to_string())?.into_conditions()
    }
}

// ============================================================================
// PolicyKind
// ============================================================================

/// The kind-specific behaviour of a policy.
#[derive(Clone)]
pub enum PolicyKind {
    /// Grants access when the predicate is true.
    Allow(PolicyPredicate),
    /// Refuses access when the predicate is true.
    Deny(PolicyPredicate),
    /// Adds WHERE conditions to reads.
    Filter(PolicyFilterFn),
    /// Rejects create/update payloads when the predicate is false.
    Validate(PolicyPredicate),
}

impl PolicyKind {
    pub fn decision_type(&self) -> DecisionType {
        match self {
            PolicyKind::Allow(_) => DecisionType::Allow,
            PolicyKind::Deny(_) => DecisionType::Deny,
            PolicyKind::Filter(_) => DecisionType::Filter,
            PolicyKind::Validate(_) => DecisionType::Validate,
        }
    }
}

impl fmt::Debug for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PolicyKind::{}", self.decision_type())
    }
}

// ============================================================================
// PolicyDefinition
// ============================================================================

/// An immutable, named, prioritized rule.
#[derive(Clone)]
pub struct PolicyDefinition {
    /// Unique within a table. Checked at registration.
    pub name: String,
    /// Operations this policy participates in. `Operation::All` matches any.
    pub operations: Vec<Operation>,
    /// Higher values are evaluated first.
    pub priority: i32,
    pub kind: PolicyKind,
    /// When set, the policy only participates while the condition holds.
    pub activation: Option<ActivationCondition>,
    /// Opaque metadata for tooling (index suggestions, docs).
    pub hints: Option<serde_json::Value>,
}

impl PolicyDefinition {
    pub fn decision_type(&self) -> DecisionType {
        self.kind.decision_type()
    }

    /// Returns whether this policy is declared for `operation`.
    pub fn applies_to(&self, operation: Operation) -> bool {
        self.operations.iter().any(|op| op.covers(operation))
    }

    pub fn is_conditional(&self) -> bool {
        self.activation.is_some()
    }
}

impl fmt::Debug for PolicyDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyDefinition")
            .field("name", &self.name)
            .field("decision_type", &self.decision_type())
            .field("operations", &self.operations)
            .field("priority", &self.priority)
            .field("conditional", &self.is_conditional())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Operation lists
// ============================================================================

/// Anything that names the operations a policy applies to.
pub trait IntoOperations {
    fn into_operations(self) -> Vec<Operation>;
}

impl IntoOperations for Operation {
    fn into_operations(self) -> Vec<Operation> {
        vec![self]
    }
}

impl<const N: usize> IntoOperations for [Operation; N] {
    fn into_operations(self) -> Vec<Operation> {
        self.to_vec()
    }
}

impl IntoOperations for &[Operation] {
    fn into_operations(self) -> Vec<Operation> {
        self.to_vec()
    }
}

impl IntoOperations for Vec<Operation> {
    fn into_operations(self) -> Vec<Operation> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn result_predicate_output_keeps_error_text() {
        let ok: Result<bool, String> = Ok(true);
        assert_eq!(ok.into_outcome(), Ok(true));

        let err: Result<bool, &str> = Err("lookup failed");
        assert_eq!(err.into_outcome(), Err("lookup failed".to_string()));
    }

    #[test]
    fn filter_output_from_json() {
        let conditions = json!({"tenant_id": "t1"}).into_conditions().unwrap();
        assert_eq!(conditions.get("tenant_id"), Some(&json!("t1")));

        assert!(json!(null).into_conditions().unwrap().is_empty());
        assert!(json!([1, 2]).into_conditions().is_err());
    }

    #[test]
    fn operation_lists() {
        assert_eq!(Operation::Read.into_operations(), vec![Operation::Read]);
        assert_eq!(
            [Operation::Update, Operation::Delete].into_operations(),
            vec![Operation::Update, Operation::Delete]
        );
    }
}
