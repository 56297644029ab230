//! Error taxonomy for the row-level engine.
//!
//! | Error                | Raised by                  | Handling                        |
//! |----------------------|----------------------------|---------------------------------|
//! | `ConfigurationError` | registration               | fatal, abort startup            |
//! | `PredicateError`     | a policy function          | contained in one evaluation     |
//! | `AccessDeniedError`  | evaluator, guards, fields  | permanent, surfaced to caller   |
//! | `ValidationError`    | `validate` policies        | permanent, surfaced to caller   |

use rowguard_types::Operation;
use thiserror::Error;

use crate::evaluator::PolicyTrace;

/// Schema mistakes detected while registering tables.
///
/// These indicate programming errors. Hosts should never catch and continue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("Table '{table}' is already registered")]
    DuplicateTable { table: String },

    #[error("Policy '{name}' is declared more than once on table '{table}'")]
    DuplicatePolicy { table: String, name: String },

    #[error("Policy #{index} on table '{table}' has no name")]
    UnnamedPolicy { table: String, index: usize },

    #[error("Table name must not be empty")]
    EmptyTableName,

    #[error("Field '{field}' is declared more than once on table '{table}'")]
    DuplicateField { table: String, field: String },
}

/// A policy function failed instead of producing a decision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Policy '{policy}' failed: {message}")]
pub struct PredicateError {
    pub policy: String,
    pub message: String,
}

impl PredicateError {
    pub fn new(policy: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            policy: policy.into(),
            message: message.into(),
        }
    }
}

/// Row- or field-level denial.
#[derive(Debug, Clone, PartialEq, Error)]
#[error(
    "Access denied: {operation} on '{table}'{}: {reason}",
    describe_target(.policy_name.as_deref(), .field.as_deref())
)]
pub struct AccessDeniedError {
    pub table: String,
    pub operation: Operation,
    /// Deny policy that matched, if any.
    pub policy_name: Option<String>,
    /// Column that could not be written, for field-level denials.
    pub field: Option<String>,
    pub reason: String,
    /// Decision trace of the row-level evaluation.
    pub trace: Vec<PolicyTrace>,
}

impl AccessDeniedError {
    pub fn new(table: impl Into<String>, operation: Operation, reason: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            operation,
            policy_name: None,
            field: None,
            reason: reason.into(),
            trace: Vec::new(),
        }
    }

    pub fn with_policy(mut self, policy_name: impl Into<String>) -> Self {
        self.policy_name = Some(policy_name.into());
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_trace(mut self, trace: Vec<PolicyTrace>) -> Self {
        self.trace = trace;
        self
    }
}

fn describe_target(policy: Option<&str>, field: Option<&str>) -> String {
    match (policy, field) {
        (_, Some(field)) => format!(" (field '{field}')"),
        (Some(policy), None) => format!(" (policy '{policy}')"),
        (None, None) => String::new(),
    }
}

/// A `validate` policy rejected a write payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Validation failed: {operation} on '{table}' rejected by policy '{policy_name}': {reason}")]
pub struct ValidationError {
    pub table: String,
    pub operation: Operation,
    pub policy_name: String,
    pub reason: String,
}

/// Umbrella error returned by guard, transform and engine entry points.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RlsError {
    #[error(transparent)]
    AccessDenied(#[from] AccessDeniedError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A filter function failed; the query is refused rather than run unfiltered.
    #[error(transparent)]
    Predicate(#[from] PredicateError),

    #[error("Filter policy produced invalid column name '{column}' for table '{table}'")]
    InvalidFilterColumn { table: String, column: String },

    #[error("No RLS context is active for this operation")]
    MissingContext,
}

impl RlsError {
    /// Denials and validation failures are permanent.
    pub fn is_retryable(&self) -> bool {
        false
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(self, RlsError::AccessDenied(_))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, RlsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_denied_display_names_policy() {
        let err = AccessDeniedError::new("users", Operation::Delete, "denied by policy")
            .with_policy("no-delete");
        assert_eq!(
            err.to_string(),
            "Access denied: delete on 'users' (policy 'no-delete'): denied by policy"
        );
    }

    #[test]
    fn access_denied_display_prefers_field() {
        let err = AccessDeniedError::new("users", Operation::Update, "field is not writable")
            .with_field("salary");
        assert!(err.to_string().contains("field 'salary'"));
    }

    #[test]
    fn rls_error_is_never_retryable() {
        let denied: RlsError = AccessDeniedError::new("t", Operation::Read, "x").into();
        assert!(!denied.is_retryable());
        assert!(denied.is_access_denied());

        let invalid = RlsError::InvalidFilterColumn {
            table: "t".into(),
            column: "a b".into(),
        };
        assert!(!invalid.is_retryable());
        assert!(!invalid.is_access_denied());
    }
}
