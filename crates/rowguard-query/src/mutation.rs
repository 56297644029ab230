//! Write gating.
//!
//! The guard runs before a mutation reaches storage:
//! 1. `evaluate(table, op)` with the existing row and the proposed payload
//! 2. for create and update, `validate_write`
//!
//! Anything other than a clean pass is an error. [`MutationGuard::run_guarded`]
//! only invokes the mutation after both steps succeed.

use std::sync::Arc;

use rowguard_policy::{EvaluationResult, PolicyEvaluator, Result};
use rowguard_types::{Operation, PolicyEvaluationContext, Row};
use tracing::debug;

/// Gates create, update and delete operations.
#[derive(Debug, Clone)]
pub struct MutationGuard {
    evaluator: Arc<PolicyEvaluator>,
}

impl MutationGuard {
    pub fn new(evaluator: Arc<PolicyEvaluator>) -> Self {
        Self { evaluator }
    }

    pub fn evaluator(&self) -> &Arc<PolicyEvaluator> {
        &self.evaluator
    }

    pub fn check_create<'a>(
        &self,
        table: &'a str,
        data: &'a Row,
        ctx: &PolicyEvaluationContext<'a>,
    ) -> Result<EvaluationResult> {
        self.guard(table, Operation::Create, None, Some(data), ctx)
    }

    pub fn check_update<'a>(
        &self,
        table: &'a str,
        existing: Option<&'a Row>,
        data: &'a Row,
        ctx: &PolicyEvaluationContext<'a>,
    ) -> Result<EvaluationResult> {
        self.guard(table, Operation::Update, existing, Some(data), ctx)
    }

    pub fn check_delete<'a>(
        &self,
        table: &'a str,
        existing: Option<&'a Row>,
        ctx: &PolicyEvaluationContext<'a>,
    ) -> Result<EvaluationResult> {
        self.guard(table, Operation::Delete, existing, None, ctx)
    }

    /// Evaluates `operation` with `existing` as the row and `data` as the
    /// payload, then validates the payload for create and update.
    ///
    /// Rows supplied here replace any row or payload already on `ctx`.
    pub fn guard<'a>(
        &self,
        table: &'a str,
        operation: Operation,
        existing: Option<&'a Row>,
        data: Option<&'a Row>,
        ctx: &PolicyEvaluationContext<'a>,
    ) -> Result<EvaluationResult> {
        let ctx = PolicyEvaluationContext {
            row: existing.or(ctx.row),
            data: data.or(ctx.data),
            ..*ctx
        };

        let decision = self.evaluator.evaluate(table, operation, &ctx);
        if !decision.allowed {
            debug!(
                table = %table,
                operation = %operation,
                policy = ?decision.policy_name,
                "Mutation blocked by RLS"
            );
            return Err(decision.into_access_denied(table, operation).into());
        }

        if operation.carries_payload() {
            self.evaluator.validate_write(table, operation, &ctx)?;
        }
        Ok(decision)
    }

    /// Runs `mutation` only if the guard passes.
    ///
    /// ```
    /// use std::sync::Arc;
    ///
    /// use rowguard_policy::{PolicyEvaluator, PolicyRegistry, TableSchema, define_schema, deny};
    /// use rowguard_query::MutationGuard;
    /// use rowguard_types::{AuthContext, Operation, PolicyEvaluationContext};
    ///
    /// let schema = define_schema([(
    ///     "users",
    ///     TableSchema::new().policy(deny(Operation::Delete, |_| true).named("no-delete")),
    /// )]);
    /// let registry = Arc::new(PolicyRegistry::from_schema(schema).unwrap());
    /// let guard = MutationGuard::new(Arc::new(PolicyEvaluator::new(registry)));
    ///
    /// let auth = AuthContext::new("u1");
    /// let ctx = PolicyEvaluationContext::new(&auth, "users", Operation::Delete);
    /// let mut deleted = false;
    /// let outcome = guard.run_guarded("users", Operation::Delete, None, None, &ctx, || deleted = true);
    ///
    /// assert!(outcome.is_err());
    /// assert!(!deleted);
    /// ```
    pub fn run_guarded<'a, T, F>(
        &self,
        table: &'a str,
        operation: Operation,
        existing: Option<&'a Row>,
        data: Option<&'a Row>,
        ctx: &PolicyEvaluationContext<'a>,
        mutation: F,
    ) -> Result<T>
    where
        F: FnOnce() -> T,
    {
        self.guard(table, operation, existing, data, ctx)?;
        Ok(mutation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowguard_policy::{PolicyRegistry, RlsError, TableSchema, allow, deny, validate};
    use rowguard_types::AuthContext;
    use serde_json::json;
    use std::cell::Cell;

    fn guard() -> MutationGuard {
        let schema = TableSchema::new()
            .policy(
                allow([Operation::Update, Operation::Delete], |ctx| ctx.is_owner("author_id"))
                    .named("author-only"),
            )
            .policy(allow(Operation::Create, |_| true).named("anyone-creates"))
            .policy(
                deny(Operation::Update, |ctx| {
                    ctx.data_value("author_id")
                        .is_some_and(|v| Some(v) != ctx.row_value("author_id"))
                })
                .named("no-reassign")
                .priority(100),
            )
            .policy(
                validate([Operation::Create, Operation::Update], |ctx| {
                    ctx.data_value("title")
                        .and_then(serde_json::Value::as_str)
                        .is_some_and(|s| !s.is_empty())
                })
                .named("title-required"),
            )
            .default_deny(true);

        let mut registry = PolicyRegistry::new();
        registry.register("posts", schema).unwrap();
        MutationGuard::new(Arc::new(PolicyEvaluator::new(Arc::new(registry))))
    }

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn owner_may_update_with_valid_payload() {
        let g = guard();
        let auth = AuthContext::new("u1");
        let existing = row(json!({"id": 1, "author_id": "u1", "title": "old"}));
        let data = row(json!({"title": "new"}));
        let ctx = PolicyEvaluationContext::new(&auth, "posts", Operation::Update);

        let decision = g.check_update("posts", Some(&existing), &data, &ctx).unwrap();
        assert_eq!(decision.policy_name.as_deref(), Some("author-only"));
    }

    #[test]
    fn non_owner_is_denied_with_trace() {
        let g = guard();
        let auth = AuthContext::new("u2");
        let existing = row(json!({"author_id": "u1"}));
        let ctx = PolicyEvaluationContext::new(&auth, "posts", Operation::Delete);

        match g.check_delete("posts", Some(&existing), &ctx).unwrap_err() {
            RlsError::AccessDenied(denied) => {
                assert_eq!(denied.table, "posts");
                assert_eq!(denied.operation, Operation::Delete);
                assert!(denied.policy_name.is_none());
                assert_eq!(denied.trace.len(), 1);
            }
            other => panic!("expected access denied, got {other:?}"),
        }
    }

    #[test]
    fn deny_inspects_payload_against_existing_row() {
        let g = guard();
        let auth = AuthContext::new("u1");
        let existing = row(json!({"author_id": "u1"}));
        let data = row(json!({"author_id": "u2", "title": "mine now"}));
        let ctx = PolicyEvaluationContext::new(&auth, "posts", Operation::Update);

        let err = g.check_update("posts", Some(&existing), &data, &ctx).unwrap_err();
        assert!(err.is_access_denied());
    }

    #[test]
    fn invalid_payload_fails_validation() {
        let g = guard();
        let auth = AuthContext::new("u1");
        let data = row(json!({"title": ""}));
        let ctx = PolicyEvaluationContext::new(&auth, "posts", Operation::Create);

        match g.check_create("posts", &data, &ctx).unwrap_err() {
            RlsError::Validation(err) => assert_eq!(err.policy_name, "title-required"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn run_guarded_skips_mutation_on_denial() {
        let g = guard();
        let auth = AuthContext::new("u2");
        let existing = row(json!({"author_id": "u1"}));
        let ctx = PolicyEvaluationContext::new(&auth, "posts", Operation::Delete);
        let calls = Cell::new(0);

        let outcome = g.run_guarded("posts", Operation::Delete, Some(&existing), None, &ctx, || {
            calls.set(calls.get() + 1);
        });
        assert!(outcome.is_err());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn run_guarded_returns_mutation_result() {
        let g = guard();
        let auth = AuthContext::new("u1");
        let data = row(json!({"title": "hello"}));
        let ctx = PolicyEvaluationContext::new(&auth, "posts", Operation::Create);

        let id = g
            .run_guarded("posts", Operation::Create, None, Some(&data), &ctx, || 7)
            .unwrap();
        assert_eq!(id, 7);
    }

    #[test]
    fn system_bypasses_validation() {
        let g = guard();
        let auth = AuthContext::system();
        let data = row(json!({"title": ""}));
        let ctx = PolicyEvaluationContext::new(&auth, "posts", Operation::Create);

        assert!(g.check_create("posts", &data, &ctx).is_ok());
    }
}
