//! Row-level policy evaluation.
//!
//! Decisions are made by walking a table's active allow/deny policies in
//! priority order. The first policy whose predicate returns true decides the
//! outcome. If none match, the table's `default_deny` flag applies.
//!
//! Filter and validate policies do not take part in the allow/deny walk.
//! They are consumed by [`PolicyEvaluator::get_filters`] and
//! [`PolicyEvaluator::validate_write`].

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use rowguard_types::{Operation, PolicyEvaluationContext};
use serde::Serialize;
use tracing::{debug, warn};

use crate::activation::{ActivationContext, Clock, Features, SystemClock};
use crate::audit::{AuditExtra, AuditLogger};
use crate::error::{AccessDeniedError, PredicateError, ValidationError};
use crate::policy::{
    DecisionType, FilterConditions, PolicyDefinition, PolicyFilterFn, PolicyKind, PolicyPredicate,
};
use crate::registry::{CompiledTable, PolicyRegistry};

/// Reason reported when a system caller bypasses evaluation.
pub const REASON_SYSTEM_BYPASS: &str = "System user bypass";
/// Reason reported when a caller holds one of the table's `skip_for` roles.
pub const REASON_SKIP_FOR: &str = "skipFor role";
/// Reason reported when no allow/deny policy matched.
pub const REASON_DEFAULT: &str = "default";

/// Environment used when none is configured.
pub const DEFAULT_ENVIRONMENT: &str = "development";

// ============================================================================
// Results
// ============================================================================

/// One policy's part in a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyTrace {
    pub name: String,
    pub decision_type: DecisionType,
    /// Whether the activation condition held.
    pub active: bool,
    /// Whether the predicate returned true. Always false for inactive or
    /// failed policies.
    pub matched: bool,
    /// Error text when the predicate failed or panicked.
    pub error: Option<String>,
}

/// Outcome of [`PolicyEvaluator::evaluate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluationResult {
    pub allowed: bool,
    pub decision_type: DecisionType,
    pub reason: Option<String>,
    /// Policy that decided the outcome, if one matched.
    pub policy_name: Option<String>,
    /// Allow/deny policies considered, in evaluation order.
    pub evaluated_policies: Vec<PolicyTrace>,
}

impl EvaluationResult {
    fn bypass(reason: &str) -> Self {
        Self {
            allowed: true,
            decision_type: DecisionType::Allow,
            reason: Some(reason.to_string()),
            policy_name: None,
            evaluated_policies: Vec::new(),
        }
    }

    /// Returns whether the decision came from a system or `skip_for` bypass.
    pub fn is_bypass(&self) -> bool {
        matches!(
            self.reason.as_deref(),
            Some(REASON_SYSTEM_BYPASS | REASON_SKIP_FOR)
        )
    }

    /// Converts a denial into the error surfaced to callers.
    pub fn into_access_denied(self, table: &str, operation: Operation) -> AccessDeniedError {
        let reason = match (&self.policy_name, self.reason.as_deref()) {
            (Some(_), _) => "denied by policy".to_string(),
            (None, Some(REASON_DEFAULT)) => "no policy allowed the operation".to_string(),
            (None, Some(reason)) => reason.to_string(),
            (None, None) => "denied".to_string(),
        };
        let denial = AccessDeniedError::new(table, operation, reason);
        let denial = match self.policy_name {
            Some(name) => denial.with_policy(name),
            None => denial,
        };
        denial.with_trace(self.evaluated_policies)
    }
}

/// Merged output of a table's filter policies.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterResult {
    pub conditions: FilterConditions,
    /// Filter policies in the order they were merged (ascending priority).
    pub applied_filters: Vec<String>,
}

impl FilterResult {
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

/// What a single policy produced when run in isolation.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyOutcome {
    /// Allow, deny and validate policies.
    Decision(bool),
    /// Filter policies.
    Conditions(FilterConditions),
    /// The function failed or panicked.
    Error(String),
}

/// Outcome of [`PolicyEvaluator::test_policy`].
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyTestResult {
    pub found: bool,
    pub result: Option<PolicyOutcome>,
}

// ============================================================================
// PolicyEvaluator
// ============================================================================

/// Evaluates registered policies against per-request contexts.
///
/// The evaluator holds no per-request state. One instance is shared by every
/// request handler.
#[derive(Clone)]
pub struct PolicyEvaluator {
    registry: Arc<PolicyRegistry>,
    environment: String,
    features: Features,
    clock: Arc<dyn Clock>,
    audit: Option<Arc<dyn AuditLogger>>,
    deny_unregistered: bool,
}

impl PolicyEvaluator {
    pub fn new(registry: Arc<PolicyRegistry>) -> Self {
        Self {
            registry,
            environment: DEFAULT_ENVIRONMENT.to_string(),
            features: Features::new(),
            clock: Arc::new(SystemClock),
            audit: None,
            deny_unregistered: false,
        }
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_features(mut self, features: Features) -> Self {
        self.features = features;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_audit_logger(mut self, logger: Arc<dyn AuditLogger>) -> Self {
        self.audit = Some(logger);
        self
    }

    /// Denies every operation on tables that have no registered schema.
    pub fn deny_unregistered_tables(mut self, deny: bool) -> Self {
        self.deny_unregistered = deny;
        self
    }

    pub fn registry(&self) -> &Arc<PolicyRegistry> {
        &self.registry
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Activation context for "now" according to the configured clock.
    pub fn activation_context(&self) -> ActivationContext {
        ActivationContext::new(
            self.environment.clone(),
            self.features.clone(),
            self.clock.now(),
        )
    }

    // ------------------------------------------------------------------------
    // evaluate
    // ------------------------------------------------------------------------

    /// Decides whether `operation` on `table` is allowed for `ctx`.
    ///
    /// The context's own `table` and `operation` are replaced by the
    /// arguments before predicates see it.
    pub fn evaluate<'a>(
        &self,
        table: &'a str,
        operation: Operation,
        ctx: &PolicyEvaluationContext<'a>,
    ) -> EvaluationResult {
        self.evaluate_at(table, operation, ctx, &self.activation_context())
    }

    /// Like [`evaluate`](Self::evaluate) with an explicit activation context.
    pub fn evaluate_at<'a>(
        &self,
        table: &'a str,
        operation: Operation,
        ctx: &PolicyEvaluationContext<'a>,
        activation: &ActivationContext,
    ) -> EvaluationResult {
        let ctx = PolicyEvaluationContext {
            table,
            operation,
            ..*ctx
        };
        let result = self.decide(&ctx, activation);
        self.audit(&ctx, &result);
        result
    }

    fn decide(
        &self,
        ctx: &PolicyEvaluationContext<'_>,
        activation: &ActivationContext,
    ) -> EvaluationResult {
        if ctx.auth.is_system {
            return EvaluationResult::bypass(REASON_SYSTEM_BYPASS);
        }

        let Some(table) = self.registry.table(ctx.table) else {
            return self.unregistered(ctx);
        };

        if table.is_skipped_for(ctx.auth) {
            return EvaluationResult::bypass(REASON_SKIP_FOR);
        }

        let mut trace = Vec::new();
        for policy in table.policies_for(ctx.operation) {
            let (predicate, decision_type) = match &policy.kind {
                PolicyKind::Allow(p) => (p, DecisionType::Allow),
                PolicyKind::Deny(p) => (p, DecisionType::Deny),
                PolicyKind::Filter(_) | PolicyKind::Validate(_) => continue,
            };

            if !is_active(policy, activation) {
                trace.push(PolicyTrace {
                    name: policy.name.clone(),
                    decision_type,
                    active: false,
                    matched: false,
                    error: None,
                });
                continue;
            }

            let (matched, error) = match call_predicate(predicate, ctx) {
                Ok(matched) => (matched, None),
                Err(message) => {
                    debug!(
                        table = %ctx.table,
                        policy = %policy.name,
                        error = %message,
                        "Policy predicate failed; treating as non-match"
                    );
                    (false, Some(message))
                }
            };

            trace.push(PolicyTrace {
                name: policy.name.clone(),
                decision_type,
                active: true,
                matched,
                error,
            });

            if matched {
                return EvaluationResult {
                    allowed: decision_type == DecisionType::Allow,
                    decision_type,
                    reason: Some(format!(
                        "Matched {decision_type} policy '{}' (priority {})",
                        policy.name, policy.priority
                    )),
                    policy_name: Some(policy.name.clone()),
                    evaluated_policies: trace,
                };
            }
        }

        default_result(table.default_deny(), trace)
    }

    fn unregistered(&self, ctx: &PolicyEvaluationContext<'_>) -> EvaluationResult {
        if self.deny_unregistered {
            debug!(table = %ctx.table, "No RLS schema registered; denying");
        }
        default_result(self.deny_unregistered, Vec::new())
    }

    fn audit(&self, ctx: &PolicyEvaluationContext<'_>, result: &EvaluationResult) {
        let Some(logger) = &self.audit else {
            return;
        };
        let extra = AuditExtra {
            user_id: ctx.auth.user_id.clone(),
            tenant_id: ctx.auth.tenant_id.clone(),
            decision_type: result.decision_type,
            reason: result.reason.clone(),
        };
        let policy_name = result.policy_name.as_deref();
        let logged = panic::catch_unwind(AssertUnwindSafe(|| {
            if result.allowed {
                logger.log_allow(ctx.operation, ctx.table, policy_name, &extra);
            } else {
                logger.log_deny(ctx.operation, ctx.table, policy_name, &extra);
            }
        }));
        if let Err(payload) = logged {
            warn!(
                table = %ctx.table,
                operation = %ctx.operation,
                error = %panic_message(payload.as_ref()),
                "Audit logger failed; decision unchanged"
            );
        }
    }

    // ------------------------------------------------------------------------
    // get_filters
    // ------------------------------------------------------------------------

    /// Merges the conditions of every active filter policy.
    ///
    /// Filters are merged in ascending priority, so on a key collision the
    /// higher-priority filter wins. Among equal priorities the policy
    /// declared first wins. A failing filter function fails the whole call:
    /// the query must not run without its filters.
    pub fn get_filters<'a>(
        &self,
        table: &'a str,
        operation: Operation,
        ctx: &PolicyEvaluationContext<'a>,
    ) -> Result<FilterResult, PredicateError> {
        self.get_filters_at(table, operation, ctx, &self.activation_context())
    }

    pub fn get_filters_at<'a>(
        &self,
        table: &'a str,
        operation: Operation,
        ctx: &PolicyEvaluationContext<'a>,
        activation: &ActivationContext,
    ) -> Result<FilterResult, PredicateError> {
        let ctx = PolicyEvaluationContext {
            table,
            operation,
            ..*ctx
        };
        let Some(compiled) = self.bypass_or_table(&ctx) else {
            return Ok(FilterResult::default());
        };

        let active: Vec<(&PolicyDefinition, &PolicyFilterFn)> = compiled
            .policies_for(operation)
            .filter_map(|policy| match &policy.kind {
                PolicyKind::Filter(f) if is_active(policy, activation) => Some((policy, f)),
                _ => None,
            })
            .collect();

        let mut result = FilterResult::default();
        for (policy, filter_fn) in active.into_iter().rev() {
            let conditions = call_filter(filter_fn, &ctx)
                .map_err(|message| PredicateError::new(policy.name.clone(), message))?;
            result.conditions.extend(conditions);
            result.applied_filters.push(policy.name.clone());
        }
        Ok(result)
    }

    // ------------------------------------------------------------------------
    // validate_write
    // ------------------------------------------------------------------------

    /// Runs active validate policies for create and update.
    ///
    /// The first policy returning false (or failing) is reported. Other
    /// operations always pass.
    pub fn validate_write<'a>(
        &self,
        table: &'a str,
        operation: Operation,
        ctx: &PolicyEvaluationContext<'a>,
    ) -> Result<(), ValidationError> {
        self.validate_write_at(table, operation, ctx, &self.activation_context())
    }

    pub fn validate_write_at<'a>(
        &self,
        table: &'a str,
        operation: Operation,
        ctx: &PolicyEvaluationContext<'a>,
        activation: &ActivationContext,
    ) -> Result<(), ValidationError> {
        if !operation.carries_payload() {
            return Ok(());
        }
        let ctx = PolicyEvaluationContext {
            table,
            operation,
            ..*ctx
        };
        let Some(compiled) = self.bypass_or_table(&ctx) else {
            return Ok(());
        };

        for policy in compiled.policies_for(operation) {
            let PolicyKind::Validate(predicate) = &policy.kind else {
                continue;
            };
            if !is_active(policy, activation) {
                continue;
            }
            let reason = match call_predicate(predicate, &ctx) {
                Ok(true) => continue,
                Ok(false) => "validation returned false".to_string(),
                Err(message) => format!("validation failed: {message}"),
            };
            return Err(ValidationError {
                table: table.to_string(),
                operation,
                policy_name: policy.name.clone(),
                reason,
            });
        }
        Ok(())
    }

    /// Returns the compiled table unless the caller bypasses row checks.
    fn bypass_or_table(&self, ctx: &PolicyEvaluationContext<'_>) -> Option<&CompiledTable> {
        if ctx.auth.is_system {
            return None;
        }
        self.registry
            .table(ctx.table)
            .filter(|t| !t.is_skipped_for(ctx.auth))
    }

    // ------------------------------------------------------------------------
    // test_policy
    // ------------------------------------------------------------------------

    /// Runs one named policy directly, ignoring activation and bypasses.
    pub fn test_policy<'a>(
        &self,
        table: &'a str,
        name: &str,
        ctx: &PolicyEvaluationContext<'a>,
    ) -> PolicyTestResult {
        let Some(policy) = self.registry.table(table).and_then(|t| t.policy(name)) else {
            return PolicyTestResult {
                found: false,
                result: None,
            };
        };
        let ctx = PolicyEvaluationContext { table, ..*ctx };

        let outcome = match &policy.kind {
            PolicyKind::Allow(p) | PolicyKind::Deny(p) | PolicyKind::Validate(p) => {
                call_predicate(p, &ctx).map(PolicyOutcome::Decision)
            }
            PolicyKind::Filter(f) => call_filter(f, &ctx).map(PolicyOutcome::Conditions),
        };

        PolicyTestResult {
            found: true,
            result: Some(outcome.unwrap_or_else(PolicyOutcome::Error)),
        }
    }
}

impl fmt::Debug for PolicyEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyEvaluator")
            .field("tables", &self.registry.len())
            .field("environment", &self.environment)
            .field("features", &self.features)
            .field("clock", &self.clock)
            .field("audit", &self.audit.is_some())
            .field("deny_unregistered", &self.deny_unregistered)
            .finish()
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn default_result(default_deny: bool, trace: Vec<PolicyTrace>) -> EvaluationResult {
    EvaluationResult {
        allowed: !default_deny,
        decision_type: if default_deny {
            DecisionType::Deny
        } else {
            DecisionType::Allow
        },
        reason: Some(REASON_DEFAULT.to_string()),
        policy_name: None,
        evaluated_policies: trace,
    }
}

/// Checks a policy's activation condition.
///
/// A panicking condition leaves allow policies inactive and every other
/// kind active, so a failure never widens access.
fn is_active(policy: &PolicyDefinition, activation: &ActivationContext) -> bool {
    let Some(condition) = &policy.activation else {
        return true;
    };
    match panic::catch_unwind(AssertUnwindSafe(|| condition(activation))) {
        Ok(active) => active,
        Err(payload) => {
            let active = !matches!(policy.kind, PolicyKind::Allow(_));
            warn!(
                policy = %policy.name,
                error = %panic_message(payload.as_ref()),
                active,
                "Activation condition failed"
            );
            active
        }
    }
}

/// Invokes a predicate, converting a panic into an error.
fn call_predicate(
    predicate: &PolicyPredicate,
    ctx: &PolicyEvaluationContext<'_>,
) -> Result<bool, String> {
    panic::catch_unwind(AssertUnwindSafe(|| predicate(ctx)))
        .unwrap_or_else(|payload| Err(panic_message(payload.as_ref())))
}

fn call_filter(
    filter_fn: &PolicyFilterFn,
    ctx: &PolicyEvaluationContext<'_>,
) -> Result<FilterConditions, String> {
    panic::catch_unwind(AssertUnwindSafe(|| filter_fn(ctx)))
        .unwrap_or_else(|payload| Err(panic_message(payload.as_ref())))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::{FixedClock, when_condition, when_environment, when_time_range};
    use crate::audit::RecordingAuditLogger;
    use crate::builder::{allow, deny, filter, validate};
    use crate::registry::TableSchema;
    use chrono::{TimeZone, Utc};
    use rowguard_types::{AuthContext, Row};
    use serde_json::json;

    fn evaluator(table: &str, schema: TableSchema) -> PolicyEvaluator {
        let mut registry = PolicyRegistry::new();
        registry.register(table, schema).unwrap();
        PolicyEvaluator::new(Arc::new(registry))
    }

    fn user() -> AuthContext {
        AuthContext::new("u1").with_tenant("tenant-1").with_role("user")
    }

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn system_user_bypasses_everything() {
        let ev = evaluator(
            "users",
            TableSchema::new()
                .policy(deny(Operation::All, |_| true).named("deny-all"))
                .default_deny(true),
        );
        let auth = AuthContext::system();
        let ctx = PolicyEvaluationContext::new(&auth, "users", Operation::Delete);

        let result = ev.evaluate("users", Operation::Delete, &ctx);
        assert!(result.allowed);
        assert_eq!(result.reason.as_deref(), Some(REASON_SYSTEM_BYPASS));
        assert!(result.evaluated_policies.is_empty());
        assert!(result.is_bypass());
    }

    #[test]
    fn skip_for_role_bypasses() {
        let ev = evaluator(
            "users",
            TableSchema::new()
                .policy(deny(Operation::All, |_| true).named("deny-all"))
                .skip_for(["admin"]),
        );
        let auth = AuthContext::new("a").with_role("admin");
        let ctx = PolicyEvaluationContext::new(&auth, "users", Operation::Update);

        let result = ev.evaluate("users", Operation::Update, &ctx);
        assert!(result.allowed);
        assert_eq!(result.reason.as_deref(), Some(REASON_SKIP_FOR));
    }

    #[test]
    fn higher_priority_deny_beats_allow() {
        let ev = evaluator(
            "users",
            TableSchema::new()
                .policy(allow(Operation::Delete, |_| true).named("allow-delete").priority(50))
                .policy(deny(Operation::Delete, |_| true).named("no-delete").priority(200)),
        );
        let auth = user();
        let ctx = PolicyEvaluationContext::new(&auth, "users", Operation::Delete);

        let result = ev.evaluate("users", Operation::Delete, &ctx);
        assert!(!result.allowed);
        assert_eq!(result.decision_type, DecisionType::Deny);
        assert_eq!(result.policy_name.as_deref(), Some("no-delete"));
        assert_eq!(result.evaluated_policies.len(), 1);
    }

    #[test]
    fn default_deny_without_match() {
        let ev = evaluator(
            "secrets",
            TableSchema::new()
                .policy(allow(Operation::Read, |ctx| ctx.auth.has_role("admin")).named("admins"))
                .default_deny(true),
        );
        let auth = user();
        let ctx = PolicyEvaluationContext::new(&auth, "secrets", Operation::Read);

        let result = ev.evaluate("secrets", Operation::Read, &ctx);
        assert!(!result.allowed);
        assert_eq!(result.reason.as_deref(), Some(REASON_DEFAULT));
        assert_eq!(result.decision_type, DecisionType::Deny);
        assert_eq!(result.evaluated_policies[0].name, "admins");
        assert!(!result.evaluated_policies[0].matched);
    }

    #[test]
    fn failing_predicate_is_recorded_and_skipped() {
        let ev = evaluator(
            "docs",
            TableSchema::new()
                .policy(
                    deny(Operation::Read, |_| -> Result<bool, String> {
                        Err("graph unavailable".into())
                    })
                    .named("broken")
                    .priority(10),
                )
                .policy(allow(Operation::Read, |_| true).named("fallback")),
        );
        let auth = user();
        let ctx = PolicyEvaluationContext::new(&auth, "docs", Operation::Read);

        let result = ev.evaluate("docs", Operation::Read, &ctx);
        assert!(result.allowed);
        assert_eq!(result.policy_name.as_deref(), Some("fallback"));
        let broken = &result.evaluated_policies[0];
        assert!(!broken.matched);
        assert_eq!(broken.error.as_deref(), Some("graph unavailable"));
    }

    #[test]
    fn panicking_predicate_is_a_non_match() {
        let ev = evaluator(
            "docs",
            TableSchema::new()
                .policy(
                    deny(Operation::Read, |_| -> bool { panic!("boom") })
                        .named("panics")
                        .priority(10),
                )
                .default_deny(true),
        );
        let auth = user();
        let ctx = PolicyEvaluationContext::new(&auth, "docs", Operation::Read);

        let result = ev.evaluate("docs", Operation::Read, &ctx);
        assert!(!result.allowed);
        assert_eq!(result.reason.as_deref(), Some(REASON_DEFAULT));
        assert!(
            result.evaluated_policies[0]
                .error
                .as_deref()
                .is_some_and(|e| e.contains("boom"))
        );
    }

    #[test]
    fn inactive_policies_are_traced_but_skipped() {
        let ev = evaluator(
            "users",
            TableSchema::new().policy(when_environment(
                ["production"],
                deny(Operation::Delete, |_| true).named("prod-no-delete").build(),
            )),
        );
        let auth = user();
        let ctx = PolicyEvaluationContext::new(&auth, "users", Operation::Delete);

        let result = ev.evaluate("users", Operation::Delete, &ctx);
        assert!(result.allowed);
        assert!(!result.evaluated_policies[0].active);

        let prod = ev.clone().with_environment("production");
        assert!(!prod.evaluate("users", Operation::Delete, &ctx).allowed);
    }

    #[test]
    fn clock_drives_time_windows() {
        let night = Utc.with_ymd_and_hms(2025, 1, 8, 23, 0, 0).unwrap();
        let noon = Utc.with_ymd_and_hms(2025, 1, 8, 12, 0, 0).unwrap();
        let schema = TableSchema::new().policy(when_time_range(
            22,
            6,
            deny(Operation::Delete, |_| true).named("no-night-deletes").build(),
        ));
        let auth = user();
        let ctx = PolicyEvaluationContext::new(&auth, "orders", Operation::Delete);

        let at_night = evaluator("orders", schema.clone()).with_clock(Arc::new(FixedClock(night)));
        assert!(!at_night.evaluate("orders", Operation::Delete, &ctx).allowed);

        let at_noon = evaluator("orders", schema).with_clock(Arc::new(FixedClock(noon)));
        assert!(at_noon.evaluate("orders", Operation::Delete, &ctx).allowed);
    }

    #[test]
    fn unregistered_tables_follow_configuration() {
        let ev = PolicyEvaluator::new(Arc::new(PolicyRegistry::new()));
        let auth = user();
        let ctx = PolicyEvaluationContext::new(&auth, "ghost", Operation::Read);

        assert!(ev.evaluate("ghost", Operation::Read, &ctx).allowed);
        let strict = ev.deny_unregistered_tables(true);
        let result = strict.evaluate("ghost", Operation::Read, &ctx);
        assert!(!result.allowed);
        assert_eq!(result.reason.as_deref(), Some(REASON_DEFAULT));
    }

    #[test]
    fn tenant_filter_applies_to_non_admin() {
        let ev = evaluator(
            "users",
            TableSchema::new().policy(
                filter(Operation::Read, |ctx| json!({ "tenant_id": ctx.auth.tenant_id }))
                    .named("tenant-isolation")
                    .priority(100),
            ),
        );
        let auth = user();
        let ctx = PolicyEvaluationContext::new(&auth, "users", Operation::Read);

        let decision = ev.evaluate("users", Operation::Read, &ctx);
        assert!(decision.allowed);
        assert_eq!(decision.reason.as_deref(), Some(REASON_DEFAULT));

        let filters = ev.get_filters("users", Operation::Read, &ctx).unwrap();
        assert_eq!(filters.conditions, row(json!({"tenant_id": "tenant-1"})));
        assert_eq!(filters.applied_filters, vec!["tenant-isolation"]);
    }

    #[test]
    fn filter_collision_higher_priority_wins() {
        let ev = evaluator(
            "docs",
            TableSchema::new()
                .policy(
                    filter(Operation::Read, |_| json!({"status": "any", "low": 1}))
                        .named("low")
                        .priority(1),
                )
                .policy(
                    filter(Operation::Read, |_| json!({"status": "published"}))
                        .named("high")
                        .priority(10),
                ),
        );
        let auth = user();
        let ctx = PolicyEvaluationContext::new(&auth, "docs", Operation::Read);

        let filters = ev.get_filters("docs", Operation::Read, &ctx).unwrap();
        assert_eq!(filters.conditions.get("status"), Some(&json!("published")));
        assert_eq!(filters.conditions.get("low"), Some(&json!(1)));
        assert_eq!(filters.applied_filters, vec!["low", "high"]);
    }

    #[test]
    fn filter_collision_equal_priority_first_declared_wins() {
        let ev = evaluator(
            "docs",
            TableSchema::new()
                .policy(filter(Operation::Read, |_| json!({"owner": "first"})).named("first"))
                .policy(filter(Operation::Read, |_| json!({"owner": "second"})).named("second")),
        );
        let auth = user();
        let ctx = PolicyEvaluationContext::new(&auth, "docs", Operation::Read);

        let filters = ev.get_filters("docs", Operation::Read, &ctx).unwrap();
        assert_eq!(filters.conditions.get("owner"), Some(&json!("first")));
    }

    #[test]
    fn failing_filter_fails_closed() {
        let ev = evaluator(
            "docs",
            TableSchema::new().policy(
                filter(Operation::Read, |_| -> Result<serde_json::Value, String> {
                    Err("no tenant".into())
                })
                .named("tenant"),
            ),
        );
        let auth = user();
        let ctx = PolicyEvaluationContext::new(&auth, "docs", Operation::Read);

        let err = ev.get_filters("docs", Operation::Read, &ctx).unwrap_err();
        assert_eq!(err.policy, "tenant");
        assert_eq!(err.message, "no tenant");
    }

    #[test]
    fn bypass_callers_get_no_filters() {
        let ev = evaluator(
            "docs",
            TableSchema::new()
                .policy(filter(Operation::Read, |_| json!({"tenant_id": "x"})).named("tenant"))
                .skip_for(["support"]),
        );
        let system = AuthContext::system();
        let support = AuthContext::new("s").with_role("support");

        for auth in [&system, &support] {
            let ctx = PolicyEvaluationContext::new(auth, "docs", Operation::Read);
            assert!(ev.get_filters("docs", Operation::Read, &ctx).unwrap().is_empty());
        }
    }

    #[test]
    fn validate_write_reports_first_failure() {
        let ev = evaluator(
            "orders",
            TableSchema::new()
                .policy(
                    validate([Operation::Create, Operation::Update], |ctx| {
                        ctx.data_value("amount")
                            .and_then(serde_json::Value::as_f64)
                            .is_some_and(|a| a >= 0.0)
                    })
                    .named("non-negative")
                    .priority(10),
                )
                .policy(validate(Operation::Create, |_| false).named("always-fails")),
        );
        let auth = user();
        let bad = row(json!({"amount": -5}));
        let good = row(json!({"amount": 5}));

        let ctx = PolicyEvaluationContext::new(&auth, "orders", Operation::Update).with_data(&bad);
        let err = ev.validate_write("orders", Operation::Update, &ctx).unwrap_err();
        assert_eq!(err.policy_name, "non-negative");

        let ctx = PolicyEvaluationContext::new(&auth, "orders", Operation::Update).with_data(&good);
        assert!(ev.validate_write("orders", Operation::Update, &ctx).is_ok());

        let ctx = PolicyEvaluationContext::new(&auth, "orders", Operation::Create).with_data(&good);
        let err = ev.validate_write("orders", Operation::Create, &ctx).unwrap_err();
        assert_eq!(err.policy_name, "always-fails");

        let ctx = PolicyEvaluationContext::new(&auth, "orders", Operation::Delete);
        assert!(ev.validate_write("orders", Operation::Delete, &ctx).is_ok());
    }

    #[test]
    fn test_policy_runs_single_policy() {
        let ev = evaluator(
            "docs",
            TableSchema::new()
                .policy(allow(Operation::Read, |ctx| ctx.is_owner("owner_id")).named("owner"))
                .policy(filter(Operation::Read, |_| json!({"a": 1})).named("f")),
        );
        let auth = user();
        let owned = row(json!({"owner_id": "u1"}));
        let ctx = PolicyEvaluationContext::new(&auth, "docs", Operation::Read).with_row(&owned);

        let result = ev.test_policy("docs", "owner", &ctx);
        assert!(result.found);
        assert_eq!(result.result, Some(PolicyOutcome::Decision(true)));

        let result = ev.test_policy("docs", "f", &ctx);
        assert_eq!(
            result.result,
            Some(PolicyOutcome::Conditions(row(json!({"a": 1}))))
        );

        let missing = ev.test_policy("docs", "nope", &ctx);
        assert!(!missing.found);
        assert!(missing.result.is_none());
    }

    #[test]
    fn denial_converts_to_error_with_trace() {
        let ev = evaluator(
            "users",
            TableSchema::new()
                .policy(allow(Operation::Delete, |_| false).named("never").priority(300))
                .policy(deny(Operation::Delete, |_| true).named("no-delete").priority(200)),
        );
        let auth = user();
        let ctx = PolicyEvaluationContext::new(&auth, "users", Operation::Delete);

        let err = ev
            .evaluate("users", Operation::Delete, &ctx)
            .into_access_denied("users", Operation::Delete);
        assert_eq!(err.policy_name.as_deref(), Some("no-delete"));
        assert_eq!(err.reason, "denied by policy");
        assert_eq!(err.trace.len(), 2);
        assert_eq!(
            err.to_string(),
            "Access denied: delete on 'users' (policy 'no-delete'): denied by policy"
        );
    }

    #[test]
    fn audit_logger_receives_decisions() {
        let logger = Arc::new(RecordingAuditLogger::new());
        let ev = evaluator(
            "users",
            TableSchema::new().policy(deny(Operation::Delete, |_| true).named("no-delete")),
        )
        .with_audit_logger(logger.clone());
        let auth = user();

        let ctx = PolicyEvaluationContext::new(&auth, "users", Operation::Read);
        ev.evaluate("users", Operation::Read, &ctx);
        ev.evaluate("users", Operation::Delete, &ctx);

        let events = logger.events();
        assert_eq!(events.len(), 2);
        assert!(events[0].allowed);
        assert_eq!(events[0].operation, Operation::Read);
        assert!(!events[1].allowed);
        assert_eq!(events[1].policy_name.as_deref(), Some("no-delete"));
        assert_eq!(events[1].extra.user_id, "u1");
    }

    fn failing_condition(_: &ActivationContext) -> bool {
        panic!("flag service down")
    }

    #[test]
    fn failing_activation_never_widens_access() {
        let ev = evaluator(
            "users",
            TableSchema::new()
                .policy(when_condition(
                    failing_condition,
                    allow(Operation::Read, |_| true).named("beta-read").build(),
                ))
                .policy(when_condition(
                    failing_condition,
                    deny(Operation::Delete, |_| true).named("freeze").build(),
                ))
                .policy(when_condition(
                    failing_condition,
                    filter(Operation::Read, |ctx| json!({ "tenant_id": ctx.auth.tenant_id }))
                        .named("tenant")
                        .build(),
                ))
                .policy(when_condition(
                    failing_condition,
                    validate(Operation::Create, |_| false).named("frozen").build(),
                ))
                .default_deny(true),
        );
        let auth = user();

        let ctx = PolicyEvaluationContext::new(&auth, "users", Operation::Read);
        let read = ev.evaluate("users", Operation::Read, &ctx);
        assert!(!read.allowed);
        assert_eq!(read.reason.as_deref(), Some(REASON_DEFAULT));
        assert!(!read.evaluated_policies[0].active);

        let delete = ev.evaluate("users", Operation::Delete, &ctx);
        assert!(!delete.allowed);
        assert_eq!(delete.policy_name.as_deref(), Some("freeze"));

        let filters = ev.get_filters("users", Operation::Read, &ctx).unwrap();
        assert_eq!(filters.conditions["tenant_id"], json!("tenant-1"));

        let data = row(json!({"name": "x"}));
        let ctx = PolicyEvaluationContext::new(&auth, "users", Operation::Create).with_data(&data);
        let err = ev.validate_write("users", Operation::Create, &ctx).unwrap_err();
        assert_eq!(err.policy_name, "frozen");
    }

    struct PanickingAuditLogger;

    impl AuditLogger for PanickingAuditLogger {
        fn log_allow(&self, _: Operation, _: &str, _: Option<&str>, _: &AuditExtra) {
            panic!("audit sink unavailable");
        }

        fn log_deny(&self, _: Operation, _: &str, _: Option<&str>, _: &AuditExtra) {
            panic!("audit sink unavailable");
        }
    }

    #[test]
    fn failing_audit_logger_does_not_change_the_decision() {
        let ev = evaluator(
            "users",
            TableSchema::new().policy(deny(Operation::Delete, |_| true).named("no-delete")),
        )
        .with_audit_logger(Arc::new(PanickingAuditLogger));
        let auth = user();
        let ctx = PolicyEvaluationContext::new(&auth, "users", Operation::Read);

        assert!(ev.evaluate("users", Operation::Read, &ctx).allowed);
        let delete = ev.evaluate("users", Operation::Delete, &ctx);
        assert!(!delete.allowed);
        assert_eq!(delete.policy_name.as_deref(), Some("no-delete"));
    }
}
