//! # rowguard-policy: Row-level policy engine
//!
//! Declarative, prioritized rules deciding per table and operation:
//! - whether a caller may read or write a row (**allow** / **deny**)
//! - which conditions must be added to a read query (**filter**)
//! - whether a write payload is acceptable (**validate**)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  define_schema([(table, TableSchema)])       │
//! └─────────────────┬───────────────────────────┘
//!                   │ register (fail fast)
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │  PolicyRegistry (read-only, Arc-shared)      │
//! │  └─ per table: policies sorted by priority   │
//! └─────────────────┬───────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │  PolicyEvaluator                             │
//! │  ├─ evaluate        → EvaluationResult       │
//! │  ├─ get_filters     → FilterResult           │
//! │  ├─ validate_write  → Result<(), _>          │
//! │  └─ AuditLogger     (fire and forget)        │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Decision order
//!
//! 1. System callers are always allowed.
//! 2. Callers holding a `skip_for` role are always allowed.
//! 3. Active allow/deny policies are walked by priority; the first match wins.
//! 4. Otherwise the table's `default_deny` flag decides.
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use rowguard_policy::{PolicyEvaluator, PolicyRegistry, TableSchema, allow, define_schema, deny, filter};
//! use rowguard_types::{AuthContext, Operation, PolicyEvaluationContext};
//! use serde_json::json;
//!
//! let schema = define_schema([(
//!     "users",
//!     TableSchema::new()
//!         .policy(allow(Operation::Delete, |_| true).named("allow-delete").priority(50))
//!         .policy(deny(Operation::Delete, |_| true).named("no-delete").priority(200))
//!         .policy(
//!             filter(Operation::Read, |ctx| json!({ "tenant_id": ctx.auth.tenant_id }))
//!                 .named("tenant-isolation")
//!                 .priority(100),
//!         ),
//! )]);
//!
//! let registry = Arc::new(PolicyRegistry::from_schema(schema).unwrap());
//! let evaluator = PolicyEvaluator::new(registry);
//!
//! let auth = AuthContext::new("u1").with_tenant("tenant-1").with_role("user");
//! let ctx = PolicyEvaluationContext::new(&auth, "users", Operation::Delete);
//!
//! let result = evaluator.evaluate("users", Operation::Delete, &ctx);
//! assert!(!result.allowed);
//! assert_eq!(result.policy_name.as_deref(), Some("no-delete"));
//!
//! let filters = evaluator.get_filters("users", Operation::Read, &ctx).unwrap();
//! assert_eq!(filters.conditions.get("tenant_id"), Some(&json!("tenant-1")));
//! ```

pub mod activation;
pub mod audit;
pub mod builder;
pub mod error;
pub mod evaluator;
pub mod policy;
pub mod registry;

// Kani proofs for bounded model checking
#[cfg(any(test, kani))]
mod kani_proofs;


pub use activation::{
    ActivationCondition, ActivationContext, Clock, Features, FixedClock, SystemClock,
    when_condition, when_environment, when_feature, when_time_range,
};
pub use audit::{AuditEvent, AuditExtra, AuditLogger, RecordingAuditLogger, TracingAuditLogger};
pub use builder::{PolicyBuilder, allow, deny, filter, validate};
pub use error::{
    AccessDeniedError, ConfigurationError, PredicateError, Result, RlsError, ValidationError,
};
pub use evaluator::{
    EvaluationResult, FilterResult, PolicyEvaluator, PolicyOutcome, PolicyTestResult, PolicyTrace,
};
pub use policy::{
    DecisionType, FilterConditions, FilterOutput, IntoOperations, PolicyDefinition, PolicyKind,
    PredicateOutput,
};
pub use registry::{CompiledTable, PolicyRegistry, RlsSchema, TableSchema, define_schema};
