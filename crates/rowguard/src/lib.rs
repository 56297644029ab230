//! # rowguard
//!
//! Policy-based row-level security for application data access.
//!
//! Tables get declarative, prioritized policies deciding which rows a caller
//! may read or write, which conditions are added to read queries, and which
//! write payloads are acceptable. Field rules then decide which columns of a
//! visible row the caller sees unmasked and may change.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                            Engine                              │
//! │  ┌──────────────┐   ┌─────────────────┐   ┌─────────────────┐  │
//! │  │ PolicyRegistry│ → │ PolicyEvaluator │ → │ SelectTransformer│  │
//! │  │ (row rules)  │   │ (+ AuditLogger) │   │ MutationGuard    │  │
//! │  └──────────────┘   └─────────────────┘   └─────────────────┘  │
//! │  ┌──────────────────┐   ┌──────────────────────┐               │
//! │  │FieldAccessRegistry│ → │ FieldAccessProcessor │ (mask/write)  │
//! │  └──────────────────┘   └──────────────────────┘               │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use rowguard::{
//!     AuthContext, Engine, MaskOptions, Operation, SqlSelect, TableFieldAccess, TableSchema,
//!     define_field_access_schema, define_schema, filter, mask_email, masked_field,
//! };
//! use serde_json::json;
//!
//! let engine = Engine::builder()
//!     .policies(define_schema([(
//!         "users",
//!         TableSchema::new().policy(
//!             filter(Operation::Read, |ctx| json!({ "tenant_id": ctx.auth.tenant_id }))
//!                 .named("tenant-isolation"),
//!         ),
//!     )]))
//!     .field_access(define_field_access_schema([(
//!         "users",
//!         TableFieldAccess::new().field("email", masked_field(mask_email(), ["support"])),
//!     )]))
//!     .build()
//!     .unwrap();
//!
//! let auth = AuthContext::new("u1").with_tenant("acme");
//! let ctx = rowguard::PolicyEvaluationContext::new(&auth, "users", Operation::Read);
//!
//! let query = engine.transform(SqlSelect::new("users"), "users", &ctx).unwrap();
//! assert_eq!(query.to_sql().0, "SELECT * FROM users WHERE tenant_id = $1");
//!
//! let row = json!({"id": 1, "email": "ada@example.com"}).as_object().cloned().unwrap();
//! let masked = engine.mask_row("users", &row, &ctx, &MaskOptions::new());
//! assert_eq!(masked.data["email"], json!("a***@example.com"));
//! ```
//!
//! # Modules
//!
//! - **Facade**: [`Engine`], [`EngineBuilder`]
//! - **Ambient context**: [`scope`]
//! - **Async pre-resolution**: [`resolver`]

mod engine;
pub mod resolver;
pub mod scope;

pub use engine::{BuildError, Engine, EngineBuilder};
pub use resolver::{CachedResolver, ContextResolver, ResolverError, inject_meta};

// Re-export core types
pub use rowguard_types::{
    AuthContext, Operation, PolicyEvaluationContext, RlsContext, Row, Value, is_truthy,
    value_matches,
};

// Re-export the policy layer
pub use rowguard_policy::{
    AccessDeniedError, ActivationContext, AuditEvent, AuditExtra, AuditLogger, Clock,
    CompiledTable, ConfigurationError, DecisionType, EvaluationResult, Features, FilterResult,
    FixedClock, PolicyBuilder, PolicyDefinition, PolicyEvaluator, PolicyKind, PolicyRegistry,
    PolicyTrace, PredicateError, RecordingAuditLogger, Result, RlsError, RlsSchema, SystemClock,
    TableSchema, TracingAuditLogger, ValidationError, allow, define_schema, deny, filter, validate,
    when_condition, when_environment, when_feature, when_time_range,
};

// Re-export query integration
pub use rowguard_query::{
    FilterOperator, FilterableQuery, MutationGuard, SelectTransformer, SqlSelect, row_satisfies,
};

// Re-export field-level access
pub use rowguard_field::{
    FieldAccessConfig, FieldAccessProcessor, FieldAccessRegistry, FieldAccessSchema, FieldDefault,
    MaskFn, MaskOptions, MaskedRow, MaskingStrategy, RedactPattern, TableFieldAccess,
    define_field_access_schema, mask_constant, mask_credit_card, mask_email, mask_hash,
    mask_phone, mask_ssn, mask_token, mask_truncate, masked_field, never_accessible, owner_only,
    owner_or_roles, public_read_restricted_write, read_only, roles_only,
};

// Re-export configuration
pub use rowguard_config::{ConfigLoader, RowguardConfig};
