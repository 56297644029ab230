//! # rowguard-field: Column-level access
//!
//! Row policies decide which rows a caller touches. This crate decides which
//! columns of those rows the caller sees and may write:
//!
//! - [`schema`]: declarative per-column rules and ready-made helpers
//! - [`registry`]: validated, shareable compiled rules
//! - [`processor`]: masking of rows and checking of write payloads
//! - [`masking`]: value masking strategies
//!
//! ```
//! use std::sync::Arc;
//!
//! use rowguard_field::{
//!     FieldAccessProcessor, FieldAccessRegistry, MaskOptions, TableFieldAccess,
//!     define_field_access_schema, mask_ssn, masked_field, never_accessible,
//! };
//! use rowguard_types::{AuthContext, Operation, PolicyEvaluationContext};
//! use serde_json::json;
//!
//! let schema = define_field_access_schema([(
//!     "patients",
//!     TableFieldAccess::new()
//!         .field("ssn", masked_field(mask_ssn(), ["physician"]))
//!         .field("notes", never_accessible().omit_when_hidden()),
//! )]);
//! let registry = FieldAccessRegistry::from_schema(schema).unwrap();
//! let processor = FieldAccessProcessor::new(Arc::new(registry));
//!
//! let auth = AuthContext::new("nurse-1").with_role("nurse");
//! let ctx = PolicyEvaluationContext::new(&auth, "patients", Operation::Read);
//! let row = json!({"name": "Ann", "ssn": "123-45-6789", "notes": "..."})
//!     .as_object()
//!     .cloned()
//!     .unwrap();
//!
//! let masked = processor.mask_row("patients", &row, &ctx, &MaskOptions::new());
//! assert_eq!(masked.data.get("ssn"), Some(&json!("***-**-6789")));
//! assert!(!masked.data.contains_key("notes"));
//! ```

pub mod masking;
pub mod processor;
pub mod registry;
pub mod schema;


pub use masking::{
    MaskFn, MaskingError, MaskingStrategy, RedactPattern, mask_constant, mask_credit_card,
    mask_email, mask_hash, mask_phone, mask_ssn, mask_token, mask_truncate,
};
pub use processor::{FieldAccessProcessor, MaskOptions, MaskedRow};
pub use registry::{CompiledFieldTable, FieldAccessRegistry};
pub use schema::{
    FieldAccessConfig, FieldAccessSchema, FieldDefault, FieldPredicate, TableFieldAccess,
    define_field_access_schema, masked_field, never_accessible, owner_only, owner_or_roles,
    public_read_restricted_write, read_only, roles_only,
};
