//! # rowguard-query: RLS at the query boundary
//!
//! Two consumers of the policy evaluator:
//! - [`SelectTransformer`] adds filter conditions to read queries through the
//!   [`FilterableQuery`] collaborator trait.
//! - [`MutationGuard`] gates create, update and delete before storage is
//!   touched.
//!
//! [`SqlSelect`] is a small reference builder, handy in tests and for hosts
//! that assemble SQL by hand.

pub mod mutation;
pub mod select;

pub use mutation::MutationGuard;
pub use select::{
    FilterOperator, FilterableQuery, SelectTransformer, SqlSelect, is_sql_identifier, row_satisfies,
};
