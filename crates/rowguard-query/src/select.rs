//! Read-query filtering.
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  SELECT * FROM users                 │
//! └───────────────┬─────────────────────┘
//!                 │ evaluate(users, read)
//!                 │   denied → AccessDeniedError
//!                 ▼
//! ┌─────────────────────────────────────┐
//! │  get_filters(users, read)            │
//! │  {tenant_id: "t1", role: [a, b]}     │
//! └───────────────┬─────────────────────┘
//!                 │ and_where per key
//!                 ▼
//! ┌─────────────────────────────────────┐
//! │  SELECT * FROM users                 │
//! │  WHERE tenant_id = $1                │
//! │    AND role IN ($2, $3)              │
//! └─────────────────────────────────────┘
//! ```
//!
//! A denied read is an error, never an empty result set.

use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

use rowguard_policy::{PolicyEvaluator, Result, RlsError};
use rowguard_types::{Operation, PolicyEvaluationContext, Row, Value};
use serde::{Deserialize, Serialize};
use tracing::debug;

// ============================================================================
// Query-builder collaborator
// ============================================================================

/// Comparison used for one injected condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterOperator {
    /// `column = value`
    Eq,
    /// `column IN (values...)`
    In,
    /// `column IS NULL`
    IsNull,
}

impl FilterOperator {
    /// Picks the operator for a filter value: arrays use `IN`, null uses
    /// `IS NULL`, everything else `=`.
    pub fn for_value(value: &Value) -> Self {
        match value {
            Value::Array(_) => FilterOperator::In,
            Value::Null => FilterOperator::IsNull,
            _ => FilterOperator::Eq,
        }
    }

    pub fn to_sql(self) -> &'static str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::In => "IN",
            FilterOperator::IsNull => "IS NULL",
        }
    }

    /// Evaluates the condition against an already fetched column value.
    ///
    /// A missing column counts as null.
    pub fn matches(self, actual: Option<&Value>, expected: &Value) -> bool {
        let actual = actual.filter(|v| !v.is_null());
        match (self, actual) {
            (FilterOperator::IsNull, actual) => actual.is_none(),
            (_, None) => false,
            (FilterOperator::Eq, Some(actual)) => actual == expected,
            (FilterOperator::In, Some(actual)) => expected
                .as_array()
                .is_some_and(|values| values.contains(actual)),
        }
    }
}

/// Returns whether `row` satisfies every condition, with the operators
/// [`SelectTransformer::transform`] would inject.
pub fn row_satisfies(row: &Row, conditions: &Row) -> bool {
    conditions.iter().all(|(column, expected)| {
        FilterOperator::for_value(expected).matches(row.get(column), expected)
    })
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_sql())
    }
}

/// A read-query builder that accepts AND-ed conditions.
///
/// Implement this for the host's query builder. The transformer only ever
/// adds conditions; it never removes or reorders existing ones.
pub trait FilterableQuery: Sized {
    fn and_where(self, column: &str, operator: FilterOperator, value: Value) -> Self;
}

/// Returns whether `column` is a plain, optionally dotted, SQL identifier.
pub fn is_sql_identifier(column: &str) -> bool {
    !column.is_empty()
        && column.split('.').all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

// ============================================================================
// SelectTransformer
// ============================================================================

/// Restricts read queries according to a table's policies.
#[derive(Debug, Clone)]
pub struct SelectTransformer {
    evaluator: Arc<PolicyEvaluator>,
}

impl SelectTransformer {
    pub fn new(evaluator: Arc<PolicyEvaluator>) -> Self {
        Self { evaluator }
    }

    pub fn evaluator(&self) -> &Arc<PolicyEvaluator> {
        &self.evaluator
    }

    /// Checks read access to `table` and ANDs its filter conditions into
    /// `query`.
    ///
    /// # Errors
    ///
    /// - [`RlsError::AccessDenied`] when the read is denied. The query is
    ///   not touched.
    /// - [`RlsError::Predicate`] when a filter function fails.
    /// - [`RlsError::InvalidFilterColumn`] when a filter names something
    ///   that is not a plain identifier.
    pub fn transform<'a, Q: FilterableQuery>(
        &self,
        query: Q,
        table: &'a str,
        ctx: &PolicyEvaluationContext<'a>,
    ) -> Result<Q> {
        let decision = self.evaluator.evaluate(table, Operation::Read, ctx);
        if !decision.allowed {
            return Err(decision.into_access_denied(table, Operation::Read).into());
        }

        let filters = self.evaluator.get_filters(table, Operation::Read, ctx)?;
        if let Some(column) = filters.conditions.keys().find(|c| !is_sql_identifier(c)) {
            return Err(RlsError::InvalidFilterColumn {
                table: table.to_string(),
                column: column.clone(),
            });
        }

        debug!(
            table = %table,
            filters = ?filters.applied_filters,
            conditions = filters.conditions.len(),
            "Applying RLS filters to select"
        );

        Ok(filters
            .conditions
            .into_iter()
            .fold(query, |query, (column, value)| {
                let operator = FilterOperator::for_value(&value);
                query.and_where(&column, operator, value)
            }))
    }
}

// ============================================================================
// SqlSelect
// ============================================================================

/// A minimal SELECT builder with positional (`$n`) parameters.
///
/// ```
/// use rowguard_query::{FilterOperator, FilterableQuery, SqlSelect};
/// use serde_json::json;
///
/// let (sql, params) = SqlSelect::new("users")
///     .and_where("tenant_id", FilterOperator::Eq, json!("t1"))
///     .and_where("role", FilterOperator::In, json!(["a", "b"]))
///     .to_sql();
/// assert_eq!(sql, "SELECT * FROM users WHERE tenant_id = $1 AND role IN ($2, $3)");
/// assert_eq!(params.len(), 3);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SqlSelect {
    table: String,
    columns: Vec<String>,
    conditions: Vec<(String, FilterOperator, Value)>,
}

impl SqlSelect {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            conditions: Vec::new(),
        }
    }

    /// Restricts the projection. An empty list selects `*`.
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn conditions(&self) -> &[(String, FilterOperator, Value)] {
        &self.conditions
    }

    /// Renders the statement and its parameters.
    ///
    /// An empty `IN` list renders as `FALSE`.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let projection = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns.join(", ")
        };
        let mut sql = format!("SELECT {projection} FROM {}", self.table);
        let mut params = Vec::new();

        for (i, (column, operator, value)) in self.conditions.iter().enumerate() {
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            match (operator, value) {
                (FilterOperator::IsNull, _) => {
                    let _ = write!(sql, "{column} IS NULL");
                }
                (FilterOperator::In, Value::Array(items)) if items.is_empty() => {
                    sql.push_str("FALSE");
                }
                (FilterOperator::In, Value::Array(items)) => {
                    let placeholders: Vec<String> = items
                        .iter()
                        .map(|item| {
                            params.push(item.clone());
                            format!("${}", params.len())
                        })
                        .collect();
                    let _ = write!(sql, "{column} IN ({})", placeholders.join(", "));
                }
                (FilterOperator::In | FilterOperator::Eq, value) => {
                    params.push(value.clone());
                    let _ = write!(sql, "{column} {} ${}", operator.to_sql(), params.len());
                }
            }
        }
        (sql, params)
    }
}

impl FilterableQuery for SqlSelect {
    fn and_where(mut self, column: &str, operator: FilterOperator, value: Value) -> Self {
        self.conditions.push((column.to_string(), operator, value));
        self
    }
}
