//! Field-level enforcement.
//!
//! Row-level policies decide whether a row is visible at all; the processor
//! then decides, column by column, what the caller sees and may write.
//!
//! Resolution for a single column:
//! 1. table has no field rules → accessible
//! 2. system caller or `skip_for` role → accessible
//! 3. column has a predicate → predicate result (a panic counts as `false`)
//! 4. otherwise → table default

use std::any::Any;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use rowguard_policy::AccessDeniedError;
use rowguard_types::{Operation, PolicyEvaluationContext, Row, Value};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::masking::MaskFn;
use crate::registry::{CompiledFieldTable, FieldAccessRegistry};
use crate::schema::{FieldAccessConfig, FieldPredicate};

/// Key filtering applied before masking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskOptions {
    /// Only these keys are kept, when set.
    pub include_fields: Option<BTreeSet<String>>,
    /// These keys are always dropped.
    pub exclude_fields: BTreeSet<String>,
}

impl MaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include_fields
            .get_or_insert_with(BTreeSet::new)
            .extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn exclude<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_fields.extend(fields.into_iter().map(Into::into));
        self
    }

    fn keeps(&self, field: &str) -> bool {
        if self.exclude_fields.contains(field) {
            return false;
        }
        self.include_fields
            .as_ref()
            .is_none_or(|include| include.contains(field))
    }
}

/// A row after column masking.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaskedRow {
    pub data: Row,
    /// Keys whose values were replaced.
    pub masked_fields: Vec<String>,
    /// Keys removed because they were hidden and marked `omit_when_hidden`.
    pub omitted_fields: Vec<String>,
}

impl MaskedRow {
    pub fn was_modified(&self) -> bool {
        !self.masked_fields.is_empty() || !self.omitted_fields.is_empty()
    }
}

/// Applies field access rules to rows and payloads.
#[derive(Debug, Clone)]
pub struct FieldAccessProcessor {
    registry: Arc<FieldAccessRegistry>,
}

impl FieldAccessProcessor {
    pub fn new(registry: Arc<FieldAccessRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<FieldAccessRegistry> {
        &self.registry
    }

    /// Returns whether `field` of `row` is visible to the caller.
    pub fn can_read_field<'a>(
        &self,
        table: &'a str,
        field: &str,
        ctx: &PolicyEvaluationContext<'a>,
        row: Option<&'a Row>,
    ) -> bool {
        let Some(compiled) = self.rules_for(table, ctx) else {
            return true;
        };
        let ctx = read_context(table, ctx, row);
        resolve(compiled, field, &ctx, |config| config.read.as_ref())
    }

    /// Returns whether the caller may set `field`, with `row` as the existing row.
    pub fn can_write_field<'a>(
        &self,
        table: &'a str,
        field: &str,
        ctx: &PolicyEvaluationContext<'a>,
        row: Option<&'a Row>,
    ) -> bool {
        let Some(compiled) = self.rules_for(table, ctx) else {
            return true;
        };
        let ctx = write_context(table, ctx, row, ctx.data);
        resolve(compiled, field, &ctx, |config| config.write.as_ref())
    }

    /// Masks the hidden columns of `row`.
    ///
    /// Keys filtered out by `options` are dropped without being reported.
    pub fn mask_row<'a>(
        &self,
        table: &'a str,
        row: &'a Row,
        ctx: &PolicyEvaluationContext<'a>,
        options: &MaskOptions,
    ) -> MaskedRow {
        let rules = self.rules_for(table, ctx);
        let ctx = read_context(table, ctx, Some(row));
        let mut masked = MaskedRow {
            data: Row::with_capacity(row.len()),
            ..MaskedRow::default()
        };

        for (field, value) in row {
            if !options.keeps(field) {
                continue;
            }

            let visible =
                rules.is_none_or(|compiled| resolve(compiled, field, &ctx, |c| c.read.as_ref()));
            if visible {
                masked.data.insert(field.clone(), value.clone());
                continue;
            }

            let config = rules.and_then(|compiled| compiled.field(field));
            if config.is_some_and(|c| c.omit_when_hidden) {
                masked.omitted_fields.push(field.clone());
                continue;
            }

            let replacement = config
                .and_then(|c| c.mask_fn.as_ref())
                .map_or(Value::Null, |mask_fn| call_mask(mask_fn, value));
            masked.data.insert(field.clone(), replacement);
            masked.masked_fields.push(field.clone());
        }

        if masked.was_modified() {
            debug!(
                table = %table,
                user_id = %ctx.auth.user_id,
                masked = masked.masked_fields.len(),
                omitted = masked.omitted_fields.len(),
                "Masked hidden fields"
            );
        }
        masked
    }

    /// Masks each row; output index `i` corresponds to input index `i`.
    pub fn mask_rows<'a>(
        &self,
        table: &'a str,
        rows: &'a [Row],
        ctx: &PolicyEvaluationContext<'a>,
        options: &MaskOptions,
    ) -> Vec<MaskedRow> {
        rows.iter()
            .map(|row| self.mask_row(table, row, ctx, options))
            .collect()
    }

    /// Checks every key of `data` for write access.
    ///
    /// # Errors
    ///
    /// Returns [`AccessDeniedError`] naming the first key that may not be
    /// written.
    pub fn validate_write<'a>(
        &self,
        table: &'a str,
        data: &'a Row,
        ctx: &PolicyEvaluationContext<'a>,
        existing: Option<&'a Row>,
    ) -> Result<(), AccessDeniedError> {
        let Some(compiled) = self.rules_for(table, ctx) else {
            return Ok(());
        };
        let ctx = write_context(table, ctx, existing, Some(data));

        let blocked = data
            .keys()
            .find(|field| !resolve(compiled, field, &ctx, |c| c.write.as_ref()));

        match blocked {
            None => Ok(()),
            Some(field) => {
                debug!(
                    table = %table,
                    field = %field,
                    user_id = %ctx.auth.user_id,
                    "Field write blocked"
                );
                Err(
                    AccessDeniedError::new(
                        table,
                        ctx.operation,
                        format!("field '{field}' is not writable"),
                    )
                    .with_field(field.clone()),
                )
            }
        }
    }

    /// Keys of `row` the caller may read, in row order.
    pub fn get_readable_fields<'a>(
        &self,
        table: &'a str,
        row: &'a Row,
        ctx: &PolicyEvaluationContext<'a>,
    ) -> Vec<String> {
        let rules = self.rules_for(table, ctx);
        let ctx = read_context(table, ctx, Some(row));
        row.keys()
            .filter(|field| {
                rules.is_none_or(|compiled| resolve(compiled, field, &ctx, |c| c.read.as_ref()))
            })
            .cloned()
            .collect()
    }

    /// Keys of `row` the caller may write, in row order.
    pub fn get_writable_fields<'a>(
        &self,
        table: &'a str,
        row: &'a Row,
        ctx: &PolicyEvaluationContext<'a>,
    ) -> Vec<String> {
        let rules = self.rules_for(table, ctx);
        let ctx = write_context(table, ctx, Some(row), ctx.data);
        row.keys()
            .filter(|field| {
                rules.is_none_or(|compiled| resolve(compiled, field, &ctx, |c| c.write.as_ref()))
            })
            .cloned()
            .collect()
    }

    /// Rules that apply to this caller, or `None` when every column is open.
    fn rules_for(
        &self,
        table: &str,
        ctx: &PolicyEvaluationContext<'_>,
    ) -> Option<&CompiledFieldTable> {
        if ctx.auth.is_system {
            return None;
        }
        self.registry
            .table(table)
            .filter(|compiled| !compiled.is_skipped_for(ctx.auth))
    }
}

fn read_context<'a>(
    table: &'a str,
    ctx: &PolicyEvaluationContext<'a>,
    row: Option<&'a Row>,
) -> PolicyEvaluationContext<'a> {
    PolicyEvaluationContext {
        table,
        operation: Operation::Read,
        row: row.or(ctx.row),
        ..*ctx
    }
}

fn write_context<'a>(
    table: &'a str,
    ctx: &PolicyEvaluationContext<'a>,
    row: Option<&'a Row>,
    data: Option<&'a Row>,
) -> PolicyEvaluationContext<'a> {
    let operation = if ctx.operation.is_write() {
        ctx.operation
    } else {
        Operation::Update
    };
    PolicyEvaluationContext {
        table,
        operation,
        row: row.or(ctx.row),
        data,
        ..*ctx
    }
}

fn resolve(
    compiled: &CompiledFieldTable,
    field: &str,
    ctx: &PolicyEvaluationContext<'_>,
    select: impl Fn(&FieldAccessConfig) -> Option<&FieldPredicate>,
) -> bool {
    match compiled.field(field).and_then(select) {
        Some(predicate) => call_predicate(predicate, ctx, field),
        None => compiled.default_access().allows(),
    }
}

fn call_predicate(
    predicate: &FieldPredicate,
    ctx: &PolicyEvaluationContext<'_>,
    field: &str,
) -> bool {
    panic::catch_unwind(AssertUnwindSafe(|| predicate(ctx))).unwrap_or_else(|payload| {
        debug!(
            table = %ctx.table,
            field = %field,
            error = %panic_message(payload.as_ref()),
            "Field predicate panicked; treating as inaccessible"
        );
        false
    })
}

fn call_mask(mask_fn: &MaskFn, value: &Value) -> Value {
    panic::catch_unwind(AssertUnwindSafe(|| mask_fn(value))).unwrap_or(Value::Null)
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "panicked"
    }
}
