//! The assembled engine.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rowguard_config::{ConfigError, RowguardConfig};
use rowguard_field::{
    FieldAccessProcessor, FieldAccessRegistry, FieldAccessSchema, MaskOptions, MaskedRow,
};
use rowguard_policy::{
    AuditLogger, Clock, ConfigurationError, EvaluationResult, Features, FilterResult,
    PolicyEvaluator, PolicyRegistry, PredicateError, Result, RlsError, RlsSchema,
    TracingAuditLogger,
};
use rowguard_query::{FilterableQuery, MutationGuard, SelectTransformer, row_satisfies};
use rowguard_types::{AuthContext, Operation, PolicyEvaluationContext, RlsContext, Row, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::scope;

/// Reasons an engine could not be assembled.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Schema(#[from] ConfigurationError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Row policies, field rules, query and mutation gates behind one handle.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
#[derive(Clone)]
pub struct Engine {
    config: RowguardConfig,
    evaluator: Arc<PolicyEvaluator>,
    fields: FieldAccessProcessor,
    select: SelectTransformer,
    mutations: MutationGuard,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("evaluator", &self.evaluator)
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn config(&self) -> &RowguardConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &Arc<PolicyEvaluator> {
        &self.evaluator
    }

    pub fn policies(&self) -> &Arc<PolicyRegistry> {
        self.evaluator.registry()
    }

    pub fn field_processor(&self) -> &FieldAccessProcessor {
        &self.fields
    }

    pub fn select_transformer(&self) -> &SelectTransformer {
        &self.select
    }

    pub fn mutation_guard(&self) -> &MutationGuard {
        &self.mutations
    }

    // ------------------------------------------------------------------------
    // Row level
    // ------------------------------------------------------------------------

    pub fn evaluate<'a>(
        &self,
        table: &'a str,
        operation: Operation,
        ctx: &PolicyEvaluationContext<'a>,
    ) -> EvaluationResult {
        self.evaluator.evaluate(table, operation, ctx)
    }

    pub fn get_filters<'a>(
        &self,
        table: &'a str,
        operation: Operation,
        ctx: &PolicyEvaluationContext<'a>,
    ) -> std::result::Result<FilterResult, PredicateError> {
        self.evaluator.get_filters(table, operation, ctx)
    }

    /// Adds the caller's read filters to `query`.
    pub fn transform<'a, Q: FilterableQuery>(
        &self,
        query: Q,
        table: &'a str,
        ctx: &PolicyEvaluationContext<'a>,
    ) -> Result<Q> {
        self.select.transform(query, table, ctx)
    }

    /// Row-level guard followed by the field-level write check on `data`.
    pub fn guard_write<'a>(
        &self,
        table: &'a str,
        operation: Operation,
        existing: Option<&'a Row>,
        data: Option<&'a Row>,
        ctx: &PolicyEvaluationContext<'a>,
    ) -> Result<EvaluationResult> {
        let decision = self.mutations.guard(table, operation, existing, data, ctx)?;

        if let Some(data) = data.filter(|_| operation.carries_payload()) {
            let ctx = ctx.for_operation(operation);
            self.fields.validate_write(table, data, &ctx, existing)?;
        }
        Ok(decision)
    }

    /// Runs `mutation` only after [`Engine::guard_write`] passes.
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
        self.guard_write(table, operation, existing, data, ctx)?;
        Ok(mutation())
    }

    // ------------------------------------------------------------------------
    // Field level
    // ------------------------------------------------------------------------

    pub fn mask_row<'a>(
        &self,
        table: &'a str,
        row: &'a Row,
        ctx: &PolicyEvaluationContext<'a>,
        options: &MaskOptions,
    ) -> MaskedRow {
        self.fields.mask_row(table, row, ctx, options)
    }

    /// Drops rows the caller may not read and masks the rest.
    ///
    /// A row survives when it satisfies every read filter (the same
    /// conditions [`Engine::transform`] would add to a query) and the
    /// allow/deny policies permit reading it. Relative order of the
    /// surviving rows is preserved.
    ///
    /// Allow/deny policies are evaluated per row, so the audit logger
    /// receives one event for every row that passes the filters.
    ///
    /// # Errors
    ///
    /// [`RlsError::Predicate`] when a filter function fails. No rows are
    /// returned in that case.
    pub fn read_rows<'a>(
        &self,
        table: &'a str,
        rows: &'a [Row],
        ctx: &PolicyEvaluationContext<'a>,
        options: &MaskOptions,
    ) -> Result<Vec<MaskedRow>> {
        let filters = self.evaluator.get_filters(table, Operation::Read, ctx)?;

        let visible: Vec<MaskedRow> = rows
            .iter()
            .filter(|row| row_satisfies(row, &filters.conditions))
            .filter(|row| {
                let row_ctx = ctx.with_row(*row);
                self.evaluator
                    .evaluate(table, Operation::Read, &row_ctx)
                    .allowed
            })
            .map(|row| self.fields.mask_row(table, row, ctx, options))
            .collect();

        if visible.len() < rows.len() {
            debug!(
                table = %table,
                user_id = %ctx.auth.user_id,
                total = rows.len(),
                visible = visible.len(),
                filters = ?filters.applied_filters,
                "Rows withheld by RLS"
            );
        }
        Ok(visible)
    }

    // ------------------------------------------------------------------------
    // Scoped helpers
    // ------------------------------------------------------------------------

    /// [`Engine::evaluate`] with the context installed by [`scope::with_context`].
    pub fn evaluate_scoped(
        &self,
        table: &str,
        operation: Operation,
        row: Option<&Row>,
    ) -> Result<EvaluationResult> {
        let rls = self.scoped_context()?;
        let mut ctx = rls.evaluation(table, operation);
        ctx.row = row;
        Ok(self.evaluator.evaluate(table, operation, &ctx))
    }

    /// [`Engine::mask_row`] with the context installed by [`scope::with_context`].
    pub fn mask_row_scoped(
        &self,
        table: &str,
        row: &Row,
        options: &MaskOptions,
    ) -> Result<MaskedRow> {
        let rls = self.scoped_context()?;
        let ctx = rls.evaluation(table, Operation::Read);
        Ok(self.fields.mask_row(table, row, &ctx, options))
    }

    fn scoped_context(&self) -> Result<Arc<RlsContext>> {
        match scope::current() {
            Some(ctx) => Ok(ctx),
            None if self.config.engine.require_context => Err(RlsError::MissingContext),
            None => Ok(Arc::new(RlsContext::new(AuthContext::new("")))),
        }
    }
}

/// Validates schemas and configuration, then assembles an [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    config: RowguardConfig,
    policies: Option<RlsSchema>,
    fields: Option<FieldAccessSchema>,
    audit: Option<Arc<dyn AuditLogger>>,
    clock: Option<Arc<dyn Clock>>,
}

impl EngineBuilder {
    pub fn config(mut self, config: RowguardConfig) -> Self {
        self.config = config;
        self
    }

    pub fn policies(mut self, schema: RlsSchema) -> Self {
        self.policies = Some(schema);
        self
    }

    pub fn field_access(mut self, schema: FieldAccessSchema) -> Self {
        self.fields = Some(schema);
        self
    }

    /// Replaces the tracing audit logger. Ignored when audit is disabled.
    pub fn audit_logger(mut self, logger: Arc<dyn AuditLogger>) -> Self {
        self.audit = Some(logger);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> std::result::Result<Engine, BuildError> {
        self.config.validate()?;

        let policies = match self.policies {
            Some(schema) => PolicyRegistry::from_schema(schema)?,
            None => PolicyRegistry::new(),
        };
        let fields = match self.fields {
            Some(schema) => FieldAccessRegistry::from_schema(schema)?,
            None => FieldAccessRegistry::new(),
        };

        let features: BTreeMap<String, Value> = self
            .config
            .features
            .iter()
            .map(|(name, enabled)| (name.clone(), Value::Bool(*enabled)))
            .collect();

        let mut evaluator = PolicyEvaluator::new(Arc::new(policies))
            .with_environment(self.config.engine.environment.clone())
            .with_features(Features::from_map(features))
            .deny_unregistered_tables(self.config.engine.deny_unregistered_tables);

        if let Some(clock) = self.clock {
            evaluator = evaluator.with_clock(clock);
        }

        if self.config.audit.enabled {
            let logger: Arc<dyn AuditLogger> = match self.audit {
                Some(logger) => logger,
                None => Arc::new(
                    TracingAuditLogger::new().with_allows(self.config.audit.log_allows),
                ),
            };
            evaluator = evaluator.with_audit_logger(logger);
        }

        let evaluator = Arc::new(evaluator);
        info!(
            environment = %self.config.engine.environment,
            tables = evaluator.registry().len(),
            field_tables = fields.tables().count(),
            audit = self.config.audit.enabled,
            "RLS engine ready"
        );

        Ok(Engine {
            select: SelectTransformer::new(Arc::clone(&evaluator)),
            mutations: MutationGuard::new(Arc::clone(&evaluator)),
            fields: FieldAccessProcessor::new(Arc::new(fields)),
            evaluator,
            config: self.config,
        })
    }
}
