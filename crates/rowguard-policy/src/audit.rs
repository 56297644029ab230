//! Audit collaborator interface.
//!
//! The evaluator hands every `evaluate` decision to an injected
//! [`AuditLogger`]. Calls are fire-and-forget: loggers own their buffering
//! and cannot fail the decision. A panicking logger is caught and reported
//! with `warn!`; the decision is returned unchanged.

use std::sync::{Mutex, PoisonError};

use rowguard_types::Operation;
use serde::Serialize;
use tracing::{info, warn};

use crate::policy::DecisionType;

/// Context attached to every audit event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditExtra {
    pub user_id: String,
    pub tenant_id: Option<String>,
    pub decision_type: DecisionType,
    pub reason: Option<String>,
}

/// Receives decision events.
pub trait AuditLogger: Send + Sync {
    fn log_allow(
        &self,
        operation: Operation,
        table: &str,
        policy_name: Option<&str>,
        extra: &AuditExtra,
    );

    fn log_deny(
        &self,
        operation: Operation,
        table: &str,
        policy_name: Option<&str>,
        extra: &AuditExtra,
    );
}

/// Emits decisions as `tracing` events.
///
/// Allows are logged at `info`, denies at `warn`.
#[derive(Debug, Clone, Copy)]
pub struct TracingAuditLogger {
    log_allows: bool,
}

impl TracingAuditLogger {
    pub fn new() -> Self {
        Self { log_allows: true }
    }

    /// Suppresses allow events (denies are always logged).
    pub fn without_allows(mut self) -> Self {
        self.log_allows = false;
        self
    }

    pub fn with_allows(mut self, log_allows: bool) -> Self {
        self.log_allows = log_allows;
        self
    }
}

impl Default for TracingAuditLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLogger for TracingAuditLogger {
    fn log_allow(
        &self,
        operation: Operation,
        table: &str,
        policy_name: Option<&str>,
        extra: &AuditExtra,
    ) {
        if !self.log_allows {
            return;
        }
        info!(
            operation = %operation,
            table = %table,
            policy = ?policy_name,
            user_id = %extra.user_id,
            tenant_id = ?extra.tenant_id,
            reason = ?extra.reason,
            "RLS access granted"
        );
    }

    fn log_deny(
        &self,
        operation: Operation,
        table: &str,
        policy_name: Option<&str>,
        extra: &AuditExtra,
    ) {
        warn!(
            operation = %operation,
            table = %table,
            policy = ?policy_name,
            user_id = %extra.user_id,
            tenant_id = ?extra.tenant_id,
            reason = ?extra.reason,
            "RLS access denied"
        );
    }
}

/// One recorded decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEvent {
    pub allowed: bool,
    pub operation: Operation,
    pub table: String,
    pub policy_name: Option<String>,
    pub extra: AuditExtra,
}

/// Keeps decisions in memory.
///
/// Useful in host test suites that assert on what was audited.
#[derive(Debug, Default)]
pub struct RecordingAuditLogger {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn denials(&self) -> Vec<AuditEvent> {
        self.events().into_iter().filter(|e| !e.allowed).collect()
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn record(
        &self,
        allowed: bool,
        operation: Operation,
        table: &str,
        policy_name: Option<&str>,
        extra: &AuditExtra,
    ) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(AuditEvent {
                allowed,
                operation,
                table: table.to_string(),
                policy_name: policy_name.map(str::to_string),
                extra: extra.clone(),
            });
    }
}

impl AuditLogger for RecordingAuditLogger {
    fn log_allow(
        &self,
        operation: Operation,
        table: &str,
        policy_name: Option<&str>,
        extra: &AuditExtra,
    ) {
        self.record(true, operation, table, policy_name, extra);
    }

    fn log_deny(
        &self,
        operation: Operation,
        table: &str,
        policy_name: Option<&str>,
        extra: &AuditExtra,
    ) {
        self.record(false, operation, table, policy_name, extra);
    }
}
