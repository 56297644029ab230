//! Conditional policy activation.
//!
//! An activation condition decides whether a policy participates in
//! evaluation at all, based on where and when the engine is running rather
//! than on who is asking. Wrappers compose with logical AND, so
//!
//! ```
//! use rowguard_policy::activation::{when_environment, when_time_range};
//! use rowguard_policy::builder::deny;
//! use rowguard_types::Operation;
//!
//! let policy = when_environment(
//!     ["production"],
//!     when_time_range(22, 6, deny(Operation::Delete, |_| true).named("no-night-deletes").build()),
//! );
//! assert!(policy.is_conditional());
//! ```
//!
//! is only considered in production between 22:00 and 06:00 UTC.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use rowguard_types::{Value, is_truthy};
use serde::{Deserialize, Serialize};

use crate::policy::PolicyDefinition;

/// Predicate over the activation context.
pub type ActivationCondition = Arc<dyn Fn(&ActivationContext) -> bool + Send + Sync>;

// ============================================================================
// Features
// ============================================================================

/// Feature flags visible to activation conditions.
///
/// Accepts either a flag map (`{"beta": true, "limit": 3}`) or a list of
/// enabled feature names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Features(BTreeMap<String, Value>);

impl Features {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds flags from a list of enabled feature names.
    pub fn from_enabled<I, S>(enabled: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            enabled
                .into_iter()
                .map(|name| (name.into(), Value::Bool(true)))
                .collect(),
        )
    }

    pub fn from_map(flags: BTreeMap<String, Value>) -> Self {
        Self(flags)
    }

    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    /// Returns whether `name` is present and truthy.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.0.get(name).is_some_and(is_truthy)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ============================================================================
// ActivationContext
// ============================================================================

/// Where and when an evaluation happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivationContext {
    pub environment: String,
    pub features: Features,
    pub timestamp: DateTime<Utc>,
}

impl ActivationContext {
    pub fn new(
        environment: impl Into<String>,
        features: Features,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            environment: environment.into(),
            features,
            timestamp,
        }
    }

    /// UTC hour of the evaluation timestamp.
    pub fn hour(&self) -> u32 {
        self.timestamp.hour()
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Source of the activation timestamp.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// ============================================================================
// Wrappers
// ============================================================================

/// AND-composes `condition` with any activation already on `policy`.
pub fn with_activation(
    mut policy: PolicyDefinition,
    condition: impl Fn(&ActivationContext) -> bool + Send + Sync + 'static,
) -> PolicyDefinition {
    let combined: ActivationCondition = match policy.activation.take() {
        Some(existing) => Arc::new(move |ctx: &ActivationContext| {
            existing(ctx) && condition(ctx)
        }),
        None => Arc::new(condition),
    };
    policy.activation = Some(combined);
    policy
}

/// Active only when the engine runs in one of `environments`.
pub fn when_environment<I, S>(environments: I, policy: PolicyDefinition) -> PolicyDefinition
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let environments: Vec<String> = environments.into_iter().map(Into::into).collect();
    with_activation(policy, move |ctx| {
        environments.iter().any(|env| *env == ctx.environment)
    })
}

/// Active only while feature `name` is truthy.
pub fn when_feature(name: impl Into<String>, policy: PolicyDefinition) -> PolicyDefinition {
    let name = name.into();
    with_activation(policy, move |ctx| ctx.features.is_enabled(&name))
}

/// Active while the UTC hour is within `[start_hour, end_hour)`.
///
/// When `start_hour > end_hour` the window crosses midnight.
///
/// # Panics
///
/// Panics if either hour is greater than 23.
pub fn when_time_range(
    start_hour: u32,
    end_hour: u32,
    policy: PolicyDefinition,
) -> PolicyDefinition {
    assert!(
        start_hour <= 23 && end_hour <= 23,
        "time range hours must be 0..=23, got {start_hour}..{end_hour}"
    );
    with_activation(policy, move |ctx| hour_in_window(ctx.hour(), start_hour, end_hour))
}

/// Active while `condition` holds.
pub fn when_condition(
    condition: impl Fn(&ActivationContext) -> bool + Send + Sync + 'static,
    policy: PolicyDefinition,
) -> PolicyDefinition {
    with_activation(policy, condition)
}

/// Returns whether `hour` falls inside `[start, end)`.
///
/// `start > end` wraps past midnight; `start == end` is an empty window.
pub fn hour_in_window(hour: u32, start: u32, end: u32) -> bool {
    if start <= end {
        start <= hour && hour < end
    } else {
        hour >= start || hour < end
    }
}

// ============================================================================
// Tests
// ============================================================================
