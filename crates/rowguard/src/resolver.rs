//! Context resolution ahead of evaluation.
//!
//! Relationship lookups (team membership, shared documents, delegation) are
//! usually async and hit storage. Predicates are synchronous, so the lookup
//! runs first and its JSON output is placed under a key in `ctx.meta`, where
//! predicates read it with [`PolicyEvaluationContext::meta_value`].
//!
//! [`PolicyEvaluationContext::meta_value`]: rowguard_types::PolicyEvaluationContext::meta_value

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rowguard_config::ResolverConfig;
use rowguard_types::{AuthContext, RlsContext, Value};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolverError {
    #[error("Context resolution failed: {0}")]
    Failed(String),

    #[error("Context resolution is not available for user '{user_id}'")]
    Unavailable { user_id: String },
}

/// Produces request-scoped data for policy predicates.
pub trait ContextResolver: Send + Sync {
    fn resolve(
        &self,
        auth: &AuthContext,
    ) -> impl Future<Output = Result<Value, ResolverError>> + Send;
}

/// Resolves with `resolver` and stores the output under `key` in `ctx.meta`.
pub async fn inject_meta<R: ContextResolver>(
    resolver: &R,
    key: &str,
    ctx: &mut RlsContext,
) -> Result<(), ResolverError> {
    let value = resolver.resolve(&ctx.auth).await?;
    ctx.insert_meta(key, value);
    Ok(())
}

type CacheKey = (String, Option<String>);

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    resolved_at: Instant,
}

/// Caches another resolver's output per `(user_id, tenant_id)`.
///
/// Entries expire after the TTL; there is no explicit invalidation. Every
/// miss sweeps expired entries, so the cache holds at most the callers seen
/// within one TTL. Two concurrent misses for the same key may both reach the
/// inner resolver.
#[derive(Debug)]
pub struct CachedResolver<R> {
    inner: R,
    ttl: Duration,
    cache: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl<R: ContextResolver> CachedResolver<R> {
    pub fn new(inner: R, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(inner: R, config: &ResolverConfig) -> Self {
        Self::new(inner, config.cache_ttl())
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of cached entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops expired entries.
    pub fn purge_expired(&self) {
        let ttl = self.ttl;
        self.entries().retain(|_, entry| entry.resolved_at.elapsed() < ttl);
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cached(&self, key: &CacheKey) -> Option<Value> {
        self.entries()
            .get(key)
            .filter(|entry| entry.resolved_at.elapsed() < self.ttl)
            .map(|entry| entry.value.clone())
    }
}

impl<R: ContextResolver> ContextResolver for CachedResolver<R> {
    async fn resolve(&self, auth: &AuthContext) -> Result<Value, ResolverError> {
        let key: CacheKey = (auth.user_id.clone(), auth.tenant_id.clone());

        if let Some(value) = self.cached(&key) {
            debug!(user_id = %auth.user_id, "Resolver cache hit");
            return Ok(value);
        }

        debug!(user_id = %auth.user_id, "Resolver cache miss");
        let value = self.inner.resolve(auth).await?;
        let ttl = self.ttl;
        let mut entries = self.entries();
        entries.retain(|_, entry| entry.resolved_at.elapsed() < ttl);
        entries.insert(
            key,
            CacheEntry {
                value: value.clone(),
                resolved_at: Instant::now(),
            },
        );
        Ok(value)
    }
}
