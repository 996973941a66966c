//! Pubkey → display-name lookups. Read-mostly with a best-effort cache.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::EngineError;
use crate::model::Pubkey;

/// How many resolved names the cache keeps before evicting arbitrarily
/// (best-effort: a cache miss just means one extra resolve, never wrong
/// output).
const CACHE_SOFT_CAP: usize = 10_000;

#[async_trait]
pub trait NameResolver: Send + Sync {
    /// Resolves a pubkey to its display name, if known.
    async fn resolve(&self, pubkey: Pubkey) -> Result<Option<String>, EngineError>;
}

/// Renders the short-hex fallback RoleAssigner uses for an unresolved
/// pubkey: the leading 8 hex characters.
pub fn fallback_name(pubkey: Pubkey) -> String {
    pubkey.short_hex()
}

/// Wraps an inner resolver with a `DashMap` cache keyed by pubkey.
pub struct CachingNameResolver<R> {
    inner: R,
    cache: DashMap<Pubkey, Option<String>>,
}

impl<R: NameResolver> CachingNameResolver<R> {
    pub fn new(inner: R) -> Self {
        CachingNameResolver {
            inner,
            cache: DashMap::new(),
        }
    }
}

#[async_trait]
impl<R: NameResolver> NameResolver for CachingNameResolver<R> {
    async fn resolve(&self, pubkey: Pubkey) -> Result<Option<String>, EngineError> {
        if let Some(cached) = self.cache.get(&pubkey) {
            return Ok(cached.clone());
        }
        let resolved = self.inner.resolve(pubkey).await?;
        if self.cache.len() >= CACHE_SOFT_CAP {
            // Best-effort eviction: drop an arbitrary entry rather than grow
            // unboundedly. Correctness never depends on what stays cached.
            if let Some(entry) = self.cache.iter().next() {
                let key = *entry.key();
                drop(entry);
                self.cache.remove(&key);
            }
        }
        self.cache.insert(pubkey, resolved.clone());
        Ok(resolved)
    }
}

/// Static name table, for tests and demos.
pub struct StaticNameResolver {
    names: DashMap<Pubkey, String>,
}

impl StaticNameResolver {
    pub fn new() -> Self {
        StaticNameResolver { names: DashMap::new() }
    }

    pub fn with_name(self, pubkey: Pubkey, name: impl Into<String>) -> Self {
        self.names.insert(pubkey, name.into());
        self
    }
}

impl Default for StaticNameResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NameResolver for StaticNameResolver {
    async fn resolve(&self, pubkey: Pubkey) -> Result<Option<String>, EngineError> {
        Ok(self.names.get(&pubkey).map(|n| n.clone()))
    }
}
