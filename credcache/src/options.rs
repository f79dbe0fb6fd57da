use std::sync::Arc;

use credcache_clock::DurationSecs;

use crate::legacy::{LegacyCacheBridge, LegacyCachePersistence};

/// Configuration for a [`TokenCache`][crate::TokenCache]
#[derive(Clone, Debug)]
pub struct TokenCacheOptions {
    expiry_buffer: DurationSecs,
    extended_lifetime_enabled: bool,
    synchronize_access: bool,
    legacy_cache: Option<LegacyCacheBridge>,
}

impl Default for TokenCacheOptions {
    /// Default cache configuration
    ///
    /// Access tokens are treated as expired five minutes before their actual
    /// expiry, extended lifetimes are not honored, cache access is serialized
    /// while notification hooks run, and the legacy cache is not bridged.
    fn default() -> Self {
        Self {
            expiry_buffer: DurationSecs(300),
            extended_lifetime_enabled: false,
            synchronize_access: true,
            legacy_cache: None,
        }
    }
}

impl TokenCacheOptions {
    /// Sets how long before its expiry an access token stops being returned
    pub fn with_expiry_buffer(mut self, expiry_buffer: DurationSecs) -> Self {
        self.expiry_buffer = expiry_buffer;
        self
    }

    /// Sets whether expired access tokens may be returned within their extended lifetime
    ///
    /// Tokens returned this way are flagged with `is_extended_lifetime_token`.
    pub fn with_extended_lifetime(mut self, enabled: bool) -> Self {
        self.extended_lifetime_enabled = enabled;
        self
    }

    /// Sets whether only one hooked operation may run against the cache at a time
    ///
    /// Hooks that load and persist the cache externally are prone to lost
    /// updates when two operations interleave, so this is on by default.
    pub fn with_synchronized_access(mut self, enabled: bool) -> Self {
        self.synchronize_access = enabled;
        self
    }

    /// Bridges the cache to a legacy cache held by `persistence`
    pub fn with_legacy_cache(mut self, persistence: Arc<dyn LegacyCachePersistence>) -> Self {
        self.legacy_cache = Some(LegacyCacheBridge::new(persistence));
        self
    }

    /// The expiry safety margin
    #[inline]
    pub fn expiry_buffer(&self) -> DurationSecs {
        self.expiry_buffer
    }

    /// Whether extended lifetimes are honored
    #[inline]
    pub fn extended_lifetime_enabled(&self) -> bool {
        self.extended_lifetime_enabled
    }

    /// Whether hooked operations are serialized
    #[inline]
    pub fn synchronize_access(&self) -> bool {
        self.synchronize_access
    }

    /// The legacy cache bridge, if configured
    #[inline]
    pub fn legacy_cache(&self) -> Option<&LegacyCacheBridge> {
        self.legacy_cache.as_ref()
    }
}
