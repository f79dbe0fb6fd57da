use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use credcache_clock::{DurationSecs, UnixTime};
use dashmap::DashMap;

use super::{partition::PartitionedMap, Filter, TokenCacheAccessor, UserCacheAccessor};
use crate::items::{
    AccessTokenItem, AccountItem, AdditionalFields, AppMetadataItem, IdTokenItem,
    RefreshTokenItem,
};

/// A store of user tokens, partitioned by home account
///
/// Access and refresh tokens obtained on behalf of another user's assertion are
/// partitioned by the assertion hash instead, so that every downstream call made
/// for one inbound token reads a single partition.
#[derive(Debug, Default)]
pub struct UserTokenStore {
    access_tokens: PartitionedMap<AccessTokenItem>,
    refresh_tokens: PartitionedMap<RefreshTokenItem>,
    id_tokens: PartitionedMap<IdTokenItem>,
    accounts: PartitionedMap<AccountItem>,
    app_metadata: DashMap<String, AppMetadataItem>,
    unknown_nodes: ArcSwap<AdditionalFields>,
    generation: AtomicU64,
}

impl UserTokenStore {
    /// Constructs an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// The partition an access token lives in
    pub fn access_token_partition(item: &AccessTokenItem) -> &str {
        item.obo_cache_key().unwrap_or(&item.home_account_id)
    }

    /// The partition a refresh token lives in
    pub fn refresh_token_partition(item: &RefreshTokenItem) -> &str {
        item.obo_cache_key().unwrap_or(&item.home_account_id)
    }

    fn touch(&self, changed: bool) {
        if changed {
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
    }
}

fn with_environment<T>(items: Vec<T>, filter: &Filter<'_>, env: impl Fn(&T) -> &str) -> Vec<T> {
    if filter.environments.is_empty() {
        items
    } else {
        items
            .into_iter()
            .filter(|item| filter.matches_environment(env(item)))
            .collect()
    }
}

impl TokenCacheAccessor for UserTokenStore {
    fn save_access_token(&self, item: AccessTokenItem) {
        let key = item.cache_key();
        let partition = Self::access_token_partition(&item).to_owned();
        tracing::trace!(%key, "saving access token");
        self.touch(self.access_tokens.insert(&partition, key, item));
    }

    fn delete_access_token(&self, item: &AccessTokenItem) -> bool {
        let removed = self
            .access_tokens
            .remove(Self::access_token_partition(item), &item.cache_key())
            .is_some();
        self.touch(removed);
        removed
    }

    fn get_access_token(&self, partition_key: &str, key: &str) -> Option<AccessTokenItem> {
        self.access_tokens.get(partition_key, key)
    }

    fn access_tokens(&self, filter: Filter<'_>) -> Vec<AccessTokenItem> {
        let items = self.access_tokens.values(filter.partition_key);
        with_environment(items, &filter, |i| i.environment.as_str())
    }

    fn save_app_metadata(&self, item: AppMetadataItem) {
        let changed = match self.app_metadata.insert(item.cache_key(), item.clone()) {
            Some(previous) => previous != item,
            None => true,
        };
        self.touch(changed);
    }

    fn get_app_metadata(&self, key: &str) -> Option<AppMetadataItem> {
        self.app_metadata.get(key).map(|item| item.value().clone())
    }

    fn app_metadata(&self, filter: Filter<'_>) -> Vec<AppMetadataItem> {
        self.app_metadata
            .iter()
            .filter(|item| filter.matches_environment(&item.environment))
            .map(|item| item.value().clone())
            .collect()
    }

    fn has_access_or_refresh_tokens(&self, now: UnixTime, buffer: DurationSecs) -> bool {
        !self.refresh_tokens.is_empty()
            || self.access_tokens.any(|at| !at.is_expired(now, buffer))
    }

    fn clear(&self) {
        let mut changed = self.access_tokens.clear();
        changed |= self.refresh_tokens.clear();
        changed |= self.id_tokens.clear();
        changed |= self.accounts.clear();
        if !self.unknown_nodes.load().is_empty() {
            self.unknown_nodes.store(Default::default());
            changed = true;
        }
        tracing::debug!(changed, "cleared user token cache");
        self.touch(changed);
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn is_application_cache(&self) -> bool {
        false
    }

    fn unknown_nodes(&self) -> AdditionalFields {
        AdditionalFields::clone(&self.unknown_nodes.load())
    }

    fn set_unknown_nodes(&self, nodes: AdditionalFields) {
        let changed = **self.unknown_nodes.load() != nodes;
        if changed {
            self.unknown_nodes.store(nodes.into());
        }
        self.touch(changed);
    }
}

impl UserCacheAccessor for UserTokenStore {
    fn save_refresh_token(&self, item: RefreshTokenItem) {
        let key = item.cache_key();
        let partition = Self::refresh_token_partition(&item).to_owned();
        tracing::trace!(%key, "saving refresh token");
        self.touch(self.refresh_tokens.insert(&partition, key, item));
    }

    fn delete_refresh_token(&self, item: &RefreshTokenItem) -> bool {
        let removed = self
            .refresh_tokens
            .remove(Self::refresh_token_partition(item), &item.cache_key())
            .is_some();
        self.touch(removed);
        removed
    }

    fn get_refresh_token(&self, partition_key: &str, key: &str) -> Option<RefreshTokenItem> {
        self.refresh_tokens.get(partition_key, key)
    }

    fn refresh_tokens(&self, filter: Filter<'_>) -> Vec<RefreshTokenItem> {
        let items = self.refresh_tokens.values(filter.partition_key);
        with_environment(items, &filter, |i| i.environment.as_str())
    }

    fn save_id_token(&self, item: IdTokenItem) {
        let key = item.cache_key();
        let partition = item.home_account_id.clone();
        tracing::trace!(%key, "saving ID token");
        self.touch(self.id_tokens.insert(&partition, key, item));
    }

    fn delete_id_token(&self, item: &IdTokenItem) -> bool {
        let removed = self
            .id_tokens
            .remove(&item.home_account_id, &item.cache_key())
            .is_some();
        self.touch(removed);
        removed
    }

    fn get_id_token(&self, partition_key: &str, key: &str) -> Option<IdTokenItem> {
        self.id_tokens.get(partition_key, key)
    }

    fn id_tokens(&self, filter: Filter<'_>) -> Vec<IdTokenItem> {
        let items = self.id_tokens.values(filter.partition_key);
        with_environment(items, &filter, |i| i.environment.as_str())
    }

    fn save_account(&self, item: AccountItem) {
        let key = item.cache_key();
        let partition = item.home_account_id.clone();
        tracing::trace!(%key, "saving account");
        self.touch(self.accounts.insert(&partition, key, item));
    }

    fn delete_account(&self, item: &AccountItem) -> bool {
        let removed = self
            .accounts
            .remove(&item.home_account_id, &item.cache_key())
            .is_some();
        self.touch(removed);
        removed
    }

    fn get_account(&self, partition_key: &str, key: &str) -> Option<AccountItem> {
        self.accounts.get(partition_key, key)
    }

    fn accounts(&self, filter: Filter<'_>) -> Vec<AccountItem> {
        let items = self.accounts.values(filter.partition_key);
        with_environment(items, &filter, |i| i.environment.as_str())
    }
}
