use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use credcache_clock::{DurationSecs, UnixTime};
use dashmap::DashMap;

use super::{partition::PartitionedMap, Filter, TokenCacheAccessor};
use crate::{
    items::{AccessTokenItem, AdditionalFields, AppMetadataItem},
    keys,
};

/// A store of application tokens, partitioned by client and tenant
///
/// Confidential clients serving many tenants can accumulate a large number of
/// tokens; partitioning keeps each lookup within a single client/tenant pair.
#[derive(Debug, Default)]
pub struct AppTokenStore {
    access_tokens: PartitionedMap<AccessTokenItem>,
    app_metadata: DashMap<String, AppMetadataItem>,
    unknown_nodes: ArcSwap<AdditionalFields>,
    generation: AtomicU64,
}

impl AppTokenStore {
    /// Constructs an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// The partition an access token lives in
    pub fn access_token_partition(item: &AccessTokenItem) -> String {
        keys::app_partition_key(item.client_id.as_str(), &item.realm)
    }

    fn touch(&self, changed: bool) {
        if changed {
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl TokenCacheAccessor for AppTokenStore {
    fn save_access_token(&self, item: AccessTokenItem) {
        let key = item.cache_key();
        let partition = Self::access_token_partition(&item);
        tracing::trace!(%key, "saving application access token");
        self.touch(self.access_tokens.insert(&partition, key, item));
    }

    fn delete_access_token(&self, item: &AccessTokenItem) -> bool {
        let removed = self
            .access_tokens
            .remove(&Self::access_token_partition(item), &item.cache_key())
            .is_some();
        self.touch(removed);
        removed
    }

    fn get_access_token(&self, partition_key: &str, key: &str) -> Option<AccessTokenItem> {
        self.access_tokens.get(partition_key, key)
    }

    fn access_tokens(&self, filter: Filter<'_>) -> Vec<AccessTokenItem> {
        let mut items = self.access_tokens.values(filter.partition_key);
        if !filter.environments.is_empty() {
            items.retain(|at| filter.matches_environment(&at.environment));
        }
        items
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
        self.access_tokens.any(|at| !at.is_expired(now, buffer))
    }

    fn clear(&self) {
        let mut changed = self.access_tokens.clear();
        if !self.unknown_nodes.load().is_empty() {
            self.unknown_nodes.store(Default::default());
            changed = true;
        }
        tracing::debug!(changed, "cleared application token cache");
        self.touch(changed);
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn is_application_cache(&self) -> bool {
        true
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClientId;

    fn app_token(client_id: &'static str, realm: &str) -> AccessTokenItem {
        AccessTokenItem {
            environment: "login.microsoftonline.com".into(),
            client_id: ClientId::from_static(client_id),
            realm: realm.into(),
            target: "https://graph.microsoft.com/.default".into(),
            expires_on: UnixTime(1_000),
            ..AccessTokenItem::default()
        }
    }

    #[test]
    fn tokens_are_partitioned_by_client_and_tenant() {
        let store = AppTokenStore::new();
        for tenant in ["t1", "t2", "t3"] {
            store.save_access_token(app_token("client", tenant));
        }
        store.save_access_token(app_token("other", "t1"));

        let partition = keys::app_partition_key("client", "t2");
        assert_eq!(partition, "client_t2_AppTokenCache");

        let tokens = store.access_tokens(Filter::all().partition(&partition));
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].realm, "t2");
        assert_eq!(store.access_tokens(Filter::all()).len(), 4);
    }

    #[test]
    fn has_tokens_only_counts_unexpired_access_tokens() {
        let store = AppTokenStore::new();
        assert!(!store.has_access_or_refresh_tokens(UnixTime(0), DurationSecs(300)));

        store.save_access_token(app_token("client", "t1"));
        assert!(store.has_access_or_refresh_tokens(UnixTime(100), DurationSecs(300)));
        assert!(!store.has_access_or_refresh_tokens(UnixTime(701), DurationSecs(300)));
    }

    #[test]
    fn unknown_nodes_are_retained_until_clear() {
        let store = AppTokenStore::new();
        let mut nodes = AdditionalFields::new();
        nodes.insert("Future".into(), serde_json::json!({"a": 1}));

        let before = store.generation();
        store.set_unknown_nodes(nodes.clone());
        assert_eq!(store.unknown_nodes(), nodes);
        assert!(store.generation() > before);

        store.clear();
        assert!(store.unknown_nodes().is_empty());
    }
}
