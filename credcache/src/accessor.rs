//! In-memory, partitioned storage of cache items
//!
//! Two stores are provided. [`UserTokenStore`] holds every kind of item and
//! partitions tokens by user. [`AppTokenStore`] holds only access tokens and app
//! metadata for application (client credential) flows, partitioned by client and
//! tenant. Operations on refresh tokens, ID tokens, and accounts exist only on the
//! user store's [`UserCacheAccessor`] implementation.

use std::fmt;

use credcache_clock::{DurationSecs, UnixTime};

use crate::{
    items::{
        AccessTokenItem, AccountItem, AdditionalFields, AppMetadataItem, IdTokenItem,
        RefreshTokenItem,
    },
    CacheError,
};

mod app;
mod partition;
mod user;

pub use app::AppTokenStore;
pub use user::UserTokenStore;

/// Narrows a bulk read to one partition and/or a set of environment aliases
#[derive(Clone, Copy, Debug, Default)]
pub struct Filter<'a> {
    /// Only read the given partition
    pub partition_key: Option<&'a str>,
    /// Only return items whose environment is one of these aliases; empty matches any
    pub environments: &'a [String],
}

impl<'a> Filter<'a> {
    /// A filter that matches everything
    pub const fn all() -> Self {
        Self {
            partition_key: None,
            environments: &[],
        }
    }

    /// Restricts the filter to a single partition
    pub fn partition(mut self, partition_key: &'a str) -> Self {
        self.partition_key = Some(partition_key);
        self
    }

    /// Restricts the filter to a set of environment aliases
    pub fn environments(mut self, environments: &'a [String]) -> Self {
        self.environments = environments;
        self
    }

    /// Whether `environment` is acceptable under this filter
    pub fn matches_environment(&self, environment: &str) -> bool {
        environment_matches(self.environments, environment)
    }
}

/// Whether `environment` is one of `aliases`, ignoring case; no aliases matches any environment
pub fn environment_matches(aliases: &[String], environment: &str) -> bool {
    aliases.is_empty() || aliases.iter().any(|a| a.eq_ignore_ascii_case(environment))
}

/// Operations shared by every cache store
pub trait TokenCacheAccessor: fmt::Debug + Send + Sync {
    /// Inserts or overwrites an access token
    fn save_access_token(&self, item: AccessTokenItem);

    /// Deletes an access token, returning whether it was present
    fn delete_access_token(&self, item: &AccessTokenItem) -> bool;

    /// Looks up an access token by its partition and composite key
    fn get_access_token(&self, partition_key: &str, key: &str) -> Option<AccessTokenItem>;

    /// Reads access tokens
    fn access_tokens(&self, filter: Filter<'_>) -> Vec<AccessTokenItem>;

    /// Inserts or overwrites app metadata
    fn save_app_metadata(&self, item: AppMetadataItem);

    /// Looks up app metadata by its composite key
    fn get_app_metadata(&self, key: &str) -> Option<AppMetadataItem>;

    /// Reads app metadata
    fn app_metadata(&self, filter: Filter<'_>) -> Vec<AppMetadataItem>;

    /// Whether the store holds any refresh token, or an access token that is not
    /// yet within `buffer` of its expiry
    fn has_access_or_refresh_tokens(&self, now: UnixTime, buffer: DurationSecs) -> bool;

    /// Removes all tokens and accounts
    ///
    /// App metadata survives a clear.
    fn clear(&self);

    /// A counter that advances every time the store's contents change
    fn generation(&self) -> u64;

    /// Whether this is an application token store
    fn is_application_cache(&self) -> bool;

    /// Top-level nodes of the serialized cache that this version does not recognize
    fn unknown_nodes(&self) -> AdditionalFields;

    /// Replaces the retained unrecognized top-level nodes
    fn set_unknown_nodes(&self, nodes: AdditionalFields);
}

/// Operations only supported by user token stores
pub trait UserCacheAccessor: TokenCacheAccessor {
    /// Inserts or overwrites a refresh token
    fn save_refresh_token(&self, item: RefreshTokenItem);

    /// Deletes a refresh token, returning whether it was present
    fn delete_refresh_token(&self, item: &RefreshTokenItem) -> bool;

    /// Looks up a refresh token by its partition and composite key
    fn get_refresh_token(&self, partition_key: &str, key: &str) -> Option<RefreshTokenItem>;

    /// Reads refresh tokens
    fn refresh_tokens(&self, filter: Filter<'_>) -> Vec<RefreshTokenItem>;

    /// Inserts or overwrites an ID token
    fn save_id_token(&self, item: IdTokenItem);

    /// Deletes an ID token, returning whether it was present
    fn delete_id_token(&self, item: &IdTokenItem) -> bool;

    /// Looks up an ID token by its partition and composite key
    fn get_id_token(&self, partition_key: &str, key: &str) -> Option<IdTokenItem>;

    /// Reads ID tokens
    fn id_tokens(&self, filter: Filter<'_>) -> Vec<IdTokenItem>;

    /// Inserts or overwrites an account
    fn save_account(&self, item: AccountItem);

    /// Deletes an account, returning whether it was present
    fn delete_account(&self, item: &AccountItem) -> bool;

    /// Looks up an account by its partition and composite key
    fn get_account(&self, partition_key: &str, key: &str) -> Option<AccountItem>;

    /// Reads accounts
    fn accounts(&self, filter: Filter<'_>) -> Vec<AccountItem>;
}

/// A point-in-time copy of a store's contents
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CacheSnapshot {
    /// Access tokens
    pub access_tokens: Vec<AccessTokenItem>,
    /// Refresh tokens
    pub refresh_tokens: Vec<RefreshTokenItem>,
    /// ID tokens
    pub id_tokens: Vec<IdTokenItem>,
    /// Accounts
    pub accounts: Vec<AccountItem>,
    /// App metadata
    pub app_metadata: Vec<AppMetadataItem>,
    /// Unrecognized top-level nodes
    pub unknown_nodes: AdditionalFields,
}

impl CacheSnapshot {
    /// The total number of items
    pub fn len(&self) -> usize {
        self.access_tokens.len()
            + self.refresh_tokens.len()
            + self.id_tokens.len()
            + self.accounts.len()
            + self.app_metadata.len()
    }

    /// Whether the snapshot holds no items and no unknown nodes
    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.unknown_nodes.is_empty()
    }
}

/// Either kind of cache store
#[derive(Debug)]
pub enum CacheStore {
    /// A store for tokens acquired on behalf of users
    User(UserTokenStore),
    /// A store for application tokens
    App(AppTokenStore),
}

impl CacheStore {
    /// The operations shared by both stores
    pub fn accessor(&self) -> &dyn TokenCacheAccessor {
        match self {
            Self::User(store) => store,
            Self::App(store) => store,
        }
    }

    /// The user store, or an unsupported-operation error naming `operation`
    pub fn user(&self, operation: &'static str) -> Result<&UserTokenStore, CacheError> {
        match self {
            Self::User(store) => Ok(store),
            Self::App(_) => Err(CacheError::unsupported(operation)),
        }
    }

    /// The partition an access token is stored in
    pub fn access_token_partition(&self, item: &AccessTokenItem) -> String {
        match self {
            Self::User(_) => UserTokenStore::access_token_partition(item).to_owned(),
            Self::App(_) => AppTokenStore::access_token_partition(item),
        }
    }

    /// Copies every item out of the store
    pub fn snapshot(&self) -> CacheSnapshot {
        let accessor = self.accessor();
        let mut snapshot = CacheSnapshot {
            access_tokens: accessor.access_tokens(Filter::all()),
            app_metadata: accessor.app_metadata(Filter::all()),
            unknown_nodes: accessor.unknown_nodes(),
            ..CacheSnapshot::default()
        };

        if let Self::User(store) = self {
            snapshot.refresh_tokens = store.refresh_tokens(Filter::all());
            snapshot.id_tokens = store.id_tokens(Filter::all());
            snapshot.accounts = store.accounts(Filter::all());
        }

        snapshot
    }

    /// Loads a snapshot into the store
    ///
    /// With `clear`, existing tokens are discarded first. Otherwise incoming
    /// items overwrite those with the same key and everything else is kept.
    /// An application store rejects snapshots carrying user-only items without
    /// modifying its contents.
    pub fn import(&self, snapshot: CacheSnapshot, clear: bool) -> Result<(), CacheError> {
        let accessor = self.accessor();

        let user = match self {
            Self::User(store) => Some(store),
            Self::App(_) => {
                if !snapshot.refresh_tokens.is_empty() {
                    return Err(CacheError::unsupported("importing refresh tokens"));
                }
                if !snapshot.id_tokens.is_empty() {
                    return Err(CacheError::unsupported("importing ID tokens"));
                }
                if !snapshot.accounts.is_empty() {
                    return Err(CacheError::unsupported("importing accounts"));
                }
                None
            }
        };

        if clear {
            accessor.clear();
        }

        tracing::trace!(items = snapshot.len(), clear, "importing cache snapshot");

        for item in snapshot.access_tokens {
            accessor.save_access_token(item);
        }

        for item in snapshot.app_metadata {
            accessor.save_app_metadata(item);
        }

        if let Some(store) = user {
            for item in snapshot.refresh_tokens {
                store.save_refresh_token(item);
            }
            for item in snapshot.id_tokens {
                store.save_id_token(item);
            }
            for item in snapshot.accounts {
                store.save_account(item);
            }
        }

        if clear {
            accessor.set_unknown_nodes(snapshot.unknown_nodes);
        } else if !snapshot.unknown_nodes.is_empty() {
            let mut nodes = accessor.unknown_nodes();
            nodes.extend(snapshot.unknown_nodes);
            accessor.set_unknown_nodes(nodes);
        }

        Ok(())
    }
}

impl From<UserTokenStore> for CacheStore {
    fn from(store: UserTokenStore) -> Self {
        Self::User(store)
    }
}

impl From<AppTokenStore> for CacheStore {
    fn from(store: AppTokenStore) -> Self {
        Self::App(store)
    }
}
