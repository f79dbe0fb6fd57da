//! Interop with the cache format of the previous library generation
//!
//! Applications migrating from the older library may still share a session with
//! code that reads and writes the older cache. The bridge mirrors refresh tokens
//! into that cache and reads them back when the modern cache has none. Every
//! operation is best-effort: failures are logged and reported as "no legacy
//! data", and never interrupt the modern cache operation in progress.

use std::{collections::BTreeMap, error, fmt, sync::Arc};

use arc_swap::ArcSwap;

use crate::{
    accessor::environment_matches,
    items::{IdTokenItem, RefreshTokenItem},
    BoxError, ClientId, Secret,
};

mod format;

pub(crate) use format::host_of;
use format::LegacyEntries;
pub use format::{LegacyEntry, LegacyFormatError, LegacyKey, LegacyUserInfo};

/// Storage for the legacy cache buffer
///
/// The buffer is opaque to the host; the bridge decodes and encodes it.
pub trait LegacyCachePersistence: fmt::Debug + Send + Sync {
    /// Loads the current buffer; an empty buffer means an empty cache
    fn load(&self) -> Result<Vec<u8>, BoxError>;

    /// Replaces the stored buffer
    fn write(&self, data: &[u8]) -> Result<(), BoxError>;
}

/// Legacy cache persistence held in memory
#[derive(Debug, Default)]
pub struct InMemoryLegacyCache {
    data: ArcSwap<Vec<u8>>,
}

impl InMemoryLegacyCache {
    /// An empty legacy cache
    pub fn new() -> Self {
        Self::default()
    }

    /// A legacy cache holding an existing buffer
    pub fn with_contents(data: Vec<u8>) -> Self {
        Self {
            data: ArcSwap::from_pointee(data),
        }
    }

    /// A copy of the current buffer
    pub fn contents(&self) -> Vec<u8> {
        Vec::clone(&self.data.load())
    }
}

impl LegacyCachePersistence for InMemoryLegacyCache {
    fn load(&self) -> Result<Vec<u8>, BoxError> {
        Ok(self.contents())
    }

    fn write(&self, data: &[u8]) -> Result<(), BoxError> {
        self.data.store(Arc::new(data.to_vec()));
        Ok(())
    }
}

/// A user found in the legacy cache
#[derive(Clone, Debug, PartialEq)]
pub struct LegacyUser {
    /// The host of the authority the user's entry was issued by
    pub environment: String,
    /// The user's identifiers
    pub info: LegacyUserInfo,
}

/// Users found in the legacy cache for a client
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LegacyUsers {
    /// Users whose entries carry client info, keyed by the raw client info
    pub with_client_info: BTreeMap<String, LegacyUser>,
    /// Users whose entries predate client info
    pub without_client_info: Vec<LegacyUser>,
}

/// Selects legacy entries belonging to one user
#[derive(Clone, Copy, Debug, Default)]
pub struct LegacyUserFilter<'a> {
    /// The user's displayable name
    pub username: Option<&'a str>,
    /// The user's stable object identifier
    pub unique_id: Option<&'a str>,
}

impl<'a> LegacyUserFilter<'a> {
    fn username(&self) -> Option<&'a str> {
        self.username.filter(|s| !s.is_empty())
    }

    fn unique_id(&self) -> Option<&'a str> {
        self.unique_id.filter(|s| !s.is_empty())
    }

    fn is_empty(&self) -> bool {
        self.username().is_none() && self.unique_id().is_none()
    }

    fn matches(&self, key: &LegacyKey) -> bool {
        self.username()
            .map_or(true, |u| u.eq_ignore_ascii_case(&key.displayable_id))
            && self
                .unique_id()
                .map_or(true, |id| id.eq_ignore_ascii_case(&key.unique_id))
    }
}

/// Reads and writes refresh tokens in the legacy cache
#[derive(Clone, Debug)]
pub struct LegacyCacheBridge {
    persistence: Arc<dyn LegacyCachePersistence>,
}

impl LegacyCacheBridge {
    /// Bridges to the given legacy persistence
    pub fn new(persistence: Arc<dyn LegacyCachePersistence>) -> Self {
        Self { persistence }
    }

    fn load(&self) -> Result<LegacyEntries, BoxError> {
        let data = self.persistence.load()?;
        Ok(format::decode(&data)?)
    }

    fn store(&self, entries: &LegacyEntries) -> Result<(), BoxError> {
        let data = format::encode(entries)?;
        self.persistence.write(&data)
    }

    /// Refresh tokens for one user of `client_id` in any of `environments`
    ///
    /// Refuses to search when the filter names no user, since that would hand
    /// back another user's token.
    pub fn entries_for(
        &self,
        client_id: &str,
        environments: &[String],
        user: LegacyUserFilter<'_>,
    ) -> Vec<RefreshTokenItem> {
        if user.is_empty() {
            tracing::warn!("refusing to search the legacy cache without a username or unique id");
            return Vec::new();
        }

        let entries = match self.load() {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!(
                    error = (&*error as &dyn error::Error),
                    "unable to read refresh tokens from the legacy cache"
                );
                return Vec::new();
            }
        };

        entries
            .into_iter()
            .filter(|(key, _)| {
                key.client_id.eq_ignore_ascii_case(client_id)
                    && environment_matches(environments, &key.environment())
                    && user.matches(key)
            })
            .filter_map(|(key, entry)| into_refresh_token(&key, entry))
            .collect()
    }

    /// The legacy refresh token for a user, preferring `preferred_environment`
    pub fn refresh_token_for(
        &self,
        client_id: &str,
        preferred_environment: &str,
        environments: &[String],
        user: LegacyUserFilter<'_>,
    ) -> Option<RefreshTokenItem> {
        let mut candidates = self.entries_for(client_id, environments, user);
        let preferred = candidates
            .iter()
            .position(|rt| rt.environment.eq_ignore_ascii_case(preferred_environment))
            .unwrap_or(0);

        if candidates.is_empty() {
            None
        } else {
            Some(candidates.swap_remove(preferred))
        }
    }

    /// Every user that has an entry for `client_id`
    pub fn users_for(&self, client_id: &str) -> LegacyUsers {
        let entries = match self.load() {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!(
                    error = (&*error as &dyn error::Error),
                    "unable to read accounts from the legacy cache"
                );
                return LegacyUsers::default();
            }
        };

        let mut users = LegacyUsers::default();
        for (key, entry) in entries {
            if !key.client_id.eq_ignore_ascii_case(client_id) {
                continue;
            }

            let user = LegacyUser {
                environment: key.environment(),
                info: entry.user_info().clone(),
            };
            match entry.raw_client_info() {
                Some(raw) => {
                    users.with_client_info.insert(raw.to_owned(), user);
                }
                None => users.without_client_info.push(user),
            }
        }

        users
    }

    /// Mirrors a refresh token into the legacy cache
    ///
    /// Family refresh tokens have no legacy representation and are skipped, as
    /// are tokens whose environment disagrees with the ID token or the authority.
    pub fn write_entry(
        &self,
        refresh_token: &RefreshTokenItem,
        id_token: &IdTokenItem,
        authority: &str,
        unique_id: &str,
        resource: &str,
    ) {
        if refresh_token.is_family_token() {
            tracing::info!("skipping legacy cache write of a family refresh token");
            return;
        }

        if !refresh_token
            .environment
            .eq_ignore_ascii_case(&id_token.environment)
        {
            tracing::error!(
                refresh_token.environment = %refresh_token.environment,
                id_token.environment = %id_token.environment,
                "refresh token and ID token have different environments; skipping legacy cache write"
            );
            return;
        }

        let authority_host = host_of(authority);
        if !refresh_token
            .environment
            .eq_ignore_ascii_case(&authority_host)
        {
            tracing::error!(
                refresh_token.environment = %refresh_token.environment,
                authority.host = %authority_host,
                "authority has a different environment than the refresh token; skipping legacy cache write"
            );
            return;
        }

        let displayable_id = id_token.claims().username().unwrap_or_default().to_owned();
        let key = LegacyKey {
            authority: authority.to_owned(),
            resource: resource.to_owned(),
            client_id: refresh_token.client_id.as_str().to_owned(),
            subject_type: format::SUBJECT_USER,
            unique_id: unique_id.to_owned(),
            displayable_id: displayable_id.clone(),
        };
        let entry = LegacyEntry::for_user(
            Some(refresh_token.raw_client_info.clone()).filter(|s| !s.is_empty()),
            refresh_token.secret.as_str().to_owned(),
            resource.to_owned(),
            unique_id.to_owned(),
            displayable_id,
        );

        let result = self.load().and_then(|mut entries| {
            entries.insert(key, entry);
            self.store(&entries)
        });

        if let Err(error) = result {
            tracing::warn!(
                error = (&*error as &dyn error::Error),
                "unable to write refresh token to the legacy cache"
            );
        }
    }

    /// Removes every entry for a user of `client_id`
    ///
    /// Entries are matched both by the home account identifier derived from
    /// their client info and by displayable name, so that the duplicate
    /// entries older versions wrote with and without client info both go.
    pub fn remove_entries_for(
        &self,
        client_id: &str,
        username: Option<&str>,
        home_account_id: Option<&str>,
    ) {
        let result = self.load().and_then(|mut entries| {
            let before = entries.len();

            if let Some(account_id) = home_account_id.filter(|s| !s.is_empty()) {
                entries.retain(|key, entry| {
                    !(key.client_id.eq_ignore_ascii_case(client_id)
                        && entry
                            .home_account_id()
                            .is_some_and(|id| id.eq_ignore_ascii_case(account_id)))
                });
            }

            match username.filter(|s| !s.is_empty()) {
                Some(username) => entries.retain(|key, _| {
                    !(key.client_id.eq_ignore_ascii_case(client_id)
                        && key.displayable_id.eq_ignore_ascii_case(username))
                }),
                None => tracing::error!("cannot remove legacy entries by name without a username"),
            }

            let removed = before - entries.len();
            tracing::debug!(removed, "removed legacy cache entries");
            if removed > 0 {
                self.store(&entries)
            } else {
                Ok(())
            }
        });

        if let Err(error) = result {
            tracing::warn!(
                error = (&*error as &dyn error::Error),
                "unable to remove entries from the legacy cache"
            );
        }
    }
}

fn into_refresh_token(key: &LegacyKey, entry: LegacyEntry) -> Option<RefreshTokenItem> {
    let home_account_id = entry.home_account_id().unwrap_or_default();
    let secret = entry.refresh_token.filter(|s| !s.is_empty())?;

    Some(RefreshTokenItem {
        home_account_id,
        environment: key.environment(),
        raw_client_info: entry.raw_client_info.unwrap_or_default(),
        client_id: ClientId::new(key.client_id.clone()),
        secret: Secret::new(secret),
        ..RefreshTokenItem::default()
    })
}
