//! The token cache façade
//!
//! [`TokenCache`] ties a store to the notification pipeline. Every operation
//! that touches the store runs as one span:
//!
//! ```text
//! BeforeAccess -> read -> [BeforeWrite -> mutation] -> AfterAccess
//! ```
//!
//! When access is synchronized, only one span runs at a time. `AfterAccess`
//! fires once `BeforeAccess` has been attempted, even if a hook or the
//! operation itself failed, so that hosts can reconcile their external copy.

use std::{collections::HashSet, error, sync::Arc};

use arc_swap::ArcSwap;
use credcache_clock::{Clock, DurationSecs, System};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::{
    accessor::{
        AppTokenStore, CacheStore, Filter, TokenCacheAccessor, UserCacheAccessor, UserTokenStore,
    },
    items::{
        AccessTokenItem, AccountItem, AppMetadataItem, AuthorityType, ClientInfo, IdTokenClaims,
        IdTokenItem, RefreshTokenItem, BEARER,
    },
    legacy::LegacyUserFilter,
    notification::{AsyncCacheHook, HookSet, StageHooks, SyncCacheHook, TokenCacheNotificationArgs},
    query::{self, AccessTokenQuery, RefreshTokenQuery},
    response::{TokenRequestContext, TokenResponse},
    BoxError, CacheError, ClientId, NotificationStage, ScopeSet, TokenCacheOptions,
    TokenCacheSerializer,
};

/// Lifetime assumed when a token response omits `expires_in`
const DEFAULT_LIFETIME: DurationSecs = DurationSecs(3600);

/// A token cache for one client application
#[derive(Debug)]
pub struct TokenCache<C = System> {
    client_id: ClientId,
    store: CacheStore,
    hooks: ArcSwap<HookSet>,
    gate: Option<Semaphore>,
    options: TokenCacheOptions,
    clock: C,
}

/// What the pipeline needs to know about the operation it is running
struct Operation<'a> {
    home_account_id: Option<&'a str>,
    suggested_cache_key: Option<String>,
    mutates: bool,
}

impl<'a> Operation<'a> {
    fn read(home_account_id: Option<&'a str>, suggested_cache_key: Option<String>) -> Self {
        Self {
            home_account_id: home_account_id.filter(|s| !s.is_empty()),
            suggested_cache_key: suggested_cache_key.filter(|s| !s.is_empty()),
            mutates: false,
        }
    }

    fn write(home_account_id: Option<&'a str>, suggested_cache_key: Option<String>) -> Self {
        Self {
            mutates: true,
            ..Self::read(home_account_id, suggested_cache_key)
        }
    }
}

/// The items a token response turns into
struct ResponseItems {
    access_token: AccessTokenItem,
    app_metadata: AppMetadataItem,
    refresh_token: Option<RefreshTokenItem>,
    id_token: Option<IdTokenItem>,
    account: Option<AccountItem>,
    unique_id: String,
}

impl TokenCache<System> {
    /// Constructs a cache for tokens acquired on behalf of users
    pub fn new_user(client_id: ClientId, options: TokenCacheOptions) -> Self {
        Self::with_store(client_id, UserTokenStore::new().into(), options)
    }

    /// Constructs a cache for application (client credential) tokens
    ///
    /// Application caches hold only access tokens and app metadata.
    pub fn new_application(client_id: ClientId, options: TokenCacheOptions) -> Self {
        Self::with_store(client_id, AppTokenStore::new().into(), options)
    }

    fn with_store(client_id: ClientId, store: CacheStore, options: TokenCacheOptions) -> Self {
        let gate = options.synchronize_access().then(|| Semaphore::new(1));
        Self {
            client_id,
            store,
            hooks: ArcSwap::from_pointee(HookSet::default()),
            gate,
            options,
            clock: System,
        }
    }
}

impl<C> TokenCache<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> TokenCache<D> {
        TokenCache {
            client_id: self.client_id,
            store: self.store,
            hooks: self.hooks,
            gate: self.gate,
            options: self.options,
            clock,
        }
    }

    /// The client the cache belongs to
    #[inline]
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// The cache configuration
    #[inline]
    pub fn options(&self) -> &TokenCacheOptions {
        &self.options
    }

    /// Whether this cache holds application tokens
    #[inline]
    pub fn is_application_cache(&self) -> bool {
        self.store.accessor().is_application_cache()
    }

    /// Loads and saves the cache contents outside of any notification
    #[inline]
    pub fn serializer(&self) -> &dyn TokenCacheSerializer {
        &self.store
    }

    /// Direct access to the underlying store
    ///
    /// Reads and writes made here bypass the notification pipeline.
    #[inline]
    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Registers the synchronous hook fired before the cache is accessed
    ///
    /// Replaces any synchronous hook previously registered for this stage.
    pub fn set_before_access<F>(&self, hook: F)
    where
        F: Fn(&TokenCacheNotificationArgs<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.register_sync(NotificationStage::BeforeAccess, Arc::new(hook));
    }

    /// Registers the synchronous hook fired before the cache is mutated
    pub fn set_before_write<F>(&self, hook: F)
    where
        F: Fn(&TokenCacheNotificationArgs<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.register_sync(NotificationStage::BeforeWrite, Arc::new(hook));
    }

    /// Registers the synchronous hook fired once an operation completes
    pub fn set_after_access<F>(&self, hook: F)
    where
        F: Fn(&TokenCacheNotificationArgs<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.register_sync(NotificationStage::AfterAccess, Arc::new(hook));
    }

    /// Registers the asynchronous hook fired before the cache is accessed
    ///
    /// The asynchronous hook runs after the synchronous hook for the same stage.
    pub fn set_before_access_async<H: AsyncCacheHook + 'static>(&self, hook: H) {
        self.register_async(NotificationStage::BeforeAccess, Arc::new(hook));
    }

    /// Registers the asynchronous hook fired before the cache is mutated
    pub fn set_before_write_async<H: AsyncCacheHook + 'static>(&self, hook: H) {
        self.register_async(NotificationStage::BeforeWrite, Arc::new(hook));
    }

    /// Registers the asynchronous hook fired once an operation completes
    pub fn set_after_access_async<H: AsyncCacheHook + 'static>(&self, hook: H) {
        self.register_async(NotificationStage::AfterAccess, Arc::new(hook));
    }

    fn register_sync(&self, stage: NotificationStage, hook: SyncCacheHook) {
        self.register(stage, |hooks| hooks.set_sync(hook.clone()));
    }

    fn register_async(&self, stage: NotificationStage, hook: Arc<dyn AsyncCacheHook>) {
        self.register(stage, |hooks| hooks.set_async(hook.clone()));
    }

    fn register(&self, stage: NotificationStage, update: impl Fn(&mut StageHooks)) {
        self.hooks.rcu(|current| {
            let mut next = HookSet::clone(current);
            update(next.stage_mut(stage));
            next
        });
        tracing::debug!(%stage, "registered cache notification hook");
    }
}

impl<C: Clock> TokenCache<C> {
    /// Whether the cache holds a refresh token or an unexpired access token
    pub fn has_tokens(&self) -> bool {
        self.store
            .accessor()
            .has_access_or_refresh_tokens(self.clock.now(), self.options.expiry_buffer())
    }

    /// Caches the items carried by a token response
    ///
    /// Any other access token for the same client, tenant, and user whose
    /// scopes overlap the new token's is removed. Returns the cached access
    /// token.
    pub async fn save_token_response(
        &self,
        context: &TokenRequestContext,
        response: &TokenResponse,
        cancellation: &CancellationToken,
    ) -> Result<AccessTokenItem, CacheError> {
        let items = self.items_from_response(context, response);
        let home_account_id = items.access_token.home_account_id.clone();
        let partition = self.store.access_token_partition(&items.access_token);
        let op = Operation::write(Some(&home_account_id), Some(partition.clone()));

        self.run(op, cancellation, |store| {
            let accessor = store.accessor();
            let saved = items.access_token;

            let key = saved.cache_key();
            for cached in accessor.access_tokens(Filter::all().partition(&partition)) {
                if cached.cache_key() != key && is_superseded_by(&cached, &saved) {
                    tracing::debug!(target = %cached.target, "removing access token with overlapping scopes");
                    accessor.delete_access_token(&cached);
                }
            }

            accessor.save_access_token(saved.clone());
            accessor.save_app_metadata(items.app_metadata);

            if items.refresh_token.is_none() && items.id_token.is_none() {
                return Ok(saved);
            }

            let user = store.user("saving user tokens")?;
            if let Some(refresh_token) = &items.refresh_token {
                user.save_refresh_token(refresh_token.clone());
            }
            if let Some(id_token) = &items.id_token {
                user.save_id_token(id_token.clone());
            }
            if let Some(account) = items.account {
                user.save_account(account);
            }

            if let (Some(bridge), Some(refresh_token), Some(id_token)) = (
                self.options.legacy_cache(),
                &items.refresh_token,
                &items.id_token,
            ) {
                bridge.write_entry(
                    refresh_token,
                    id_token,
                    context.authority(),
                    &items.unique_id,
                    &saved.target,
                );
            }

            Ok(saved)
        })
        .await
    }

    /// Finds the access token satisfying `query`
    pub async fn find_access_token(
        &self,
        query: &AccessTokenQuery,
        cancellation: &CancellationToken,
    ) -> Result<Option<AccessTokenItem>, CacheError> {
        let op = Operation::read(
            query.home_account_id(),
            query.partition_key(self.is_application_cache()),
        );

        self.run(op, cancellation, |store| {
            Ok(query::find_access_token(
                store.accessor(),
                query,
                self.clock.now(),
                self.options.expiry_buffer(),
                self.options.extended_lifetime_enabled(),
            ))
        })
        .await
    }

    /// Finds the refresh token satisfying `query`
    ///
    /// When the cache holds no matching token and the legacy cache is bridged,
    /// a non-family lookup falls back to the legacy cache, searching by the
    /// username and object id of the cached account.
    pub async fn find_refresh_token(
        &self,
        query: &RefreshTokenQuery,
        cancellation: &CancellationToken,
    ) -> Result<Option<RefreshTokenItem>, CacheError> {
        let user = self.store.user("finding refresh tokens")?;
        let op = Operation::read(
            Some(query.home_account_id()),
            Some(query.home_account_id().to_owned()),
        );

        self.run(op, cancellation, |_| {
            if let Some(found) = query::find_refresh_token(user, query) {
                return Ok(Some(found));
            }

            let bridge = match (query.family_id(), self.options.legacy_cache()) {
                (None, Some(bridge)) => bridge,
                _ => return Ok(None),
            };

            let account = user
                .accounts(
                    Filter::all()
                        .partition(query.home_account_id())
                        .environments(query.environments()),
                )
                .into_iter()
                .next();

            let filter = LegacyUserFilter {
                username: account.as_ref().map(|a| a.username.as_str()),
                unique_id: account.as_ref().map(|a| a.local_account_id.as_str()),
            };
            let preferred_environment = account
                .as_ref()
                .map(|a| a.environment.as_str())
                .or_else(|| query.environments().first().map(String::as_str))
                .unwrap_or_default();

            let found = bridge.refresh_token_for(
                query.client_id().as_str(),
                preferred_environment,
                query.environments(),
                filter,
            );
            tracing::debug!(found = found.is_some(), "legacy refresh token lookup");
            Ok(found)
        })
        .await
    }

    /// Whether this cache's client belongs to the family `family_id`
    ///
    /// `None` means no app metadata has been recorded for the client yet.
    pub async fn is_family_member(
        &self,
        family_id: &str,
        environments: &[String],
        cancellation: &CancellationToken,
    ) -> Result<Option<bool>, CacheError> {
        self.run(Operation::read(None, None), cancellation, |store| {
            Ok(query::is_family_member(
                store.accessor(),
                self.client_id.as_str(),
                family_id,
                environments,
            ))
        })
        .await
    }

    /// Lists the accounts this client holds a usable refresh token for
    ///
    /// Family refresh tokens count unless the client is known not to belong
    /// to the family. Users found only in the bridged legacy cache are listed
    /// as accounts built from their legacy entry.
    pub async fn get_accounts(
        &self,
        environments: &[String],
        cancellation: &CancellationToken,
    ) -> Result<Vec<AccountItem>, CacheError> {
        let user = self.store.user("listing accounts")?;

        self.run(Operation::read(None, None), cancellation, |_| {
            let filter = Filter::all().environments(environments);
            let client_id = self.client_id.as_str();

            let holders: HashSet<String> = user
                .refresh_tokens(filter)
                .into_iter()
                .filter(|rt| match rt.family_id() {
                    Some(family_id) => {
                        query::is_family_member(user, client_id, family_id, environments)
                            != Some(false)
                    }
                    None => rt.client_id.as_str().eq_ignore_ascii_case(client_id),
                })
                .map(|rt| rt.home_account_id.to_lowercase())
                .collect();

            let mut accounts: Vec<_> = user
                .accounts(filter)
                .into_iter()
                .filter(|account| holders.contains(&account.home_account_id.to_lowercase()))
                .collect();

            if let Some(bridge) = self.options.legacy_cache() {
                let known: HashSet<String> = accounts
                    .iter()
                    .map(|a| a.home_account_id.to_lowercase())
                    .collect();

                for (raw_client_info, legacy) in bridge.users_for(client_id).with_client_info {
                    let Some(client_info) = ClientInfo::parse(&raw_client_info) else {
                        continue;
                    };

                    let home_account_id = client_info.home_account_id();
                    if known.contains(&home_account_id.to_lowercase())
                        || !filter.matches_environment(&legacy.environment)
                    {
                        continue;
                    }

                    tracing::trace!("listing account found only in the legacy cache");
                    accounts.push(AccountItem {
                        home_account_id,
                        environment: legacy.environment,
                        raw_client_info,
                        username: legacy.info.displayable_id.unwrap_or_default(),
                        local_account_id: legacy.info.unique_id.unwrap_or_default(),
                        authority_type: AuthorityType::MsSts.as_str().to_owned(),
                        realm: client_info.utid,
                        ..AccountItem::default()
                    });
                }
            }

            tracing::debug!(count = accounts.len(), "listed accounts");
            Ok(accounts)
        })
        .await
    }

    /// Removes an account and the tokens this client holds for it
    ///
    /// The account's family refresh tokens go as well. App metadata is kept.
    pub async fn remove_account(
        &self,
        account: &AccountItem,
        environments: &[String],
        cancellation: &CancellationToken,
    ) -> Result<(), CacheError> {
        let user = self.store.user("removing accounts")?;
        let op = Operation::write(
            Some(&account.home_account_id),
            Some(account.home_account_id.clone()),
        );

        self.run(op, cancellation, |_| {
            let filter = Filter::all()
                .partition(&account.home_account_id)
                .environments(environments);
            let client_id = self.client_id.as_str();
            let is_own = |id: &ClientId| id.as_str().eq_ignore_ascii_case(client_id);

            let mut removed = 0usize;
            for rt in user.refresh_tokens(filter) {
                if rt.is_family_token() || is_own(&rt.client_id) {
                    removed += usize::from(user.delete_refresh_token(&rt));
                }
            }
            for at in user.access_tokens(filter) {
                if is_own(&at.client_id) {
                    removed += usize::from(user.delete_access_token(&at));
                }
            }
            for id_token in user.id_tokens(filter) {
                if is_own(&id_token.client_id) {
                    removed += usize::from(user.delete_id_token(&id_token));
                }
            }
            for cached in user.accounts(filter) {
                removed += usize::from(user.delete_account(&cached));
            }
            tracing::debug!(removed, "removed account items");

            if let Some(bridge) = self.options.legacy_cache() {
                bridge.remove_entries_for(
                    client_id,
                    Some(account.username.as_str()),
                    Some(account.home_account_id.as_str()),
                );
            }

            Ok(())
        })
        .await
    }

    /// Removes every token and account from the cache
    pub async fn clear(&self, cancellation: &CancellationToken) -> Result<(), CacheError> {
        self.run(Operation::write(None, None), cancellation, |store| {
            store.accessor().clear();
            tracing::info!("cleared token cache");
            Ok(())
        })
        .await
    }

    fn items_from_response(
        &self,
        context: &TokenRequestContext,
        response: &TokenResponse,
    ) -> ResponseItems {
        let now = self.clock.now();
        let is_app = self.is_application_cache();

        let raw_client_info = response.client_info.clone().unwrap_or_default();
        let id_token = response
            .id_token
            .as_ref()
            .filter(|token| !is_app && !token.as_str().is_empty());
        let claims = id_token
            .map(|token| IdTokenClaims::parse(token.as_str()))
            .unwrap_or_default();

        let home_account_id = if is_app {
            String::new()
        } else {
            ClientInfo::parse(&raw_client_info)
                .map(|info| info.home_account_id())
                .or_else(|| claims.sub.clone())
                .unwrap_or_default()
        };
        let raw_client_info = if is_app { String::new() } else { raw_client_info };

        let realm = claims
            .tid
            .clone()
            .filter(|tid| !is_app && !tid.is_empty())
            .unwrap_or_else(|| context.realm().to_owned());

        let scopes = response
            .scope
            .as_deref()
            .map(ScopeSet::parse)
            .filter(|granted| !granted.is_empty())
            .unwrap_or_else(|| context.scopes().clone());

        let expires_in = response.expires_in.unwrap_or(DEFAULT_LIFETIME);
        let extended_expires_on = now + response.ext_expires_in.unwrap_or(expires_in);
        let token_type = context
            .token_type()
            .or(response.token_type.as_deref())
            .filter(|t| !t.is_empty())
            .unwrap_or(BEARER)
            .to_owned();

        let mut access_token = AccessTokenItem {
            home_account_id: home_account_id.clone(),
            environment: context.environment().to_owned(),
            raw_client_info: raw_client_info.clone(),
            client_id: context.client_id().clone(),
            secret: response.access_token.clone(),
            realm: realm.clone(),
            target: scopes.to_target(),
            cached_at: now,
            expires_on: now + expires_in,
            extended_expires_on,
            refresh_on: response.refresh_in.map(|refresh_in| now + refresh_in),
            token_type,
            key_id: context.key_id().map(ToOwned::to_owned),
            obo_cache_key: context.obo_cache_key().map(ToOwned::to_owned),
            ..AccessTokenItem::default()
        };
        access_token.additional_fields.insert(
            "ext_expires_on".to_owned(),
            extended_expires_on.0.to_string().into(),
        );

        let family_id = response.family_id().map(ToOwned::to_owned);
        let app_metadata =
            AppMetadataItem::new(context.client_id().clone(), context.environment(), family_id.clone());

        let refresh_token = response
            .refresh_token
            .as_ref()
            .filter(|secret| !is_app && !secret.as_str().is_empty())
            .map(|secret| RefreshTokenItem {
                home_account_id: home_account_id.clone(),
                environment: context.environment().to_owned(),
                raw_client_info: raw_client_info.clone(),
                client_id: context.client_id().clone(),
                secret: secret.clone(),
                family_id,
                obo_cache_key: context.obo_cache_key().map(ToOwned::to_owned),
                ..RefreshTokenItem::default()
            });

        let account = id_token.map(|_| AccountItem {
            realm: realm.clone(),
            ..AccountItem::from_claims(
                home_account_id.clone(),
                context.environment(),
                raw_client_info.clone(),
                &claims,
            )
        });

        let id_token = id_token.map(|secret| IdTokenItem {
            home_account_id,
            environment: context.environment().to_owned(),
            raw_client_info,
            client_id: context.client_id().clone(),
            secret: secret.clone(),
            realm,
            ..IdTokenItem::default()
        });

        ResponseItems {
            access_token,
            app_metadata,
            refresh_token,
            id_token,
            account,
            unique_id: claims.object_id().unwrap_or_default().to_owned(),
        }
    }

    async fn run<T, F>(
        &self,
        op: Operation<'_>,
        cancellation: &CancellationToken,
        body: F,
    ) -> Result<T, CacheError>
    where
        F: FnOnce(&CacheStore) -> Result<T, CacheError>,
    {
        if cancellation.is_cancelled() {
            return Err(CacheError::Cancelled);
        }

        let hooks = self.hooks.load_full();
        if hooks.is_empty() {
            return body(&self.store);
        }

        let _permit = match &self.gate {
            Some(gate) => Some(tokio::select! {
                biased;
                _ = cancellation.cancelled() => return Err(CacheError::Cancelled),
                permit = gate.acquire() => permit.map_err(|_| CacheError::Cancelled)?,
            }),
            None => None,
        };

        let mut loaded = self.store.accessor().generation();
        let outcome = self
            .access(&hooks, &op, cancellation, &mut loaded, body)
            .await;

        let mut args = self.notification_args(&op, cancellation);
        args.has_state_changed = self.store.accessor().generation() != loaded;
        let after = hooks
            .after_access
            .fire(NotificationStage::AfterAccess, &args)
            .await;

        match (outcome, after) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(error)) | (Err(error), Ok(())) => Err(error),
            (Err(error), Err(after_error)) => {
                tracing::warn!(
                    error = (&after_error as &dyn error::Error),
                    "after access hook failed while handling an earlier error"
                );
                Err(error)
            }
        }
    }

    async fn access<T, F>(
        &self,
        hooks: &HookSet,
        op: &Operation<'_>,
        cancellation: &CancellationToken,
        loaded: &mut u64,
        body: F,
    ) -> Result<T, CacheError>
    where
        F: FnOnce(&CacheStore) -> Result<T, CacheError>,
    {
        hooks
            .before_access
            .fire(
                NotificationStage::BeforeAccess,
                &self.notification_args(op, cancellation),
            )
            .await?;
        *loaded = self.store.accessor().generation();

        if cancellation.is_cancelled() {
            tracing::debug!("cache operation cancelled after loading");
            return Err(CacheError::Cancelled);
        }

        if op.mutates {
            hooks
                .before_write
                .fire(
                    NotificationStage::BeforeWrite,
                    &self.notification_args(op, cancellation),
                )
                .await?;

            if cancellation.is_cancelled() {
                tracing::debug!("cache operation cancelled before writing");
                return Err(CacheError::Cancelled);
            }
        }

        body(&self.store)
    }

    fn notification_args<'a>(
        &'a self,
        op: &'a Operation<'_>,
        cancellation: &'a CancellationToken,
    ) -> TokenCacheNotificationArgs<'a> {
        let is_application_cache = self.is_application_cache();
        let suggested_cache_expiry = match op.suggested_cache_key.as_deref() {
            Some(key) if is_application_cache => self
                .store
                .accessor()
                .access_tokens(Filter::all().partition(key))
                .iter()
                .map(|at| at.expires_on)
                .max(),
            _ => None,
        };

        TokenCacheNotificationArgs {
            serializer: &self.store,
            client_id: &self.client_id,
            home_account_id: op.home_account_id,
            suggested_cache_key: op.suggested_cache_key.as_deref(),
            is_application_cache,
            has_state_changed: false,
            has_tokens: self.has_tokens(),
            suggested_cache_expiry,
            cancellation,
        }
    }
}

/// Whether saving `saved` makes `cached` obsolete
fn is_superseded_by(cached: &AccessTokenItem, saved: &AccessTokenItem) -> bool {
    cached.client_id.as_str().eq_ignore_ascii_case(saved.client_id.as_str())
        && cached.environment.eq_ignore_ascii_case(&saved.environment)
        && cached.realm.eq_ignore_ascii_case(&saved.realm)
        && cached.home_account_id.eq_ignore_ascii_case(&saved.home_account_id)
        && cached.obo_cache_key() == saved.obo_cache_key()
        && (cached.is_bearer() && saved.is_bearer()
            || cached.token_type.eq_ignore_ascii_case(&saved.token_type))
        && cached.scopes().intersects(&saved.scopes())
}
