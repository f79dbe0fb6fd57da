//! Hooks that let a host load and persist the cache around each operation
//!
//! Every operation that touches the cache fires `BeforeAccess` first and
//! `AfterAccess` last. Operations that mutate the cache also fire `BeforeWrite`
//! immediately before the mutation. At each stage the synchronous hook runs
//! first, then the asynchronous hook is awaited.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use credcache_clock::UnixTime;
use tokio_util::sync::CancellationToken;

use crate::{BoxError, CacheError, ClientIdRef, NotificationStage, TokenCacheSerializer};

/// Describes the cache and the operation in progress to a notification hook
pub struct TokenCacheNotificationArgs<'a> {
    pub(crate) serializer: &'a dyn TokenCacheSerializer,
    pub(crate) client_id: &'a ClientIdRef,
    pub(crate) home_account_id: Option<&'a str>,
    pub(crate) suggested_cache_key: Option<&'a str>,
    pub(crate) is_application_cache: bool,
    pub(crate) has_state_changed: bool,
    pub(crate) has_tokens: bool,
    pub(crate) suggested_cache_expiry: Option<UnixTime>,
    pub(crate) cancellation: &'a CancellationToken,
}

impl<'a> TokenCacheNotificationArgs<'a> {
    /// Loads or saves the cache contents
    #[inline]
    pub fn serializer(&self) -> &'a dyn TokenCacheSerializer {
        self.serializer
    }

    /// The client the cache belongs to
    #[inline]
    pub fn client_id(&self) -> &'a ClientIdRef {
        self.client_id
    }

    /// The user the operation concerns, if any
    #[inline]
    pub fn home_account_id(&self) -> Option<&'a str> {
        self.home_account_id
    }

    /// A key under which the host can partition its external storage
    ///
    /// This is the home account identifier for user caches and the
    /// client/tenant partition for application caches.
    #[inline]
    pub fn suggested_cache_key(&self) -> Option<&'a str> {
        self.suggested_cache_key
    }

    /// Whether the cache holds application tokens
    #[inline]
    pub fn is_application_cache(&self) -> bool {
        self.is_application_cache
    }

    /// Whether the cache contents changed since `BeforeAccess`
    ///
    /// Always `false` outside of `AfterAccess`.
    #[inline]
    pub fn has_state_changed(&self) -> bool {
        self.has_state_changed
    }

    /// Whether the cache holds any usable token
    #[inline]
    pub fn has_tokens(&self) -> bool {
        self.has_tokens
    }

    /// When the host may evict its copy of an application cache partition
    #[inline]
    pub fn suggested_cache_expiry(&self) -> Option<UnixTime> {
        self.suggested_cache_expiry
    }

    /// Signals that the caller has abandoned the operation
    #[inline]
    pub fn cancellation(&self) -> &'a CancellationToken {
        self.cancellation
    }
}

impl fmt::Debug for TokenCacheNotificationArgs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenCacheNotificationArgs")
            .field("client_id", &self.client_id)
            .field("home_account_id", &self.home_account_id)
            .field("suggested_cache_key", &self.suggested_cache_key)
            .field("is_application_cache", &self.is_application_cache)
            .field("has_state_changed", &self.has_state_changed)
            .field("has_tokens", &self.has_tokens)
            .field("suggested_cache_expiry", &self.suggested_cache_expiry)
            .finish_non_exhaustive()
    }
}

/// A synchronous notification hook
pub type SyncCacheHook =
    Arc<dyn Fn(&TokenCacheNotificationArgs<'_>) -> Result<(), BoxError> + Send + Sync>;

/// An asynchronous notification hook
///
/// Implementations performing external I/O should observe
/// [`cancellation`][TokenCacheNotificationArgs::cancellation].
#[async_trait]
pub trait AsyncCacheHook: Send + Sync {
    /// Handles a notification
    async fn on_notification(&self, args: &TokenCacheNotificationArgs<'_>) -> Result<(), BoxError>;
}

#[async_trait]
impl<H: AsyncCacheHook + ?Sized> AsyncCacheHook for Arc<H> {
    async fn on_notification(&self, args: &TokenCacheNotificationArgs<'_>) -> Result<(), BoxError> {
        (**self).on_notification(args).await
    }
}

#[derive(Clone, Default)]
pub(crate) struct StageHooks {
    sync: Option<SyncCacheHook>,
    asynchronous: Option<Arc<dyn AsyncCacheHook>>,
}

impl StageHooks {
    fn is_empty(&self) -> bool {
        self.sync.is_none() && self.asynchronous.is_none()
    }

    pub(crate) async fn fire(
        &self,
        stage: NotificationStage,
        args: &TokenCacheNotificationArgs<'_>,
    ) -> Result<(), CacheError> {
        if let Some(hook) = &self.sync {
            tracing::trace!(%stage, "firing synchronous hook");
            hook(args).map_err(|source| CacheError::Hook { stage, source })?;
        }

        if let Some(hook) = &self.asynchronous {
            tracing::trace!(%stage, "firing asynchronous hook");
            hook.on_notification(args)
                .await
                .map_err(|source| CacheError::Hook { stage, source })?;
        }

        Ok(())
    }
}

impl fmt::Debug for StageHooks {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("StageHooks")
            .field("sync", &self.sync.is_some())
            .field("async", &self.asynchronous.is_some())
            .finish()
    }
}

/// The hooks registered with a cache
#[derive(Clone, Debug, Default)]
pub(crate) struct HookSet {
    pub(crate) before_access: StageHooks,
    pub(crate) before_write: StageHooks,
    pub(crate) after_access: StageHooks,
}

impl HookSet {
    pub(crate) fn is_empty(&self) -> bool {
        self.before_access.is_empty() && self.before_write.is_empty() && self.after_access.is_empty()
    }

    pub(crate) fn stage_mut(&mut self, stage: NotificationStage) -> &mut StageHooks {
        match stage {
            NotificationStage::BeforeAccess => &mut self.before_access,
            NotificationStage::BeforeWrite => &mut self.before_write,
            NotificationStage::AfterAccess => &mut self.after_access,
        }
    }
}

impl StageHooks {
    pub(crate) fn set_sync(&mut self, hook: SyncCacheHook) {
        self.sync = Some(hook);
    }

    pub(crate) fn set_async(&mut self, hook: Arc<dyn AsyncCacheHook>) {
        self.asynchronous = Some(hook);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        accessor::{CacheStore, UserTokenStore},
        ClientId,
    };

    fn sync_hook<F>(hook: F) -> SyncCacheHook
    where
        F: Fn(&TokenCacheNotificationArgs<'_>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        Arc::new(hook)
    }

    #[derive(Debug, Default)]
    struct Recorder(Mutex<Vec<&'static str>>);

    #[async_trait]
    impl AsyncCacheHook for Recorder {
        async fn on_notification(&self, _: &TokenCacheNotificationArgs<'_>) -> Result<(), BoxError> {
            tokio::task::yield_now().await;
            self.0.lock().unwrap().push("async");
            Ok(())
        }
    }

    #[tokio::test]
    async fn sync_hook_fires_before_async_hook() -> color_eyre::Result<()> {
        let recorder = Arc::new(Recorder::default());
        let mut hooks = StageHooks::default();
        hooks.set_async(recorder.clone());
        let sync_recorder = recorder.clone();
        hooks.set_sync(sync_hook(move |_| {
            sync_recorder.0.lock().unwrap().push("sync");
            Ok(())
        }));

        let store = CacheStore::from(UserTokenStore::new());
        let client_id = ClientId::from_static("client");
        let cancellation = CancellationToken::new();
        let args = TokenCacheNotificationArgs {
            serializer: &store,
            client_id: &client_id,
            home_account_id: None,
            suggested_cache_key: None,
            is_application_cache: false,
            has_state_changed: false,
            has_tokens: false,
            suggested_cache_expiry: None,
            cancellation: &cancellation,
        };

        hooks.fire(NotificationStage::BeforeAccess, &args).await?;
        assert_eq!(*recorder.0.lock().unwrap(), ["sync", "async"]);
        Ok(())
    }

    #[tokio::test]
    async fn hook_errors_name_the_stage() {
        let mut hooks = StageHooks::default();
        hooks.set_sync(sync_hook(|_| Err("storage offline".into())));

        let store = CacheStore::from(UserTokenStore::new());
        let client_id = ClientId::from_static("client");
        let cancellation = CancellationToken::new();
        let args = TokenCacheNotificationArgs {
            serializer: &store,
            client_id: &client_id,
            home_account_id: None,
            suggested_cache_key: None,
            is_application_cache: false,
            has_state_changed: false,
            has_tokens: false,
            suggested_cache_expiry: None,
            cancellation: &cancellation,
        };

        let err = hooks
            .fire(NotificationStage::BeforeWrite, &args)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::Hook {
                stage: NotificationStage::BeforeWrite,
                ..
            }
        ));
        assert_eq!(err.to_string(), "before write notification hook failed");
        assert!(HookSet::default().is_empty());
    }
}
