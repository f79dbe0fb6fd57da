//! A credential cache engine for OAuth2/OIDC clients
//!
//! This library holds the access tokens, refresh tokens, ID tokens, and
//! account records that a client accumulates as it acquires tokens, and finds
//! the right one again when a request comes in. It does not talk to any token
//! endpoint itself; callers hand it token responses and ask it for tokens.
//!
//! Caches are shared with other SDKs, so the layout is fixed. Every item has a
//! composite key and a four-part platform key ([keys]) that other
//! implementations derive the same way, and the contents serialize to a
//! structured JSON document ("v3") or to the flat dictionary layout written by
//! the previous library generation. Properties this version does not
//! recognize are carried through unchanged.
//!
//! # Stores
//!
//! A [`TokenCache`] wraps one of two stores. The user store keeps every kind of
//! item, partitioned by user. The application store keeps only access tokens
//! and app metadata for client credential flows, partitioned by client and
//! tenant; operations that only make sense for users fail with
//! [`CacheError::UnsupportedOperation`].
//!
//! # Persistence
//!
//! The cache lives in memory. Hosts that want it to outlive the process, or to
//! share it between processes, register notification hooks. The
//! before-access hook loads the serialized cache and the after-access hook
//! writes it back when it changed. By default only one hooked operation runs
//! at a time, which prevents two operations from loading the same state and
//! clobbering each other's writes.
//!
//! ```
//! use credcache::{
//!     AccessTokenQuery, ClientId, ScopeSet, TokenCache, TokenCacheOptions, TokenRequestContext,
//!     TokenResponse,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let client_id = ClientId::from_static("my-client");
//! let cache = TokenCache::new_application(client_id.clone(), TokenCacheOptions::default());
//! let cancel = CancellationToken::new();
//!
//! cache.set_after_access(|args| {
//!     if args.has_state_changed() {
//!         let _bytes = args.serializer().serialize_v3()?;
//!         // hand the bytes to durable storage
//!     }
//!     Ok(())
//! });
//!
//! let context = TokenRequestContext::new(
//!     client_id.clone(),
//!     "https://login.microsoftonline.com/contoso.onmicrosoft.com/",
//!     ScopeSet::parse("api://backend/.default"),
//! );
//! let response: TokenResponse = serde_json::from_str(
//!     r#"{"token_type":"Bearer","expires_in":3599,"access_token":"eyJ0eXAi"}"#,
//! )?;
//! cache.save_token_response(&context, &response, &cancel).await?;
//!
//! let query = AccessTokenQuery::new(client_id, ScopeSet::parse("api://backend/.default"))
//!     .with_realm("contoso.onmicrosoft.com");
//! let token = cache.find_access_token(&query, &cancel).await?;
//! assert!(token.is_some());
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! The following features are supported by this crate, all of which are enabled by default:
//!
//! * `file`: Provides [`FileTokenCacheStorage`], which keeps a cache in a local file.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

pub mod accessor;
mod braids;
mod cache;
mod error;
pub mod items;
pub mod keys;
pub mod legacy;
mod notification;
mod options;
pub mod query;
mod response;
mod scopes;
mod serialization;
#[cfg(feature = "file")]
mod storage;

pub use braids::*;
pub use cache::TokenCache;
pub use error::{BoxError, CacheError, Codec, NotificationStage, MALFORMED_EXCERPT_LEN};
pub use notification::{AsyncCacheHook, SyncCacheHook, TokenCacheNotificationArgs};
pub use options::TokenCacheOptions;
pub use query::{AccessTokenQuery, RefreshTokenQuery};
pub use response::{TokenRequestContext, TokenResponse};
pub use scopes::{Iter as ScopeIter, ScopeSet};
pub use serialization::TokenCacheSerializer;
#[cfg(feature = "file")]
#[cfg_attr(docsrs, doc(cfg(feature = "file")))]
pub use storage::FileTokenCacheStorage;
