//! Matching cached tokens against a request
//!
//! Lookups are narrowed to a single partition first, then filtered by
//! environment alias, client, tenant, user, and on-behalf-of assertion. Access
//! tokens must additionally hold every requested scope. A lookup that still
//! has more than one candidate is ambiguous and finds nothing.

use credcache_clock::{DurationSecs, UnixTime};

use crate::{
    accessor::{environment_matches, Filter, TokenCacheAccessor, UserCacheAccessor},
    items::{AccessTokenItem, RefreshTokenItem, BEARER},
    keys, ClientId, ScopeSet,
};

/// Describes the access token a request needs
#[derive(Clone, Debug)]
pub struct AccessTokenQuery {
    client_id: ClientId,
    scopes: ScopeSet,
    environments: Vec<String>,
    realm: Option<String>,
    home_account_id: Option<String>,
    obo_cache_key: Option<String>,
    token_type: String,
    key_id: Option<String>,
}

impl AccessTokenQuery {
    /// A client credential request for `scopes`
    ///
    /// An empty scope set matches any token.
    pub fn new(client_id: ClientId, scopes: ScopeSet) -> Self {
        Self {
            client_id,
            scopes,
            environments: Vec::new(),
            realm: None,
            home_account_id: None,
            obo_cache_key: None,
            token_type: BEARER.to_owned(),
            key_id: None,
        }
    }

    /// Restricts matches to the given environment aliases
    pub fn with_environments(mut self, environments: Vec<String>) -> Self {
        self.environments = environments;
        self
    }

    /// Restricts matches to a tenant
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    /// Requests a token issued to a user
    pub fn for_account(mut self, home_account_id: impl Into<String>) -> Self {
        self.home_account_id = Some(home_account_id.into());
        self
    }

    /// Requests a token obtained on behalf of the assertion with the given hash
    pub fn on_behalf_of(mut self, obo_cache_key: impl Into<String>) -> Self {
        self.obo_cache_key = Some(obo_cache_key.into());
        self
    }

    /// Requests a token of a type other than bearer, bound to a key
    pub fn with_token_type(
        mut self,
        token_type: impl Into<String>,
        key_id: Option<String>,
    ) -> Self {
        self.token_type = token_type.into();
        self.key_id = key_id;
        self
    }

    /// The client the token must be issued to
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// The requested scopes
    pub fn scopes(&self) -> &ScopeSet {
        &self.scopes
    }

    /// The acceptable environment aliases
    pub fn environments(&self) -> &[String] {
        &self.environments
    }

    /// The tenant the token must be issued by, if restricted
    pub fn realm(&self) -> Option<&str> {
        self.realm.as_deref()
    }

    /// The home account of the user, if this is a user request
    pub fn home_account_id(&self) -> Option<&str> {
        self.home_account_id.as_deref()
    }

    /// Whether the request is made without a user or an assertion
    pub fn is_client_credential_request(&self) -> bool {
        self.home_account_id.is_none() && self.obo_cache_key.is_none()
    }

    pub(crate) fn partition_key(&self, is_application_cache: bool) -> Option<String> {
        if is_application_cache {
            self.realm
                .as_deref()
                .map(|realm| keys::app_partition_key(self.client_id.as_str(), realm))
        } else {
            self.obo_cache_key
                .clone()
                .or_else(|| self.home_account_id.clone())
        }
    }

    fn matches(&self, at: &AccessTokenItem) -> bool {
        at.client_id.as_str().eq_ignore_ascii_case(self.client_id.as_str())
            && environment_matches(&self.environments, &at.environment)
            && self
                .realm
                .as_deref()
                .map_or(true, |realm| realm.eq_ignore_ascii_case(&at.realm))
            && at.obo_cache_key() == self.obo_cache_key.as_deref()
            && self.matches_user(at)
            && self.matches_token_type(at)
            && at.scopes().contains_all(&self.scopes)
    }

    fn matches_user(&self, at: &AccessTokenItem) -> bool {
        if self.obo_cache_key.is_some() {
            return true;
        }

        match &self.home_account_id {
            Some(hid) => at.home_account_id.eq_ignore_ascii_case(hid),
            None => at.is_client_credential(),
        }
    }

    fn matches_token_type(&self, at: &AccessTokenItem) -> bool {
        if self.token_type.eq_ignore_ascii_case(BEARER) {
            return at.is_bearer();
        }

        at.token_type.eq_ignore_ascii_case(&self.token_type)
            && self
                .key_id
                .as_deref()
                .map_or(true, |kid| at.key_id.as_deref() == Some(kid))
    }
}

/// Describes the refresh token a request needs
#[derive(Clone, Debug)]
pub struct RefreshTokenQuery {
    client_id: ClientId,
    home_account_id: String,
    environments: Vec<String>,
    family_id: Option<String>,
    obo_cache_key: Option<String>,
}

impl RefreshTokenQuery {
    /// A request for the refresh token issued to `client_id` for a user
    pub fn new(client_id: ClientId, home_account_id: impl Into<String>) -> Self {
        Self {
            client_id,
            home_account_id: home_account_id.into(),
            environments: Vec::new(),
            family_id: None,
            obo_cache_key: None,
        }
    }

    /// Restricts matches to the given environment aliases
    pub fn with_environments(mut self, environments: Vec<String>) -> Self {
        self.environments = environments;
        self
    }

    /// Requests the family refresh token of `family_id` instead of the client's own
    pub fn in_family(mut self, family_id: impl Into<String>) -> Self {
        self.family_id = Some(family_id.into());
        self
    }

    /// Requests a token obtained on behalf of the assertion with the given hash
    pub fn on_behalf_of(mut self, obo_cache_key: impl Into<String>) -> Self {
        self.obo_cache_key = Some(obo_cache_key.into());
        self
    }

    /// The client the token must be issued to
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// The home account of the user
    pub fn home_account_id(&self) -> &str {
        &self.home_account_id
    }

    /// The acceptable environment aliases
    pub fn environments(&self) -> &[String] {
        &self.environments
    }

    /// The requested family, if any
    pub fn family_id(&self) -> Option<&str> {
        self.family_id.as_deref().filter(|f| !f.is_empty())
    }

    fn partition_key(&self) -> &str {
        self.obo_cache_key.as_deref().unwrap_or(&self.home_account_id)
    }

    fn matches(&self, rt: &RefreshTokenItem) -> bool {
        let identity = match self.family_id() {
            Some(family_id) => rt.family_id() == Some(family_id),
            None => {
                !rt.is_family_token()
                    && rt.client_id.as_str().eq_ignore_ascii_case(self.client_id.as_str())
            }
        };

        identity
            && environment_matches(&self.environments, &rt.environment)
            && rt.home_account_id.eq_ignore_ascii_case(&self.home_account_id)
            && rt.obo_cache_key() == self.obo_cache_key.as_deref()
    }
}

/// Finds the single access token satisfying `query`
///
/// A token within `expiry_buffer` of its expiry is not returned, unless
/// `extended_lifetime` is set and it is still inside its extended lifetime, in
/// which case it is returned flagged as an extended lifetime token.
pub fn find_access_token(
    accessor: &dyn TokenCacheAccessor,
    query: &AccessTokenQuery,
    now: UnixTime,
    expiry_buffer: DurationSecs,
    extended_lifetime: bool,
) -> Option<AccessTokenItem> {
    let partition = query.partition_key(accessor.is_application_cache());
    let filter = match &partition {
        Some(partition) => Filter::all().partition(partition),
        None => Filter::all(),
    };

    let mut candidates: Vec<_> = accessor
        .access_tokens(filter.environments(&query.environments))
        .into_iter()
        .filter(|at| query.matches(at))
        .collect();

    let mut at = match candidates.len() {
        0 => {
            tracing::debug!(scopes = %query.scopes, "no matching access token");
            return None;
        }
        1 => candidates.swap_remove(0),
        count => {
            tracing::warn!(
                count,
                scopes = %query.scopes,
                "multiple access tokens match the request; treating as a cache miss"
            );
            return None;
        }
    };

    if !at.is_expired(now, expiry_buffer) {
        at.is_extended_lifetime_token = false;
        return Some(at);
    }

    if extended_lifetime && at.is_within_extended_lifetime(now) {
        tracing::info!("returning expired access token within its extended lifetime");
        at.is_extended_lifetime_token = true;
        return Some(at);
    }

    tracing::debug!(expires_on = at.expires_on.0, "matching access token has expired");
    None
}

/// Finds the refresh token satisfying `query`
///
/// Refresh tokens are not bound to a tenant, so the realm plays no part.
pub fn find_refresh_token(
    accessor: &dyn UserCacheAccessor,
    query: &RefreshTokenQuery,
) -> Option<RefreshTokenItem> {
    let filter = Filter::all()
        .partition(query.partition_key())
        .environments(&query.environments);

    let found = accessor
        .refresh_tokens(filter)
        .into_iter()
        .find(|rt| query.matches(rt));

    tracing::debug!(
        found = found.is_some(),
        family = query.family_id().is_some(),
        "refresh token lookup"
    );
    found
}

/// Whether `client_id` belongs to the family `family_id`
///
/// Returns `None` when no app metadata has been recorded for the client yet,
/// which is distinct from a recorded non-membership.
pub fn is_family_member(
    accessor: &dyn TokenCacheAccessor,
    client_id: &str,
    family_id: &str,
    environments: &[String],
) -> Option<bool> {
    let metadata: Vec<_> = accessor
        .app_metadata(Filter::all().environments(environments))
        .into_iter()
        .filter(|md| md.client_id.as_str().eq_ignore_ascii_case(client_id))
        .collect();

    if metadata.is_empty() {
        return None;
    }

    let family_id = Some(family_id).filter(|f| !f.is_empty());
    Some(metadata.iter().any(|md| md.family_id() == family_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        accessor::{AppTokenStore, UserTokenStore},
        items::AppMetadataItem,
        Secret,
    };

    const NOW: UnixTime = UnixTime(10_000);
    const BUFFER: DurationSecs = DurationSecs(300);

    fn client() -> ClientId {
        ClientId::from_static("client")
    }

    fn user_token(target: &str, expires_on: u64) -> AccessTokenItem {
        AccessTokenItem {
            home_account_id: "uid.utid".into(),
            environment: "login.microsoftonline.com".into(),
            client_id: client(),
            secret: Secret::new(format!("at:{target}")),
            realm: "tenant".into(),
            target: target.into(),
            cached_at: UnixTime(9_000),
            expires_on: UnixTime(expires_on),
            extended_expires_on: UnixTime(expires_on + 3_600),
            ..AccessTokenItem::default()
        }
    }

    fn user_query(scopes: &str) -> AccessTokenQuery {
        AccessTokenQuery::new(client(), ScopeSet::parse(scopes))
            .with_environments(vec![
                "login.microsoftonline.com".into(),
                "login.windows.net".into(),
            ])
            .with_realm("tenant")
            .for_account("uid.utid")
    }

    #[test]
    fn cached_scopes_must_be_a_superset() {
        let store = UserTokenStore::new();
        store.save_access_token(user_token("A B C", 20_000));

        let hit = find_access_token(&store, &user_query("b"), NOW, BUFFER, false);
        assert_eq!(hit.map(|at| at.target), Some("A B C".to_owned()));

        assert!(find_access_token(&store, &user_query("D"), NOW, BUFFER, false).is_none());
        assert!(find_access_token(&store, &user_query("a d"), NOW, BUFFER, false).is_none());
    }

    #[test]
    fn empty_target_matches_an_empty_request() {
        let store = UserTokenStore::new();
        store.save_access_token(user_token("", 20_000));

        assert!(find_access_token(&store, &user_query(""), NOW, BUFFER, false).is_some());
    }

    #[test]
    fn ambiguous_matches_find_nothing() {
        let store = UserTokenStore::new();
        store.save_access_token(user_token("a b", 20_000));
        store.save_access_token(user_token("a c", 20_000));

        assert!(find_access_token(&store, &user_query("a"), NOW, BUFFER, false).is_none());
        assert!(find_access_token(&store, &user_query("b"), NOW, BUFFER, false).is_some());
    }

    #[test]
    fn expiry_honors_the_buffer_and_extended_lifetime() {
        let store = UserTokenStore::new();
        store.save_access_token(user_token("a", NOW.0 - 1));

        assert!(find_access_token(&store, &user_query("a"), NOW, BUFFER, false).is_none());

        let at = find_access_token(&store, &user_query("a"), NOW, BUFFER, true).unwrap();
        assert!(at.is_extended_lifetime_token);

        let store = UserTokenStore::new();
        store.save_access_token(user_token("a", NOW.0 + 200));
        assert!(find_access_token(&store, &user_query("a"), NOW, BUFFER, false).is_none());
        assert!(find_access_token(&store, &user_query("a"), NOW, DurationSecs(0), false).is_some());
    }

    #[test]
    fn other_users_and_environments_do_not_match() {
        let store = UserTokenStore::new();
        store.save_access_token(user_token("a", 20_000));

        let other_user = AccessTokenQuery::new(client(), ScopeSet::parse("a"))
            .with_realm("tenant")
            .for_account("other.user");
        assert!(find_access_token(&store, &other_user, NOW, BUFFER, false).is_none());

        let sovereign = user_query("a").with_environments(vec!["login.microsoftonline.de".into()]);
        assert!(find_access_token(&store, &sovereign, NOW, BUFFER, false).is_none());
    }

    #[test]
    fn client_credential_requests_use_the_app_partition() {
        let store = AppTokenStore::new();
        store.save_access_token(AccessTokenItem {
            home_account_id: String::new(),
            ..user_token("api://x/.default", 20_000)
        });

        let query = AccessTokenQuery::new(client(), ScopeSet::parse("api://x/.default"))
            .with_realm("tenant");
        assert!(query.is_client_credential_request());
        assert!(find_access_token(&store, &query, NOW, BUFFER, false).is_some());

        let other_tenant = AccessTokenQuery::new(client(), ScopeSet::parse("api://x/.default"))
            .with_realm("other");
        assert!(find_access_token(&store, &other_tenant, NOW, BUFFER, false).is_none());
    }

    #[test]
    fn pop_tokens_are_only_returned_for_pop_requests() {
        let store = UserTokenStore::new();
        store.save_access_token(AccessTokenItem {
            token_type: "pop".into(),
            key_id: Some("kid-1".into()),
            ..user_token("a", 20_000)
        });

        assert!(find_access_token(&store, &user_query("a"), NOW, BUFFER, false).is_none());

        let pop = user_query("a").with_token_type("PoP", Some("kid-1".into()));
        assert!(find_access_token(&store, &pop, NOW, BUFFER, false).is_some());

        let other_key = user_query("a").with_token_type("pop", Some("kid-2".into()));
        assert!(find_access_token(&store, &other_key, NOW, BUFFER, false).is_none());
    }

    #[test]
    fn obo_assertions_must_match_exactly() {
        let store = UserTokenStore::new();
        store.save_access_token(AccessTokenItem {
            obo_cache_key: Some("hash-1".into()),
            ..user_token("a", 20_000)
        });

        let query = |hash: &str| {
            AccessTokenQuery::new(client(), ScopeSet::parse("a"))
                .with_realm("tenant")
                .on_behalf_of(hash)
        };
        assert!(find_access_token(&store, &query("hash-1"), NOW, BUFFER, false).is_some());
        assert!(find_access_token(&store, &query("hash-2"), NOW, BUFFER, false).is_none());
    }

    fn refresh_token(family_id: Option<&str>) -> RefreshTokenItem {
        RefreshTokenItem {
            home_account_id: "uid.utid".into(),
            environment: "login.windows.net".into(),
            client_id: client(),
            secret: Secret::from_static("rt"),
            family_id: family_id.map(Into::into),
            ..RefreshTokenItem::default()
        }
    }

    #[test]
    fn refresh_tokens_ignore_realm_and_honor_aliases() {
        let store = UserTokenStore::new();
        store.save_refresh_token(refresh_token(None));

        let query = RefreshTokenQuery::new(client(), "uid.utid").with_environments(vec![
            "login.microsoftonline.com".into(),
            "login.windows.net".into(),
        ]);
        assert!(find_refresh_token(&store, &query).is_some());

        let other_client = RefreshTokenQuery::new(ClientId::from_static("other"), "uid.utid");
        assert!(find_refresh_token(&store, &other_client).is_none());
    }

    #[test]
    fn family_lookups_only_see_family_tokens() {
        let store = UserTokenStore::new();
        store.save_refresh_token(refresh_token(None));

        let family = RefreshTokenQuery::new(client(), "uid.utid").in_family("1");
        assert!(find_refresh_token(&store, &family).is_none());

        store.save_refresh_token(refresh_token(Some("1")));
        let rt = find_refresh_token(&store, &family).unwrap();
        assert!(rt.is_family_token());

        let own = find_refresh_token(&store, &RefreshTokenQuery::new(client(), "uid.utid")).unwrap();
        assert!(!own.is_family_token());
    }

    #[test]
    fn family_membership_is_unknown_until_metadata_exists() {
        let store = UserTokenStore::new();
        assert_eq!(is_family_member(&store, "client", "1", &[]), None);

        store.save_app_metadata(AppMetadataItem::new(client(), "login.windows.net", None));
        assert_eq!(is_family_member(&store, "client", "1", &[]), Some(false));

        store.save_app_metadata(AppMetadataItem::new(
            client(),
            "login.windows.net",
            Some("1".into()),
        ));
        assert_eq!(is_family_member(&store, "client", "1", &[]), Some(true));
    }
}
