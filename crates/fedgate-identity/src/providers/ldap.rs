//! LDAP / Active Directory upstream provider
//!
//! Authentication is search-then-bind: the service account locates the
//! user's entry, then a fresh connection binds as that DN with the end
//! user's password. Group membership comes from a second search keyed by
//! the user's DN.

use ldap3::{ldap_escape, Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use fedgate_core::{
    FedgateError, FederatedIdentity, LdapGroupSearch, LdapUserSearch, ResourceUid, Result,
};

/// A live LDAP or Active Directory upstream
pub struct LdapUpstream {
    name: String,
    resource_uid: ResourceUid,
    url: String,
    bind_dn: String,
    bind_password: String,
    user_search: LdapUserSearch,
    group_search: Option<LdapGroupSearch>,
    dial_timeout: Duration,
    /// Cached service-account connection, rebuilt on demand
    conn: Mutex<Option<Ldap>>,
}

impl LdapUpstream {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        resource_uid: ResourceUid,
        url: String,
        bind_dn: String,
        bind_password: String,
        user_search: LdapUserSearch,
        group_search: Option<LdapGroupSearch>,
        dial_timeout: Duration,
    ) -> Self {
        Self {
            name,
            resource_uid,
            url,
            bind_dn,
            bind_password,
            user_search,
            group_search,
            dial_timeout,
            conn: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource_uid(&self) -> ResourceUid {
        self.resource_uid
    }

    async fn connect(&self) -> Result<Ldap> {
        let settings = LdapConnSettings::new().set_conn_timeout(self.dial_timeout);

        let (conn, ldap) = LdapConnAsync::with_settings(settings, &self.url)
            .await
            .map_err(|e| FedgateError::Upstream {
                message: format!("LDAP connection to {} failed: {e}", self.url),
            })?;

        ldap3::drive!(conn);
        Ok(ldap)
    }

    /// Connects and binds with the service account.
    async fn connect_as_service_account(&self) -> Result<Ldap> {
        let mut ldap = self.connect().await?;
        ldap.simple_bind(&self.bind_dn, &self.bind_password)
            .await
            .map_err(|e| FedgateError::Upstream {
                message: format!("LDAP bind failed: {e}"),
            })?
            .success()
            .map_err(|e| FedgateError::Upstream {
                message: format!("LDAP service account bind rejected: {e}"),
            })?;
        Ok(ldap)
    }

    /// Cached service-account connection; `Ldap` handles multiplex over one
    /// underlying connection so clones are cheap.
    ///
    /// The dial happens outside the lock so concurrent logins against a
    /// cold cache do not queue behind one connect. Racing fills are
    /// last-writer-wins; the losing handle is simply dropped by its caller
    /// after use.
    async fn service_connection(&self) -> Result<Ldap> {
        if let Some(ldap) = self.conn.lock().await.as_ref() {
            return Ok(ldap.clone());
        }

        let ldap = self.connect_as_service_account().await?;
        *self.conn.lock().await = Some(ldap.clone());
        Ok(ldap)
    }

    /// Verifies the server is reachable and the service account can bind.
    #[instrument(skip(self), fields(provider = %self.name))]
    pub async fn test_connection(&self) -> Result<()> {
        let mut ldap = self.connect_as_service_account().await?;
        ldap.unbind().await.ok();
        Ok(())
    }

    /// Drops the cached service connection. Called by the cleanup pass
    /// before this provider is removed from the registry.
    pub async fn close(&self) {
        if let Some(mut ldap) = self.conn.lock().await.take() {
            debug!(provider = %self.name, "closing LDAP service connection");
            ldap.unbind().await.ok();
        }
    }

    /// Authenticates an end user via search-then-bind and returns their
    /// identity with group memberships resolved.
    #[instrument(skip(self, password), fields(provider = %self.name))]
    pub async fn authenticate_user(
        &self,
        username: &str,
        password: &str,
    ) -> Result<FederatedIdentity> {
        let mut service = self.service_connection().await?;

        let filter = self
            .user_search
            .filter
            .replace("{}", &ldap_escape(username));
        let attrs = vec![self.user_search.username_attribute.clone()];

        let (entries, _result) = service
            .search(&self.user_search.base, Scope::Subtree, &filter, attrs)
            .await
            .map_err(|e| FedgateError::Upstream {
                message: format!("LDAP user search failed: {e}"),
            })?
            .success()
            .map_err(|e| FedgateError::Upstream {
                message: format!("LDAP user search failed: {e}"),
            })?;

        let mut entries: Vec<SearchEntry> =
            entries.into_iter().map(SearchEntry::construct).collect();

        let entry = match entries.len() {
            1 => entries.remove(0),
            0 => {
                return Err(FedgateError::AuthRejected {
                    message: "the username or password was incorrect".to_string(),
                })
            }
            n => {
                debug!(count = n, "user search matched multiple entries");
                return Err(FedgateError::AuthRejected {
                    message: "the username or password was incorrect".to_string(),
                });
            }
        };

        let user_dn = entry.dn.clone();
        let resolved_username = if self.user_search.username_attribute == "dn" {
            user_dn.clone()
        } else {
            entry
                .attrs
                .get(&self.user_search.username_attribute)
                .and_then(|values| values.first().cloned())
                .ok_or_else(|| FedgateError::Auth {
                    message: format!(
                        "user entry is missing the '{}' attribute",
                        self.user_search.username_attribute
                    ),
                })?
        };

        // Bind as the user on a fresh connection; binding mutates the
        // connection's auth state, so the service connection stays untouched.
        let mut user_conn = self.connect().await?;
        let bind_result = user_conn
            .simple_bind(&user_dn, password)
            .await
            .map_err(|e| FedgateError::Upstream {
                message: format!("LDAP bind failed: {e}"),
            })?;
        user_conn.unbind().await.ok();

        if bind_result.success().is_err() {
            return Err(FedgateError::AuthRejected {
                message: "the username or password was incorrect".to_string(),
            });
        }

        let groups = self.resolve_groups(&mut service, &user_dn).await?;

        Ok(FederatedIdentity::new(resolved_username, groups))
    }

    async fn resolve_groups(&self, service: &mut Ldap, user_dn: &str) -> Result<Vec<String>> {
        let Some(group_search) = &self.group_search else {
            return Ok(Vec::new());
        };

        let filter = group_search.filter.replace("{}", &ldap_escape(user_dn));

        let (entries, _result) = service
            .search(
                &group_search.base,
                Scope::Subtree,
                &filter,
                vec![group_search.attribute.clone()],
            )
            .await
            .map_err(|e| FedgateError::Upstream {
                message: format!("LDAP group search failed: {e}"),
            })?
            .success()
            .map_err(|e| FedgateError::Upstream {
                message: format!("LDAP group search failed: {e}"),
            })?;

        let groups = entries
            .into_iter()
            .map(SearchEntry::construct)
            .filter_map(|entry| {
                entry
                    .attrs
                    .get(&group_search.attribute)
                    .and_then(|values| values.first().cloned())
            })
            .collect();

        Ok(groups)
    }
}
