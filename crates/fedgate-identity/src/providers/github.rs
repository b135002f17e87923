//! GitHub upstream provider
//!
//! Browser-redirect only; the CLI credential flow never dispatches here.
//! Identity mapping applies the configured username/groups attribute
//! selectors and the allowed-organizations policy.

use serde::Deserialize;
use tracing::instrument;

use fedgate_core::{
    FedgateError, FederatedIdentity, GithubGroupsAttribute, GithubUsernameAttribute, ResourceUid,
    Result,
};

use super::common::HttpClient;

/// A GitHub user as returned by the API
#[derive(Debug, Clone, Deserialize)]
pub struct GithubUser {
    pub id: u64,
    pub login: String,
}

/// A GitHub team membership, with its owning organization
#[derive(Debug, Clone, Deserialize)]
pub struct GithubTeam {
    pub name: String,
    pub slug: String,
    pub organization: String,
}

/// A live GitHub upstream
pub struct GithubUpstream {
    name: String,
    resource_uid: ResourceUid,
    client_id: String,
    host: String,
    scopes: Vec<String>,
    username_attribute: GithubUsernameAttribute,
    groups_attribute: GithubGroupsAttribute,
    allowed_organizations: Vec<String>,
    http_client: HttpClient,
}

impl GithubUpstream {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        resource_uid: ResourceUid,
        client_id: String,
        host: String,
        scopes: Vec<String>,
        username_attribute: GithubUsernameAttribute,
        groups_attribute: GithubGroupsAttribute,
        allowed_organizations: Vec<String>,
        http_client: HttpClient,
    ) -> Self {
        Self {
            name,
            resource_uid,
            client_id,
            host,
            scopes,
            username_attribute,
            groups_attribute,
            allowed_organizations,
            http_client,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource_uid(&self) -> ResourceUid {
        self.resource_uid
    }

    fn api_base_url(&self) -> String {
        if self.host == "github.com" {
            "https://api.github.com".to_string()
        } else {
            format!("https://{}/api/v3", self.host)
        }
    }

    /// Builds the browser-redirect URL to GitHub's authorize page. Pure.
    pub fn authorize_redirect_url(&self, redirect_uri: &str, state: &str) -> String {
        format!(
            "https://{}/login/oauth/authorize?client_id={}&redirect_uri={}&scope={}&state={}",
            self.host,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&self.scopes.join(" ")),
            urlencoding::encode(state),
        )
    }

    /// Verifies the API host answers. Unauthenticated; the rate-limit
    /// endpoint responds without credentials.
    #[instrument(skip(self), fields(provider = %self.name))]
    pub async fn test_connection(&self) -> Result<()> {
        let url = format!("{}/rate_limit", self.api_base_url());
        self.http_client
            .execute_with_retry(
                self.http_client
                    .inner()
                    .get(&url)
                    .header("User-Agent", "fedgate"),
            )
            .await?;
        Ok(())
    }

    /// Maps a GitHub user plus their team memberships into a federated
    /// identity, enforcing the allowed-organizations policy.
    ///
    /// Pure; the payloads come from whoever redeems the upstream callback
    /// (the token exchange lives outside this crate's surface).
    pub fn map_identity(
        &self,
        user: &GithubUser,
        teams: &[GithubTeam],
    ) -> Result<FederatedIdentity> {
        let mut teams: Vec<&GithubTeam> = teams.iter().collect();

        if !self.allowed_organizations.is_empty() {
            teams.retain(|t| {
                self.allowed_organizations
                    .iter()
                    .any(|org| org.eq_ignore_ascii_case(&t.organization))
            });
            if teams.is_empty() {
                return Err(FedgateError::AuthRejected {
                    message: "user is not a member of any allowed GitHub organization"
                        .to_string(),
                });
            }
        }

        let username = match self.username_attribute {
            GithubUsernameAttribute::Id => user.id.to_string(),
            GithubUsernameAttribute::Login => user.login.clone(),
            GithubUsernameAttribute::LoginAndId => format!("{}:{}", user.login, user.id),
        };

        let groups = teams
            .iter()
            .map(|t| match self.groups_attribute {
                GithubGroupsAttribute::Name => format!("{}/{}", t.organization, t.name),
                GithubGroupsAttribute::Slug => format!("{}/{}", t.organization, t.slug),
            })
            .collect();

        Ok(FederatedIdentity::new(username, groups))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn upstream(allowed_orgs: Vec<String>) -> GithubUpstream {
        GithubUpstream::new(
            "corp-github".to_string(),
            ResourceUid::new(),
            "Iv1.abc123".to_string(),
            "github.com".to_string(),
            vec!["read:user".to_string(), "read:org".to_string()],
            GithubUsernameAttribute::LoginAndId,
            GithubGroupsAttribute::Slug,
            allowed_orgs,
            HttpClient::new(Duration::from_secs(5), 0, 10, None).unwrap(),
        )
    }

    fn user() -> GithubUser {
        GithubUser {
            id: 42,
            login: "alice".to_string(),
        }
    }

    fn teams() -> Vec<GithubTeam> {
        vec![
            GithubTeam {
                name: "Platform Team".to_string(),
                slug: "platform-team".to_string(),
                organization: "corp".to_string(),
            },
            GithubTeam {
                name: "OSS".to_string(),
                slug: "oss".to_string(),
                organization: "community".to_string(),
            },
        ]
    }

    #[test]
    fn test_authorize_redirect_url() {
        let url = upstream(vec![]).authorize_redirect_url(
            "https://fedgate.example.com/callback",
            "opaque-state",
        );
        assert!(url.starts_with("https://github.com/login/oauth/authorize?"));
        assert!(url.contains("client_id=Iv1.abc123"));
        assert!(url.contains("state=opaque-state"));
    }

    #[test]
    fn test_map_identity_login_and_id() {
        let identity = upstream(vec![]).map_identity(&user(), &teams()).unwrap();
        assert_eq!(identity.username, "alice:42");
        assert_eq!(identity.groups, vec!["corp/platform-team", "community/oss"]);
    }

    #[test]
    fn test_allowed_organizations_filter_groups() {
        let identity = upstream(vec!["CORP".to_string()])
            .map_identity(&user(), &teams())
            .unwrap();
        assert_eq!(identity.groups, vec!["corp/platform-team"]);
    }

    #[test]
    fn test_identity_outside_allowed_organizations_is_rejected() {
        let err = upstream(vec!["some-other-org".to_string()])
            .map_identity(&user(), &teams())
            .unwrap_err();
        assert!(matches!(err, FedgateError::AuthRejected { .. }));
    }
}
