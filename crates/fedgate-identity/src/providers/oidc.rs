//! OIDC upstream provider
//!
//! Built by the OIDC validation controller after discovery succeeds.
//! Endpoints are resolved at construction time (explicit spec overrides win
//! over discovered values); the instance itself is immutable.

use jsonwebtoken::Validation;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, instrument};

use fedgate_core::{FedgateError, FederatedIdentity, ResourceUid, Result};

use super::common::{extract_jwt_kid, validate_id_token, HttpClient, JwksCache};

/// Inputs for constructing an [`OidcUpstream`], resolved from the provider
/// resource spec plus the discovery document.
pub struct OidcUpstreamParams {
    pub name: String,
    pub resource_uid: ResourceUid,
    pub client_id: String,
    pub client_secret: String,
    pub issuer: String,
    pub authorization_url: String,
    pub token_url: String,
    /// Absent when the upstream publishes no revocation endpoint
    pub revocation_url: Option<String>,
    pub jwks_uri: String,
    pub scopes: Vec<String>,
    pub username_claim: String,
    pub groups_claim: String,
    pub allow_password_grant: bool,
    pub additional_authorize_params: BTreeMap<String, String>,
}

/// A live OIDC upstream
pub struct OidcUpstream {
    name: String,
    resource_uid: ResourceUid,
    client_id: String,
    client_secret: String,
    issuer: String,
    authorization_url: String,
    token_url: String,
    revocation_url: Option<String>,
    jwks_uri: String,
    scopes: Vec<String>,
    username_claim: String,
    groups_claim: String,
    allow_password_grant: bool,
    additional_authorize_params: BTreeMap<String, String>,
    http_client: HttpClient,
    jwks_cache: JwksCache,
}

impl OidcUpstream {
    pub fn new(params: OidcUpstreamParams, http_client: HttpClient) -> Self {
        Self {
            name: params.name,
            resource_uid: params.resource_uid,
            client_id: params.client_id,
            client_secret: params.client_secret,
            issuer: params.issuer,
            authorization_url: params.authorization_url,
            token_url: params.token_url,
            revocation_url: params.revocation_url,
            jwks_uri: params.jwks_uri,
            scopes: params.scopes,
            username_claim: params.username_claim,
            groups_claim: params.groups_claim,
            allow_password_grant: params.allow_password_grant,
            additional_authorize_params: params.additional_authorize_params,
            http_client,
            jwks_cache: JwksCache::new(3600),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn resource_uid(&self) -> ResourceUid {
        self.resource_uid
    }

    pub fn authorization_url(&self) -> &str {
        &self.authorization_url
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    pub fn revocation_url(&self) -> Option<&str> {
        self.revocation_url.as_deref()
    }

    pub fn allows_password_grant(&self) -> bool {
        self.allow_password_grant
    }

    fn scopes(&self) -> String {
        self.scopes.join(" ")
    }

    /// Builds the browser-redirect URL to this upstream's authorization
    /// endpoint. Pure; no network.
    pub fn authorize_redirect_url(
        &self,
        redirect_uri: &str,
        state: &str,
        nonce: &str,
        pkce_challenge: &str,
        login_hint: Option<&str>,
    ) -> String {
        let mut url = format!(
            "{}?client_id={}&response_type=code&redirect_uri={}&scope={}&state={}&nonce={}&code_challenge={}&code_challenge_method=S256",
            self.authorization_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&self.scopes()),
            urlencoding::encode(state),
            urlencoding::encode(nonce),
            urlencoding::encode(pkce_challenge),
        );

        if let Some(hint) = login_hint {
            url.push_str(&format!("&login_hint={}", urlencoding::encode(hint)));
        }

        for (key, value) in &self.additional_authorize_params {
            url.push_str(&format!(
                "&{}={}",
                urlencoding::encode(key),
                urlencoding::encode(value)
            ));
        }

        url
    }

    /// Performs a resource-owner password credentials grant and validates
    /// the resulting ID token, returning the upstream identity extracted
    /// from its claims.
    #[instrument(skip(self, password), fields(provider = %self.name))]
    pub async fn password_credentials_grant(
        &self,
        username: &str,
        password: &str,
    ) -> Result<FederatedIdentity> {
        if !self.allow_password_grant {
            return Err(FedgateError::AuthRejected {
                message: format!(
                    "identity provider {} does not allow the password grant",
                    self.name
                ),
            });
        }

        let scopes = self.scopes();
        let params = [
            ("grant_type", "password"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("username", username),
            ("password", password),
            ("scope", scopes.as_str()),
        ];

        // Deliberately not retried: a credential grant is not idempotent
        // from the operator's point of view and a 4xx means bad credentials.
        let response = self
            .http_client
            .inner()
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| FedgateError::Upstream {
                message: format!("token endpoint request failed: {e}"),
            })?;

        if response.status().is_client_error() {
            let status = response.status();
            debug!(%status, "password grant rejected by upstream");
            return Err(FedgateError::AuthRejected {
                message: "the username or password was incorrect".to_string(),
            });
        }
        if !response.status().is_success() {
            return Err(FedgateError::Upstream {
                message: format!("token endpoint returned HTTP {}", response.status()),
            });
        }

        let token_response: OidcTokenResponse =
            response.json().await.map_err(|e| FedgateError::Upstream {
                message: format!("Failed to parse token response: {e}"),
            })?;

        let id_token = token_response.id_token.ok_or_else(|| FedgateError::Auth {
            message: "token response contained no id_token".to_string(),
        })?;

        self.identity_from_id_token(&id_token).await
    }

    async fn identity_from_id_token(&self, id_token: &str) -> Result<FederatedIdentity> {
        let kid = extract_jwt_kid(id_token)?;
        let jwks = self
            .jwks_cache
            .get_or_fetch(&self.jwks_uri, &self.http_client)
            .await?;
        let decoding_key = jwks.get_decoding_key(&kid)?;

        let header = jsonwebtoken::decode_header(id_token).map_err(|e| FedgateError::Auth {
            message: format!("Failed to decode JWT header: {e}"),
        })?;
        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.client_id]);

        let claims = validate_id_token(id_token, &decoding_key, &validation)?;

        let username = claims
            .string_claim(&self.username_claim)
            .ok_or_else(|| FedgateError::Auth {
                message: format!("id_token is missing the '{}' claim", self.username_claim),
            })?;
        let groups = claims.string_list_claim(&self.groups_claim);

        Ok(FederatedIdentity::new(username, groups))
    }

    /// Revokes a token at the upstream. A no-op returning Ok when the
    /// upstream publishes no revocation endpoint.
    #[instrument(skip(self, token), fields(provider = %self.name))]
    pub async fn revoke_token(&self, token: &str) -> Result<()> {
        let Some(revocation_url) = &self.revocation_url else {
            debug!("no revocation endpoint; skipping");
            return Ok(());
        };

        let params = [
            ("token", token),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        self.http_client
            .execute_with_retry(self.http_client.inner().post(revocation_url).form(&params))
            .await?;

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct OidcTokenResponse {
    #[allow(dead_code)]
    access_token: String,
    id_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn upstream(additional: BTreeMap<String, String>) -> OidcUpstream {
        OidcUpstream::new(
            OidcUpstreamParams {
                name: "corp-oidc".to_string(),
                resource_uid: ResourceUid::new(),
                client_id: "fedgate".to_string(),
                client_secret: "s3cret".to_string(),
                issuer: "https://login.example.com".to_string(),
                authorization_url: "https://login.example.com/authorize".to_string(),
                token_url: "https://login.example.com/token".to_string(),
                revocation_url: None,
                jwks_uri: "https://login.example.com/jwks".to_string(),
                scopes: vec!["openid".to_string(), "groups".to_string()],
                username_claim: "sub".to_string(),
                groups_claim: "groups".to_string(),
                allow_password_grant: false,
                additional_authorize_params: additional,
            },
            HttpClient::new(Duration::from_secs(5), 0, 10, None).unwrap(),
        )
    }

    #[test]
    fn test_authorize_redirect_url_contains_pkce_and_nonce() {
        let url = upstream(BTreeMap::new()).authorize_redirect_url(
            "https://fedgate.example.com/callback",
            "opaque-state",
            "nonce-value",
            "challenge-value",
            None,
        );
        assert!(url.starts_with("https://login.example.com/authorize?"));
        assert!(url.contains("code_challenge=challenge-value"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("nonce=nonce-value"));
        assert!(url.contains("scope=openid%20groups"));
    }

    #[test]
    fn test_authorize_redirect_url_appends_additional_params() {
        let mut additional = BTreeMap::new();
        additional.insert("audience".to_string(), "k8s api".to_string());
        let url = upstream(additional).authorize_redirect_url(
            "https://fedgate.example.com/callback",
            "s",
            "n",
            "c",
            Some("alice@example.com"),
        );
        assert!(url.contains("audience=k8s%20api"));
        assert!(url.contains("login_hint=alice%40example.com"));
    }

    #[tokio::test]
    async fn test_revoke_token_without_endpoint_is_a_no_op() {
        // The test client points at an unroutable issuer; Ok proves no
        // network call was attempted.
        let result = upstream(BTreeMap::new()).revoke_token("some-token").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_password_grant_rejected_when_disallowed() {
        let err = upstream(BTreeMap::new())
            .password_credentials_grant("alice", "pw")
            .await
            .unwrap_err();
        assert!(matches!(err, FedgateError::AuthRejected { .. }));
    }
}
