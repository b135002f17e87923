//! Common utilities and types for provider implementations

use base64::Engine;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use reqwest::{Certificate, Client};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use fedgate_core::{FedgateError, Result};

/// Parses a base64-encoded PEM bundle into certificates usable as extra
/// trust roots. Invalid base64 or PEM is a configuration error.
pub fn parse_ca_bundle(bundle_b64: &str) -> Result<Vec<Certificate>> {
    let pem = base64::engine::general_purpose::STANDARD
        .decode(bundle_b64.trim())
        .map_err(|e| FedgateError::invalid_config(format!("CA bundle is not valid base64: {e}")))?;

    if !pem.windows(27).any(|w| w == b"-----BEGIN CERTIFICATE-----") {
        return Err(FedgateError::invalid_config(
            "CA bundle contains no PEM certificate blocks",
        ));
    }

    Certificate::from_pem_bundle(&pem)
        .map_err(|e| FedgateError::invalid_config(format!("CA bundle is not valid PEM: {e}")))
}

/// HTTP client wrapper with retry logic and optional extra trust roots
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    max_retries: u32,
    retry_delay_ms: u64,
}

impl HttpClient {
    pub fn new(
        timeout: Duration,
        max_retries: u32,
        retry_delay_ms: u64,
        ca_bundle_b64: Option<&str>,
    ) -> Result<Self> {
        let mut builder = Client::builder().timeout(timeout);

        if let Some(bundle) = ca_bundle_b64 {
            for cert in parse_ca_bundle(bundle)? {
                builder = builder.add_root_certificate(cert);
            }
        }

        let client = builder.build().map_err(|e| FedgateError::Internal {
            message: format!("Failed to create HTTP client: {e}"),
        })?;

        Ok(Self {
            client,
            max_retries,
            retry_delay_ms,
        })
    }

    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Execute a request with retries. 4xx responses other than 429 are
    /// returned immediately; everything else backs off exponentially.
    pub async fn execute_with_retry(
        &self,
        request_builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.retry_delay_ms * 2u64.pow(attempt - 1);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            match request_builder.try_clone() {
                Some(rb) => match rb.send().await {
                    Ok(response) => {
                        if response.status().is_success() || response.status().is_redirection() {
                            return Ok(response);
                        }

                        if response.status().is_client_error()
                            && response.status().as_u16() != 429
                        {
                            let status = response.status();
                            let body = response.text().await.unwrap_or_default();
                            return Err(FedgateError::Upstream {
                                message: format!("HTTP {status} - {body}"),
                            });
                        }

                        last_error = Some(format!("HTTP {}", response.status()));
                    }
                    Err(e) => {
                        last_error = Some(e.to_string());
                    }
                },
                None => {
                    return Err(FedgateError::Internal {
                        message: "Request cannot be cloned for retry".to_string(),
                    });
                }
            }
        }

        Err(FedgateError::Upstream {
            message: format!(
                "Request failed after {} retries: {}",
                self.max_retries,
                last_error.unwrap_or_default()
            ),
        })
    }
}

/// Cache for JWKS keys
pub struct JwksCache {
    keys: RwLock<HashMap<String, CachedJwks>>,
    ttl_secs: u64,
}

struct CachedJwks {
    keys: JwkSet,
    fetched_at: DateTime<Utc>,
}

impl JwksCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            ttl_secs,
        }
    }

    pub async fn get_or_fetch(&self, jwks_uri: &str, client: &HttpClient) -> Result<JwkSet> {
        {
            let cache = self.keys.read().await;
            if let Some(cached) = cache.get(jwks_uri) {
                let age = (Utc::now() - cached.fetched_at).num_seconds() as u64;
                if age < self.ttl_secs {
                    return Ok(cached.keys.clone());
                }
            }
        }

        debug!("Fetching JWKS from {}", jwks_uri);
        let response = client
            .execute_with_retry(client.inner().get(jwks_uri))
            .await?;

        let jwks: JwkSet = response.json().await.map_err(|e| FedgateError::Upstream {
            message: format!("Failed to parse JWKS: {e}"),
        })?;

        {
            let mut cache = self.keys.write().await;
            cache.insert(
                jwks_uri.to_string(),
                CachedJwks {
                    keys: jwks.clone(),
                    fetched_at: Utc::now(),
                },
            );
        }

        Ok(jwks)
    }
}

/// JSON Web Key Set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

/// JSON Web Key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
}

impl JwkSet {
    pub fn find_key(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }

    /// Get a decoding key for the given kid
    pub fn get_decoding_key(&self, kid: &str) -> Result<DecodingKey> {
        let jwk = self.find_key(kid).ok_or_else(|| FedgateError::Auth {
            message: format!("Key with kid '{kid}' not found in JWKS"),
        })?;

        match jwk.kty.as_str() {
            "RSA" => {
                let n = jwk.n.as_ref().ok_or_else(|| FedgateError::Auth {
                    message: "RSA key missing 'n' parameter".to_string(),
                })?;
                let e = jwk.e.as_ref().ok_or_else(|| FedgateError::Auth {
                    message: "RSA key missing 'e' parameter".to_string(),
                })?;
                DecodingKey::from_rsa_components(n, e).map_err(|e| FedgateError::Auth {
                    message: format!("Invalid RSA key: {e}"),
                })
            }
            "EC" => {
                let x = jwk.x.as_ref().ok_or_else(|| FedgateError::Auth {
                    message: "EC key missing 'x' parameter".to_string(),
                })?;
                let y = jwk.y.as_ref().ok_or_else(|| FedgateError::Auth {
                    message: "EC key missing 'y' parameter".to_string(),
                })?;
                DecodingKey::from_ec_components(x, y).map_err(|e| FedgateError::Auth {
                    message: format!("Invalid EC key: {e}"),
                })
            }
            other => Err(FedgateError::Auth {
                message: format!("Unsupported key type: {other}"),
            }),
        }
    }
}

/// OIDC Discovery document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcDiscovery {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revocation_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,
    pub jwks_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_types_supported: Option<Vec<String>>,
}

impl OidcDiscovery {
    /// Fetch discovery document from well-known endpoint
    pub async fn fetch(issuer: &str, client: &HttpClient) -> Result<Self> {
        let url = format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        );

        debug!("Fetching OIDC discovery from {}", url);

        let response = client
            .execute_with_retry(client.inner().get(&url))
            .await?;

        response.json().await.map_err(|e| FedgateError::Upstream {
            message: format!("Failed to parse OIDC discovery: {e}"),
        })
    }
}

/// Decoded ID-token claims, accessed by configurable claim names
#[derive(Debug, Clone)]
pub struct IdTokenClaims(serde_json::Value);

impl IdTokenClaims {
    pub fn string_claim(&self, name: &str) -> Option<String> {
        match self.0.get(name)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn string_list_claim(&self, name: &str) -> Vec<String> {
        match self.0.get(name) {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            Some(serde_json::Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }
}

/// Validate a JWT and return its claims for by-name access
pub fn validate_id_token(
    token: &str,
    decoding_key: &DecodingKey,
    validation: &Validation,
) -> Result<IdTokenClaims> {
    let token_data =
        decode::<serde_json::Value>(token, decoding_key, validation).map_err(|e| {
            FedgateError::Auth {
                message: format!("Token validation failed: {e}"),
            }
        })?;
    Ok(IdTokenClaims(token_data.claims))
}

/// Extract kid from JWT header
pub fn extract_jwt_kid(token: &str) -> Result<String> {
    let header = decode_header(token).map_err(|e| FedgateError::Auth {
        message: format!("Failed to decode JWT header: {e}"),
    })?;

    header.kid.ok_or_else(|| FedgateError::Auth {
        message: "JWT header missing 'kid' claim".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ca_bundle_rejects_invalid_base64() {
        let err = parse_ca_bundle("this is definitely not base64!!!").unwrap_err();
        assert!(matches!(err, FedgateError::InvalidConfig { .. }));
    }

    #[test]
    fn test_parse_ca_bundle_rejects_non_pem_payload() {
        let b64 = base64::engine::general_purpose::STANDARD.encode(b"not a pem file");
        let err = parse_ca_bundle(&b64).unwrap_err();
        assert!(matches!(err, FedgateError::InvalidConfig { .. }));
    }

    #[test]
    fn test_discovery_without_revocation_endpoint() {
        let json = serde_json::json!({
            "issuer": "https://login.example.com",
            "authorization_endpoint": "https://login.example.com/authorize",
            "token_endpoint": "https://login.example.com/token",
            "jwks_uri": "https://login.example.com/jwks"
        });
        let discovery: OidcDiscovery = serde_json::from_value(json).unwrap();
        assert!(discovery.revocation_endpoint.is_none());
    }

    #[test]
    fn test_id_token_claims_by_name() {
        let claims = IdTokenClaims(serde_json::json!({
            "sub": "12345",
            "preferred_username": "alice",
            "groups": ["admins", "developers"],
            "uid": 42
        }));
        assert_eq!(claims.string_claim("preferred_username").as_deref(), Some("alice"));
        assert_eq!(claims.string_claim("uid").as_deref(), Some("42"));
        assert_eq!(claims.string_list_claim("groups"), vec!["admins", "developers"]);
        assert!(claims.string_list_claim("missing").is_empty());
    }
}
