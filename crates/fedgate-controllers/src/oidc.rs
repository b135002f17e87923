//! OIDC provider validation
//!
//! Ordered chain: TLS bundle, issuer URL, additional authorize parameters,
//! discovery, construction. A step whose prerequisite failed reports
//! `Unknown`/`UnableToValidate` instead of attempting and misreporting.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use fedgate_core::conditions::{
    Condition, TYPE_ADDITIONAL_AUTHORIZE_PARAMS_VALID, TYPE_DISCOVERY_SUCCEEDED,
    TYPE_ENDPOINT_URL_VALID, TYPE_TLS_CONFIGURATION_VALID,
};
use fedgate_core::{ConditionStatus, FedgateError, OidcProviderResource, REASON_INVALID, REASON_UNREACHABLE};
use fedgate_identity::providers::common::{parse_ca_bundle, HttpClient, OidcDiscovery};
use fedgate_identity::providers::oidc::{OidcUpstream, OidcUpstreamParams};
use fedgate_identity::UpstreamRegistry;

use crate::validate::{ProviderValidator, ValidationOutcome};

/// Parameter names a spec may not override on the upstream authorize
/// redirect. Preserved verbatim.
const DISALLOWED_ADDITIONAL_AUTHORIZE_PARAMS: &[&str] = &[
    "response_type",
    "scope",
    "client_id",
    "state",
    "nonce",
    "code_challenge",
    "code_challenge_method",
    "redirect_uri",
    "hd",
];

pub struct OidcProviderValidator {
    registry: Arc<UpstreamRegistry>,
    discovery_timeout: Duration,
    max_retries: u32,
    retry_delay_ms: u64,
}

impl OidcProviderValidator {
    pub fn new(
        registry: Arc<UpstreamRegistry>,
        discovery_timeout: Duration,
        max_retries: u32,
        retry_delay_ms: u64,
    ) -> Self {
        Self {
            registry,
            discovery_timeout,
            max_retries,
            retry_delay_ms,
        }
    }
}

/// Checks a URL is well-formed and uses an allowed scheme. `http` is only
/// allowed for loopback hosts.
pub(crate) fn validate_https_url(url: &str) -> Result<reqwest::Url, String> {
    let parsed =
        reqwest::Url::parse(url).map_err(|e| format!("malformed URL {url:?}: {e}"))?;
    match parsed.scheme() {
        "https" => Ok(parsed),
        "http" => {
            let host = parsed.host_str().unwrap_or_default();
            if host == "localhost" || host == "127.0.0.1" || host == "[::1]" {
                Ok(parsed)
            } else {
                Err(format!("URL {url:?} must use the https scheme"))
            }
        }
        other => Err(format!("URL {url:?} has disallowed scheme {other:?}")),
    }
}

#[async_trait]
impl ProviderValidator for OidcProviderValidator {
    type Resource = OidcProviderResource;
    type Provider = OidcUpstream;

    async fn validate(&self, resource: &OidcProviderResource) -> ValidationOutcome<OidcUpstream> {
        let spec = &resource.spec;
        let mut conditions = Vec::new();

        // TLS bundle
        if let Some(bundle) = &spec.tls_ca_bundle {
            if let Err(err) = parse_ca_bundle(bundle) {
                conditions.push(Condition::new(
                    TYPE_TLS_CONFIGURATION_VALID,
                    ConditionStatus::False,
                    REASON_INVALID,
                    err.to_string(),
                ));
                conditions.push(Condition::unable_to_validate(TYPE_ENDPOINT_URL_VALID));
                conditions.push(additional_params_condition(spec));
                conditions.push(Condition::unable_to_validate(TYPE_DISCOVERY_SUCCEEDED));
                return ValidationOutcome::config_failure(conditions);
            }
        }
        conditions.push(Condition::ok(
            TYPE_TLS_CONFIGURATION_VALID,
            "TLS configuration is valid",
        ));

        // Issuer and any endpoint overrides
        let url_errors: Vec<String> = std::iter::once(spec.issuer.as_str())
            .chain(spec.authorization_endpoint.as_deref())
            .chain(spec.token_endpoint.as_deref())
            .chain(spec.revocation_endpoint.as_deref())
            .filter_map(|url| validate_https_url(url).err())
            .collect();
        if !url_errors.is_empty() {
            conditions.push(Condition::new(
                TYPE_ENDPOINT_URL_VALID,
                ConditionStatus::False,
                REASON_INVALID,
                url_errors.join("; "),
            ));
            conditions.push(additional_params_condition(spec));
            conditions.push(Condition::unable_to_validate(TYPE_DISCOVERY_SUCCEEDED));
            return ValidationOutcome::config_failure(conditions);
        }
        conditions.push(Condition::ok(TYPE_ENDPOINT_URL_VALID, "endpoint URLs are valid"));

        // Additional authorize parameter deny list
        let params_condition = additional_params_condition(spec);
        let params_ok = params_condition.status == ConditionStatus::True;
        conditions.push(params_condition);
        if !params_ok {
            conditions.push(Condition::unable_to_validate(TYPE_DISCOVERY_SUCCEEDED));
            return ValidationOutcome::config_failure(conditions);
        }

        // Live discovery
        let http_client = match HttpClient::new(
            self.discovery_timeout,
            self.max_retries,
            self.retry_delay_ms,
            spec.tls_ca_bundle.as_deref(),
        ) {
            Ok(client) => client,
            Err(err) => {
                conditions.push(Condition::new(
                    TYPE_DISCOVERY_SUCCEEDED,
                    ConditionStatus::False,
                    REASON_INVALID,
                    err.to_string(),
                ));
                return ValidationOutcome::config_failure(conditions);
            }
        };

        let discovery = match OidcDiscovery::fetch(&spec.issuer, &http_client).await {
            Ok(discovery) => discovery,
            Err(err) => {
                conditions.push(Condition::new(
                    TYPE_DISCOVERY_SUCCEEDED,
                    ConditionStatus::False,
                    REASON_UNREACHABLE,
                    format!("discovery against {} failed: {err}", spec.issuer),
                ));
                return ValidationOutcome::environmental_failure(conditions, err);
            }
        };
        conditions.push(Condition::ok(TYPE_DISCOVERY_SUCCEEDED, "discovery succeeded"));

        // Construction; explicit overrides win over discovered values
        debug!(name = %resource.name, "constructing OIDC upstream");
        let provider = OidcUpstream::new(
            OidcUpstreamParams {
                name: resource.name.clone(),
                resource_uid: resource.uid,
                client_id: spec.client_id.clone(),
                client_secret: spec.client_secret.clone(),
                issuer: discovery.issuer.clone(),
                authorization_url: spec
                    .authorization_endpoint
                    .clone()
                    .unwrap_or(discovery.authorization_endpoint),
                token_url: spec.token_endpoint.clone().unwrap_or(discovery.token_endpoint),
                revocation_url: spec
                    .revocation_endpoint
                    .clone()
                    .or(discovery.revocation_endpoint),
                jwks_uri: discovery.jwks_uri,
                scopes: spec.scopes.clone(),
                username_claim: spec.username_claim.clone(),
                groups_claim: spec.groups_claim.clone(),
                allow_password_grant: spec.allow_password_grant,
                additional_authorize_params: spec.additional_authorize_params.clone(),
            },
            http_client,
        );

        ValidationOutcome::success(conditions, Arc::new(provider))
    }

    async fn publish(&self, provider: Arc<OidcUpstream>) {
        self.registry.upsert_oidc_provider(provider).await;
    }
}

fn additional_params_condition(spec: &fedgate_core::OidcProviderSpec) -> Condition {
    let disallowed: Vec<&str> = spec
        .additional_authorize_params
        .keys()
        .map(String::as_str)
        .filter(|name| DISALLOWED_ADDITIONAL_AUTHORIZE_PARAMS.contains(name))
        .collect();

    if disallowed.is_empty() {
        Condition::ok(
            TYPE_ADDITIONAL_AUTHORIZE_PARAMS_VALID,
            "additional authorize parameters are allowed",
        )
    } else {
        Condition::new(
            TYPE_ADDITIONAL_AUTHORIZE_PARAMS_VALID,
            ConditionStatus::False,
            REASON_INVALID,
            format!(
                "the following parameters may not be overridden: {}",
                disallowed.join(", ")
            ),
        )
    }
}
