//! LDAP and Active Directory provider validation
//!
//! Both kinds share the same spec shape and validation chain (TLS bundle,
//! server URL, live bind) but publish into their own registry partition.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use fedgate_core::conditions::{
    Condition, TYPE_CONNECTION_VALID, TYPE_ENDPOINT_URL_VALID, TYPE_TLS_CONFIGURATION_VALID,
};
use fedgate_core::{
    ActiveDirectoryProviderResource, ConditionStatus, LdapProviderResource, LdapProviderSpec,
    ProviderKind, ProviderResource, REASON_INVALID, REASON_UNREACHABLE,
};
use fedgate_identity::providers::common::parse_ca_bundle;
use fedgate_identity::providers::ldap::LdapUpstream;
use fedgate_identity::UpstreamRegistry;

use crate::validate::{ProviderValidator, ValidationOutcome};

/// Implemented by the two resource kinds sharing the LDAP spec shape.
pub trait LdapLikeResource: ProviderResource {
    fn ldap_spec(&self) -> &LdapProviderSpec;
}

impl LdapLikeResource for LdapProviderResource {
    fn ldap_spec(&self) -> &LdapProviderSpec {
        &self.spec
    }
}

impl LdapLikeResource for ActiveDirectoryProviderResource {
    fn ldap_spec(&self) -> &LdapProviderSpec {
        &self.spec
    }
}

pub struct LdapProviderValidator<R> {
    registry: Arc<UpstreamRegistry>,
    dial_timeout: Duration,
    _resource: std::marker::PhantomData<R>,
}

impl<R> LdapProviderValidator<R> {
    pub fn new(registry: Arc<UpstreamRegistry>, dial_timeout: Duration) -> Self {
        Self {
            registry,
            dial_timeout,
            _resource: std::marker::PhantomData,
        }
    }
}

fn validate_ldap_url(url: &str) -> Result<(), String> {
    let parsed = reqwest::Url::parse(url).map_err(|e| format!("malformed URL {url:?}: {e}"))?;
    match parsed.scheme() {
        "ldap" | "ldaps" => Ok(()),
        other => Err(format!("URL {url:?} has disallowed scheme {other:?}")),
    }
}

#[async_trait]
impl<R> ProviderValidator for LdapProviderValidator<R>
where
    R: LdapLikeResource,
{
    type Resource = R;
    type Provider = LdapUpstream;

    async fn validate(&self, resource: &R) -> ValidationOutcome<LdapUpstream> {
        let spec = resource.ldap_spec();
        let mut conditions = Vec::new();

        if let Some(bundle) = &spec.tls_ca_bundle {
            if let Err(err) = parse_ca_bundle(bundle) {
                conditions.push(Condition::new(
                    TYPE_TLS_CONFIGURATION_VALID,
                    ConditionStatus::False,
                    REASON_INVALID,
                    err.to_string(),
                ));
                conditions.push(Condition::unable_to_validate(TYPE_ENDPOINT_URL_VALID));
                conditions.push(Condition::unable_to_validate(TYPE_CONNECTION_VALID));
                return ValidationOutcome::config_failure(conditions);
            }
        }
        conditions.push(Condition::ok(
            TYPE_TLS_CONFIGURATION_VALID,
            "TLS configuration is valid",
        ));

        if let Err(message) = validate_ldap_url(&spec.url) {
            conditions.push(Condition::new(
                TYPE_ENDPOINT_URL_VALID,
                ConditionStatus::False,
                REASON_INVALID,
                message,
            ));
            conditions.push(Condition::unable_to_validate(TYPE_CONNECTION_VALID));
            return ValidationOutcome::config_failure(conditions);
        }
        conditions.push(Condition::ok(TYPE_ENDPOINT_URL_VALID, "endpoint URL is valid"));

        let provider = Arc::new(LdapUpstream::new(
            resource.name().to_string(),
            resource.uid(),
            spec.url.clone(),
            spec.bind_dn.clone(),
            spec.bind_password.clone(),
            spec.user_search.clone(),
            spec.group_search.clone(),
            self.dial_timeout,
        ));

        if let Err(err) = provider.test_connection().await {
            conditions.push(Condition::new(
                TYPE_CONNECTION_VALID,
                ConditionStatus::False,
                REASON_UNREACHABLE,
                format!("cannot connect to {}: {err}", spec.url),
            ));
            return ValidationOutcome::environmental_failure(conditions, err);
        }
        conditions.push(Condition::ok(TYPE_CONNECTION_VALID, "connected successfully"));

        ValidationOutcome::success(conditions, provider)
    }

    async fn publish(&self, provider: Arc<LdapUpstream>) {
        match R::KIND {
            ProviderKind::ActiveDirectory => {
                self.registry.upsert_active_directory_provider(provider).await
            }
            _ => self.registry.upsert_ldap_provider(provider).await,
        }
    }
}
