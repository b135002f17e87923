//! GitHub provider validation

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use fedgate_core::conditions::{
    Condition, TYPE_CONNECTION_VALID, TYPE_ENDPOINT_URL_VALID, TYPE_TLS_CONFIGURATION_VALID,
};
use fedgate_core::{ConditionStatus, GithubProviderResource, REASON_INVALID, REASON_UNREACHABLE};
use fedgate_identity::providers::common::{parse_ca_bundle, HttpClient};
use fedgate_identity::providers::github::GithubUpstream;
use fedgate_identity::UpstreamRegistry;

use crate::validate::{ProviderValidator, ValidationOutcome};

pub struct GithubProviderValidator {
    registry: Arc<UpstreamRegistry>,
    dial_timeout: Duration,
    max_retries: u32,
    retry_delay_ms: u64,
}

impl GithubProviderValidator {
    pub fn new(
        registry: Arc<UpstreamRegistry>,
        dial_timeout: Duration,
        max_retries: u32,
        retry_delay_ms: u64,
    ) -> Self {
        Self {
            registry,
            dial_timeout,
            max_retries,
            retry_delay_ms,
        }
    }
}

fn validate_host(host: &str) -> Result<(), String> {
    if host.is_empty() {
        return Err("host must not be empty".to_string());
    }
    if host.contains('/') || host.contains("://") {
        return Err(format!("host {host:?} must be a bare hostname, not a URL"));
    }
    Ok(())
}

#[async_trait]
impl ProviderValidator for GithubProviderValidator {
    type Resource = GithubProviderResource;
    type Provider = GithubUpstream;

    async fn validate(&self, resource: &GithubProviderResource) -> ValidationOutcome<GithubUpstream> {
        let spec = &resource.spec;
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

        if let Err(message) = validate_host(&spec.host) {
            conditions.push(Condition::new(
                TYPE_ENDPOINT_URL_VALID,
                ConditionStatus::False,
                REASON_INVALID,
                message,
            ));
            conditions.push(Condition::unable_to_validate(TYPE_CONNECTION_VALID));
            return ValidationOutcome::config_failure(conditions);
        }
        conditions.push(Condition::ok(TYPE_ENDPOINT_URL_VALID, "host is valid"));

        let http_client = match HttpClient::new(
            self.dial_timeout,
            self.max_retries,
            self.retry_delay_ms,
            spec.tls_ca_bundle.as_deref(),
        ) {
            Ok(client) => client,
            Err(err) => {
                conditions.push(Condition::new(
                    TYPE_CONNECTION_VALID,
                    ConditionStatus::False,
                    REASON_INVALID,
                    err.to_string(),
                ));
                return ValidationOutcome::config_failure(conditions);
            }
        };

        let provider = Arc::new(GithubUpstream::new(
            resource.name.clone(),
            resource.uid,
            spec.client_id.clone(),
            spec.host.clone(),
            spec.scopes.clone(),
            spec.username_attribute,
            spec.groups_attribute,
            spec.allowed_organizations.clone(),
            http_client,
        ));

        if let Err(err) = provider.test_connection().await {
            conditions.push(Condition::new(
                TYPE_CONNECTION_VALID,
                ConditionStatus::False,
                REASON_UNREACHABLE,
                format!("cannot reach {}: {err}", spec.host),
            ));
            return ValidationOutcome::environmental_failure(conditions, err);
        }
        conditions.push(Condition::ok(TYPE_CONNECTION_VALID, "connected successfully"));

        ValidationOutcome::success(conditions, provider)
    }

    async fn publish(&self, provider: Arc<GithubUpstream>) {
        self.registry.upsert_github_provider(provider).await;
    }
}
