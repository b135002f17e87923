//! Controller tests with in-memory resource clients

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fedgate_core::conditions::{
    TYPE_ADDITIONAL_AUTHORIZE_PARAMS_VALID, TYPE_DISCOVERY_SUCCEEDED, TYPE_READY,
    TYPE_TLS_CONFIGURATION_VALID,
};
use fedgate_core::{
    ConditionStatus, FedgateError, LdapProviderResource, LdapProviderSpec, LdapUserSearch,
    OidcProviderResource, OidcProviderSpec, Phase, ProviderResource, ProviderStatus,
    ResourceClient, ResourceUid, Result,
};
use fedgate_identity::UpstreamRegistry;

use crate::cleanup::CleanupController;
use crate::oidc::OidcProviderValidator;
use crate::validate::ProviderValidationController;

// ============================================================================
// In-memory resource client
// ============================================================================

struct FakeClient<R> {
    resources: tokio::sync::Mutex<HashMap<String, R>>,
    update_attempts: AtomicUsize,
    conflicts_to_inject: AtomicUsize,
}

impl<R: ProviderResource> FakeClient<R> {
    fn new() -> Self {
        Self {
            resources: tokio::sync::Mutex::new(HashMap::new()),
            update_attempts: AtomicUsize::new(0),
            conflicts_to_inject: AtomicUsize::new(0),
        }
    }

    async fn insert(&self, resource: R) {
        self.resources
            .lock()
            .await
            .insert(resource.name().to_string(), resource);
    }

    fn update_attempts(&self) -> usize {
        self.update_attempts.load(Ordering::SeqCst)
    }

    fn inject_conflicts(&self, count: usize) {
        self.conflicts_to_inject.store(count, Ordering::SeqCst);
    }

    async fn stored(&self, name: &str) -> Option<R> {
        self.resources.lock().await.get(name).cloned()
    }
}

#[async_trait]
impl<R: ProviderResource> ResourceClient<R> for FakeClient<R> {
    async fn get(&self, name: &str) -> Result<Option<R>> {
        Ok(self.resources.lock().await.get(name).cloned())
    }

    async fn list(&self) -> Result<Vec<R>> {
        Ok(self.resources.lock().await.values().cloned().collect())
    }

    async fn update_status(&self, resource: &R) -> Result<()> {
        self.update_attempts.fetch_add(1, Ordering::SeqCst);

        let remaining = self.conflicts_to_inject.load(Ordering::SeqCst);
        if remaining > 0 {
            self.conflicts_to_inject.store(remaining - 1, Ordering::SeqCst);
            return Err(FedgateError::conflict("the object has been modified"));
        }

        let mut resources = self.resources.lock().await;
        let stored = resources
            .get_mut(resource.name())
            .ok_or_else(|| FedgateError::not_found("resource", resource.name()))?;
        *stored.status_mut() = resource.status().clone();
        Ok(())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn oidc_resource(name: &str, issuer: &str) -> OidcProviderResource {
    OidcProviderResource {
        name: name.to_string(),
        uid: ResourceUid::new(),
        generation: 1,
        spec: OidcProviderSpec {
            issuer: issuer.to_string(),
            client_id: "fedgate".to_string(),
            client_secret: "s3cret".to_string(),
            tls_ca_bundle: None,
            scopes: vec!["openid".to_string()],
            username_claim: "sub".to_string(),
            groups_claim: "groups".to_string(),
            allow_password_grant: false,
            additional_authorize_params: BTreeMap::new(),
            authorization_endpoint: None,
            token_endpoint: None,
            revocation_endpoint: None,
        },
        status: ProviderStatus::default(),
    }
}

fn oidc_controller(
    registry: Arc<UpstreamRegistry>,
    client: Arc<FakeClient<OidcProviderResource>>,
) -> ProviderValidationController<OidcProviderValidator, FakeClient<OidcProviderResource>> {
    ProviderValidationController::new(
        client,
        OidcProviderValidator::new(registry, Duration::from_secs(2), 0, 10),
    )
}

async fn mock_discovery_server() -> MockServer {
    let server = MockServer::start().await;
    let body = serde_json::json!({
        "issuer": server.uri(),
        "authorization_endpoint": format!("{}/authorize", server.uri()),
        "token_endpoint": format!("{}/token", server.uri()),
        "jwks_uri": format!("{}/jwks", server.uri()),
    });
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;
    server
}

fn condition_status(resource: &OidcProviderResource, type_: &str) -> ConditionStatus {
    resource
        .status
        .conditions
        .iter()
        .find(|c| c.type_ == type_)
        .map(|c| c.status)
        .unwrap_or_else(|| panic!("missing condition {type_}"))
}

// ============================================================================
// Validation controller tests
// ============================================================================

#[tokio::test]
async fn test_missing_resource_is_a_terminal_noop() {
    let client = Arc::new(FakeClient::new());
    let controller = oidc_controller(Arc::new(UpstreamRegistry::new()), client.clone());

    controller.reconcile("does-not-exist").await.unwrap();
    assert_eq!(client.update_attempts(), 0);
}

#[tokio::test]
async fn test_invalid_ca_bundle_is_a_terminal_config_error() {
    let registry = Arc::new(UpstreamRegistry::new());
    let client = Arc::new(FakeClient::new());

    let mut resource = oidc_resource("corp-oidc", "https://login.example.com");
    resource.spec.tls_ca_bundle = Some("!!! not base64 !!!".to_string());
    client.insert(resource).await;

    let controller = oidc_controller(registry.clone(), client.clone());
    controller.reconcile("corp-oidc").await.unwrap();

    let stored = client.stored("corp-oidc").await.unwrap();
    assert_eq!(
        condition_status(&stored, TYPE_TLS_CONFIGURATION_VALID),
        ConditionStatus::False
    );
    assert_eq!(condition_status(&stored, TYPE_READY), ConditionStatus::False);
    assert_eq!(stored.status.phase, Phase::Error);
    assert_eq!(client.update_attempts(), 1);
    assert!(registry.get_oidc_providers().await.is_empty());
}

#[tokio::test]
async fn test_disallowed_additional_param_is_a_config_error() {
    let registry = Arc::new(UpstreamRegistry::new());
    let client = Arc::new(FakeClient::new());

    let mut resource = oidc_resource("corp-oidc", "https://login.example.com");
    resource
        .spec
        .additional_authorize_params
        .insert("scope".to_string(), "everything".to_string());
    client.insert(resource).await;

    let controller = oidc_controller(registry.clone(), client.clone());
    controller.reconcile("corp-oidc").await.unwrap();

    let stored = client.stored("corp-oidc").await.unwrap();
    assert_eq!(
        condition_status(&stored, TYPE_ADDITIONAL_AUTHORIZE_PARAMS_VALID),
        ConditionStatus::False
    );
    assert_eq!(stored.status.phase, Phase::Error);
    assert!(registry.get_oidc_providers().await.is_empty());
}

#[tokio::test]
async fn test_discovery_failure_is_retryable_and_publishes_nothing() {
    let registry = Arc::new(UpstreamRegistry::new());
    let client = Arc::new(FakeClient::new());

    // Nothing listens on port 1; dial fails fast.
    client
        .insert(oidc_resource("corp-oidc", "http://127.0.0.1:1"))
        .await;

    let controller = oidc_controller(registry.clone(), client.clone());
    let err = controller.reconcile("corp-oidc").await.unwrap_err();
    assert!(err.is_retryable());

    let stored = client.stored("corp-oidc").await.unwrap();
    assert_eq!(
        condition_status(&stored, TYPE_DISCOVERY_SUCCEEDED),
        ConditionStatus::False
    );
    assert_eq!(stored.status.phase, Phase::Error);
    assert!(registry.get_oidc_providers().await.is_empty());
}

#[tokio::test]
async fn test_successful_validation_publishes_provider() {
    let server = mock_discovery_server().await;
    let registry = Arc::new(UpstreamRegistry::new());
    let client = Arc::new(FakeClient::new());
    client.insert(oidc_resource("corp-oidc", &server.uri())).await;

    let controller = oidc_controller(registry.clone(), client.clone());
    controller.reconcile("corp-oidc").await.unwrap();

    let stored = client.stored("corp-oidc").await.unwrap();
    assert_eq!(stored.status.phase, Phase::Ready);
    assert_eq!(condition_status(&stored, TYPE_READY), ConditionStatus::True);

    let providers = registry.get_oidc_providers().await;
    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0].name(), "corp-oidc");
    // Discovery published no revocation endpoint.
    assert!(providers[0].revocation_url().is_none());
}

#[tokio::test]
async fn test_reconcile_twice_issues_no_second_update() {
    let server = mock_discovery_server().await;
    let client = Arc::new(FakeClient::new());
    client.insert(oidc_resource("corp-oidc", &server.uri())).await;

    let controller = oidc_controller(Arc::new(UpstreamRegistry::new()), client.clone());
    controller.reconcile("corp-oidc").await.unwrap();
    let first = client.stored("corp-oidc").await.unwrap();
    assert_eq!(client.update_attempts(), 1);

    controller.reconcile("corp-oidc").await.unwrap();
    let second = client.stored("corp-oidc").await.unwrap();

    assert_eq!(client.update_attempts(), 1);
    assert_eq!(first.status, second.status);
}

#[tokio::test]
async fn test_status_conflict_is_retried_exactly_once() {
    let server = mock_discovery_server().await;
    let client = Arc::new(FakeClient::new());
    client.insert(oidc_resource("corp-oidc", &server.uri())).await;
    client.inject_conflicts(1);

    let controller = oidc_controller(Arc::new(UpstreamRegistry::new()), client.clone());
    controller.reconcile("corp-oidc").await.unwrap();

    assert_eq!(client.update_attempts(), 2);
    let stored = client.stored("corp-oidc").await.unwrap();
    assert_eq!(stored.status.phase, Phase::Ready);
}

#[tokio::test]
async fn test_second_conflict_gives_up_for_this_pass() {
    let server = mock_discovery_server().await;
    let client = Arc::new(FakeClient::new());
    client.insert(oidc_resource("corp-oidc", &server.uri())).await;
    client.inject_conflicts(2);

    let controller = oidc_controller(Arc::new(UpstreamRegistry::new()), client.clone());
    let err = controller.reconcile("corp-oidc").await.unwrap_err();

    assert!(matches!(err, FedgateError::Conflict { .. }));
    assert_eq!(client.update_attempts(), 2);
}

#[tokio::test]
async fn test_resync_requeues_only_failing_resources() {
    let server = mock_discovery_server().await;
    let client = Arc::new(FakeClient::new());
    client.insert(oidc_resource("good", &server.uri())).await;
    client.insert(oidc_resource("bad", "http://127.0.0.1:1")).await;

    let controller = oidc_controller(Arc::new(UpstreamRegistry::new()), client.clone());
    let requeue = controller.resync().await.unwrap();

    assert_eq!(requeue, vec!["bad".to_string()]);
}

// ============================================================================
// Cleanup controller tests
// ============================================================================

fn ldap_resource(name: &str, phase: Phase) -> LdapProviderResource {
    LdapProviderResource {
        name: name.to_string(),
        uid: ResourceUid::new(),
        generation: 1,
        spec: LdapProviderSpec {
            url: "ldaps://ldap.example.com:636".to_string(),
            tls_ca_bundle: None,
            bind_dn: "cn=service,dc=example,dc=com".to_string(),
            bind_password: "s3cret".to_string(),
            user_search: LdapUserSearch {
                base: "ou=users,dc=example,dc=com".to_string(),
                filter: "(uid={})".to_string(),
                username_attribute: "uid".to_string(),
            },
            group_search: None,
        },
        status: ProviderStatus {
            conditions: vec![],
            phase,
        },
    }
}

#[tokio::test]
async fn test_cleanup_removes_entries_without_ready_resources() {
    let registry = Arc::new(UpstreamRegistry::new());
    registry
        .set_ldap_providers(vec![
            Arc::new(fedgate_identity::providers::ldap::LdapUpstream::new(
                "still-ready".to_string(),
                ResourceUid::new(),
                "ldaps://ldap.example.com:636".to_string(),
                "cn=service,dc=example,dc=com".to_string(),
                "s3cret".to_string(),
                LdapUserSearch {
                    base: "ou=users,dc=example,dc=com".to_string(),
                    filter: "(uid={})".to_string(),
                    username_attribute: "uid".to_string(),
                },
                None,
                Duration::from_secs(2),
            )),
            Arc::new(fedgate_identity::providers::ldap::LdapUpstream::new(
                "gone".to_string(),
                ResourceUid::new(),
                "ldaps://ldap.example.com:636".to_string(),
                "cn=service,dc=example,dc=com".to_string(),
                "s3cret".to_string(),
                LdapUserSearch {
                    base: "ou=users,dc=example,dc=com".to_string(),
                    filter: "(uid={})".to_string(),
                    username_attribute: "uid".to_string(),
                },
                None,
                Duration::from_secs(2),
            )),
        ])
        .await;

    let oidc_client = Arc::new(FakeClient::<OidcProviderResource>::new());
    let ldap_client = Arc::new(FakeClient::<LdapProviderResource>::new());
    let ad_client =
        Arc::new(FakeClient::<fedgate_core::ActiveDirectoryProviderResource>::new());
    let github_client = Arc::new(FakeClient::<fedgate_core::GithubProviderResource>::new());

    // "still-ready" backs a Ready resource; "gone" backs a failing one and
    // a third resource never made it into the registry at all.
    ldap_client.insert(ldap_resource("still-ready", Phase::Ready)).await;
    ldap_client.insert(ldap_resource("gone", Phase::Error)).await;

    let cleanup = CleanupController::new(
        registry.clone(),
        oidc_client,
        ldap_client,
        ad_client,
        github_client,
    );
    cleanup.run_once().await.unwrap();

    let remaining = registry.get_ldap_providers().await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].name(), "still-ready");
}
