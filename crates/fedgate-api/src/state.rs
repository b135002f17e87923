//! Shared application state

use std::sync::Arc;

use fedgate_core::{FederationDomainClient, ProviderResourceCounter, Result};
use fedgate_identity::{resolver_for_domain, DomainIdentityResolver, UpstreamRegistry};

use crate::oauth::ClientRegistry;
use crate::request_state::StateCodec;

pub struct AppState {
    pub registry: Arc<UpstreamRegistry>,
    pub domains: Arc<dyn FederationDomainClient>,
    /// Counts declared provider resources; drives the default-provider
    /// compatibility mode independently of what currently validates
    pub resources: Arc<dyn ProviderResourceCounter>,
    pub clients: ClientRegistry,
    pub codec: StateCodec,
    /// This broker's external issuer URL, e.g. `https://fedgate.example.com`
    pub issuer: String,
    /// Name of the FederationDomain this endpoint serves
    pub domain_name: String,
}

impl AppState {
    /// The callback URL upstream providers redirect back to.
    pub fn callback_uri(&self) -> String {
        format!("{}/callback", self.issuer.trim_end_matches('/'))
    }

    /// Builds a fresh resolver for the served domain. Built per request so
    /// that domain edits and registry changes are picked up immediately.
    pub async fn resolver(&self) -> Result<DomainIdentityResolver> {
        let domain = self
            .domains
            .get(&self.domain_name)
            .await?
            .ok_or_else(|| {
                fedgate_core::FedgateError::not_found("FederationDomain", self.domain_name.as_str())
            })?;
        let resource_count = self.resources.provider_resource_count().await?;
        Ok(resolver_for_domain(self.registry.clone(), &domain, resource_count).await)
    }
}
