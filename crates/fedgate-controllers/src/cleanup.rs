//! Periodic registry cleanup
//!
//! The validation controllers only ever add or replace registry entries.
//! This pass recomputes the set of currently-Ready resource names per kind
//! and drops every entry whose name is no longer in that set, covering both
//! deleted resources and resources that stopped validating. Providers with
//! a close capability are closed before removal.

use std::sync::Arc;
use tracing::{info, instrument};

use fedgate_core::{
    ActiveDirectoryProviderResource, GithubProviderResource, LdapProviderResource,
    OidcProviderResource, Phase, ProviderResource, ResourceClient, Result,
};
use fedgate_identity::UpstreamRegistry;

pub struct CleanupController {
    registry: Arc<UpstreamRegistry>,
    oidc: Arc<dyn ResourceClient<OidcProviderResource>>,
    ldap: Arc<dyn ResourceClient<LdapProviderResource>>,
    active_directory: Arc<dyn ResourceClient<ActiveDirectoryProviderResource>>,
    github: Arc<dyn ResourceClient<GithubProviderResource>>,
}

impl CleanupController {
    pub fn new(
        registry: Arc<UpstreamRegistry>,
        oidc: Arc<dyn ResourceClient<OidcProviderResource>>,
        ldap: Arc<dyn ResourceClient<LdapProviderResource>>,
        active_directory: Arc<dyn ResourceClient<ActiveDirectoryProviderResource>>,
        github: Arc<dyn ResourceClient<GithubProviderResource>>,
    ) -> Self {
        Self {
            registry,
            oidc,
            ldap,
            active_directory,
            github,
        }
    }

    fn ready_names<R: ProviderResource>(resources: &[R]) -> Vec<String> {
        resources
            .iter()
            .filter(|r| r.status().phase == Phase::Ready)
            .map(|r| r.name().to_string())
            .collect()
    }

    /// One cleanup pass across every provider kind.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<()> {
        let keep = Self::ready_names(&self.oidc.list().await?);
        let removed = self.registry.retain_oidc_providers(&keep).await;
        for provider in removed {
            info!(name = provider.name(), "removed stale oidc provider");
        }

        let keep = Self::ready_names(&self.ldap.list().await?);
        let removed = self.registry.retain_ldap_providers(&keep).await;
        for provider in removed {
            provider.close().await;
            info!(name = provider.name(), "removed stale ldap provider");
        }

        let keep = Self::ready_names(&self.active_directory.list().await?);
        let removed = self.registry.retain_active_directory_providers(&keep).await;
        for provider in removed {
            provider.close().await;
            info!(name = provider.name(), "removed stale active directory provider");
        }

        let keep = Self::ready_names(&self.github.list().await?);
        let removed = self.registry.retain_github_providers(&keep).await;
        for provider in removed {
            info!(name = provider.name(), "removed stale github provider");
        }

        Ok(())
    }
}
