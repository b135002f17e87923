//! Per-domain identity provider resolution
//!
//! A resolver is built once per FederationDomain from its declared alias
//! list. It holds no lock and caches nothing: every lookup takes a fresh
//! registry snapshot, so a provider disappearing between resolution and use
//! surfaces only as an ordinary upstream-call failure.

use std::sync::Arc;

use fedgate_core::{
    FedgateError, FederationDomain, FederationDomainIdentityProvider, ProviderKind, Result,
    TransformationPipeline,
};

use crate::registry::UpstreamRegistry;
use crate::upstream::UpstreamProvider;

/// Ephemeral join of a domain's declared provider entry with the live
/// upstream sharing its UID. Recomputed on every lookup, never cached.
#[derive(Debug, Clone)]
pub struct ResolvedIdentityProvider {
    pub display_name: String,
    pub session_kind: ProviderKind,
    pub transforms: TransformationPipeline,
    pub provider: UpstreamProvider,
}

/// Maps a FederationDomain's display-name aliases to live registry entries.
pub struct DomainIdentityResolver {
    registry: Arc<UpstreamRegistry>,
    entries: Vec<FederationDomainIdentityProvider>,
    default_display_name: Option<String>,
}

impl DomainIdentityResolver {
    pub fn new(
        registry: Arc<UpstreamRegistry>,
        entries: Vec<FederationDomainIdentityProvider>,
        default_display_name: Option<String>,
    ) -> Self {
        Self {
            registry,
            entries,
            default_display_name,
        }
    }

    /// Number of aliases the domain declares, resolved or not.
    pub fn configured_count(&self) -> usize {
        self.entries.len()
    }

    /// Resolves every configured alias against a fresh registry snapshot.
    /// Aliases whose UID has no live entry are silently omitted.
    pub async fn get_identity_providers(&self) -> Vec<ResolvedIdentityProvider> {
        let snapshot = self.registry.get_all_providers().await;
        self.entries
            .iter()
            .filter_map(|entry| resolve_entry(entry, &snapshot))
            .collect()
    }

    /// Resolves one alias by display name.
    ///
    /// Distinguishes an alias that was never configured
    /// ([`FedgateError::IdentityProviderNotFound`]) from one whose UID has
    /// no live registry entry right now
    /// ([`FedgateError::IdentityProviderNotAvailable`]).
    pub async fn find_upstream_idp_by_display_name(
        &self,
        display_name: &str,
    ) -> Result<ResolvedIdentityProvider> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.display_name == display_name)
            .ok_or_else(|| FedgateError::IdentityProviderNotFound {
                name: display_name.to_string(),
            })?;

        let snapshot = self.registry.get_all_providers().await;
        resolve_entry(entry, &snapshot).ok_or_else(|| FedgateError::IdentityProviderNotAvailable {
            name: display_name.to_string(),
        })
    }

    pub fn has_default_idp(&self) -> bool {
        self.default_display_name.is_some()
    }

    /// Resolves the configured default alias; errors when the domain has
    /// no default.
    pub async fn find_default_idp(&self) -> Result<ResolvedIdentityProvider> {
        let name = self.default_display_name.as_deref().ok_or_else(|| {
            FedgateError::IdentityProviderNotFound {
                name: "(default)".to_string(),
            }
        })?;
        self.find_upstream_idp_by_display_name(name).await
    }

    /// Number of currently-resolvable providers.
    pub async fn idp_count(&self) -> usize {
        self.get_identity_providers().await.len()
    }
}

fn resolve_entry(
    entry: &FederationDomainIdentityProvider,
    snapshot: &[UpstreamProvider],
) -> Option<ResolvedIdentityProvider> {
    let provider = snapshot
        .iter()
        .find(|p| p.resource_uid() == entry.uid)
        .cloned()?;
    Some(ResolvedIdentityProvider {
        display_name: entry.display_name.clone(),
        session_kind: provider.kind(),
        transforms: entry.transforms.clone(),
        provider,
    })
}

/// Builds the resolver for a domain, applying the default-provider
/// backward-compatibility mode: when the domain declares zero providers and
/// exactly one provider resource exists cluster-wide, that sole provider
/// becomes the domain's implicit default under its own resource name.
///
/// `provider_resource_count` is the number of declared provider resources
/// across every kind, validated or not. A second resource that merely fails
/// validation keeps the compatibility mode off.
pub async fn resolver_for_domain(
    registry: Arc<UpstreamRegistry>,
    domain: &FederationDomain,
    provider_resource_count: usize,
) -> DomainIdentityResolver {
    if domain.identity_providers.is_empty() && provider_resource_count == 1 {
        let snapshot = registry.get_all_providers().await;
        if let [sole] = snapshot.as_slice() {
            let entry = FederationDomainIdentityProvider {
                display_name: sole.name().to_string(),
                uid: sole.resource_uid(),
                transforms: TransformationPipeline::default(),
            };
            let default = Some(entry.display_name.clone());
            return DomainIdentityResolver::new(registry, vec![entry], default);
        }
    }

    DomainIdentityResolver::new(
        registry,
        domain.identity_providers.clone(),
        domain.default_identity_provider.clone(),
    )
}
