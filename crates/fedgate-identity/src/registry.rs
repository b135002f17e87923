//! Upstream provider registry
//!
//! The single piece of state shared between the validation controllers
//! (writers) and the authorization endpoint handlers (readers). Each
//! provider kind holds exactly one full list, replaced atomically under a
//! write lock; readers take cheap cloned snapshots of `Arc`-ed entries and
//! never observe a partially-updated list. This component never fails, it
//! only stores what it is given.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::providers::github::GithubUpstream;
use crate::providers::ldap::LdapUpstream;
use crate::providers::oidc::OidcUpstream;
use crate::upstream::UpstreamProvider;

#[derive(Default)]
struct RegistryState {
    oidc: Vec<Arc<OidcUpstream>>,
    ldap: Vec<Arc<LdapUpstream>>,
    active_directory: Vec<Arc<LdapUpstream>>,
    github: Vec<Arc<GithubUpstream>>,
}

/// Thread-safe store of currently-valid upstream providers, partitioned by
/// kind.
pub struct UpstreamRegistry {
    state: RwLock<RegistryState>,
}

macro_rules! registry_accessors {
    ($set:ident, $get:ident, $upsert:ident, $remove:ident, $field:ident, $ty:ty, $label:literal) => {
        /// Replaces the full list for this kind.
        pub async fn $set(&self, providers: Vec<Arc<$ty>>) {
            debug!(count = providers.len(), concat!("setting ", $label, " providers"));
            self.state.write().await.$field = providers;
        }

        /// Returns a snapshot of the current list for this kind.
        pub async fn $get(&self) -> Vec<Arc<$ty>> {
            self.state.read().await.$field.clone()
        }

        /// Replaces the entry sharing the provider's resource name, or
        /// appends it. The swap happens under one write lock acquisition.
        pub async fn $upsert(&self, provider: Arc<$ty>) {
            let mut state = self.state.write().await;
            let mut next: Vec<Arc<$ty>> = state
                .$field
                .iter()
                .filter(|p| p.name() != provider.name())
                .cloned()
                .collect();
            next.push(provider);
            state.$field = next;
        }

        /// Drops every entry whose resource name is not in `keep`, returning
        /// the removed entries so the caller can close them.
        pub async fn $remove(&self, keep: &[String]) -> Vec<Arc<$ty>> {
            let mut state = self.state.write().await;
            let (kept, removed): (Vec<_>, Vec<_>) = state
                .$field
                .iter()
                .cloned()
                .partition(|p| keep.iter().any(|k| k == p.name()));
            state.$field = kept;
            removed
        }
    };
}

impl UpstreamRegistry {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
        }
    }

    registry_accessors!(
        set_oidc_providers,
        get_oidc_providers,
        upsert_oidc_provider,
        retain_oidc_providers,
        oidc,
        OidcUpstream,
        "oidc"
    );

    registry_accessors!(
        set_ldap_providers,
        get_ldap_providers,
        upsert_ldap_provider,
        retain_ldap_providers,
        ldap,
        LdapUpstream,
        "ldap"
    );

    registry_accessors!(
        set_active_directory_providers,
        get_active_directory_providers,
        upsert_active_directory_provider,
        retain_active_directory_providers,
        active_directory,
        LdapUpstream,
        "active directory"
    );

    registry_accessors!(
        set_github_providers,
        get_github_providers,
        upsert_github_provider,
        retain_github_providers,
        github,
        GithubUpstream,
        "github"
    );

    /// One consistent snapshot across every provider kind, taken under a
    /// single read lock acquisition.
    pub async fn get_all_providers(&self) -> Vec<UpstreamProvider> {
        let state = self.state.read().await;
        let mut all = Vec::with_capacity(
            state.oidc.len()
                + state.ldap.len()
                + state.active_directory.len()
                + state.github.len(),
        );
        all.extend(state.oidc.iter().cloned().map(UpstreamProvider::Oidc));
        all.extend(state.ldap.iter().cloned().map(UpstreamProvider::Ldap));
        all.extend(
            state
                .active_directory
                .iter()
                .cloned()
                .map(UpstreamProvider::ActiveDirectory),
        );
        all.extend(state.github.iter().cloned().map(UpstreamProvider::Github));
        all
    }

    /// Total number of registered providers across all kinds.
    pub async fn provider_count(&self) -> usize {
        let state = self.state.read().await;
        state.oidc.len() + state.ldap.len() + state.active_directory.len() + state.github.len()
    }
}

impl Default for UpstreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}
