//! Tagged union over the runtime upstream provider kinds

use std::sync::Arc;

use fedgate_core::{ProviderKind, ResourceUid};

use crate::providers::github::GithubUpstream;
use crate::providers::ldap::LdapUpstream;
use crate::providers::oidc::OidcUpstream;

/// A live, validated upstream identity provider.
///
/// Constructed by the validation controllers and published into the
/// [`crate::UpstreamRegistry`]; immutable once constructed. Resolution
/// switches on which typed list contains a matching UID.
#[derive(Clone)]
pub enum UpstreamProvider {
    Oidc(Arc<OidcUpstream>),
    Ldap(Arc<LdapUpstream>),
    ActiveDirectory(Arc<LdapUpstream>),
    Github(Arc<GithubUpstream>),
}

impl UpstreamProvider {
    /// The backing resource's name.
    pub fn name(&self) -> &str {
        match self {
            Self::Oidc(p) => p.name(),
            Self::Ldap(p) | Self::ActiveDirectory(p) => p.name(),
            Self::Github(p) => p.name(),
        }
    }

    /// The backing resource's UID; what FederationDomain entries reference.
    pub fn resource_uid(&self) -> ResourceUid {
        match self {
            Self::Oidc(p) => p.resource_uid(),
            Self::Ldap(p) | Self::ActiveDirectory(p) => p.resource_uid(),
            Self::Github(p) => p.resource_uid(),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Oidc(_) => ProviderKind::Oidc,
            Self::Ldap(_) => ProviderKind::Ldap,
            Self::ActiveDirectory(_) => ProviderKind::ActiveDirectory,
            Self::Github(_) => ProviderKind::Github,
        }
    }
}

impl std::fmt::Debug for UpstreamProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamProvider")
            .field("kind", &self.kind())
            .field("name", &self.name())
            .field("uid", &self.resource_uid())
            .finish()
    }
}
