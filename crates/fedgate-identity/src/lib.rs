//! Fedgate Identity - upstream provider registry, per-domain resolution and
//! the runtime provider implementations (OIDC, LDAP/Active Directory, GitHub)

pub mod providers;
pub mod registry;
pub mod resolver;
pub mod upstream;

pub use registry::UpstreamRegistry;
pub use resolver::{resolver_for_domain, DomainIdentityResolver, ResolvedIdentityProvider};
pub use upstream::UpstreamProvider;
