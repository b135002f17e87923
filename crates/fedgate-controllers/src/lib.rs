//! Fedgate Controllers - reconciliation loops that validate provider
//! resources, publish live upstreams into the registry and keep it free of
//! entries whose backing resource disappeared or stopped validating.

pub mod cleanup;
pub mod github;
pub mod ldap;
pub mod oidc;
pub mod validate;

pub use cleanup::CleanupController;
pub use github::GithubProviderValidator;
pub use ldap::{LdapLikeResource, LdapProviderValidator};
pub use oidc::OidcProviderValidator;
pub use validate::{ProviderValidationController, ProviderValidator, ValidationOutcome};

#[cfg(test)]
mod tests;
