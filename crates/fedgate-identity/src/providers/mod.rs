//! Runtime upstream provider implementations

pub mod common;
pub mod github;
pub mod ldap;
pub mod oidc;
