//! Declarative provider resources and federation domains
//!
//! These mirror the cluster-side configuration objects the controllers
//! reconcile. The core only depends on their deserialized shape; fetching
//! and watching them is behind the [`crate::traits::ResourceClient`] seam.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::conditions::{Condition, Phase};
use crate::ids::ResourceUid;
use crate::transform::TransformationPipeline;

/// The kind of upstream identity provider a resource configures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Oidc,
    Ldap,
    ActiveDirectory,
    Github,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Oidc => write!(f, "oidc"),
            Self::Ldap => write!(f, "ldap"),
            Self::ActiveDirectory => write!(f, "active_directory"),
            Self::Github => write!(f, "github"),
        }
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = crate::error::FedgateError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "oidc" => Ok(Self::Oidc),
            "ldap" => Ok(Self::Ldap),
            "active_directory" => Ok(Self::ActiveDirectory),
            "github" => Ok(Self::Github),
            other => Err(crate::error::FedgateError::invalid_config(format!(
                "unknown provider kind: {other}"
            ))),
        }
    }
}

/// Reconciled status shared by every provider resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub phase: Phase,
}

impl Default for ProviderStatus {
    fn default() -> Self {
        Self {
            conditions: Vec::new(),
            phase: Phase::Pending,
        }
    }
}

/// Common accessors the generic validation controller needs from any
/// provider resource kind.
pub trait ProviderResource: Clone + Send + Sync + 'static {
    const KIND: ProviderKind;

    fn name(&self) -> &str;
    fn uid(&self) -> ResourceUid;
    fn generation(&self) -> i64;
    fn status(&self) -> &ProviderStatus;
    fn status_mut(&mut self) -> &mut ProviderStatus;
}

macro_rules! impl_provider_resource {
    ($resource:ident, $kind:expr) => {
        impl ProviderResource for $resource {
            const KIND: ProviderKind = $kind;

            fn name(&self) -> &str {
                &self.name
            }

            fn uid(&self) -> ResourceUid {
                self.uid
            }

            fn generation(&self) -> i64 {
                self.generation
            }

            fn status(&self) -> &ProviderStatus {
                &self.status
            }

            fn status_mut(&mut self) -> &mut ProviderStatus {
                &mut self.status
            }
        }
    };
}

/// OIDC upstream configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OidcProviderSpec {
    /// Issuer URL; discovery runs against `<issuer>/.well-known/openid-configuration`
    pub issuer: String,
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,
    /// Base64-encoded PEM bundle of CAs to trust when talking to the issuer
    #[serde(default)]
    pub tls_ca_bundle: Option<String>,
    #[serde(default = "default_oidc_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_username_claim")]
    pub username_claim: String,
    #[serde(default = "default_groups_claim")]
    pub groups_claim: String,
    /// Permit the resource-owner password credentials grant in the CLI flow
    #[serde(default)]
    pub allow_password_grant: bool,
    /// Extra parameters appended to the upstream authorize redirect
    #[serde(default)]
    pub additional_authorize_params: BTreeMap<String, String>,
    /// Explicit endpoint overrides; discovered values are used when unset
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub revocation_endpoint: Option<String>,
}

fn default_oidc_scopes() -> Vec<String> {
    vec!["openid".to_string()]
}

fn default_username_claim() -> String {
    "sub".to_string()
}

fn default_groups_claim() -> String {
    "groups".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OidcProviderResource {
    pub name: String,
    pub uid: ResourceUid,
    pub generation: i64,
    pub spec: OidcProviderSpec,
    #[serde(default)]
    pub status: ProviderStatus,
}

impl_provider_resource!(OidcProviderResource, ProviderKind::Oidc);

/// User search settings within an LDAP tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LdapUserSearch {
    pub base: String,
    /// Filter template; `{}` is replaced with the end-user supplied username
    pub filter: String,
    #[serde(default = "default_ldap_username_attribute")]
    pub username_attribute: String,
}

fn default_ldap_username_attribute() -> String {
    "dn".to_string()
}

/// Group search settings within an LDAP tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LdapGroupSearch {
    pub base: String,
    /// Filter template; `{}` is replaced with the user's DN
    pub filter: String,
    #[serde(default = "default_ldap_group_attribute")]
    pub attribute: String,
}

fn default_ldap_group_attribute() -> String {
    "cn".to_string()
}

/// LDAP / Active Directory upstream configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LdapProviderSpec {
    /// `ldaps://host:port` or `ldap://host:port`
    pub url: String,
    #[serde(default)]
    pub tls_ca_bundle: Option<String>,
    pub bind_dn: String,
    #[serde(skip_serializing)]
    pub bind_password: String,
    pub user_search: LdapUserSearch,
    #[serde(default)]
    pub group_search: Option<LdapGroupSearch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LdapProviderResource {
    pub name: String,
    pub uid: ResourceUid,
    pub generation: i64,
    pub spec: LdapProviderSpec,
    #[serde(default)]
    pub status: ProviderStatus,
}

impl_provider_resource!(LdapProviderResource, ProviderKind::Ldap);

/// Active Directory shares the LDAP spec shape but is validated and
/// registered as its own kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveDirectoryProviderResource {
    pub name: String,
    pub uid: ResourceUid,
    pub generation: i64,
    pub spec: LdapProviderSpec,
    #[serde(default)]
    pub status: ProviderStatus,
}

impl_provider_resource!(ActiveDirectoryProviderResource, ProviderKind::ActiveDirectory);

/// Which GitHub user field becomes the downstream username
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GithubUsernameAttribute {
    Id,
    Login,
    LoginAndId,
}

/// Which GitHub team field becomes the downstream group name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GithubGroupsAttribute {
    Name,
    Slug,
}

/// GitHub upstream configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GithubProviderSpec {
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,
    /// GitHub host, e.g. `github.com` or a GitHub Enterprise hostname
    #[serde(default = "default_github_host")]
    pub host: String,
    #[serde(default)]
    pub tls_ca_bundle: Option<String>,
    #[serde(default = "default_github_scopes")]
    pub scopes: Vec<String>,
    pub username_attribute: GithubUsernameAttribute,
    pub groups_attribute: GithubGroupsAttribute,
    /// When non-empty, identities outside every listed org are rejected
    #[serde(default)]
    pub allowed_organizations: Vec<String>,
}

fn default_github_host() -> String {
    "github.com".to_string()
}

fn default_github_scopes() -> Vec<String> {
    vec!["read:user".to_string(), "read:org".to_string()]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GithubProviderResource {
    pub name: String,
    pub uid: ResourceUid,
    pub generation: i64,
    pub spec: GithubProviderSpec,
    #[serde(default)]
    pub status: ProviderStatus,
}

impl_provider_resource!(GithubProviderResource, ProviderKind::Github);

/// One identity provider entry declared on a FederationDomain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederationDomainIdentityProvider {
    /// Unique within one domain; what end users and clients select by
    pub display_name: String,
    /// Reference to the provider resource carrying this UID
    pub uid: ResourceUid,
    #[serde(default)]
    pub transforms: TransformationPipeline,
}

/// A federation domain: one issuer endpoint plus its usable providers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederationDomain {
    pub name: String,
    pub issuer: String,
    #[serde(default)]
    pub identity_providers: Vec<FederationDomainIdentityProvider>,
    /// Display name used when a request carries no provider hint
    #[serde(default)]
    pub default_identity_provider: Option<String>,
}
