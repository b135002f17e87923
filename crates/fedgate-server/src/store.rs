//! File-backed resource store
//!
//! A standalone deployment declares its provider resources and
//! FederationDomains in one JSON document. The store serves them through
//! the same client traits the controllers and the API consume, so nothing
//! above this layer knows where resources come from. Statuses written by
//! the controllers live in memory, keyed by kind and name, and survive a
//! file reload.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::info;

use fedgate_core::{
    ActiveDirectoryProviderResource, FederationDomain, FederationDomainClient, FedgateError,
    GithubProviderResource, LdapProviderResource, OidcProviderResource, ProviderKind,
    ProviderResource, ProviderResourceCounter, ProviderStatus, ResourceClient, Result,
};

/// The top-level shape of the resources file.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ResourceDocument {
    #[serde(default)]
    pub oidc_providers: Vec<OidcProviderResource>,
    #[serde(default)]
    pub ldap_providers: Vec<LdapProviderResource>,
    #[serde(default)]
    pub active_directory_providers: Vec<ActiveDirectoryProviderResource>,
    #[serde(default)]
    pub github_providers: Vec<GithubProviderResource>,
    #[serde(default)]
    pub federation_domains: Vec<FederationDomain>,
}

pub struct FileResourceStore {
    path: PathBuf,
    document: RwLock<ResourceDocument>,
    statuses: RwLock<HashMap<(ProviderKind, String), ProviderStatus>>,
}

impl FileResourceStore {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let document = read_document(&path)?;
        Ok(Self {
            path,
            document: RwLock::new(document),
            statuses: RwLock::new(HashMap::new()),
        })
    }

    /// Re-reads the file, replacing the served document. Statuses are kept;
    /// a renamed resource simply starts over from Pending.
    pub async fn reload(&self) -> Result<()> {
        let document = read_document(&self.path)?;
        *self.document.write().await = document;
        info!(path = %self.path.display(), "resource document reloaded");
        Ok(())
    }

    async fn overlay<R: ProviderResource>(&self, mut resource: R) -> R {
        let statuses = self.statuses.read().await;
        if let Some(status) = statuses.get(&(R::KIND, resource.name().to_string())) {
            *resource.status_mut() = status.clone();
        }
        resource
    }
}

fn read_document(path: &Path) -> Result<ResourceDocument> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        FedgateError::invalid_config(format!(
            "failed to read resource file {}: {e}",
            path.display()
        ))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        FedgateError::invalid_config(format!(
            "failed to parse resource file {}: {e}",
            path.display()
        ))
    })
}

macro_rules! impl_resource_client {
    ($resource:ty, $field:ident) => {
        #[async_trait]
        impl ResourceClient<$resource> for FileResourceStore {
            async fn get(&self, name: &str) -> Result<Option<$resource>> {
                let found = {
                    let doc = self.document.read().await;
                    doc.$field.iter().find(|r| r.name() == name).cloned()
                };
                match found {
                    Some(resource) => Ok(Some(self.overlay(resource).await)),
                    None => Ok(None),
                }
            }

            async fn list(&self) -> Result<Vec<$resource>> {
                let resources = self.document.read().await.$field.clone();
                let mut out = Vec::with_capacity(resources.len());
                for resource in resources {
                    out.push(self.overlay(resource).await);
                }
                Ok(out)
            }

            async fn update_status(&self, resource: &$resource) -> Result<()> {
                let mut statuses = self.statuses.write().await;
                statuses.insert(
                    (<$resource>::KIND, resource.name().to_string()),
                    resource.status().clone(),
                );
                Ok(())
            }
        }
    };
}

impl_resource_client!(OidcProviderResource, oidc_providers);
impl_resource_client!(LdapProviderResource, ldap_providers);
impl_resource_client!(ActiveDirectoryProviderResource, active_directory_providers);
impl_resource_client!(GithubProviderResource, github_providers);

#[async_trait]
impl ProviderResourceCounter for FileResourceStore {
    async fn provider_resource_count(&self) -> Result<usize> {
        let doc = self.document.read().await;
        Ok(doc.oidc_providers.len()
            + doc.ldap_providers.len()
            + doc.active_directory_providers.len()
            + doc.github_providers.len())
    }
}

#[async_trait]
impl FederationDomainClient for FileResourceStore {
    async fn get(&self, name: &str) -> Result<Option<FederationDomain>> {
        let doc = self.document.read().await;
        Ok(doc.federation_domains.iter().find(|d| d.name == name).cloned())
    }

    async fn list(&self) -> Result<Vec<FederationDomain>> {
        Ok(self.document.read().await.federation_domains.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedgate_core::{Phase, ResourceUid};

    const SAMPLE: &str = r#"{
        "oidc_providers": [
            {
                "name": "corp-sso",
                "uid": "0191b2c4-0000-7000-8000-000000000001",
                "generation": 1,
                "spec": {
                    "issuer": "https://sso.example.com",
                    "client_id": "fedgate",
                    "client_secret": "secret"
                }
            }
        ],
        "federation_domains": [
            {
                "name": "corp-domain",
                "issuer": "https://fedgate.example.com"
            }
        ]
    }"#;

    async fn oidc_get(
        store: &FileResourceStore,
        name: &str,
    ) -> Result<Option<OidcProviderResource>> {
        <FileResourceStore as ResourceClient<OidcProviderResource>>::get(store, name).await
    }

    fn write_sample() -> PathBuf {
        let path = std::env::temp_dir().join(format!("fedgate-store-{}.json", ResourceUid::new()));
        std::fs::write(&path, SAMPLE).unwrap();
        path
    }

    #[tokio::test]
    async fn test_load_and_get() {
        let path = write_sample();
        let store = FileResourceStore::load(&path).unwrap();

        let resource = oidc_get(&store, "corp-sso").await.unwrap().unwrap();
        assert_eq!(resource.spec.issuer, "https://sso.example.com");
        assert_eq!(resource.status.phase, Phase::Pending);

        assert!(oidc_get(&store, "nope").await.unwrap().is_none());

        let domain = FederationDomainClient::get(&store, "corp-domain")
            .await
            .unwrap();
        assert!(domain.is_some());

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_status_survives_reload() {
        let path = write_sample();
        let store = FileResourceStore::load(&path).unwrap();

        let mut resource = oidc_get(&store, "corp-sso").await.unwrap().unwrap();
        resource.status.phase = Phase::Ready;
        store.update_status(&resource).await.unwrap();

        store.reload().await.unwrap();

        let reloaded = oidc_get(&store, "corp-sso").await.unwrap().unwrap();
        assert_eq!(reloaded.status.phase, Phase::Ready);

        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_resource_count_spans_every_kind() {
        let path = write_sample();
        let store = FileResourceStore::load(&path).unwrap();
        assert_eq!(store.provider_resource_count().await.unwrap(), 1);
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_missing_file_is_a_config_error() {
        let result = FileResourceStore::load("/nonexistent/resources.json");
        assert!(matches!(result, Err(FedgateError::InvalidConfig { .. })));
    }
}
