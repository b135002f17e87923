//! Client traits for cluster-side resources
//!
//! The controllers only ever need this narrow shape from the cluster API:
//! typed get/list plus a status update that can report a write conflict.
//! Production wires a real client behind it; tests use in-memory fakes.

use async_trait::async_trait;

use crate::error::Result;
use crate::resources::{FederationDomain, ProviderResource};

/// Typed access to one kind of provider resource.
#[async_trait]
pub trait ResourceClient<R: ProviderResource>: Send + Sync {
    /// Fetches the named resource, `None` when it does not exist.
    async fn get(&self, name: &str) -> Result<Option<R>>;

    /// Lists every resource of this kind.
    async fn list(&self) -> Result<Vec<R>>;

    /// Writes the resource's status subresource. Returns
    /// [`crate::FedgateError::Conflict`] when the stored object changed
    /// since it was read; callers re-fetch and retry exactly once.
    async fn update_status(&self, resource: &R) -> Result<()>;
}

/// Read access to federation domains.
#[async_trait]
pub trait FederationDomainClient: Send + Sync {
    async fn get(&self, name: &str) -> Result<Option<FederationDomain>>;

    async fn list(&self) -> Result<Vec<FederationDomain>>;
}

/// Counts provider resources across every kind.
///
/// The default-provider compatibility mode keys on the number of declared
/// resources, not on how many of them currently validate, so resolution
/// needs this count alongside the registry.
#[async_trait]
pub trait ProviderResourceCounter: Send + Sync {
    async fn provider_resource_count(&self) -> Result<usize>;
}
