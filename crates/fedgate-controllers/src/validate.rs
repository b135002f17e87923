//! Generic provider validation controller
//!
//! One instance runs per provider kind. A reconcile call for a resource
//! name runs the kind's ordered validation chain, publishes the constructed
//! upstream into the registry on full success, and writes the merged
//! condition list back to the resource's status subresource.
//!
//! Retry policy: configuration errors are terminal for the current
//! generation and reconcile returns Ok; environmental errors are returned
//! so the driving loop requeues the key. The conditions are persisted
//! either way.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use fedgate_core::{
    aggregate_ready, merge_conditions, phase_for, Condition, FedgateError, ProviderResource,
    ProviderStatus, ResourceClient, Result,
};

/// What one validation pass produced.
///
/// `provider` is present only when every validation passed; `retryable`
/// carries the environmental error to hand back to the driving loop, if
/// any. Conditions are always present.
pub struct ValidationOutcome<P> {
    pub conditions: Vec<Condition>,
    pub provider: Option<Arc<P>>,
    pub retryable: Option<FedgateError>,
}

impl<P> ValidationOutcome<P> {
    /// A configuration failure: conditions recorded, nothing published,
    /// nothing retried.
    pub fn config_failure(conditions: Vec<Condition>) -> Self {
        Self {
            conditions,
            provider: None,
            retryable: None,
        }
    }

    /// An environmental failure: conditions recorded, nothing published,
    /// the error returned for requeue.
    pub fn environmental_failure(conditions: Vec<Condition>, error: FedgateError) -> Self {
        Self {
            conditions,
            provider: None,
            retryable: Some(error),
        }
    }

    pub fn success(conditions: Vec<Condition>, provider: Arc<P>) -> Self {
        Self {
            conditions,
            provider: Some(provider),
            retryable: None,
        }
    }
}

/// Kind-specific validation chain plus registry publication.
#[async_trait]
pub trait ProviderValidator: Send + Sync {
    type Resource: ProviderResource;
    type Provider: Send + Sync;

    /// Runs the ordered validation chain against the resource spec. Never
    /// fails outright; failures are expressed through the outcome.
    async fn validate(&self, resource: &Self::Resource) -> ValidationOutcome<Self::Provider>;

    /// Publishes a fully-validated provider into the registry, replacing
    /// any entry sharing its resource name.
    async fn publish(&self, provider: Arc<Self::Provider>);
}

/// Reconciles one provider resource kind.
pub struct ProviderValidationController<V, C>
where
    V: ProviderValidator,
    C: ResourceClient<V::Resource>,
{
    client: Arc<C>,
    validator: V,
}

impl<V, C> ProviderValidationController<V, C>
where
    V: ProviderValidator,
    C: ResourceClient<V::Resource>,
{
    pub fn new(client: Arc<C>, validator: V) -> Self {
        Self { client, validator }
    }

    /// Reconciles the named resource. A missing resource is a terminal
    /// no-op; the cleanup pass removes any stale registry entry.
    #[instrument(skip(self), fields(kind = %V::Resource::KIND))]
    pub async fn reconcile(&self, name: &str) -> Result<()> {
        let Some(resource) = self.client.get(name).await? else {
            debug!(name, "resource not found, nothing to do");
            return Ok(());
        };

        let outcome = self.validator.validate(&resource).await;

        let mut fresh = outcome.conditions;
        fresh.push(aggregate_ready(&fresh));

        self.publish_status(&resource, fresh).await?;

        if let Some(provider) = outcome.provider {
            info!(name, "validation succeeded, publishing provider");
            self.validator.publish(provider).await;
        }

        match outcome.retryable {
            Some(err) => {
                warn!(name, error = %err, "validation hit an environmental failure");
                Err(err)
            }
            None => Ok(()),
        }
    }

    /// Reconciles every listed resource, as the periodic resync does.
    /// Returns the names whose reconcile asked for a retry.
    pub async fn resync(&self) -> Result<Vec<String>> {
        let mut requeue = Vec::new();
        for resource in self.client.list().await? {
            let name = resource.name().to_string();
            if let Err(err) = self.reconcile(&name).await {
                debug!(name = %name, error = %err, "requeueing after failed reconcile");
                requeue.push(name);
            }
        }
        Ok(requeue)
    }

    /// Merges the fresh conditions into the stored status and writes it
    /// back, skipping the update when nothing changed. A write conflict is
    /// retried exactly once against a re-fetched copy.
    async fn publish_status(&self, resource: &V::Resource, fresh: Vec<Condition>) -> Result<()> {
        if self.try_update(resource, &fresh).await? {
            return Ok(());
        }

        // Conflict: someone else wrote the object since we read it.
        let Some(current) = self.client.get(resource.name()).await? else {
            return Ok(());
        };
        if self.try_update(&current, &fresh).await? {
            Ok(())
        } else {
            Err(FedgateError::conflict(format!(
                "status update for {} conflicted twice",
                resource.name()
            )))
        }
    }

    /// Returns Ok(false) only on a conflict; other errors propagate.
    async fn try_update(&self, resource: &V::Resource, fresh: &[Condition]) -> Result<bool> {
        let merged = merge_conditions(
            &resource.status().conditions,
            fresh.to_vec(),
            resource.generation(),
            Utc::now(),
        );
        let next = ProviderStatus {
            phase: phase_for(&merged),
            conditions: merged,
        };

        if next == *resource.status() {
            debug!(name = resource.name(), "status unchanged, skipping update");
            return Ok(true);
        }

        let mut updated = resource.clone();
        *updated.status_mut() = next;

        match self.client.update_status(&updated).await {
            Ok(()) => Ok(true),
            Err(FedgateError::Conflict { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }
}
