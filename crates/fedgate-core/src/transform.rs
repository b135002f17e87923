//! Identity transformation pipeline
//!
//! A FederationDomain can rewrite or filter the identity coming back from
//! an upstream provider before a downstream session is built. Rules run in
//! declaration order; evaluation is pure and fallible.

use serde::{Deserialize, Serialize};

use crate::error::{FedgateError, Result};

/// The identity extracted from an upstream provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederatedIdentity {
    pub username: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl FederatedIdentity {
    pub fn new(username: impl Into<String>, groups: Vec<String>) -> Self {
        Self {
            username: username.into(),
            groups,
        }
    }
}

/// One identity mapping rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransformRule {
    /// Prepend a fixed prefix to the username
    UsernamePrefix { prefix: String },
    /// Prepend a fixed prefix to every group name
    GroupPrefix { prefix: String },
    /// Drop every group not in the allow list
    OnlyGroups { groups: Vec<String> },
    /// Reject the authentication outright with the configured message
    Reject { message: String },
}

/// Ordered list of transformation rules
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformationPipeline {
    pub rules: Vec<TransformRule>,
}

impl TransformationPipeline {
    pub fn new(rules: Vec<TransformRule>) -> Self {
        Self { rules }
    }

    /// Applies every rule in order. A `Reject` rule stops evaluation and
    /// surfaces its message as an authentication-rejected error.
    pub fn apply(&self, identity: FederatedIdentity) -> Result<FederatedIdentity> {
        let mut current = identity;
        for rule in &self.rules {
            match rule {
                TransformRule::UsernamePrefix { prefix } => {
                    current.username = format!("{prefix}{}", current.username);
                }
                TransformRule::GroupPrefix { prefix } => {
                    current.groups = current
                        .groups
                        .into_iter()
                        .map(|g| format!("{prefix}{g}"))
                        .collect();
                }
                TransformRule::OnlyGroups { groups } => {
                    current.groups.retain(|g| groups.contains(g));
                }
                TransformRule::Reject { message } => {
                    return Err(FedgateError::AuthRejected {
                        message: message.clone(),
                    });
                }
            }
        }
        Ok(current)
    }
}
