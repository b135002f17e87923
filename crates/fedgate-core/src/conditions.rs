//! Status conditions following Kubernetes conventions
//!
//! Each provider resource carries an ordered condition list plus a coarse
//! phase derived from the aggregate `Ready` condition. Condition lists are
//! replaced wholesale on every reconcile, but `last_transition_time` is
//! preserved for entries whose status did not change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Condition type for the aggregate readiness of a provider resource.
pub const TYPE_READY: &str = "Ready";
/// Condition type for TLS CA bundle validity.
pub const TYPE_TLS_CONFIGURATION_VALID: &str = "TLSConfigurationValid";
/// Condition type for endpoint URL validity.
pub const TYPE_ENDPOINT_URL_VALID: &str = "EndpointURLValid";
/// Condition type for OIDC discovery success.
pub const TYPE_DISCOVERY_SUCCEEDED: &str = "DiscoverySucceeded";
/// Condition type for live connectivity to the upstream.
pub const TYPE_CONNECTION_VALID: &str = "ConnectionValid";
/// Condition type for the extra authorize-parameter deny list.
pub const TYPE_ADDITIONAL_AUTHORIZE_PARAMS_VALID: &str = "AdditionalAuthorizeParametersValid";

/// Reason used when a validation could not run because a prerequisite
/// validation already failed.
pub const REASON_UNABLE_TO_VALIDATE: &str = "UnableToValidate";
pub const REASON_SUCCESS: &str = "Success";
pub const REASON_INVALID: &str = "Invalid";
pub const REASON_UNREACHABLE: &str = "Unreachable";

/// Condition status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A typed, timestamped status fact attached to a provider resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Condition type (unique within one list)
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    /// Machine-readable reason for the current status
    pub reason: String,
    /// Human-readable detail
    pub message: String,
    /// Generation of the spec this condition was computed from
    pub observed_generation: i64,
    /// When `status` last changed
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            observed_generation: 0,
            last_transition_time: Utc::now(),
        }
    }

    /// Shorthand for a passing condition.
    pub fn ok(type_: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(type_, ConditionStatus::True, REASON_SUCCESS, message)
    }

    /// Shorthand for an `Unknown` condition whose prerequisite failed.
    pub fn unable_to_validate(type_: impl Into<String>) -> Self {
        Self::new(
            type_,
            ConditionStatus::Unknown,
            REASON_UNABLE_TO_VALIDATE,
            "unable to validate; an earlier validation failed",
        )
    }
}

/// Coarse phase mirroring the aggregate `Ready` condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Phase {
    /// Not yet reconciled
    Pending,
    Ready,
    Error,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Ready => write!(f, "Ready"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// Computes the aggregate `Ready` condition: true iff no condition in the
/// list is `False`.
pub fn aggregate_ready(conditions: &[Condition]) -> Condition {
    let failing: Vec<&str> = conditions
        .iter()
        .filter(|c| c.status == ConditionStatus::False)
        .map(|c| c.type_.as_str())
        .collect();

    if failing.is_empty() {
        Condition::ok(TYPE_READY, "the provider is ready")
    } else {
        Condition::new(
            TYPE_READY,
            ConditionStatus::False,
            REASON_INVALID,
            format!("failing conditions: {}", failing.join(", ")),
        )
    }
}

/// Phase derived from a condition list that already contains `Ready`.
pub fn phase_for(conditions: &[Condition]) -> Phase {
    match conditions.iter().find(|c| c.type_ == TYPE_READY) {
        Some(c) if c.status == ConditionStatus::True => Phase::Ready,
        Some(_) => Phase::Error,
        None => Phase::Pending,
    }
}

/// Replaces `existing` wholesale with `fresh`, preserving
/// `last_transition_time` for entries whose status is unchanged and
/// stamping `observed_generation`. The result is sorted by type so that
/// repeated reconciles with unchanged inputs compare equal.
pub fn merge_conditions(
    existing: &[Condition],
    fresh: Vec<Condition>,
    generation: i64,
    now: DateTime<Utc>,
) -> Vec<Condition> {
    let mut merged: Vec<Condition> = fresh
        .into_iter()
        .map(|mut c| {
            c.observed_generation = generation;
            c.last_transition_time = match existing.iter().find(|e| e.type_ == c.type_) {
                Some(old) if old.status == c.status => old.last_transition_time,
                _ => now,
            };
            c
        })
        .collect();
    merged.sort_by(|a, b| a.type_.cmp(&b.type_));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn cond(type_: &str, status: ConditionStatus) -> Condition {
        Condition::new(type_, status, REASON_SUCCESS, "msg")
    }

    #[test]
    fn test_merge_preserves_transition_time_for_unchanged_status() {
        let earlier = Utc::now() - Duration::hours(1);
        let mut old = cond(TYPE_TLS_CONFIGURATION_VALID, ConditionStatus::True);
        old.last_transition_time = earlier;

        let now = Utc::now();
        let merged = merge_conditions(
            &[old],
            vec![cond(TYPE_TLS_CONFIGURATION_VALID, ConditionStatus::True)],
            3,
            now,
        );

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].last_transition_time, earlier);
        assert_eq!(merged[0].observed_generation, 3);
    }

    #[test]
    fn test_merge_bumps_transition_time_on_status_change() {
        let earlier = Utc::now() - Duration::hours(1);
        let mut old = cond(TYPE_TLS_CONFIGURATION_VALID, ConditionStatus::True);
        old.last_transition_time = earlier;

        let now = Utc::now();
        let merged = merge_conditions(
            &[old],
            vec![cond(TYPE_TLS_CONFIGURATION_VALID, ConditionStatus::False)],
            4,
            now,
        );

        assert_eq!(merged[0].last_transition_time, now);
    }

    #[test]
    fn test_merge_is_sorted_by_type() {
        let merged = merge_conditions(
            &[],
            vec![
                cond(TYPE_READY, ConditionStatus::True),
                cond(TYPE_CONNECTION_VALID, ConditionStatus::True),
            ],
            1,
            Utc::now(),
        );
        assert_eq!(merged[0].type_, TYPE_CONNECTION_VALID);
        assert_eq!(merged[1].type_, TYPE_READY);
    }

    #[test]
    fn test_aggregate_ready_true_when_nothing_false() {
        let conditions = vec![
            cond(TYPE_TLS_CONFIGURATION_VALID, ConditionStatus::True),
            cond(TYPE_CONNECTION_VALID, ConditionStatus::Unknown),
        ];
        let ready = aggregate_ready(&conditions);
        assert_eq!(ready.status, ConditionStatus::True);
    }

    #[test]
    fn test_aggregate_ready_false_names_failing_types() {
        let conditions = vec![
            cond(TYPE_TLS_CONFIGURATION_VALID, ConditionStatus::False),
            cond(TYPE_CONNECTION_VALID, ConditionStatus::True),
        ];
        let ready = aggregate_ready(&conditions);
        assert_eq!(ready.status, ConditionStatus::False);
        assert!(ready.message.contains(TYPE_TLS_CONFIGURATION_VALID));
    }

    #[test]
    fn test_phase_mirrors_ready() {
        let ready = vec![cond(TYPE_READY, ConditionStatus::True)];
        let not_ready = vec![cond(TYPE_READY, ConditionStatus::False)];
        assert_eq!(phase_for(&ready), Phase::Ready);
        assert_eq!(phase_for(&not_ready), Phase::Error);
        assert_eq!(phase_for(&[]), Phase::Pending);
    }
}
