//! Instance state model.
//!
//! An [`InstanceState`] is the observed status of one named workload as
//! reported by a provider on every start/stop/state call. It is an
//! immutable value; the session layer stores the latest one per name.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a workload.
///
/// `NotReady → Ready` is the success path. `Unrecoverable` is terminal
/// per the backend's own report — retrying will not fix it without
/// external intervention. `Error` marks a transient provider failure;
/// nothing is cached for it and the next request re-evaluates fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    NotReady,
    Ready,
    Unrecoverable,
    Error,
}

/// Observed state of one named workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceState {
    pub name: String,
    pub current_replicas: u32,
    pub desired_replicas: u32,
    pub status: InstanceStatus,
    /// Human-readable detail, set for error and unrecoverable states.
    pub message: Option<String>,
}

impl InstanceState {
    /// Healthy at one replica.
    pub fn ready(name: &str) -> Self {
        Self::ready_with_replicas(name, 1)
    }

    /// Healthy at the given replica count.
    pub fn ready_with_replicas(name: &str, replicas: u32) -> Self {
        Self {
            name: name.to_string(),
            current_replicas: replicas,
            desired_replicas: replicas,
            status: InstanceStatus::Ready,
            message: None,
        }
    }

    /// Starting or scaled down, not yet at the desired count.
    pub fn not_ready(name: &str) -> Self {
        Self::not_ready_with_replicas(name, 0, 1)
    }

    /// Starting, with explicit current and desired counts.
    pub fn not_ready_with_replicas(name: &str, current: u32, desired: u32) -> Self {
        Self {
            name: name.to_string(),
            current_replicas: current,
            desired_replicas: desired,
            status: InstanceStatus::NotReady,
            message: None,
        }
    }

    /// Transient provider failure; the next request retries fresh.
    pub fn errored(name: &str, message: impl std::fmt::Display) -> Self {
        Self {
            name: name.to_string(),
            current_replicas: 0,
            desired_replicas: 0,
            status: InstanceStatus::Error,
            message: Some(message.to_string()),
        }
    }

    /// Terminal backend-reported failure, e.g. a crashed unit with a
    /// nonzero exit or a misconfigured workload.
    pub fn unrecoverable(name: &str, message: impl std::fmt::Display) -> Self {
        Self {
            name: name.to_string(),
            current_replicas: 0,
            desired_replicas: 0,
            status: InstanceStatus::Unrecoverable,
            message: Some(message.to_string()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == InstanceStatus::Ready
    }

    pub fn has_error(&self) -> bool {
        self.status == InstanceStatus::Error
    }
}

/// One auto-discovered workload, as returned by
/// [`Provider::instance_list`](crate::Provider::instance_list).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    /// Backend-specific kind ("container", "service", "deployment", …).
    pub kind: String,
    pub status: String,
    pub replicas: u64,
    pub desired_replicas: u64,
    /// Replica count to scale to when woken.
    pub scaling_replicas: u64,
    pub group: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_state() {
        let state = InstanceState::ready("nginx");
        assert!(state.is_ready());
        assert!(!state.has_error());
        assert_eq!(state.current_replicas, 1);
        assert_eq!(state.desired_replicas, 1);
        assert_eq!(state.message, None);
    }

    #[test]
    fn ready_with_replicas_state() {
        let state = InstanceState::ready_with_replicas("nginx", 3);
        assert!(state.is_ready());
        assert_eq!(state.current_replicas, 3);
    }

    #[test]
    fn not_ready_state() {
        let state = InstanceState::not_ready("nginx");
        assert!(!state.is_ready());
        assert_eq!(state.status, InstanceStatus::NotReady);
        assert_eq!(state.current_replicas, 0);
        assert_eq!(state.desired_replicas, 1);
    }

    #[test]
    fn errored_state_carries_message() {
        let state = InstanceState::errored("nginx", "connection refused");
        assert!(state.has_error());
        assert!(!state.is_ready());
        assert_eq!(state.message.as_deref(), Some("connection refused"));
    }

    #[test]
    fn unrecoverable_is_not_error() {
        let state = InstanceState::unrecoverable("nginx", "exit code 1");
        assert_eq!(state.status, InstanceStatus::Unrecoverable);
        assert!(!state.has_error());
        assert!(!state.is_ready());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&InstanceStatus::NotReady).unwrap();
        assert_eq!(json, "\"not_ready\"");
    }
}
