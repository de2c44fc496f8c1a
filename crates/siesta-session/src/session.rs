//! Session aggregation — the per-request readiness record.

use std::collections::HashMap;

use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;

use siesta_provider::{InstanceState, ProviderError};

/// Outcome for one requested name: the latest observed instance state
/// plus any provider failure recorded against this name alone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceResult {
    pub instance: InstanceState,
    #[serde(serialize_with = "error_as_message")]
    pub error: Option<ProviderError>,
}

fn error_as_message<S>(error: &Option<ProviderError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

/// The aggregate result of one session request.
///
/// Contains exactly one slot per requested name; population completes
/// before the caller gets hold of the value, so readers never observe a
/// partial session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    instances: HashMap<String, InstanceResult>,
}

impl SessionState {
    pub(crate) fn from_results(instances: HashMap<String, InstanceResult>) -> Self {
        Self { instances }
    }

    /// Per-name outcomes, keyed by requested name.
    pub fn instances(&self) -> &HashMap<String, InstanceResult> {
        &self.instances
    }

    /// The slot for one requested name.
    pub fn get(&self, name: &str) -> Option<&InstanceResult> {
        self.instances.get(name)
    }

    /// A session is ready iff every slot is error-free and its instance
    /// reports `Ready`. The full per-name record stays inspectable even
    /// when the aggregate is already known false.
    pub fn is_ready(&self) -> bool {
        self.instances
            .values()
            .all(|slot| slot.error.is_none() && slot.instance.is_ready())
    }

    pub fn status(&self) -> &'static str {
        if self.is_ready() { "ready" } else { "not-ready" }
    }
}

impl Serialize for SessionState {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("SessionState", 2)?;
        state.serialize_field("instances", &self.instances)?;
        state.serialize_field("status", self.status())?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siesta_provider::InstanceState;

    fn session_of(slots: Vec<InstanceResult>) -> SessionState {
        SessionState::from_results(
            slots
                .into_iter()
                .map(|slot| (slot.instance.name.clone(), slot))
                .collect(),
        )
    }

    fn ok(instance: InstanceState) -> InstanceResult {
        InstanceResult {
            instance,
            error: None,
        }
    }

    #[test]
    fn all_instances_ready() {
        let session = session_of(vec![
            ok(InstanceState::ready("nginx")),
            ok(InstanceState::ready("apache")),
        ]);
        assert!(session.is_ready());
        assert_eq!(session.status(), "ready");
    }

    #[test]
    fn one_instance_not_ready() {
        let session = session_of(vec![
            ok(InstanceState::ready("nginx")),
            ok(InstanceState::not_ready("apache")),
        ]);
        assert!(!session.is_ready());
        assert_eq!(session.status(), "not-ready");
    }

    #[test]
    fn no_instances_is_trivially_ready() {
        let session = session_of(vec![]);
        assert!(session.is_ready());
    }

    #[test]
    fn unrecoverable_instance_blocks_readiness() {
        let session = session_of(vec![
            ok(InstanceState::unrecoverable("nginx", "exit code 1")),
            ok(InstanceState::ready("apache")),
        ]);
        assert!(!session.is_ready());
    }

    #[test]
    fn slot_error_blocks_readiness_even_when_instance_reads_ready() {
        let session = session_of(vec![InstanceResult {
            instance: InstanceState::ready("nginx"),
            error: Some(ProviderError::Api("boom".to_string())),
        }]);
        assert!(!session.is_ready());
    }

    #[test]
    fn serializes_with_status_and_error_message() {
        let session = session_of(vec![InstanceResult {
            instance: InstanceState::not_ready("nginx"),
            error: Some(ProviderError::Api("boom".to_string())),
        }]);

        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["status"], "not-ready");
        assert_eq!(
            json["instances"]["nginx"]["error"],
            "backend api error: boom"
        );
        assert_eq!(json["instances"]["nginx"]["instance"]["status"], "not_ready");
    }
}
