//! Scriptable in-memory provider, used by tests across the workspace.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::provider::{InstanceListOptions, Provider, ProviderError, ProviderResult};
use crate::state::{Instance, InstanceState};

#[derive(Default)]
struct Inner {
    states: HashMap<String, InstanceState>,
    groups: HashMap<String, Vec<String>>,
    discovered: Vec<Instance>,
    fail_start: HashSet<String>,
    fail_stop: HashSet<String>,
    start_delays: HashMap<String, Duration>,
    started: Vec<String>,
    stopped: Vec<String>,
    stopped_sink: Option<mpsc::Sender<String>>,
}

/// A [`Provider`] whose behavior is scripted per name: canned states,
/// injected failures, artificial start latency, canned groups and
/// discovery results. Every start/stop call is recorded.
#[derive(Default)]
pub struct MockProvider {
    inner: Mutex<Inner>,
}

// Interface guard.
const _: () = {
    const fn assert_provider<P: Provider>() {}
    assert_provider::<MockProvider>();
};

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the state reported for `state.name`.
    pub fn set_state(&self, state: InstanceState) {
        let name = state.name.clone();
        self.lock().states.insert(name, state);
    }

    pub fn set_groups(&self, groups: HashMap<String, Vec<String>>) {
        self.lock().groups = groups;
    }

    pub fn set_discovered(&self, instances: Vec<Instance>) {
        self.lock().discovered = instances;
    }

    /// Make `start(name)` fail with an api error.
    pub fn fail_start(&self, name: &str) {
        self.lock().fail_start.insert(name.to_string());
    }

    /// Make `stop(name)` fail with an api error.
    pub fn fail_stop(&self, name: &str) {
        self.lock().fail_stop.insert(name.to_string());
    }

    /// Delay `start(name)` by `delay` before it resolves.
    pub fn set_start_delay(&self, name: &str, delay: Duration) {
        self.lock().start_delays.insert(name.to_string(), delay);
    }

    /// Names passed to `start`, in call order.
    pub fn started(&self) -> Vec<String> {
        self.lock().started.clone()
    }

    /// Names passed to `stop`, in call order.
    pub fn stopped(&self) -> Vec<String> {
        self.lock().stopped.clone()
    }

    /// Push `name` through the sink registered via
    /// `notify_instance_stopped`, simulating an external stop.
    pub async fn emit_stopped(&self, name: &str) {
        let sink = self.lock().stopped_sink.clone();
        if let Some(sink) = sink {
            let _ = sink.send(name.to_string()).await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn start(&self, name: &str) -> ProviderResult<()> {
        let delay = self.lock().start_delays.get(name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut inner = self.lock();
        inner.started.push(name.to_string());
        if inner.fail_start.contains(name) {
            return Err(ProviderError::Api(format!("cannot start {name}")));
        }
        if !inner.states.contains_key(name) {
            inner
                .states
                .insert(name.to_string(), InstanceState::not_ready(name));
        }
        Ok(())
    }

    async fn stop(&self, name: &str) -> ProviderResult<()> {
        let mut inner = self.lock();
        inner.stopped.push(name.to_string());
        if inner.fail_stop.contains(name) {
            return Err(ProviderError::Api(format!("cannot stop {name}")));
        }
        inner
            .states
            .insert(name.to_string(), InstanceState::not_ready_with_replicas(name, 0, 0));
        Ok(())
    }

    async fn get_state(&self, name: &str) -> ProviderResult<InstanceState> {
        self.lock()
            .states
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(name.to_string()))
    }

    async fn get_groups(&self) -> ProviderResult<HashMap<String, Vec<String>>> {
        Ok(self.lock().groups.clone())
    }

    async fn instance_list(&self, _options: InstanceListOptions) -> ProviderResult<Vec<Instance>> {
        Ok(self.lock().discovered.clone())
    }

    async fn notify_instance_stopped(&self, sink: mpsc::Sender<String>) {
        self.lock().stopped_sink = Some(sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_records_and_defaults_to_not_ready() {
        let provider = MockProvider::new();

        provider.start("nginx").await.unwrap();
        assert_eq!(provider.started(), vec!["nginx".to_string()]);

        let state = provider.get_state("nginx").await.unwrap();
        assert_eq!(state, InstanceState::not_ready("nginx"));
    }

    #[tokio::test]
    async fn scripted_state_wins_over_default() {
        let provider = MockProvider::new();
        provider.set_state(InstanceState::ready("nginx"));

        provider.start("nginx").await.unwrap();
        let state = provider.get_state("nginx").await.unwrap();
        assert!(state.is_ready());
    }

    #[tokio::test]
    async fn injected_start_failure() {
        let provider = MockProvider::new();
        provider.fail_start("nginx");

        let err = provider.start("nginx").await.unwrap_err();
        assert!(matches!(err, ProviderError::Api(_)));
        // The attempt is still recorded.
        assert_eq!(provider.started(), vec!["nginx".to_string()]);
    }

    #[tokio::test]
    async fn get_state_for_unknown_name_is_not_found() {
        let provider = MockProvider::new();
        let err = provider.get_state("ghost").await.unwrap_err();
        assert_eq!(err, ProviderError::NotFound("ghost".to_string()));
    }

    #[tokio::test]
    async fn emit_stopped_reaches_registered_sink() {
        let provider = MockProvider::new();
        let (tx, mut rx) = mpsc::channel(4);

        provider.notify_instance_stopped(tx).await;
        provider.emit_stopped("nginx").await;

        assert_eq!(rx.recv().await.as_deref(), Some("nginx"));
    }
}
