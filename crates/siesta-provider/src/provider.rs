//! The Provider trait — lifecycle contract for one backend integration.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::state::{Instance, InstanceState};

/// Label marking a workload as managed by siesta; only instances
/// carrying it are auto-discovered.
pub const LABEL_ENABLE: &str = "siesta.enable";

/// Label assigning a workload to a named group.
pub const LABEL_GROUP: &str = "siesta.group";

/// Label overriding the replica count a workload is woken to.
pub const LABEL_REPLICAS: &str = "siesta.replicas";

/// Group used when [`LABEL_GROUP`] is absent.
pub const DEFAULT_GROUP: &str = "default";

/// Replica count used when [`LABEL_REPLICAS`] is absent.
pub const DEFAULT_REPLICAS: u64 = 1;

/// Result type alias for provider calls.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors reported by a provider.
///
/// `Clone` so a failure can be recorded in a session slot and still be
/// handed back to the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("instance not found: {0}")]
    NotFound(String),

    #[error("backend api error: {0}")]
    Api(String),
}

/// Filters for [`Provider::instance_list`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceListOptions {
    /// Include stopped instances, not only running ones.
    pub all: bool,
    /// Label filters, e.g. [`LABEL_ENABLE`].
    pub labels: Vec<String>,
}

/// A pluggable backend that starts, stops, and observes named
/// workloads.
///
/// Calls are treated as atomic by the session layer: they either return
/// or fail, and are expected to bound their own lifetime. Nothing here
/// imposes a mid-call cancellation contract.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Start (scale up) the named workload. Idempotent for an already
    /// running workload.
    async fn start(&self, name: &str) -> ProviderResult<()>;

    /// Stop (scale to zero) the named workload.
    async fn stop(&self, name: &str) -> ProviderResult<()>;

    /// Report the authoritative current state of the named workload.
    async fn get_state(&self, name: &str) -> ProviderResult<InstanceState>;

    /// Map of group name to member workload names, as declared through
    /// backend labels.
    async fn get_groups(&self) -> ProviderResult<HashMap<String, Vec<String>>>;

    /// List auto-discoverable workloads matching `options`.
    async fn instance_list(&self, options: InstanceListOptions) -> ProviderResult<Vec<Instance>>;

    /// Hand the provider a sink on which it pushes the name of any
    /// workload that stops outside this system's control.
    async fn notify_instance_stopped(&self, sink: mpsc::Sender<String>);
}
