//! siesta-provider — the pluggable backend contract.
//!
//! A [`Provider`] starts, stops, and reports the state of named
//! workloads (containers, services, replica-controlled units). The
//! session layer consumes this trait only; concrete integrations
//! against container engines or orchestrators live elsewhere and
//! implement it.
//!
//! Also home to the [`InstanceState`] model shared across the
//! workspace and to [`mock::MockProvider`], the scriptable test double.

pub mod mock;
pub mod provider;
pub mod state;

pub use provider::{
    InstanceListOptions, Provider, ProviderError, ProviderResult, DEFAULT_GROUP,
    DEFAULT_REPLICAS, LABEL_ENABLE, LABEL_GROUP, LABEL_REPLICAS,
};
pub use state::{Instance, InstanceState, InstanceStatus};
