//! Discovery sweep — stop auto-discovered workloads nobody asked for.
//!
//! Runs off the request path (at startup or on a timer): anything
//! running with the enable label that the session manager is not
//! currently tracking gets scaled back down. Without this, a workload
//! that was already running at boot would only scale to zero after a
//! first request armed its session.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use siesta_provider::{InstanceListOptions, Provider, LABEL_ENABLE};

/// Stop every discovered running instance whose name is not in
/// `registered`.
///
/// Every stop is attempted regardless of the others' outcomes; all
/// failures are collected and joined into one error after the last
/// attempt completes.
pub async fn stop_all_unregistered_instances(
    provider: Arc<dyn Provider>,
    registered: &[String],
) -> anyhow::Result<()> {
    info!("stopping all unregistered running instances");

    let discovered = provider
        .instance_list(InstanceListOptions {
            all: false, // only running instances
            labels: vec![LABEL_ENABLE.to_string()],
        })
        .await?;
    debug!(count = discovered.len(), label = LABEL_ENABLE, "discovered enabled instances");

    let registered: HashSet<&str> = registered.iter().map(String::as_str).collect();
    let unregistered: Vec<String> = discovered
        .into_iter()
        .map(|instance| instance.name)
        .filter(|name| !registered.contains(name.as_str()))
        .collect();

    let mut tasks = JoinSet::new();
    for name in unregistered {
        let provider = Arc::clone(&provider);
        tasks.spawn(async move {
            debug!(%name, "stopping unregistered instance");
            match provider.stop(&name).await {
                Ok(()) => None,
                Err(e) => {
                    warn!(%name, error = %e, "could not stop instance");
                    Some(format!("{name}: {e}"))
                }
            }
        });
    }

    let mut failures = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        if let Ok(Some(failure)) = joined {
            failures.push(failure);
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(anyhow!(
            "failed to stop {} instance(s): {}",
            failures.len(),
            failures.join("; ")
        ))
    }
}
