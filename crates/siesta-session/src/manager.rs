//! SessionManager — fan-out session orchestration over a provider.
//!
//! One request carries a list of workload names and a desired session
//! lifetime. Each name is resolved by its own task: consult the
//! expiring store, call the provider when the cache cannot vouch for
//! readiness, and re-put the observed state so the inactivity clock
//! slides. The join over all tasks produces the aggregated
//! `SessionState`. When an entry expires, the store's callback stops
//! the workload through the provider.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use siesta_provider::{InstanceState, Provider};
use siesta_ttl::{ExpiryCallback, PersistedEntry, TtlStore};

use crate::error::{SessionError, SessionResult};
use crate::session::{InstanceResult, SessionState};

/// Buffer size for the instance-stopped notification channel.
const STOPPED_CHANNEL_CAPACITY: usize = 16;

/// Tuning knobs for a session manager.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Fallback wake-up period of the store's reclamation loop.
    pub reap_interval: Duration,
    /// How often the group map is refreshed from the provider.
    pub group_refresh_interval: Duration,
    /// Poll period while waiting for a session to become ready.
    pub ready_poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reap_interval: Duration::from_secs(20),
            group_refresh_interval: Duration::from_secs(2),
            ready_poll_interval: Duration::from_secs(5),
        }
    }
}

impl SessionConfig {
    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    pub fn with_group_refresh_interval(mut self, interval: Duration) -> Self {
        self.group_refresh_interval = interval;
        self
    }

    pub fn with_ready_poll_interval(mut self, interval: Duration) -> Self {
        self.ready_poll_interval = interval;
        self
    }
}

/// Orchestrates sessions across named workloads.
///
/// Cloning is cheap; clones share the store, the provider, and the
/// watched group map. The owner must call [`stop`](SessionManager::stop)
/// at shutdown.
#[derive(Clone)]
pub struct SessionManager {
    store: TtlStore<InstanceState>,
    provider: Arc<dyn Provider>,
    groups: Arc<RwLock<HashMap<String, Vec<String>>>>,
    config: SessionConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl SessionManager {
    /// Build a manager bound to `provider`.
    ///
    /// Creates the expiring store with its expiry callback wired to
    /// `provider.stop`, fetches the initial group map (a failure
    /// degrades to empty groups), and spawns the group and
    /// instance-stopped watchers.
    pub async fn new(provider: Arc<dyn Provider>, config: SessionConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let expiry_provider = Arc::clone(&provider);
        let on_expire: ExpiryCallback<InstanceState> = Arc::new(move |name, _state| {
            let provider = Arc::clone(&expiry_provider);
            Box::pin(async move {
                debug!(%name, "session expired, stopping instance");
                if let Err(e) = provider.stop(&name).await {
                    error!(%name, error = %e, "could not stop expired instance");
                }
            })
        });
        let store = TtlStore::with_expiry(config.reap_interval, on_expire);

        let groups = match provider.get_groups().await {
            Ok(groups) => groups,
            Err(e) => {
                warn!(error = %e, "could not fetch initial groups");
                HashMap::new()
            }
        };

        let manager = Self {
            store,
            provider,
            groups: Arc::new(RwLock::new(groups)),
            config,
            shutdown_tx,
        };
        manager.spawn_group_watcher(shutdown_rx.clone());
        manager.spawn_stop_watcher(shutdown_rx).await;
        manager
    }

    /// Ensure every name is running (or known running) and refresh each
    /// one's inactivity clock to `duration`.
    ///
    /// Fans out one task per name and joins on all of them; a failure
    /// for one name never delays or affects another. Returns once every
    /// slot is populated.
    pub async fn request_session(&self, names: &[String], duration: Duration) -> SessionState {
        let mut tasks = JoinSet::new();
        for name in names {
            let manager = self.clone();
            let name = name.clone();
            tasks.spawn(async move {
                let result = manager.request_instance(&name, duration).await;
                (name, result)
            });
        }

        let mut results = HashMap::with_capacity(names.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((name, result)) => {
                    results.insert(name, result);
                }
                Err(e) => error!(error = %e, "session task failed"),
            }
        }
        SessionState::from_results(results)
    }

    /// As [`request_session`](SessionManager::request_session), but
    /// block until every name is `Ready` or `timeout` elapses.
    ///
    /// On timeout the returned
    /// [`DeadlineExceeded`](SessionError::DeadlineExceeded) carries the
    /// best-known session so per-name detail stays inspectable.
    pub async fn request_ready_session(
        &self,
        names: &[String],
        duration: Duration,
        timeout: Duration,
    ) -> SessionResult<SessionState> {
        let deadline = Instant::now() + timeout;
        let mut session = self.request_session(names, duration).await;
        loop {
            if session.is_ready() {
                return Ok(session);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(SessionError::DeadlineExceeded { timeout, session });
            }
            tokio::time::sleep(self.config.ready_poll_interval.min(deadline - now)).await;
            session = self.request_session(names, duration).await;
        }
    }

    /// Request a session for every member of `group`.
    pub async fn request_session_group(
        &self,
        group: &str,
        duration: Duration,
    ) -> SessionResult<SessionState> {
        let names = self.group_members(group).await;
        if names.is_empty() {
            return Err(SessionError::EmptyGroup(group.to_string()));
        }
        Ok(self.request_session(&names, duration).await)
    }

    /// Ready-blocking variant of
    /// [`request_session_group`](SessionManager::request_session_group).
    pub async fn request_ready_session_group(
        &self,
        group: &str,
        duration: Duration,
        timeout: Duration,
    ) -> SessionResult<SessionState> {
        let names = self.group_members(group).await;
        if names.is_empty() {
            return Err(SessionError::EmptyGroup(group.to_string()));
        }
        self.request_ready_session(&names, duration, timeout).await
    }

    /// Current group map as refreshed by the group watcher.
    pub async fn groups(&self) -> HashMap<String, Vec<String>> {
        self.groups.read().await.clone()
    }

    /// Names currently tracked by the manager; feeds the discovery
    /// sweep.
    pub fn registered_names(&self) -> Vec<String> {
        self.store.keys()
    }

    /// Serialize all tracked sessions to `writer` as JSON.
    pub fn save_sessions<W: std::io::Write>(&self, writer: W) -> SessionResult<()> {
        serde_json::to_writer_pretty(writer, &self.store.snapshot())?;
        Ok(())
    }

    /// Load sessions from a JSON snapshot; entries already past their
    /// deadline are dropped rather than re-armed.
    pub fn load_sessions<R: std::io::Read>(&self, reader: R) -> SessionResult<()> {
        let snapshot: HashMap<String, PersistedEntry<InstanceState>> =
            serde_json::from_reader(reader)?;
        self.store.restore(snapshot);
        Ok(())
    }

    /// Shut down the watchers and the store's reclamation loop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        self.store.stop();
    }

    /// Ensure one workload is running and slide its inactivity clock.
    ///
    /// Cache-first: a stored `Ready` state is trusted without touching
    /// the provider, so warm workloads cost nothing on the request
    /// path. Anything else goes through start + authoritative state.
    async fn request_instance(&self, name: &str, duration: Duration) -> InstanceResult {
        if let Some(cached) = self.store.get(name) {
            if cached.is_ready() {
                self.store.put(name, cached.clone(), duration);
                return InstanceResult {
                    instance: cached,
                    error: None,
                };
            }
        }

        debug!(%name, "starting instance");
        let result = match self.provider.start(name).await {
            Ok(()) => match self.provider.get_state(name).await {
                Ok(state) => {
                    debug!(%name, status = ?state.status, "instance state checked");
                    InstanceResult {
                        instance: state,
                        error: None,
                    }
                }
                Err(e) => {
                    error!(%name, error = %e, "could not check instance state");
                    InstanceResult {
                        instance: InstanceState::errored(name, &e),
                        error: Some(e),
                    }
                }
            },
            Err(e) => {
                error!(%name, error = %e, "could not start instance");
                InstanceResult {
                    instance: InstanceState::errored(name, &e),
                    error: Some(e),
                }
            }
        };

        // Any touch resets the inactivity clock, error states included:
        // the cache-first path only ever trusts Ready, so errors are
        // re-evaluated fresh on the next request.
        self.store.put(name, result.instance.clone(), duration);
        result
    }

    async fn group_members(&self, group: &str) -> Vec<String> {
        self.groups.read().await.get(group).cloned().unwrap_or_default()
    }

    fn spawn_group_watcher(&self, mut shutdown: watch::Receiver<bool>) {
        let provider = Arc::clone(&self.provider);
        let groups = Arc::clone(&self.groups);
        let interval = self.config.group_refresh_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        match provider.get_groups().await {
                            Ok(latest) => *groups.write().await = latest,
                            Err(e) => warn!(error = %e, "could not refresh groups"),
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        });
    }

    /// Evict store entries for workloads stopped outside our control,
    /// whether by external sources or by the backend itself. Deleting
    /// an already-gone entry is a no-op.
    async fn spawn_stop_watcher(&self, mut shutdown: watch::Receiver<bool>) {
        let (tx, mut rx) = mpsc::channel(STOPPED_CHANNEL_CAPACITY);
        self.provider.notify_instance_stopped(tx).await;

        let store = self.store.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = rx.recv() => match received {
                        Some(name) => {
                            debug!(%name, "instance stopped externally, removing from store");
                            store.delete(&name);
                        }
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
        });
    }
}
