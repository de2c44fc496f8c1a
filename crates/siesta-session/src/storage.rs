//! File-backed persistence for session snapshots.
//!
//! Storage is optional: without a configured path every session is lost
//! on exit and workloads already running simply get re-tracked on their
//! next request. With one, `PeriodicSync` writes the manager's snapshot
//! on an interval and the application reloads it at startup.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{SessionError, SessionResult};
use crate::manager::SessionManager;

/// Optional file location for session snapshots.
pub struct FileStorage {
    path: Option<PathBuf>,
}

impl FileStorage {
    /// Configure storage; `None` disables persistence. With a path the
    /// file is created up front so a bad location fails at startup, not
    /// on the first sync.
    pub fn new(path: Option<PathBuf>) -> SessionResult<Self> {
        match &path {
            Some(p) => {
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(p)?;
                info!(path = %p.display(), "initialized session storage");
            }
            None => {
                warn!("no storage configured, sessions will be lost on exit");
            }
        }
        Ok(Self { path })
    }

    pub fn enabled(&self) -> bool {
        self.path.is_some()
    }

    /// Open the snapshot for reading.
    pub fn reader(&self) -> SessionResult<File> {
        match &self.path {
            Some(p) => Ok(OpenOptions::new().read(true).open(p)?),
            None => Err(SessionError::StorageDisabled),
        }
    }

    /// Open the snapshot for writing, truncating previous content.
    pub fn writer(&self) -> SessionResult<File> {
        match &self.path {
            Some(p) => Ok(OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(p)?),
            None => Err(SessionError::StorageDisabled),
        }
    }
}

/// Background task that saves the manager's sessions to storage every
/// interval until stopped. A failed write is logged and retried on the
/// next tick.
pub struct PeriodicSync {
    shutdown_tx: watch::Sender<bool>,
}

impl PeriodicSync {
    pub fn start(manager: SessionManager, storage: FileStorage, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = save(&manager, &storage) {
                            error!(error = %e, "could not sync sessions to storage");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("session sync shutting down");
                        break;
                    }
                }
            }
        });
        Self { shutdown_tx }
    }

    /// Stop the sync loop. Idempotent.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

fn save(manager: &SessionManager, storage: &FileStorage) -> SessionResult<()> {
    manager.save_sessions(storage.writer()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::SessionConfig;
    use siesta_provider::mock::MockProvider;
    use siesta_provider::InstanceState;
    use std::sync::Arc;

    fn fast_config() -> SessionConfig {
        SessionConfig::default().with_reap_interval(Duration::from_millis(10))
    }

    async fn ready_manager(name: &str) -> SessionManager {
        let provider = Arc::new(MockProvider::new());
        provider.set_state(InstanceState::ready(name));
        let manager = SessionManager::new(provider, fast_config()).await;
        manager
            .request_session(&[name.to_string()], Duration::from_secs(60))
            .await;
        manager
    }

    #[tokio::test]
    async fn disabled_storage_rejects_io() {
        let storage = FileStorage::new(None).unwrap();
        assert!(!storage.enabled());
        assert!(matches!(storage.reader(), Err(SessionError::StorageDisabled)));
        assert!(matches!(storage.writer(), Err(SessionError::StorageDisabled)));
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(Some(dir.path().join("sessions.json"))).unwrap();
        assert!(storage.enabled());

        let manager = ready_manager("nginx").await;
        manager.save_sessions(storage.writer().unwrap()).unwrap();
        manager.stop();

        let restored =
            SessionManager::new(Arc::new(MockProvider::new()), fast_config()).await;
        restored.load_sessions(storage.reader().unwrap()).unwrap();

        assert_eq!(restored.registered_names(), vec!["nginx".to_string()]);
        restored.stop();
    }

    #[tokio::test]
    async fn periodic_sync_writes_on_its_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sessions.json");
        let storage = FileStorage::new(Some(path.clone())).unwrap();

        let manager = ready_manager("nginx").await;
        let sync = PeriodicSync::start(manager.clone(), storage, Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;
        sync.stop();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("nginx"));
        manager.stop();
    }
}
