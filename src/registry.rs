//! Supervisor registry (C6) — a generic named-service registry with its own crash-safety
//! net, sitting above each service's internal retry policy. Grounded in the teacher's
//! `ExtensionManager` (named processes behind an `RwLock<HashMap<_, _>>`), generalized
//! from a fixed enum of extensions to arbitrary named services and given a single
//! `Run(ctx)`-until-cancelled lifecycle instead of ad hoc start/stop calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};

/// Crash-safety-net backoff between re-invocations of a service's `run` after it returns
/// without the registry having cancelled it.
const CRASH_RESTART_DELAY: Duration = Duration::from_secs(1);

/// Minimal capability a registered service must provide.
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    /// Run until `cancel` fires, or return early to signal a crash (non-cancellation
    /// return) or a terminal failure (`Err(AppError::MaxAttemptsExceeded { .. })`, which
    /// the registry records as `failed` and stops restarting).
    async fn run(&self, cancel: CancellationToken) -> Result<()>;

    /// Live count of restarts the service has driven internally during its current
    /// `run` invocation (e.g. a Stream Manager's own backoff retries between launch
    /// attempts). Defaults to 0 for services with no internal retry loop of their own.
    /// The registry adds this on top of its own crash-safety-net restart count, since a
    /// service that loops internally across every attempt only ever returns once.
    fn restarts(&self) -> u32 {
        0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Running,
    Failed,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct ServiceStatus {
    pub name: String,
    pub state: ServiceState,
    pub start_time: Instant,
    pub restarts: u32,
    pub last_error: Option<String>,
}

type SharedStatus = Arc<parking_lot::Mutex<ServiceStatus>>;

struct Entry {
    service: Arc<dyn Service>,
    cancel: CancellationToken,
    handle: Option<tokio::task::JoinHandle<()>>,
    status: SharedStatus,
}

/// A generic named-service registry. `Run` is single-entry; all entry-map mutation is
/// serialized by one mutex which per-service run loops never hold across `await`.
pub struct Registry {
    entries: Mutex<HashMap<String, Entry>>,
    root_cancel: CancellationToken,
    shutdown_timeout: Duration,
    running: std::sync::atomic::AtomicBool,
}

impl Registry {
    pub fn new(root_cancel: CancellationToken, shutdown_timeout: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            root_cancel,
            shutdown_timeout,
            running: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Register a service. Rejects duplicate names. If the registry is already running,
    /// the service is launched immediately.
    pub async fn add(&self, service: Arc<dyn Service>) -> Result<()> {
        let name = service.name().to_string();
        let mut entries = self.entries.lock().await;
        if entries.contains_key(&name) {
            return Err(AppError::DuplicateService(name));
        }

        let cancel = self.root_cancel.child_token();
        let status: SharedStatus = Arc::new(parking_lot::Mutex::new(ServiceStatus {
            name: name.clone(),
            state: ServiceState::Running,
            start_time: Instant::now(),
            restarts: 0,
            last_error: None,
        }));

        let handle = if self.running.load(std::sync::atomic::Ordering::SeqCst) {
            Some(spawn_supervised(service.clone(), cancel.clone(), status.clone()))
        } else {
            None
        };

        entries.insert(
            name,
            Entry {
                service,
                cancel,
                handle,
                status,
            },
        );
        Ok(())
    }

    /// Cancel and remove a service's entry, waiting up to a bounded per-service timeout
    /// for its run loop to return.
    pub async fn remove(&self, name: &str) {
        let entry = {
            let mut entries = self.entries.lock().await;
            entries.remove(name)
        };

        if let Some(entry) = entry {
            entry.cancel.cancel();
            if let Some(handle) = entry.handle {
                let _ = tokio::time::timeout(self.shutdown_timeout, handle).await;
            }
        }
    }

    /// Launch every registered service and block until `ctx` (the root cancellation) is
    /// cancelled, then tear every service down within `shutdownTimeout`.
    pub async fn run(&self, ctx: CancellationToken) -> Result<()> {
        if self
            .running
            .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            return Err(AppError::AlreadyRunning);
        }

        {
            let mut entries = self.entries.lock().await;
            for entry in entries.values_mut() {
                if entry.handle.is_none() {
                    entry.handle = Some(spawn_supervised(
                        entry.service.clone(),
                        entry.cancel.clone(),
                        entry.status.clone(),
                    ));
                }
            }
        }

        ctx.cancelled().await;

        let handles: Vec<_> = {
            let mut entries = self.entries.lock().await;
            entries
                .values_mut()
                .map(|entry| {
                    entry.cancel.cancel();
                    entry.handle.take()
                })
                .collect()
        };

        let mut timed_out = false;
        for handle in handles.into_iter().flatten() {
            if tokio::time::timeout(self.shutdown_timeout, handle)
                .await
                .is_err()
            {
                timed_out = true;
            }
        }

        if timed_out {
            return Err(AppError::ShutdownTimeoutExceeded);
        }
        Ok(())
    }

    /// Point-in-time snapshot of every registered service. `restarts` combines the
    /// registry's own crash-safety-net count with the service's live internal count, so a
    /// service that loops through every backoff attempt inside a single `run` call (like a
    /// Stream Manager) still reports its in-progress restarts without having to return.
    pub async fn status(&self) -> Vec<ServiceStatus> {
        self.entries
            .lock()
            .await
            .values()
            .map(|e| {
                let mut status = e.status.lock().clone();
                status.restarts += e.service.restarts();
                status
            })
            .collect()
    }

    pub async fn service_count(&self) -> usize {
        self.entries.lock().await.len()
    }
}

fn spawn_supervised(
    service: Arc<dyn Service>,
    cancel: CancellationToken,
    status: SharedStatus,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let result = service.run(cancel.clone()).await;
            if cancel.is_cancelled() {
                status.lock().state = ServiceState::Stopped;
                return;
            }
            match result {
                Err(AppError::MaxAttemptsExceeded { name, last_error }) => {
                    tracing::warn!(service = %name, error = %last_error, "service gave up, parking as failed");
                    let mut status = status.lock();
                    status.state = ServiceState::Failed;
                    status.last_error = Some(last_error);
                    return;
                }
                Err(e) => {
                    tracing::warn!(service = %service.name(), error = %e, "service crashed, restarting");
                    let mut status = status.lock();
                    status.restarts += 1;
                    status.last_error = Some(e.to_string());
                }
                Ok(()) => {
                    tracing::warn!(service = %service.name(), "service returned without cancellation, restarting");
                    status.lock().restarts += 1;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(CRASH_RESTART_DELAY) => {}
                _ = cancel.cancelled() => {
                    status.lock().state = ServiceState::Stopped;
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        name: String,
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Service for Counting {
        fn name(&self) -> &str {
            &self.name
        }

        async fn run(&self, cancel: CancellationToken) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            cancel.cancelled().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn add_then_remove_on_idle_registry_leaves_count_unchanged() {
        let root = CancellationToken::new();
        let registry = Registry::new(root, Duration::from_secs(1));
        let before = registry.service_count().await;

        let runs = Arc::new(AtomicUsize::new(0));
        let svc = Arc::new(Counting {
            name: "svc".to_string(),
            runs,
        });
        registry.add(svc).await.unwrap();
        registry.remove("svc").await;

        assert_eq!(registry.service_count().await, before);
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let root = CancellationToken::new();
        let registry = Registry::new(root, Duration::from_secs(1));
        let runs = Arc::new(AtomicUsize::new(0));
        registry
            .add(Arc::new(Counting {
                name: "svc".to_string(),
                runs: runs.clone(),
            }))
            .await
            .unwrap();
        let result = registry
            .add(Arc::new(Counting {
                name: "svc".to_string(),
                runs,
            }))
            .await;
        assert!(matches!(result, Err(AppError::DuplicateService(_))));
    }

    #[tokio::test]
    async fn run_stops_within_shutdown_timeout_after_root_cancel() {
        let root = CancellationToken::new();
        let registry = Arc::new(Registry::new(root.clone(), Duration::from_secs(2)));

        let runs = Arc::new(AtomicUsize::new(0));
        registry
            .add(Arc::new(Counting {
                name: "svc".to_string(),
                runs,
            }))
            .await
            .unwrap();

        let registry2 = registry.clone();
        let handle = tokio::spawn(async move { registry2.run(root.clone()).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.root_cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn second_run_call_fails_already_running() {
        let root = CancellationToken::new();
        let registry = Arc::new(Registry::new(root.clone(), Duration::from_secs(1)));
        let registry2 = registry.clone();
        let root2 = root.clone();
        let handle = tokio::spawn(async move { registry2.run(root2).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = registry.run(root.clone()).await;
        assert!(matches!(second, Err(AppError::AlreadyRunning)));

        root.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }
}
