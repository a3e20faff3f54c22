//! Root orchestrator (C12).
//!
//! Wires every component to one cancellation scope: resolves the transcoder binary,
//! instantiates the registry, runs discovery once synchronously for the initial
//! registration pass, then launches the ancillary reconcilers as independent tasks and
//! blocks in the foreground on `registry.run(ctx)`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::ConfigStore;
use crate::discovery::{self, DiscoveryContext};
use crate::error::Result;
use crate::health;
use crate::mediarouter::MediaRouterClient;
use crate::recovery::{self, RecoveryContext};
use crate::registered_set::RegisteredSet;
use crate::registry::Registry;
use crate::reload::{self, ReloadContext};
use crate::retention;
use crate::stall::{self, StallDetectorContext};
use crate::transcoder;
use crate::utils::LogThrottler;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
const RECOVERY_INTERVAL: Duration = Duration::from_secs(300);

pub struct OrchestratorArgs {
    pub config_store: Arc<ConfigStore>,
    pub lock_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub rtsp_base_url: String,
}

pub async fn run(args: OrchestratorArgs, root_cancel: CancellationToken) -> Result<()> {
    let config_store = args.config_store;
    let config = config_store.get();

    let binary = transcoder::resolve_binary(&config.transcoder.binary_path)?;

    let registry = Arc::new(Registry::new(root_cancel.clone(), SHUTDOWN_TIMEOUT));
    let registered_set = Arc::new(RegisteredSet::new());

    let discovery_ctx = DiscoveryContext {
        config_store: config_store.clone(),
        registry: registry.clone(),
        registered_set: registered_set.clone(),
        lock_dir: args.lock_dir.clone(),
        log_dir: args.log_dir.clone(),
        binary: binary.clone(),
        rtsp_base_url: args.rtsp_base_url.clone(),
        enumerate_throttle: LogThrottler::default(),
    };

    discovery::run_once(&discovery_ctx, &root_cancel).await;

    let discovery_cancel = root_cancel.child_token();
    tokio::spawn(discovery::run(discovery_ctx, discovery::DEFAULT_INTERVAL, discovery_cancel));

    let reload_ctx = ReloadContext {
        config_store: config_store.clone(),
        registry: registry.clone(),
        registered_set: registered_set.clone(),
        rtsp_base_url: args.rtsp_base_url.clone(),
        enumerate_throttle: LogThrottler::default(),
    };
    let reload_cancel = root_cancel.child_token();
    tokio::spawn(reload::run(reload_ctx, reload_cancel));

    if config.monitor.enabled {
        let client = MediaRouterClient::new(&config.media_router)?;
        let stall_ctx = StallDetectorContext {
            config_store: config_store.clone(),
            registry: registry.clone(),
            registered_set: registered_set.clone(),
            client,
            query_throttle: LogThrottler::default(),
        };
        let stall_cancel = root_cancel.child_token();
        tokio::spawn(stall::run(stall_ctx, stall_cancel));
    }

    let recovery_ctx = RecoveryContext {
        registry: registry.clone(),
        registered_set: registered_set.clone(),
    };
    let recovery_cancel = root_cancel.child_token();
    tokio::spawn(recovery::run(recovery_ctx, RECOVERY_INTERVAL, recovery_cancel));

    let retention_store = config_store.clone();
    let retention_cancel = root_cancel.child_token();
    tokio::spawn(retention::run(
        move || retention_store.get().stream.clone(),
        retention_cancel,
    ));

    let health_state = Arc::new(health::HealthState {
        registry: registry.clone(),
        started_at: std::time::Instant::now(),
        recording_dir: config.stream.recording_dir().map(PathBuf::from),
    });
    let health_bind_addr = config.monitor.health_bind_addr.clone();
    let health_cancel = root_cancel.child_token();
    tokio::spawn(async move {
        let router = health::router(health_state);
        match tokio::net::TcpListener::bind(&health_bind_addr).await {
            Ok(listener) => {
                let server = axum::serve(listener, router).with_graceful_shutdown(async move {
                    health_cancel.cancelled().await;
                });
                if let Err(e) = server.await {
                    tracing::warn!(error = %e, "health server exited with error");
                }
            }
            Err(e) => {
                tracing::warn!(addr = %health_bind_addr, error = %e, "failed to bind health server");
            }
        }
    });

    registry.run(root_cancel).await
}
