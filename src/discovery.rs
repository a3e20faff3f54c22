//! Discovery reconciler (C7).
//!
//! Periodic task that enumerates attached capture devices and registers any that are not
//! yet in the registered set. Never removes devices — that is the concern of C8/C9/C10 or
//! shutdown.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, ConfigStore};
use crate::device::{self, EnumeratedDevice};
use crate::fingerprint;
use crate::registered_set::RegisteredSet;
use crate::registry::Registry;
use crate::stream_manager::StreamManager;
use crate::transcoder::TranscoderSpec;
use crate::utils::LogThrottler;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

pub struct DiscoveryContext {
    pub config_store: Arc<ConfigStore>,
    pub registry: Arc<Registry>,
    pub registered_set: Arc<RegisteredSet>,
    pub lock_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub binary: PathBuf,
    pub rtsp_base_url: String,
    pub enumerate_throttle: LogThrottler,
}

/// Build the fully-materialized `TranscoderSpec` + fingerprint for a device under the
/// current configuration. Validates the merged per-device config — an override like
/// `channels: 99` passes `merge_override`'s non-zero filter but is still out of range —
/// so a device can only reach the registry with a config the transcoder can actually use.
pub fn materialize(
    config: &AppConfig,
    device: &EnumeratedDevice,
    rtsp_base_url: &str,
) -> Result<(TranscoderSpec, String), String> {
    let sanitized = device.sanitized_name();
    let effective = config.devices.effective_for(&device.raw_name);
    effective.validate()?;

    let capture_uri = device.capture_uri();
    let output_url = format!("{}/{}", rtsp_base_url.trim_end_matches('/'), sanitized);

    let fp = fingerprint::compute(&effective, &capture_uri, &config.stream);

    let spec = TranscoderSpec {
        device_name: sanitized,
        capture_uri,
        output_url,
        device: effective,
        stream: config.stream.clone(),
    };
    Ok((spec, fp))
}

async fn reconcile_once(ctx: &DiscoveryContext, cancel: &CancellationToken) {
    let devices = device::enumerate_or_log(&ctx.enumerate_throttle);
    reconcile_devices(ctx, devices, cancel).await;
}

/// Register every not-yet-registered device in `devices`. Split out from `reconcile_once`
/// so the registration/validation logic can be exercised without a real capture bus.
async fn reconcile_devices(ctx: &DiscoveryContext, devices: Vec<EnumeratedDevice>, cancel: &CancellationToken) {
    let config = ctx.config_store.get();

    for device in devices {
        let name = device.sanitized_name();
        if ctx.registered_set.is_registered(&name).await {
            continue;
        }

        tokio::select! {
            _ = tokio::time::sleep(config.stream.usb_stabilization_delay()) => {}
            _ = cancel.cancelled() => return,
        }

        let (spec, fp) = match materialize(&config, &device, &ctx.rtsp_base_url) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(device = %name, error = %e, "invalid effective device config, skipping");
                continue;
            }
        };
        let manager = Arc::new(StreamManager::new(
            name.clone(),
            ctx.lock_dir.clone(),
            ctx.log_dir.clone(),
            ctx.binary.clone(),
            spec,
            config.stream.clone(),
        ));

        if let Err(e) = ctx.registry.add(manager).await {
            tracing::warn!(device = %name, error = %e, "failed to register device");
            continue;
        }

        ctx.registered_set.mark_registered(&name, fp).await;
        tracing::info!(device = %name, "registered device");
    }
}

/// Run the discovery reconciler until `cancel` fires. `run_once` performs the initial
/// synchronous registration pass the orchestrator runs before launching other tasks.
pub async fn run(ctx: DiscoveryContext, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; orchestrator already ran once

    loop {
        tokio::select! {
            _ = ticker.tick() => reconcile_once(&ctx, &cancel).await,
            _ = cancel.cancelled() => return,
        }
    }
}

pub async fn run_once(ctx: &DiscoveryContext, cancel: &CancellationToken) {
    reconcile_once(ctx, cancel).await;
}
