//! Config reload reconciler (C8).
//!
//! Triggered by the store's `ConfigChange` broadcast (itself fired by a SIGHUP-driven
//! `ConfigStore::reload()`). Recomputes each registered device's fingerprint under the new
//! configuration; only devices whose fingerprint actually changed are removed, so the next
//! discovery tick re-registers them with the fresh parameters. Unaffected streams are left
//! running uninterrupted.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::ConfigStore;
use crate::device;
use crate::discovery::materialize;
use crate::registered_set::RegisteredSet;
use crate::registry::Registry;
use crate::utils::LogThrottler;

pub struct ReloadContext {
    pub config_store: Arc<ConfigStore>,
    pub registry: Arc<Registry>,
    pub registered_set: Arc<RegisteredSet>,
    pub rtsp_base_url: String,
    pub enumerate_throttle: LogThrottler,
}

async fn reconcile_once(ctx: &ReloadContext) {
    let devices = device::enumerate_or_log(&ctx.enumerate_throttle);
    reconcile_devices(ctx, &devices).await;
}

/// Recompute fingerprints for every currently-registered device still present in
/// `devices`, tearing down any whose effective configuration changed or became invalid.
/// Split out from `reconcile_once` so this can be tested without a real capture bus.
async fn reconcile_devices(ctx: &ReloadContext, devices: &[device::EnumeratedDevice]) {
    let config = ctx.config_store.get();
    let names = ctx.registered_set.registered_names().await;

    for name in names {
        let Some(enumerated) = device::find_by_sanitized_name(devices, &name) else {
            continue;
        };

        let old_fp = ctx.registered_set.fingerprint(&name).await;

        match materialize(&config, enumerated, &ctx.rtsp_base_url) {
            Ok((_, new_fp)) => {
                if old_fp.as_deref() == Some(new_fp.as_str()) {
                    continue;
                }
                tracing::info!(device = %name, "configuration changed, restarting stream");
            }
            Err(e) => {
                tracing::warn!(device = %name, error = %e, "config reload produced an invalid effective device config, removing stream");
            }
        }

        ctx.registry.remove(&name).await;
        ctx.registered_set.unregister(&name).await;
    }
}

/// Run the reload reconciler, waking on every `ConfigStore` change notification until
/// `cancel` fires.
pub async fn run(ctx: ReloadContext, cancel: CancellationToken) {
    let mut changes = ctx.config_store.subscribe();
    loop {
        tokio::select! {
            result = changes.recv() => {
                match result {
                    Ok(_) => reconcile_once(&ctx).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                        reconcile_once(&ctx).await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
            _ = cancel.cancelled() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::EnumeratedDevice;
    use std::time::Duration;
    use tempfile::tempdir;

    fn store_with(yaml: &str, dir: &std::path::Path) -> Arc<ConfigStore> {
        let path = dir.join("config.yaml");
        std::fs::write(&path, yaml).unwrap();
        Arc::new(ConfigStore::load(&path, "LYREBIRD_RELOAD_TEST_").unwrap())
    }

    fn device(raw_name: &str, hw_index: i32) -> EnumeratedDevice {
        EnumeratedDevice {
            raw_name: raw_name.to_string(),
            hw_index,
        }
    }

    fn ctx(config_store: Arc<ConfigStore>) -> ReloadContext {
        ReloadContext {
            config_store,
            registry: Arc::new(Registry::new(CancellationToken::new(), Duration::from_secs(1))),
            registered_set: Arc::new(RegisteredSet::new()),
            rtsp_base_url: "rtsp://localhost:8554".to_string(),
            enumerate_throttle: LogThrottler::default(),
        }
    }

    #[tokio::test]
    async fn unchanged_fingerprint_leaves_stream_registered() {
        let dir = tempdir().unwrap();
        let store = store_with("{}\n", dir.path());
        let ctx = ctx(store.clone());
        let dev = device("Blue Yeti", 0);

        let (_, fp) = materialize(&store.get(), &dev, &ctx.rtsp_base_url).unwrap();
        ctx.registered_set.mark_registered("blue_yeti", fp).await;

        reconcile_devices(&ctx, std::slice::from_ref(&dev)).await;

        assert!(ctx.registered_set.is_registered("blue_yeti").await);
    }

    #[tokio::test]
    async fn changed_bitrate_unregisters_stream_for_discovery_to_pick_up() {
        let dir = tempdir().unwrap();
        let store = store_with("{}\n", dir.path());
        let ctx = ctx(store.clone());
        let dev = device("Blue Yeti", 0);

        let (_, old_fp) = materialize(&store.get(), &dev, &ctx.rtsp_base_url).unwrap();
        ctx.registered_set.mark_registered("blue_yeti", old_fp).await;

        // Reload under a configuration that changes the device's effective bitrate.
        let store2 = store_with(
            "devices:\n  default:\n    bitrate: \"192k\"\n",
            dir.path(),
        );
        let ctx2 = ReloadContext {
            config_store: store2,
            ..ctx
        };

        reconcile_devices(&ctx2, std::slice::from_ref(&dev)).await;

        assert!(!ctx2.registered_set.is_registered("blue_yeti").await);
    }

    #[tokio::test]
    async fn config_made_invalid_on_reload_unregisters_stream() {
        let dir = tempdir().unwrap();
        let store = store_with("{}\n", dir.path());
        let ctx = ctx(store.clone());
        let dev = device("Bad Mic", 0);

        let (_, fp) = materialize(&store.get(), &dev, &ctx.rtsp_base_url).unwrap();
        ctx.registered_set.mark_registered("bad_mic", fp).await;

        let store2 = store_with(
            "devices:\n  entries:\n    Bad Mic:\n      channels: 99\n",
            dir.path(),
        );
        let ctx2 = ReloadContext {
            config_store: store2,
            ..ctx
        };

        reconcile_devices(&ctx2, std::slice::from_ref(&dev)).await;

        assert!(!ctx2.registered_set.is_registered("bad_mic").await);
    }

    #[tokio::test]
    async fn device_no_longer_present_is_left_untouched() {
        let dir = tempdir().unwrap();
        let store = store_with("{}\n", dir.path());
        let ctx = ctx(store.clone());

        ctx.registered_set
            .mark_registered("unplugged", "fp".to_string())
            .await;

        reconcile_devices(&ctx, &[]).await;

        assert!(ctx.registered_set.is_registered("unplugged").await);
    }
}
