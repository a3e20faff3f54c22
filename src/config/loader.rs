//! YAML file + environment-variable configuration loading.
//!
//! Adapted from the teacher's `ConfigStore` (`ArcSwap` cache + `broadcast` change
//! notification); SQLite persistence is replaced with a YAML file plus a documented
//! environment-variable override mapping, since this system has no admin database.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::broadcast;

use super::schema::{AppConfig, Codec, DeviceConfigOverride};
use crate::error::{AppError, Result};

/// Default environment-variable prefix (see `--env-prefix`).
pub const DEFAULT_ENV_PREFIX: &str = "LYREBIRD_";

/// Notification sent on every successful load (startup or reload).
#[derive(Debug, Clone)]
pub struct ConfigChange;

/// Holds the current configuration behind a lock-free `ArcSwap`, with a YAML file as the
/// source of truth and environment variables applied as overrides on every load.
pub struct ConfigStore {
    path: PathBuf,
    env_prefix: String,
    cache: ArcSwap<AppConfig>,
    change_tx: broadcast::Sender<ConfigChange>,
}

impl ConfigStore {
    /// Load `path`, apply env overrides, validate, and construct the store. Fatal on any
    /// failure — this is only ever called once at startup.
    pub fn load(path: &Path, env_prefix: &str) -> Result<Self> {
        let config = load_and_validate(path, env_prefix, AppError::ConfigInvalidStartup)?;
        let (change_tx, _) = broadcast::channel(16);
        Ok(Self {
            path: path.to_path_buf(),
            env_prefix: env_prefix.to_string(),
            cache: ArcSwap::from_pointee(config),
            change_tx,
        })
    }

    /// Lock-free read of the current configuration.
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.load_full()
    }

    /// Reload from disk + env. On failure the previous configuration is retained and the
    /// error is returned for the caller to log; the store itself is left untouched.
    pub fn reload(&self) -> Result<()> {
        let config = load_and_validate(&self.path, &self.env_prefix, AppError::ConfigInvalidReload)?;
        self.cache.store(Arc::new(config));
        let _ = self.change_tx.send(ConfigChange);
        Ok(())
    }

    /// Subscribe to reload notifications (including the reload reconciler's own trigger).
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigChange> {
        self.change_tx.subscribe()
    }
}

fn load_and_validate(
    path: &Path,
    env_prefix: &str,
    wrap_err: impl Fn(String) -> AppError,
) -> Result<AppConfig> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        wrap_err(format!("failed to read config file {}: {e}", path.display()))
    })?;
    let mut config: AppConfig =
        serde_yaml::from_str(&text).map_err(|e| wrap_err(format!("failed to parse YAML: {e}")))?;

    apply_env_overrides(&mut config, env_prefix);

    config.validate().map_err(wrap_err)?;
    Ok(config)
}

/// Apply environment-variable overrides onto an already-loaded `AppConfig`.
///
/// Env path-keys use a documented mapping: `<PREFIX>DEVICES_DEFAULT_<FIELD>`,
/// `<PREFIX>DEVICES_ENTRIES_<DEVNAME>_<FIELD>`, `<PREFIX>STREAM_<FIELD>`,
/// `<PREFIX>MONITOR_<FIELD>`, `<PREFIX>MEDIA_ROUTER_<FIELD>`, `<PREFIX>TRANSCODER_<FIELD>`.
/// `<DEVNAME>` is matched against the raw (not sanitized) device name as it will appear
/// in `devices.entries`.
pub fn apply_env_overrides(config: &mut AppConfig, prefix: &str) {
    for (key, value) in std::env::vars() {
        let Some(rest) = key.strip_prefix(prefix) else {
            continue;
        };
        apply_one_override(config, rest, &value);
    }
}

fn apply_one_override(config: &mut AppConfig, key: &str, value: &str) {
    if let Some(field) = key.strip_prefix("DEVICES_DEFAULT_") {
        apply_device_field(&mut config.devices.default, field, value);
        return;
    }

    if let Some(rest) = key.strip_prefix("DEVICES_ENTRIES_") {
        for field in DEVICE_FIELDS {
            let suffix = format!("_{field}");
            if let Some(name) = rest.strip_suffix(suffix.as_str()) {
                let entry = config
                    .devices
                    .entries
                    .entry(name.to_string())
                    .or_insert_with(DeviceConfigOverride::default);
                apply_device_override_field(entry, field, value);
                return;
            }
        }
        return;
    }

    if let Some(field) = key.strip_prefix("STREAM_") {
        apply_stream_field(&mut config.stream, field, value);
        return;
    }

    if let Some(field) = key.strip_prefix("MONITOR_") {
        apply_monitor_field(&mut config.monitor, field, value);
        return;
    }

    if let Some(field) = key.strip_prefix("MEDIA_ROUTER_") {
        apply_media_router_field(&mut config.media_router, field, value);
        return;
    }

    if let Some(field) = key.strip_prefix("TRANSCODER_") {
        if field == "BINARY_PATH" {
            config.transcoder.binary_path = value.to_string();
        }
    }
}

const DEVICE_FIELDS: [&str; 5] = [
    "SAMPLE_RATE",
    "CHANNELS",
    "BITRATE",
    "CODEC",
    "THREAD_QUEUE_SIZE",
];

fn parse_codec(value: &str) -> Option<Codec> {
    match value.to_lowercase().as_str() {
        "opus" => Some(Codec::Opus),
        "aac" => Some(Codec::Aac),
        _ => None,
    }
}

fn apply_device_field(device: &mut super::schema::DeviceConfig, field: &str, value: &str) {
    match field {
        "SAMPLE_RATE" => {
            if let Ok(v) = value.parse() {
                device.sample_rate = v;
            }
        }
        "CHANNELS" => {
            if let Ok(v) = value.parse() {
                device.channels = v;
            }
        }
        "BITRATE" => device.bitrate = value.to_string(),
        "CODEC" => {
            if let Some(c) = parse_codec(value) {
                device.codec = c;
            }
        }
        "THREAD_QUEUE_SIZE" => {
            if let Ok(v) = value.parse() {
                device.thread_queue_size = v;
            }
        }
        _ => {}
    }
}

fn apply_device_override_field(entry: &mut DeviceConfigOverride, field: &str, value: &str) {
    match field {
        "SAMPLE_RATE" => entry.sample_rate = value.parse().ok(),
        "CHANNELS" => entry.channels = value.parse().ok(),
        "BITRATE" => entry.bitrate = Some(value.to_string()),
        "CODEC" => entry.codec = parse_codec(value),
        "THREAD_QUEUE_SIZE" => entry.thread_queue_size = value.parse().ok(),
        _ => {}
    }
}

fn apply_stream_field(stream: &mut super::schema::StreamConfig, field: &str, value: &str) {
    match field {
        "INITIAL_RESTART_DELAY_MS" => {
            if let Ok(v) = value.parse() {
                stream.initial_restart_delay_ms = v;
            }
        }
        "MAX_RESTART_DELAY_MS" => {
            if let Ok(v) = value.parse() {
                stream.max_restart_delay_ms = v;
            }
        }
        "MAX_RESTART_ATTEMPTS" => {
            if let Ok(v) = value.parse() {
                stream.max_restart_attempts = v;
            }
        }
        "USB_STABILIZATION_DELAY_MS" => {
            if let Ok(v) = value.parse() {
                stream.usb_stabilization_delay_ms = v;
            }
        }
        "STOP_TIMEOUT_MS" => {
            if let Ok(v) = value.parse() {
                stream.stop_timeout_ms = v;
            }
        }
        "RECORDING_DIR" => stream.recording_dir = value.to_string(),
        "SEGMENT_DURATION_SECS" => {
            if let Ok(v) = value.parse() {
                stream.segment_duration_secs = v;
            }
        }
        "SEGMENT_FORMAT" => stream.segment_format = value.to_string(),
        "SEGMENT_MAX_AGE_SECS" => {
            if let Ok(v) = value.parse() {
                stream.segment_max_age_secs = v;
            }
        }
        "SEGMENT_MAX_TOTAL_BYTES" => {
            if let Ok(v) = value.parse() {
                stream.segment_max_total_bytes = v;
            }
        }
        _ => {}
    }
}

fn apply_monitor_field(monitor: &mut super::schema::MonitorConfig, field: &str, value: &str) {
    match field {
        "ENABLED" => {
            if let Ok(v) = value.parse() {
                monitor.enabled = v;
            }
        }
        "STALL_CHECK_INTERVAL_SECS" => {
            if let Ok(v) = value.parse() {
                monitor.stall_check_interval_secs = v;
            }
        }
        "MAX_STALL_CHECKS" => {
            if let Ok(v) = value.parse() {
                monitor.max_stall_checks = v;
            }
        }
        "RESTART_UNHEALTHY" => {
            if let Ok(v) = value.parse() {
                monitor.restart_unhealthy = v;
            }
        }
        "RECOVERY_INTERVAL_SECS" => {
            if let Ok(v) = value.parse() {
                monitor.recovery_interval_secs = v;
            }
        }
        "HEALTH_BIND_ADDR" => monitor.health_bind_addr = value.to_string(),
        "LOW_DISK_THRESHOLD_BYTES" => {
            if let Ok(v) = value.parse() {
                monitor.low_disk_threshold_bytes = v;
            }
        }
        _ => {}
    }
}

fn apply_media_router_field(mr: &mut super::schema::MediaRouterConfig, field: &str, value: &str) {
    match field {
        "BASE_URL" => mr.base_url = value.to_string(),
        "TIMEOUT_MS" => {
            if let Ok(v) = value.parse() {
                mr.timeout_ms = v;
            }
        }
        _ => {}
    }
}
