//! Configuration data model.
//!
//! Mirrors the teacher's nested `#[serde(default)]` + manual `Default` composition
//! (`AppConfig` built from per-concern sub-configs), adapted to this system's device
//! model: a "default" block overridden field-by-field per device.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Audio codec understood by the transcoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Opus,
    Aac,
}

impl Default for Codec {
    fn default() -> Self {
        Codec::Opus
    }
}

/// Encoding parameters for one device (or the shared default block).
///
/// Per-device entries only override non-zero/non-empty fields; see [`DeviceConfig::merge_override`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub sample_rate: u32,
    pub channels: u32,
    pub bitrate: String,
    pub codec: Codec,
    pub thread_queue_size: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
            bitrate: "128k".to_string(),
            codec: Codec::Opus,
            thread_queue_size: 4096,
        }
    }
}

/// A sparse per-device override: zero/empty fields mean "inherit the default block".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfigOverride {
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
    pub bitrate: Option<String>,
    pub codec: Option<Codec>,
    pub thread_queue_size: Option<u32>,
}

impl DeviceConfig {
    /// Merge an override onto this (the default) block, producing a fully-populated
    /// `DeviceConfig`. Invariant: the result is valid for every field regardless of
    /// which fields the override set.
    pub fn merge_override(&self, over: &DeviceConfigOverride) -> DeviceConfig {
        DeviceConfig {
            sample_rate: over.sample_rate.filter(|v| *v > 0).unwrap_or(self.sample_rate),
            channels: over.channels.filter(|v| *v > 0).unwrap_or(self.channels),
            bitrate: over
                .bitrate
                .clone()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| self.bitrate.clone()),
            codec: over.codec.unwrap_or(self.codec),
            thread_queue_size: over
                .thread_queue_size
                .filter(|v| *v > 0)
                .unwrap_or(self.thread_queue_size),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("sample_rate must be positive".into());
        }
        if self.channels == 0 || self.channels > 32 {
            return Err("channels must be between 1 and 32".into());
        }
        if self.bitrate.is_empty() {
            return Err("bitrate must not be empty".into());
        }
        Ok(())
    }
}

/// Per-device configuration: a default block plus sparse per-device overrides keyed by
/// the *raw* enumerated device name (not the sanitized token).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    pub default: DeviceConfig,
    pub entries: HashMap<String, DeviceConfigOverride>,
}

impl DevicesConfig {
    /// Materialize the effective `DeviceConfig` for a raw device name.
    pub fn effective_for(&self, raw_name: &str) -> DeviceConfig {
        match self.entries.get(raw_name) {
            Some(over) => self.default.merge_override(over),
            None => self.default.clone(),
        }
    }
}

/// Lifecycle parameters shared by every stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub initial_restart_delay_ms: u64,
    pub max_restart_delay_ms: u64,
    pub max_restart_attempts: u32,
    pub usb_stabilization_delay_ms: u64,
    pub stop_timeout_ms: u64,
    /// Empty string disables recording.
    pub recording_dir: String,
    pub segment_duration_secs: u64,
    pub segment_format: String,
    pub segment_max_age_secs: u64,
    pub segment_max_total_bytes: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            initial_restart_delay_ms: 1000,
            max_restart_delay_ms: 30_000,
            max_restart_attempts: 10,
            usb_stabilization_delay_ms: 2000,
            stop_timeout_ms: 5000,
            recording_dir: String::new(),
            segment_duration_secs: 3600,
            segment_format: "mp4".to_string(),
            segment_max_age_secs: 0,
            segment_max_total_bytes: 0,
        }
    }
}

impl StreamConfig {
    pub fn initial_restart_delay(&self) -> Duration {
        Duration::from_millis(self.initial_restart_delay_ms)
    }

    pub fn max_restart_delay(&self) -> Duration {
        Duration::from_millis(self.max_restart_delay_ms)
    }

    pub fn usb_stabilization_delay(&self) -> Duration {
        Duration::from_millis(self.usb_stabilization_delay_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn recording_dir(&self) -> Option<&str> {
        if self.recording_dir.trim().is_empty() {
            None
        } else {
            Some(&self.recording_dir)
        }
    }
}

/// Stall-detector and health-surface parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub stall_check_interval_secs: u64,
    pub max_stall_checks: u32,
    pub restart_unhealthy: bool,
    pub recovery_interval_secs: u64,
    pub health_bind_addr: String,
    pub low_disk_threshold_bytes: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stall_check_interval_secs: 60,
            max_stall_checks: 3,
            restart_unhealthy: true,
            recovery_interval_secs: 300,
            health_bind_addr: "0.0.0.0:9998".to_string(),
            low_disk_threshold_bytes: 100 * 1024 * 1024,
        }
    }
}

impl MonitorConfig {
    pub fn stall_check_interval(&self) -> Duration {
        Duration::from_secs(self.stall_check_interval_secs)
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_interval_secs)
    }
}

/// Media-router HTTP client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaRouterConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for MediaRouterConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9997".to_string(),
            timeout_ms: 5000,
        }
    }
}

impl MediaRouterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Transcoder binary resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    pub binary_path: String,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
        }
    }
}

/// The full configuration document: YAML file + env overrides merge into this.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub devices: DevicesConfig,
    pub stream: StreamConfig,
    pub monitor: MonitorConfig,
    pub media_router: MediaRouterConfig,
    pub transcoder: TranscoderConfig,
}

impl AppConfig {
    /// Validate everything that can be checked statically (merged per-device configs are
    /// validated lazily as each device is discovered, since `entries` is keyed by raw
    /// device names that may not exist on this host).
    pub fn validate(&self) -> Result<(), String> {
        self.devices.default.validate()?;
        if self.monitor.max_stall_checks == 0 {
            return Err("monitor.max_stall_checks must be positive".into());
        }
        if self.media_router.base_url.is_empty() {
            return Err("media_router.base_url must not be empty".into());
        }
        if self.transcoder.binary_path.trim().is_empty() {
            return Err("transcoder.binary_path must not be empty".into());
        }
        Ok(())
    }
}
