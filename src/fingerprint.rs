//! Fingerprint: a deterministic digest of the parameters that change a transcoder's
//! command line, used to decide whether a config reload requires a restart.
//!
//! A trivial `format!`-style concatenation with unambiguous separators (`\x1f`, the ASCII
//! unit separator — none of the fields can contain it) is sufficient — no cryptographic
//! digest is needed, since the only requirement is that equal inputs produce equal digests
//! and any field change produces a different one.

use crate::config::{DeviceConfig, StreamConfig};

const SEP: char = '\x1f';

/// Compute the fingerprint for one device's effective configuration, capture URI, and the
/// stream-config fields that affect the transcoder's argument vector.
pub fn compute(device: &DeviceConfig, capture_uri: &str, stream: &StreamConfig) -> String {
    format!(
        "uri={}{sep}sr={}{sep}ch={}{sep}br={}{sep}codec={:?}{sep}tqs={}{sep}dir={}{sep}segdur={}{sep}segfmt={}",
        capture_uri,
        device.sample_rate,
        device.channels,
        device.bitrate,
        device.codec,
        device.thread_queue_size,
        stream.recording_dir().unwrap_or(""),
        stream.segment_duration_secs,
        stream.segment_format,
        sep = SEP,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Codec, DeviceConfig, StreamConfig};

    fn device() -> DeviceConfig {
        DeviceConfig {
            sample_rate: 48000,
            channels: 2,
            bitrate: "128k".to_string(),
            codec: Codec::Opus,
            thread_queue_size: 4096,
        }
    }

    #[test]
    fn equal_inputs_produce_equal_fingerprints() {
        let a = compute(&device(), "hw:0", &StreamConfig::default());
        let b = compute(&device(), "hw:0", &StreamConfig::default());
        assert_eq!(a, b);
    }

    #[test]
    fn changing_bitrate_changes_fingerprint() {
        let a = compute(&device(), "hw:0", &StreamConfig::default());
        let mut d2 = device();
        d2.bitrate = "192k".to_string();
        let b = compute(&d2, "hw:0", &StreamConfig::default());
        assert_ne!(a, b);
    }

    #[test]
    fn changing_uri_changes_fingerprint() {
        let a = compute(&device(), "hw:0", &StreamConfig::default());
        let b = compute(&device(), "hw:1", &StreamConfig::default());
        assert_ne!(a, b);
    }

    #[test]
    fn changing_recording_dir_changes_fingerprint() {
        let a = compute(&device(), "hw:0", &StreamConfig::default());
        let mut s2 = StreamConfig::default();
        s2.recording_dir = "/var/lib/lyrebird/segments".to_string();
        let b = compute(&device(), "hw:0", &s2);
        assert_ne!(a, b);
    }

    #[test]
    fn unrelated_fields_do_not_affect_fingerprint() {
        let mut s1 = StreamConfig::default();
        let mut s2 = StreamConfig::default();
        s1.max_restart_attempts = 5;
        s2.max_restart_attempts = 50;
        let a = compute(&device(), "hw:0", &s1);
        let b = compute(&device(), "hw:0", &s2);
        assert_eq!(a, b);
    }
}
