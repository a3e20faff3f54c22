//! Transcoder process runner (C4).
//!
//! Launches the external transcoder with a fully-materialized argument vector and waits
//! for it to exit, with cooperative-then-forceful termination on cancellation. Grounded
//! in the teacher's extension process manager (spawn + piped log collection), extended
//! with a graceful-stop timeout that manager lacks.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::{DeviceConfig, StreamConfig};
use crate::error::{AppError, Result};

/// Everything needed to materialize one transcoder invocation.
#[derive(Debug, Clone)]
pub struct TranscoderSpec {
    pub device_name: String,
    pub capture_uri: String,
    pub output_url: String,
    pub device: DeviceConfig,
    pub stream: StreamConfig,
}

impl TranscoderSpec {
    /// Build the positional argument vector: capture URI, codec, sample rate, channel
    /// count, bitrate, thread-queue size, optional segment-writer parameters, output URL.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            "alsa".to_string(),
            "-thread_queue_size".to_string(),
            self.device.thread_queue_size.to_string(),
            "-i".to_string(),
            self.capture_uri.clone(),
            "-c:a".to_string(),
            codec_name(self.device.codec).to_string(),
            "-ar".to_string(),
            self.device.sample_rate.to_string(),
            "-ac".to_string(),
            self.device.channels.to_string(),
            "-b:a".to_string(),
            self.device.bitrate.clone(),
        ];

        if let Some(dir) = self.stream.recording_dir() {
            args.push("-f".to_string());
            args.push("segment".to_string());
            args.push("-segment_time".to_string());
            args.push(self.stream.segment_duration_secs.to_string());
            args.push("-segment_format".to_string());
            args.push(self.stream.segment_format.clone());
            args.push("-strftime".to_string());
            args.push("1".to_string());
            args.push(format!(
                "{}/{}-%Y%m%d%H%M%S.{}",
                dir.trim_end_matches('/'),
                self.device_name,
                self.stream.segment_format
            ));
        }

        args.push("-f".to_string());
        args.push("rtsp".to_string());
        args.push(self.output_url.clone());

        args
    }
}

fn codec_name(codec: crate::config::Codec) -> &'static str {
    match codec {
        crate::config::Codec::Opus => "libopus",
        crate::config::Codec::Aac => "aac",
    }
}

/// How the child's run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitInfo {
    /// Exited on its own with the given status code.
    Exited(i32),
    /// We killed it as part of cancellation/shutdown.
    KilledByUs,
}

/// Resolve and verify the transcoder binary once at orchestrator startup.
pub fn resolve_binary(binary_path: &str) -> Result<PathBuf> {
    let path = Path::new(binary_path);
    if path.is_absolute() || path.components().count() > 1 {
        let metadata = std::fs::metadata(path)
            .map_err(|_| AppError::TranscoderBinaryUnresolved(binary_path.to_string()))?;
        if !metadata.is_file() {
            return Err(AppError::TranscoderBinaryUnresolved(binary_path.to_string()));
        }
        return Ok(path.to_path_buf());
    }

    // Bare command name: resolve against PATH, the way a shell would.
    let path_var = std::env::var_os("PATH").ok_or_else(|| {
        AppError::TranscoderBinaryUnresolved(binary_path.to_string())
    })?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(binary_path);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(AppError::TranscoderBinaryUnresolved(binary_path.to_string()))
}

/// Launch the transcoder and block until it exits or `cancel` fires.
///
/// On cancellation: send SIGTERM, wait up to `stop_timeout`, then SIGKILL. Stdin is
/// detached; stdout/stderr are piped to a per-device log collector when `log_path` is set,
/// otherwise discarded.
pub async fn run(
    binary: &Path,
    spec: &TranscoderSpec,
    stop_timeout: Duration,
    log_path: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<ExitInfo> {
    let args = spec.build_args();

    tracing::info!(
        device = %spec.device_name,
        "launching transcoder: {} {}",
        binary.display(),
        args.join(" ")
    );

    let mut command = Command::new(binary);
    command
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn()?;
    let pid = child.id();

    if let Some(stdout) = child.stdout.take() {
        spawn_log_collector(spec.device_name.clone(), "stdout", stdout, log_path.map(Path::to_path_buf));
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_log_collector(spec.device_name.clone(), "stderr", stderr, log_path.map(Path::to_path_buf));
    }

    tokio::select! {
        status = child.wait() => {
            let status = status?;
            match status.code() {
                Some(0) => Ok(ExitInfo::Exited(0)),
                Some(code) => Ok(ExitInfo::Exited(code)),
                None => Ok(ExitInfo::Exited(-1)),
            }
        }
        _ = cancel.cancelled() => {
            terminate(&mut child, pid, stop_timeout).await;
            Ok(ExitInfo::KilledByUs)
        }
    }
}

async fn terminate(child: &mut tokio::process::Child, pid: Option<u32>, stop_timeout: Duration) {
    if let Some(pid) = pid {
        if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            tracing::debug!("SIGTERM failed for pid {pid}: {e}");
        }
    }

    if tokio::time::timeout(stop_timeout, child.wait()).await.is_ok() {
        return;
    }

    tracing::warn!("transcoder did not exit within stop_timeout, force-killing");
    let _ = child.kill().await;
    let _ = child.wait().await;
}

fn spawn_log_collector<R>(device_name: String, stream_name: &'static str, reader: R, log_path: Option<PathBuf>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut file = match &log_path {
            Some(path) => tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .ok(),
            None => None,
        };

        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    tracing::debug!(device = %device_name, stream = stream_name, "{}", line);
                    if let Some(file) = file.as_mut() {
                        let _ = file.write_all(format!("[{stream_name}] {line}\n").as_bytes()).await;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(device = %device_name, "error reading {stream_name}: {e}");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Codec, DeviceConfig, StreamConfig};

    fn spec() -> TranscoderSpec {
        TranscoderSpec {
            device_name: "blue_yeti".to_string(),
            capture_uri: "hw:0".to_string(),
            output_url: "rtsp://localhost:8554/blue_yeti".to_string(),
            device: DeviceConfig {
                sample_rate: 48000,
                channels: 2,
                bitrate: "128k".to_string(),
                codec: Codec::Opus,
                thread_queue_size: 4096,
            },
            stream: StreamConfig::default(),
        }
    }

    #[test]
    fn build_args_includes_codec_and_uri() {
        let args = spec().build_args();
        assert!(args.contains(&"hw:0".to_string()));
        assert!(args.contains(&"libopus".to_string()));
        assert!(args.contains(&"rtsp://localhost:8554/blue_yeti".to_string()));
    }

    #[test]
    fn build_args_omits_segment_writer_when_recording_dir_unset() {
        let args = spec().build_args();
        assert!(!args.contains(&"segment".to_string()));
    }

    #[test]
    fn build_args_includes_segment_writer_when_recording_dir_set() {
        let mut s = spec();
        s.stream.recording_dir = "/var/lib/lyrebird/segments".to_string();
        let args = s.build_args();
        assert!(args.contains(&"segment".to_string()));
        assert!(args.iter().any(|a| a.contains("blue_yeti-%Y%m%d%H%M%S")));
    }

    #[test]
    fn resolve_binary_rejects_missing_absolute_path() {
        let result = resolve_binary("/nonexistent/path/to/ffmpeg");
        assert!(matches!(result, Err(AppError::TranscoderBinaryUnresolved(_))));
    }

    #[test]
    fn resolve_binary_finds_true_on_path() {
        let result = resolve_binary("true");
        assert!(result.is_ok());
    }
}
