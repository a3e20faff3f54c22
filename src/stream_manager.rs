//! Stream Manager (C5) — per-device control loop.
//!
//! One instance owns one device name end-to-end: lock acquisition, launching the
//! transcoder, backoff on failure, and giving up after `maxRestartAttempts`. Grounded in
//! the teacher's audio health monitor retry bookkeeping (`audio/monitor.rs`), combined
//! with C1/C2/C3/C4.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::backoff;
use crate::config::StreamConfig;
use crate::error::{AppError, Result};
use crate::lock::DeviceLock;
use crate::registry::Service;
use crate::transcoder::{self, ExitInfo, TranscoderSpec};

/// Point-in-time state of one Stream Manager, as surfaced by the registry's `Status()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Starting,
    Running,
    FailedAttempt,
    Failed,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct StreamStatus {
    pub name: String,
    pub state: StreamState,
    pub start_time: Option<Instant>,
    pub restarts: u32,
    pub last_error: Option<String>,
}

/// Owns one device's lifecycle: lock, transcoder process, backoff/attempt bookkeeping.
pub struct StreamManager {
    name: String,
    lock_dir: PathBuf,
    log_dir: Option<PathBuf>,
    binary: PathBuf,
    spec: TranscoderSpec,
    stream_config: StreamConfig,
    state: parking_lot::Mutex<StreamStatus>,
}

impl StreamManager {
    pub fn new(
        name: String,
        lock_dir: PathBuf,
        log_dir: Option<PathBuf>,
        binary: PathBuf,
        spec: TranscoderSpec,
        stream_config: StreamConfig,
    ) -> Self {
        let status = StreamStatus {
            name: name.clone(),
            state: StreamState::Idle,
            start_time: None,
            restarts: 0,
            last_error: None,
        };
        Self {
            name,
            lock_dir,
            log_dir,
            binary,
            spec,
            stream_config,
            state: parking_lot::Mutex::new(status),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> StreamStatus {
        self.state.lock().clone()
    }

    fn set_state(&self, state: StreamState) {
        self.state.lock().state = state;
    }

    /// Drive the device's lifecycle until `cancel` fires or the restart budget is
    /// exhausted. Returns `Ok(())` on orderly cancellation, `Err` otherwise.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut lock = match DeviceLock::acquire(&self.lock_dir, &self.name) {
            Ok(lock) => lock,
            Err(e) => {
                self.set_state(StreamState::Failed);
                self.state.lock().last_error = Some(e.to_string());
                return Err(e);
            }
        };

        let mut attempt: u32 = 0;
        let log_path = self
            .log_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.log", self.name)));

        let result = loop {
            if cancel.is_cancelled() {
                break Ok(());
            }

            self.set_state(StreamState::Starting);
            self.state.lock().start_time = Some(Instant::now());

            let run_result = transcoder::run(
                &self.binary,
                &self.spec,
                self.stream_config.stop_timeout(),
                log_path.as_deref(),
                &cancel,
            )
            .await;

            match run_result {
                Err(e) => {
                    self.set_state(StreamState::FailedAttempt);
                    self.state.lock().last_error = Some(e.to_string());
                    break Err(e);
                }
                Ok(ExitInfo::KilledByUs) => {
                    self.set_state(StreamState::Stopped);
                    break Ok(());
                }
                Ok(ExitInfo::Exited(0)) => {
                    attempt = 0;
                    self.set_state(StreamState::Idle);
                    self.state.lock().restarts += 1;
                    if sleep_cancellable(Duration::from_millis(200), &cancel).await {
                        break Ok(());
                    }
                }
                Ok(ExitInfo::Exited(code)) => {
                    self.set_state(StreamState::FailedAttempt);
                    attempt += 1;
                    self.state.lock().restarts += 1;
                    let exit_err = AppError::TranscoderExitNonZero(code);
                    self.state.lock().last_error = Some(exit_err.to_string());

                    if attempt > self.stream_config.max_restart_attempts {
                        self.set_state(StreamState::Failed);
                        break Err(AppError::MaxAttemptsExceeded {
                            name: self.name.clone(),
                            last_error: exit_err.to_string(),
                        });
                    }

                    let delay = backoff::next_delay(
                        attempt,
                        self.stream_config.initial_restart_delay(),
                        self.stream_config.max_restart_delay(),
                    );
                    if sleep_cancellable(delay, &cancel).await {
                        break Ok(());
                    }
                }
            }
        };

        lock.release();
        result
    }

    /// Release the lock and any held resources. Idempotent; safe before and after `run`.
    pub fn close(&self) {
        // `run` always releases its own lock on every exit path; nothing to do here
        // beyond being a safe no-op for callers that invoke it speculatively.
    }
}

#[async_trait]
impl Service for StreamManager {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        StreamManager::run(self, cancel).await
    }

    fn restarts(&self) -> u32 {
        self.status().restarts
    }
}

/// Sleep for `duration` unless `cancel` fires first. Returns `true` if cancelled.
async fn sleep_cancellable(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = cancel.cancelled() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Codec, DeviceConfig};
    use tempfile::tempdir;

    fn make_spec(uri: &str) -> TranscoderSpec {
        TranscoderSpec {
            device_name: "dev".to_string(),
            capture_uri: uri.to_string(),
            output_url: "rtsp://localhost:8554/dev".to_string(),
            device: DeviceConfig::default(),
            stream: StreamConfig::default(),
        }
    }

    #[tokio::test]
    async fn run_returns_ok_on_immediate_cancellation() {
        let dir = tempdir().unwrap();
        let manager = StreamManager::new(
            "dev".to_string(),
            dir.path().to_path_buf(),
            None,
            PathBuf::from("true"),
            make_spec("hw:0"),
            StreamConfig::default(),
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = manager.run(cancel).await;
        assert!(result.is_ok());
        assert_eq!(manager.status().state, StreamState::Stopped);
    }

    #[tokio::test]
    async fn run_reports_already_locked_when_lock_held() {
        let dir = tempdir().unwrap();
        let _held = DeviceLock::acquire(dir.path(), "dev").unwrap();

        let manager = StreamManager::new(
            "dev".to_string(),
            dir.path().to_path_buf(),
            None,
            PathBuf::from("true"),
            make_spec("hw:0"),
            StreamConfig::default(),
        );

        let cancel = CancellationToken::new();
        let result = manager.run(cancel).await;
        assert!(matches!(result, Err(AppError::AlreadyLocked(name)) if name == "dev"));
        assert_eq!(manager.status().state, StreamState::Failed);
    }

    #[tokio::test]
    async fn run_exhausts_attempts_against_a_binary_that_always_fails() {
        let dir = tempdir().unwrap();
        let mut stream_config = StreamConfig::default();
        stream_config.max_restart_attempts = 1;
        stream_config.initial_restart_delay_ms = 1;
        stream_config.max_restart_delay_ms = 2;

        let manager = StreamManager::new(
            "dev".to_string(),
            dir.path().to_path_buf(),
            None,
            PathBuf::from("false"),
            make_spec("hw:0"),
            stream_config,
        );

        let cancel = CancellationToken::new();
        let result = manager.run(cancel).await;
        assert!(matches!(result, Err(AppError::MaxAttemptsExceeded { .. })));
        assert_eq!(manager.status().state, StreamState::Failed);
    }
}
