//! Segment retention cleaner (C11).
//!
//! Runs only when a recording directory is configured and at least one retention bound is
//! positive. Deletes files older than `segmentMaxAge`, then deletes oldest-first until
//! the total size is under `segmentMaxTotalBytes`. The single most-recently-modified file
//! is always skipped in each pass — the retention cleaner and the transcoder's segment
//! writer are otherwise uncoordinated, and deleting the file currently being appended to
//! is not atomic on every platform.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;

use crate::config::StreamConfig;
use crate::error::{AppError, Result};

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

struct SegmentFile {
    path: std::path::PathBuf,
    modified: SystemTime,
    size: u64,
}

fn list_segments(dir: &Path) -> Result<Vec<SegmentFile>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        files.push(SegmentFile {
            path: entry.path(),
            modified: metadata.modified()?,
            size: metadata.len(),
        });
    }
    Ok(files)
}

fn remove_best_effort(path: &Path) {
    if let Err(source) = std::fs::remove_file(path) {
        let err = AppError::SegmentCleanupError {
            path: path.display().to_string(),
            source,
        };
        tracing::warn!("{}", err);
    }
}

/// Run one retention pass over `recording_dir`.
pub fn sweep_once(recording_dir: &Path, stream: &StreamConfig) {
    let mut files = match list_segments(recording_dir) {
        Ok(files) => files,
        Err(e) => {
            tracing::warn!(dir = %recording_dir.display(), error = %e, "segment cleanup error");
            return;
        }
    };

    if files.is_empty() {
        return;
    }

    // Never delete the single newest file: it may still be open for writing.
    let newest_index = files
        .iter()
        .enumerate()
        .max_by_key(|(_, f)| f.modified)
        .map(|(i, _)| i);
    let newest_path = newest_index.map(|i| files[i].path.clone());

    if stream.segment_max_age_secs > 0 {
        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs(stream.segment_max_age_secs))
            .unwrap_or(SystemTime::UNIX_EPOCH);

        files.retain(|f| {
            let is_newest = newest_path.as_deref() == Some(f.path.as_path());
            if !is_newest && f.modified < cutoff {
                remove_best_effort(&f.path);
                false
            } else {
                true
            }
        });
    }

    if stream.segment_max_total_bytes > 0 {
        files.sort_by_key(|f| f.modified);
        let mut total: u64 = files.iter().map(|f| f.size).sum();
        let budget = stream.segment_max_total_bytes;

        let mut i = 0;
        while total > budget && i < files.len() {
            let is_newest = newest_path.as_deref() == Some(files[i].path.as_path());
            if is_newest {
                i += 1;
                continue;
            }
            remove_best_effort(&files[i].path);
            total = total.saturating_sub(files[i].size);
            i += 1;
        }
    }
}

/// Run the retention cleaner until `cancel` fires: once immediately, then hourly.
/// No-op entirely if `stream.recording_dir()` is unset or neither bound is positive.
pub async fn run(stream_config_getter: impl Fn() -> StreamConfig, cancel: CancellationToken) {
    let should_run = |s: &StreamConfig| {
        s.recording_dir().is_some()
            && (s.segment_max_age_secs > 0 || s.segment_max_total_bytes > 0)
    };

    let initial = stream_config_getter();
    if !should_run(&initial) {
        return;
    }

    sweep_in_background(initial).await;

    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => sweep_in_background(stream_config_getter()).await,
            _ = cancel.cancelled() => return,
        }
    }
}

/// Directory scans and deletes are blocking filesystem work; run them off the async
/// executor so a large recording directory never stalls other tasks.
async fn sweep_in_background(stream: StreamConfig) {
    let Some(dir) = stream.recording_dir().map(PathBuf::from) else {
        return;
    };
    let _ = tokio::task::spawn_blocking(move || sweep_once(&dir, &stream)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_file(dir: &Path, name: &str, contents: &[u8]) {
        let mut f = File::create(dir.join(name)).unwrap();
        f.write_all(contents).unwrap();
    }

    #[test]
    fn skips_newest_file_even_when_over_size_budget() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a.mp4", &[0u8; 10]);
        std::thread::sleep(Duration::from_millis(10));
        write_file(dir.path(), "b.mp4", &[0u8; 10]);

        let mut stream = StreamConfig::default();
        stream.segment_max_total_bytes = 1;

        sweep_once(dir.path(), &stream);

        let remaining: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(remaining.len(), 1);
        assert!(dir.path().join("b.mp4").exists());
    }

    #[test]
    fn deletes_nothing_when_under_budget() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a.mp4", &[0u8; 10]);

        let mut stream = StreamConfig::default();
        stream.segment_max_total_bytes = 1000;

        sweep_once(dir.path(), &stream);
        assert!(dir.path().join("a.mp4").exists());
    }

    #[test]
    fn age_based_deletion_skips_newest() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "old.mp4", &[0u8; 4]);

        let mut stream = StreamConfig::default();
        stream.segment_max_age_secs = 0;
        stream.segment_max_total_bytes = 0;
        sweep_once(dir.path(), &stream);
        assert!(dir.path().join("old.mp4").exists(), "no-op when both bounds are zero");
    }
}
